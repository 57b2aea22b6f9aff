use typetx::{Context, Value, complex_type, values};

fn main() {
    let mut ctx = Context::new();
    let person = complex_type!(Person { name, age, tags });

    // Create some containers
    let tags = ctx.create_list(values!["admin"]).unwrap();
    let alice = ctx
        .create_complex(
            &person,
            [
                ("name", "Alice".into()),
                ("age", 30.into()),
                ("tags", tags.into()),
            ],
        )
        .unwrap();

    // Change them within one transaction
    {
        let mut scope = ctx.enter_change();
        scope.set(alice, "age", 31).unwrap();
        scope.list_add(tags, values!["editor"]).unwrap();

        // Reads see the pending changes while the transaction is current
        println!("Pending age: {}", scope.get(alice, "age").unwrap());
        println!("Pending tags: {:?}", scope.list(tags).unwrap());

        let changeset = scope.changeset(alice).unwrap();
        let names: Vec<_> = changeset
            .as_complex()
            .unwrap()
            .property_names()
            .iter()
            .map(|name| name.to_string())
            .collect();
        println!("Changed properties: {names:?}");

        let committed = scope.accept().unwrap();
        println!(
            "Committed {} changesets at version {}",
            committed.changesets().len(),
            committed.version().unwrap()
        );
    }

    // Outside of a scope, every mutation commits on its own
    ctx.set(alice, "name", "Alice Liddell").unwrap();

    match ctx.get(alice, "name").unwrap() {
        Value::Str(name) => println!("Name: {name}"),
        other => println!("Unexpected name: {other}"),
    }
    println!("Version of alice: {}", ctx.version(alice).unwrap());
}
