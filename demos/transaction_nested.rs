use std::rc::Rc;
use typetx::{
    Changeset, ComplexType, Context, RejectReason, complex_type,
    observer::{Validator, recording::RecordingObserver},
    values,
};

fn main() {
    let mut ctx = Context::new();
    let order: Rc<ComplexType> = complex_type!(Order { customer, lines, total });
    let line = complex_type!(Line { product, quantity });

    // order -> lines -> line
    let first_line = ctx
        .create_complex(&line, [("product", "tea".into()), ("quantity", 1.into())])
        .unwrap();
    let lines = ctx.create_list(values![first_line]).unwrap();
    let order_id = ctx
        .create_complex(
            &order,
            [("customer", "Bob".into()), ("lines", lines.into())],
        )
        .unwrap();

    // Quantities must stay positive
    ctx.observe(
        first_line,
        Rc::new(Validator(|changeset: &Changeset| -> Result<(), RejectReason> {
            let quantity = changeset
                .as_complex()
                .and_then(|c| c.get_change("quantity").ok().flatten())
                .and_then(|change| change.value().as_int());
            match quantity {
                Some(q) if q <= 0 => Err("quantity must be positive".into()),
                _ => Ok(()),
            }
        })),
    )
    .unwrap();

    let recorder = Rc::new(RecordingObserver::new());
    for id in [first_line, lines, order_id] {
        ctx.observe(id, recorder.clone()).unwrap();
    }

    // A change deep down reaches every container holding it
    ctx.set(first_line, "quantity", 3).unwrap();
    println!("Notifications for a nested change:");
    for call in recorder.changes_seen() {
        println!("  {call}");
    }
    println!(
        "Versions: line {}, lines {}, order {}",
        ctx.version(first_line).unwrap(),
        ctx.version(lines).unwrap(),
        ctx.version(order_id).unwrap()
    );

    // Preview a transaction before deciding to commit it
    recorder.reset();
    let mut scope = ctx.enter_change();
    scope.set(first_line, "quantity", 0).unwrap();
    scope.set(order_id, "total", 0).unwrap();
    let preview = scope.preview().unwrap();
    drop(scope);
    println!("\nPreview: {preview:?}");
    println!(
        "Quantity after the rejected preview: {}",
        ctx.get(first_line, "quantity").unwrap()
    );
    for call in recorder.changes_seen() {
        println!("  {call}");
    }
}
