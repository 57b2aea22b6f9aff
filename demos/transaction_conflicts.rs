use typetx::{Context, RejectReason, complex_type};

fn main() {
    let mut ctx = Context::new();
    let account = complex_type!(Account { owner, balance });
    let id = ctx
        .create_complex(&account, [("owner", "Carol".into()), ("balance", 100.into())])
        .unwrap();

    // Start a transaction and put it aside
    let pending = {
        let mut scope = ctx.enter_change();
        scope.set(id, "balance", 150).unwrap();
        scope.suspend()
    };

    // Meanwhile, another transaction commits to the same container
    ctx.set(id, "balance", 80).unwrap();

    // Resuming the first one detects the conflict
    match ctx.enter(pending) {
        Ok(_) => println!("Expected a concurrency error"),
        Err(error) => {
            println!("Resuming failed: {error}");
            if error.reject_reason() == Some(&RejectReason::Concurrency) {
                println!("The transaction was rejected and its changes dropped.");
            }
        }
    }

    println!("Balance: {}", ctx.get(id, "balance").unwrap());
    println!("\nStale transactions never overwrite newer commits.");
}
