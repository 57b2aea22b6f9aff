//! End-to-end tests of the transaction API: scopes, ambient reads, implicit transactions and
//! observer notifications.

use std::rc::Rc;
use typetx::{
    ActionResult, ComplexType, Config, ContainerId, Context, Error, SetOptions, TransactionState,
    Value, observer::recording::RecordingObserver, values,
};

struct Derived {
    ctx: Context,
    target: ContainerId,
    list: ContainerId,
}

/// `Derived { foo: 5, bar: 6, myList: [1] }`
fn derived() -> Derived {
    let mut ctx = Context::new();
    let schema = ComplexType::new("Derived", ["foo", "bar", "myList"]);
    let list = ctx.create_list(values![1]).unwrap();
    let target = ctx
        .create_complex(
            &schema,
            [("foo", 5.into()), ("bar", 6.into()), ("myList", list.into())],
        )
        .unwrap();
    Derived { ctx, target, list }
}

#[test]
fn derived_scenario() {
    let Derived {
        mut ctx,
        target,
        list,
    } = derived();

    let mut scope = ctx.enter_change();
    scope.set(target, "foo", 10).unwrap();
    scope.list_add(list, values![3]).unwrap();

    let changeset = scope.changeset(target).unwrap();
    let complex = changeset.as_complex().unwrap();
    let names: Vec<String> = complex
        .property_names()
        .iter()
        .map(|name| name.to_string())
        .collect();
    assert_eq!(names, ["foo", "myList"]);
    assert_eq!(
        complex.get_change("foo").unwrap().unwrap().value(),
        Value::Int(10)
    );
    assert_eq!(complex.get_change("myList").unwrap().unwrap().type_name(), "list");
    assert!(complex.get_change("bar").unwrap().is_none());
    assert!(complex.get_change("baz").unwrap_err().is_argument_invalid());

    // ambient read-through before commit
    assert_eq!(scope.list(list).unwrap().elements(), values![1, 3].as_slice());
    assert_eq!(scope.version(target).unwrap(), 0);

    let committed = scope.accept().unwrap();
    assert_eq!(committed.state(), TransactionState::Committed);
    assert!(committed.changesets().iter().all(|c| c.is_read_only()));

    assert_eq!(ctx.version(target).unwrap(), 1);
    assert_eq!(ctx.version(list).unwrap(), 1);
    assert_eq!(ctx.get(target, "foo").unwrap(), Value::Int(10));
    assert_eq!(ctx.get(target, "bar").unwrap(), Value::Int(6));
    assert_eq!(ctx.list(list).unwrap().elements(), values![1, 3].as_slice());
}

#[test]
fn no_op_sets_are_not_recorded() {
    let Derived {
        mut ctx, target, ..
    } = derived();
    let mut scope = ctx.enter_change();
    scope.set(target, "foo", 5).unwrap();
    // the changeset exists, but is empty and untouched
    let changeset = scope.changeset(target).unwrap();
    assert!(!changeset.has_changes());
    assert_eq!(changeset.transaction_version(), 0);

    scope.set(target, "foo", 7).unwrap();
    scope.set(target, "foo", 7).unwrap();
    assert_eq!(changeset.transaction_version(), 1);
}

#[test]
fn mutations_outside_scopes_commit_implicitly() {
    let Derived {
        mut ctx,
        target,
        list,
    } = derived();
    ctx.set(target, "bar", "six").unwrap();
    ctx.list_insert(list, 0, values![0]).unwrap();
    ctx.list_set(list, values![2, 0], SetOptions::replace_all())
        .unwrap();
    ctx.list_sort(list, Value::natural_cmp).unwrap();

    assert_eq!(ctx.get(target, "bar").unwrap(), Value::from("six"));
    assert_eq!(ctx.list(list).unwrap().elements(), values![0, 2].as_slice());
    // every list commit also commits the container holding the list
    assert_eq!(ctx.version(list).unwrap(), 4);
    assert_eq!(ctx.version(target).unwrap(), 4);
    assert_eq!(ctx.current_transaction(), None);
}

#[test]
fn list_edits_through_scopes() {
    let Derived { mut ctx, list, .. } = derived();
    let mut scope = ctx.enter_change();
    scope.list_add(list, values![2, 3, 4]).unwrap();
    scope.list_remove(list, values![3, 99]).unwrap();
    scope.list_remove_at(list, 0, 1).unwrap();
    scope.list_insert(list, 1, values![5]).unwrap();
    assert_eq!(scope.list(list).unwrap().elements(), values![2, 5, 4].as_slice());

    let changeset = scope.changeset(list).unwrap();
    let kinds: Vec<_> = changeset
        .as_list()
        .unwrap()
        .changes()
        .iter()
        .map(|change| change.kind())
        .collect();
    assert_eq!(kinds, ["add", "add", "add", "remove", "remove", "add"]);

    scope.list_clear(list).unwrap();
    assert!(scope.list(list).unwrap().is_empty());
    scope.accept().unwrap();
    assert!(ctx.list(list).unwrap().is_empty());
}

#[test]
fn changes_propagate_to_holding_containers() {
    let mut ctx = Context::new();
    let node = ComplexType::new("Node", ["child", "label"]);
    let leaf = ctx.create_list(values!["a"]).unwrap();
    let middle = ctx
        .create_complex(&node, [("child", leaf.into())])
        .unwrap();
    let root = ctx
        .create_complex(&node, [("child", middle.into())])
        .unwrap();

    let recorder = Rc::new(RecordingObserver::new());
    for id in [leaf, middle, root] {
        ctx.observe(id, recorder.clone()).unwrap();
    }

    let mut scope = ctx.enter_change();
    scope.list_add(leaf, values!["b"]).unwrap();
    assert_eq!(scope.preview().unwrap(), ActionResult::Fulfilled);
    let tx = scope.transaction_id();
    let orders: Vec<_> = scope
        .transaction(tx)
        .unwrap()
        .changesets()
        .iter()
        .map(|c| (c.target(), c.net_order()))
        .collect();
    assert_eq!(orders, [(leaf, 0), (middle, 1), (root, 2)]);
    let committed = scope.accept().unwrap();

    let version = committed.version().unwrap();
    for id in [leaf, middle, root] {
        assert_eq!(ctx.version(id).unwrap(), version);
    }
    assert_eq!(
        recorder.changes_seen(),
        [
            format!("will_change {leaf} list [add]"),
            format!("will_change {middle} complex [child]"),
            format!("will_change {root} complex [child]"),
            format!("did_change {leaf} list [add]"),
            format!("did_change {middle} complex [child]"),
            format!("did_change {root} complex [child]"),
        ]
    );
}

#[test]
fn transactions_can_be_suspended_and_resumed() {
    let Derived {
        mut ctx, target, ..
    } = derived();
    let mut scope = ctx.enter_change();
    scope.set(target, "foo", 10).unwrap();
    let tx = scope.suspend();

    assert_eq!(ctx.current_transaction(), None);
    assert_eq!(ctx.get(target, "foo").unwrap(), Value::Int(5));
    assert_eq!(ctx.transaction(tx).unwrap().scope_count(), 0);

    let mut scope = ctx.enter(tx).unwrap();
    assert_eq!(scope.current_transaction(), Some(tx));
    assert_eq!(scope.get(target, "foo").unwrap(), Value::Int(10));
    scope.set(target, "bar", 11).unwrap();
    scope.accept().unwrap();
    assert_eq!(ctx.get(target, "bar").unwrap(), Value::Int(11));
}

#[test]
fn references_to_foreign_containers_are_rejected() {
    let Derived {
        mut ctx, target, ..
    } = derived();
    let mut other = Context::with_config(Config {
        first_id: 1000,
        ..Config::default()
    });
    let foreign = other.create_list(values![]).unwrap();

    let error = ctx.set(target, "myList", foreign).unwrap_err();
    assert!(matches!(error, Error::NotFound(id) if id == foreign));
    assert!(error.is_argument_invalid());
    assert!(ctx.create_list(values![foreign]).is_err());
    assert_eq!(ctx.version(target).unwrap(), 0);
}
