//! `watch_collection` and `watch_group`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use vigil_core::{Array, Object, Value};
use vigil_runtime::{Scope, watch_fn};

fn counting_collection_watch(root: &Scope, field: &'static str) -> Rc<Cell<u32>> {
    let count = Rc::new(Cell::new(0));
    let c = Rc::clone(&count);
    root.watch_collection(move |s| s.get(field), move |_, _, _| c.set(c.get() + 1))
        .unwrap();
    count
}

#[test]
fn array_push_fires_once_then_stays_clean() {
    let root = Scope::new_root();
    root.set("list", Value::array([Value::from(1), Value::from(2)]));
    let count = counting_collection_watch(&root, "list");
    root.digest().unwrap();
    assert_eq!(count.get(), 1);

    let list = root.get("list");
    list.as_array().unwrap().push(3);
    root.digest().unwrap();
    assert_eq!(count.get(), 2);

    root.digest().unwrap();
    assert_eq!(count.get(), 2);
}

#[test]
fn array_element_replacement_and_removal_fire() {
    let root = Scope::new_root();
    let list = Array::from_vec(vec![Value::from(1), Value::from(2), Value::from(3)]);
    root.set("list", list.clone());
    let count = counting_collection_watch(&root, "list");
    root.digest().unwrap();

    list.set(1, 42);
    root.digest().unwrap();
    assert_eq!(count.get(), 2);

    list.remove(0);
    root.digest().unwrap();
    assert_eq!(count.get(), 3);
}

#[test]
fn nested_changes_are_not_seen() {
    let root = Scope::new_root();
    let inner = Array::from_vec(vec![Value::from(1)]);
    root.set("list", Value::array([Value::Array(inner.clone())]));
    let count = counting_collection_watch(&root, "list");
    root.digest().unwrap();

    inner.push(2);
    root.digest().unwrap();
    assert_eq!(count.get(), 1);
}

#[test]
fn nan_elements_are_stable() {
    let root = Scope::new_root();
    root.set("list", Value::array([Value::from(f64::NAN)]));
    let count = counting_collection_watch(&root, "list");
    root.digest().unwrap();
    root.digest().unwrap();
    assert_eq!(count.get(), 1);
}

#[test]
fn object_key_changes_fire() {
    let root = Scope::new_root();
    let object = Object::new();
    object.insert("a", 1);
    root.set("obj", object.clone());
    let count = counting_collection_watch(&root, "obj");
    root.digest().unwrap();

    object.insert("b", 2);
    root.digest().unwrap();
    assert_eq!(count.get(), 2);

    object.insert("a", 10);
    root.digest().unwrap();
    assert_eq!(count.get(), 3);

    object.remove("b");
    root.digest().unwrap();
    assert_eq!(count.get(), 4);

    root.digest().unwrap();
    assert_eq!(count.get(), 4);
}

#[test]
fn array_like_object_is_diffed_by_index() {
    let root = Scope::new_root();
    let object = Object::new();
    object.insert("length", 2);
    object.insert("0", "a");
    object.insert("1", "b");
    root.set("obj", object.clone());
    let count = counting_collection_watch(&root, "obj");
    root.digest().unwrap();
    root.digest().unwrap();
    assert_eq!(count.get(), 1);

    object.insert("1", "c");
    root.digest().unwrap();
    assert_eq!(count.get(), 2);
}

#[test]
fn switching_between_shapes_fires() {
    let root = Scope::new_root();
    root.set("value", 1);
    let count = counting_collection_watch(&root, "value");
    root.digest().unwrap();

    root.set("value", Value::array([]));
    root.digest().unwrap();
    assert_eq!(count.get(), 2);

    root.set("value", Object::new());
    root.digest().unwrap();
    assert_eq!(count.get(), 3);

    root.set("value", "text");
    root.digest().unwrap();
    assert_eq!(count.get(), 4);
}

#[test]
fn listener_old_value_is_previous_shallow_copy() {
    let root = Scope::new_root();
    let list = Array::from_vec(vec![Value::from(1)]);
    root.set("list", list.clone());
    let calls = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&calls);
    root.watch_collection(
        |s| s.get("list"),
        move |new, old, _| seen.borrow_mut().push((new.clone(), old.clone())),
    )
    .unwrap();
    root.digest().unwrap();
    {
        let calls = calls.borrow();
        let (new, old) = &calls[0];
        assert_eq!(new, old);
    }

    list.push(2);
    root.digest().unwrap();
    let calls = calls.borrow();
    let (new, old) = &calls[1];
    assert_eq!(new.as_array().unwrap().len(), 2);
    assert_eq!(old.as_array().unwrap().len(), 1);
}

#[test]
fn group_fires_once_per_digest_with_all_values() {
    let root = Scope::new_root();
    root.set("a", 1);
    root.set("b", 2);
    let calls = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&calls);
    root.watch_group(
        vec![watch_fn(|s: &Scope| s.get("a")), watch_fn(|s: &Scope| s.get("b"))],
        move |new, old, _| seen.borrow_mut().push((new.to_vec(), old.to_vec())),
    )
    .unwrap();

    root.digest().unwrap();
    assert_eq!(calls.borrow().len(), 1);
    assert_eq!(calls.borrow()[0].0, vec![Value::from(1), Value::from(2)]);
    assert_eq!(calls.borrow()[0].0, calls.borrow()[0].1);

    root.set("a", 10);
    root.set("b", 20);
    root.digest().unwrap();
    assert_eq!(calls.borrow().len(), 2);
    assert_eq!(calls.borrow()[1].0, vec![Value::from(10), Value::from(20)]);
    assert_eq!(calls.borrow()[1].1, vec![Value::from(1), Value::from(2)]);
}

#[test]
fn empty_group_fires_once() {
    let root = Scope::new_root();
    let count = Rc::new(Cell::new(0));
    let c = Rc::clone(&count);
    root.watch_group(Vec::new(), move |new, old, _| {
        assert!(new.is_empty() && old.is_empty());
        c.set(c.get() + 1);
    })
    .unwrap();
    root.digest().unwrap();
    root.digest().unwrap();
    assert_eq!(count.get(), 1);
}

#[test]
fn empty_group_deregistered_early_never_fires() {
    let root = Scope::new_root();
    let count = Rc::new(Cell::new(0));
    let c = Rc::clone(&count);
    let registration = root
        .watch_group(Vec::new(), move |_, _, _| c.set(c.get() + 1))
        .unwrap();
    registration.deregister();
    root.digest().unwrap();
    assert_eq!(count.get(), 0);
}

#[test]
fn group_deregistration_removes_member_watches() {
    let root = Scope::new_root();
    let registration = root
        .watch_group(
            vec![watch_fn(|s: &Scope| s.get("a")), watch_fn(|s: &Scope| s.get("b"))],
            |_, _, _| (),
        )
        .unwrap();
    assert_eq!(root.watcher_count(), 2);
    registration.deregister();
    assert_eq!(root.watcher_count(), 0);
}
