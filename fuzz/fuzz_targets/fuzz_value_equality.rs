#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use vigil_core::{Array, Object, Value, deep_copy, deep_equals, same_value, shallow_copy};

#[derive(Debug, Arbitrary)]
enum Node {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<Node>),
    Map(Vec<(String, Node)>),
    /// Make the enclosing container refer to itself.
    SelfRef,
}

fn build(node: &Node, depth: usize) -> Value {
    if depth > 6 {
        return Value::Null;
    }
    match node {
        Node::Undefined | Node::SelfRef => Value::Undefined,
        Node::Null => Value::Null,
        Node::Bool(b) => Value::Bool(*b),
        Node::Number(n) => Value::Number(*n),
        Node::Text(s) => Value::from(s.as_str()),
        Node::List(items) => {
            let array = Array::new();
            for item in items.iter().take(8) {
                if matches!(item, Node::SelfRef) {
                    array.push(Value::Array(array.clone()));
                } else {
                    array.push(build(item, depth + 1));
                }
            }
            Value::Array(array)
        }
        Node::Map(entries) => {
            let object = Object::new();
            for (key, item) in entries.iter().take(8) {
                if matches!(item, Node::SelfRef) {
                    object.insert(key.as_str(), Value::Object(object.clone()));
                } else {
                    object.insert(key.as_str(), build(item, depth + 1));
                }
            }
            Value::Object(object)
        }
    }
}

fuzz_target!(|input: (Node, Node)| {
    let a = build(&input.0, 0);
    let b = build(&input.1, 0);

    // Must terminate on cyclic input and agree in both directions.
    assert_eq!(deep_equals(&a, &b), deep_equals(&b, &a));
    assert!(deep_equals(&a, &a));
    if same_value(&a, &b) {
        assert!(deep_equals(&a, &b));
    }

    let copy = deep_copy(&a);
    assert!(deep_equals(&a, &copy));
    let shallow = shallow_copy(&a);
    assert!(deep_equals(&a, &shallow));
    let _ = format!("{a}");
});
