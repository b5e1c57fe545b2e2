#![forbid(unsafe_code)]

//! Equality and copy semantics used by dirty-checking.
//!
//! - [`same_value`]: identity comparison with NaN treated as equal to NaN.
//!   This is the default watcher comparison.
//! - [`deep_equals`]: structural comparison for watchers registered with deep
//!   equality.
//! - [`deep_copy`]: independent snapshot stored as a deep watcher's last value,
//!   so later in-place mutation of the watched structure is detectable.
//!
//! # Failure Modes
//!
//! | Input | Behavior |
//! |-------|----------|
//! | Cyclic arrays/objects in `deep_equals` | Revisited pairs are assumed equal; terminates |
//! | Cyclic arrays/objects in `deep_copy` | Cycle is reproduced in the copy |
//! | Thenables | Compared and copied by identity |

use std::rc::Rc;

use ahash::AHashMap;

use crate::value::{Array, Map, Object, Value};

/// Identity equality: primitives by value, containers and thenables by
/// reference. NaN equals NaN.
#[must_use]
pub fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => x.ptr_eq(y),
        (Value::Object(x), Value::Object(y)) => x.ptr_eq(y),
        (Value::Thenable(x), Value::Thenable(y)) => std::ptr::addr_eq(Rc::as_ptr(x), Rc::as_ptr(y)),
        _ => false,
    }
}

/// Compare two values with either identity or structural semantics.
#[must_use]
pub fn values_equal(a: &Value, b: &Value, deep: bool) -> bool {
    if deep { deep_equals(a, b) } else { same_value(a, b) }
}

/// Structural equality. Object key order is ignored.
#[must_use]
pub fn deep_equals(a: &Value, b: &Value) -> bool {
    let mut seen = Vec::new();
    deep_equals_inner(a, b, &mut seen)
}

fn deep_equals_inner(a: &Value, b: &Value, seen: &mut Vec<(usize, usize)>) -> bool {
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => {
            if x.ptr_eq(y) {
                return true;
            }
            let pair = (x.addr(), y.addr());
            if seen.contains(&pair) {
                return true;
            }
            let (xs, ys) = (x.to_vec(), y.to_vec());
            if xs.len() != ys.len() {
                return false;
            }
            seen.push(pair);
            let equal = xs
                .iter()
                .zip(ys.iter())
                .all(|(l, r)| deep_equals_inner(l, r, seen));
            seen.pop();
            equal
        }
        (Value::Object(x), Value::Object(y)) => {
            if x.ptr_eq(y) {
                return true;
            }
            let pair = (x.addr(), y.addr());
            if seen.contains(&pair) {
                return true;
            }
            let (xs, ys) = (x.entries(), y.borrow().clone());
            if xs.len() != ys.len() {
                return false;
            }
            seen.push(pair);
            let equal = xs.iter().all(|(key, l)| match ys.get(key) {
                Some(r) => deep_equals_inner(l, r, seen),
                None => false,
            });
            seen.pop();
            equal
        }
        _ => same_value(a, b),
    }
}

/// Deep, structurally independent copy. Shared substructure and cycles are
/// preserved in the copy.
#[must_use]
pub fn deep_copy(value: &Value) -> Value {
    let mut copies = AHashMap::new();
    deep_copy_inner(value, &mut copies)
}

fn deep_copy_inner(value: &Value, copies: &mut AHashMap<usize, Value>) -> Value {
    match value {
        Value::Array(source) => {
            if let Some(existing) = copies.get(&source.addr()) {
                return existing.clone();
            }
            let target = Array::new();
            copies.insert(source.addr(), Value::Array(target.clone()));
            let items: Vec<Value> = source
                .to_vec()
                .iter()
                .map(|item| deep_copy_inner(item, copies))
                .collect();
            *target.borrow_mut() = items;
            Value::Array(target)
        }
        Value::Object(source) => {
            if let Some(existing) = copies.get(&source.addr()) {
                return existing.clone();
            }
            let target = Object::new();
            copies.insert(source.addr(), Value::Object(target.clone()));
            let entries: Map = source
                .entries()
                .into_iter()
                .map(|(key, item)| {
                    let copied = deep_copy_inner(&item, copies);
                    (key, copied)
                })
                .collect();
            *target.borrow_mut() = entries;
            Value::Object(target)
        }
        other => other.clone(),
    }
}

/// One-level copy: a new container holding the same element handles.
#[must_use]
pub fn shallow_copy(value: &Value) -> Value {
    match value {
        Value::Array(a) => Value::Array(Array::from_vec(a.to_vec())),
        Value::Object(o) => Value::Object(Object::from_map(o.borrow().clone())),
        other => other.clone(),
    }
}

/// Elements of an array-like value: a real array, or an object with a
/// numeric `length` whose last index key is present (or `length == 0`).
#[must_use]
pub fn array_like_items(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(a) => Some(a.to_vec()),
        Value::Object(o) => {
            let len = o.get("length").as_number()?;
            if len < 0.0 || len.fract() != 0.0 {
                return None;
            }
            let len = len as usize;
            if len > 0 && !o.contains_key(&(len - 1).to_string()) {
                return None;
            }
            Some((0..len).map(|i| o.get(&i.to_string())).collect())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_is_same_value() {
        assert!(same_value(&Value::Number(f64::NAN), &Value::Number(f64::NAN)));
        assert!(!same_value(&Value::Number(0.0), &Value::Number(f64::NAN)));
    }

    #[test]
    fn undefined_and_null_differ() {
        assert!(!same_value(&Value::Undefined, &Value::Null));
        assert!(!deep_equals(&Value::Undefined, &Value::Null));
    }

    #[test]
    fn containers_compare_by_identity_unless_deep() {
        let a = Value::array([1.into(), 2.into()]);
        let b = Value::array([1.into(), 2.into()]);
        assert!(!same_value(&a, &b));
        assert!(deep_equals(&a, &b));
        assert!(same_value(&a, &a.clone()));
    }

    #[test]
    fn object_equality_ignores_key_order() {
        let a = Value::object([("x", Value::from(1)), ("y", 2.into())]);
        let b = Value::object([("y", Value::from(2)), ("x", 1.into())]);
        assert!(deep_equals(&a, &b));
    }

    #[test]
    fn object_equality_checks_key_sets() {
        let a = Value::object([("x", Value::Undefined)]);
        let b = Value::object([("y", Value::Undefined)]);
        assert!(!deep_equals(&a, &b));
    }

    #[test]
    fn deep_copy_is_independent() {
        let original = Value::array([Value::array([1.into()])]);
        let copy = deep_copy(&original);
        assert!(deep_equals(&original, &copy));

        original.as_array().unwrap().get(0).as_array().unwrap().push(2);
        assert!(!deep_equals(&original, &copy));
    }

    #[test]
    fn deep_copy_preserves_shared_substructure() {
        let shared = Value::object([("k", Value::from(1))]);
        let original = Value::array([shared.clone(), shared]);
        let copy = deep_copy(&original);
        let items = copy.as_array().unwrap().to_vec();
        assert!(same_value(&items[0], &items[1]));
    }

    #[test]
    fn cycles_terminate() {
        let a = Array::new();
        a.push(Value::Array(a.clone()));
        let b = Array::new();
        b.push(Value::Array(b.clone()));

        assert!(deep_equals(&Value::Array(a.clone()), &Value::Array(b.clone())));
        let copy = deep_copy(&Value::Array(a.clone()));
        let inner = copy.as_array().unwrap().get(0);
        assert!(same_value(&inner, &copy));

        a.clear();
        b.clear();
        copy.as_array().unwrap().clear();
    }

    #[test]
    fn shallow_copy_shares_elements() {
        let inner = Value::array([]);
        let outer = Value::array([inner.clone()]);
        let copy = shallow_copy(&outer);
        assert!(!same_value(&outer, &copy));
        assert!(same_value(&copy.as_array().unwrap().get(0), &inner));
    }

    #[test]
    fn array_like_objects() {
        let obj = Value::object([("length", Value::from(2)), ("0", "a".into()), ("1", "b".into())]);
        assert_eq!(array_like_items(&obj).map(|v| v.len()), Some(2));

        let not = Value::object([("length", Value::from(3)), ("0", "a".into())]);
        assert!(array_like_items(&not).is_none());

        let empty = Value::object([("length", Value::from(0))]);
        assert_eq!(array_like_items(&empty).map(|v| v.len()), Some(0));
    }
}
