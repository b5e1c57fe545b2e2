#![forbid(unsafe_code)]

//! Shallow collection watching.
//!
//! The watched value is not compared directly. An internal watch function
//! diffs it against a private shadow copy one level deep and bumps a change
//! counter for each difference; the counter is what the digest compares.
//! Array-like values (arrays, or objects with a numeric `length` whose last
//! index key is present) are diffed by index, other objects by key.

use std::cell::RefCell;
use std::rc::Rc;

use vigil_core::{Array, IntoEval, IntoOutcome, Object, Value, array_like_items, same_value, shallow_copy};

use super::{Registration, Scope};
use crate::error::ScopeError;

struct CollectionState {
    new_value: Value,
    /// Shadow used for diffing; an internal `Array` or `Object` for
    /// containers, the last value otherwise.
    old_value: Value,
    old_length: usize,
    change_count: usize,
    /// Shallow copy handed to the listener as its `old` argument.
    very_old: Value,
    first_run: bool,
}

impl CollectionState {
    fn new() -> Self {
        Self {
            new_value: Value::Undefined,
            old_value: Value::Undefined,
            old_length: 0,
            change_count: 0,
            very_old: Value::Undefined,
            first_run: true,
        }
    }

    fn observe(&mut self, new_value: Value) {
        self.new_value = new_value.clone();
        if let Some(items) = array_like_items(&new_value) {
            self.diff_items(&items);
        } else if let Value::Object(object) = &new_value {
            self.diff_object(object);
        } else {
            if !same_value(&new_value, &self.old_value) {
                self.change_count += 1;
            }
            self.old_value = new_value;
        }
    }

    fn diff_items(&mut self, items: &[Value]) {
        let shadow = match &self.old_value {
            Value::Array(array) => array.clone(),
            _ => {
                self.change_count += 1;
                let array = Array::new();
                self.old_value = Value::Array(array.clone());
                array
            }
        };
        if items.len() != shadow.len() {
            self.change_count += 1;
            shadow.resize(items.len());
        }
        for (index, item) in items.iter().enumerate() {
            if !same_value(item, &shadow.get(index)) {
                self.change_count += 1;
                shadow.set(index, item.clone());
            }
        }
    }

    fn diff_object(&mut self, object: &Object) {
        let shadow = match &self.old_value {
            Value::Object(shadow) => shadow.clone(),
            _ => {
                self.change_count += 1;
                let shadow = Object::new();
                self.old_value = Value::Object(shadow.clone());
                self.old_length = 0;
                shadow
            }
        };
        let mut new_length = 0;
        for (key, item) in object.entries() {
            new_length += 1;
            if shadow.contains_key(&key) {
                if !same_value(&item, &shadow.get(&key)) {
                    self.change_count += 1;
                    shadow.insert(key, item);
                }
            } else {
                self.change_count += 1;
                self.old_length += 1;
                shadow.insert(key, item);
            }
        }
        if self.old_length > new_length {
            self.change_count += 1;
            for key in shadow.keys() {
                if !object.contains_key(&key) {
                    self.old_length -= 1;
                    shadow.remove(&key);
                }
            }
        }
    }

    /// Values for one listener call: `(new, old)`. The first call gets the
    /// new value twice.
    fn take_report(&mut self) -> (Value, Value) {
        let new_value = self.new_value.clone();
        let old_value = if self.first_run {
            self.first_run = false;
            new_value.clone()
        } else {
            self.very_old.clone()
        };
        self.very_old = shallow_copy(&new_value);
        (new_value, old_value)
    }
}

impl Scope {
    /// Watch a collection one level deep: element or key additions,
    /// removals, and replacements fire the listener; changes inside nested
    /// containers do not.
    ///
    /// The listener's `old` is a shallow copy of the previous value, or the
    /// new value on the first call. NaN elements compare equal to NaN.
    ///
    /// # Errors
    ///
    /// [`ScopeError::Destroyed`] if this scope was destroyed.
    pub fn watch_collection<W, R, L, O>(&self, watch: W, on_change: L) -> Result<Registration, ScopeError>
    where
        W: Fn(&Scope) -> R + 'static,
        R: IntoEval,
        L: Fn(&Value, &Value, &Scope) -> O + 'static,
        O: IntoOutcome,
    {
        let state = Rc::new(RefCell::new(CollectionState::new()));

        let tracker = Rc::clone(&state);
        let internal_watch = move |scope: &Scope| -> Result<Value, Value> {
            let new_value = watch(scope).into_eval()?;
            let mut state = tracker.borrow_mut();
            state.observe(new_value);
            Ok(Value::from(state.change_count))
        };

        let internal_listener = move |_: &Value, _: &Value, scope: &Scope| -> Result<(), Value> {
            let (new_value, old_value) = state.borrow_mut().take_report();
            on_change(&new_value, &old_value, scope).into_outcome()
        };

        self.register_watcher(Rc::new(internal_watch), Some(Rc::new(internal_listener)), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observe_all(values: &[Value]) -> Vec<usize> {
        let mut state = CollectionState::new();
        values
            .iter()
            .map(|v| {
                state.observe(v.clone());
                state.change_count
            })
            .collect()
    }

    #[test]
    fn primitives_count_identity_changes() {
        let counts = observe_all(&[Value::from(1), Value::from(1), Value::from(2)]);
        assert_eq!(counts, vec![1, 1, 2]);
    }

    #[test]
    fn nan_is_stable() {
        let counts = observe_all(&[Value::from(f64::NAN), Value::from(f64::NAN)]);
        assert_eq!(counts[0], counts[1]);
    }

    #[test]
    fn array_element_replacement_counts() {
        let array = Array::from_vec(vec![Value::from(1), Value::from(2)]);
        let mut state = CollectionState::new();
        state.observe(Value::Array(array.clone()));
        let before = state.change_count;
        state.observe(Value::Array(array.clone()));
        assert_eq!(state.change_count, before);

        array.set(0, 42);
        state.observe(Value::Array(array));
        assert!(state.change_count > before);
    }

    #[test]
    fn object_key_removal_counts() {
        let object = Object::new();
        object.insert("a", 1);
        object.insert("b", 2);
        let mut state = CollectionState::new();
        state.observe(Value::Object(object.clone()));
        let before = state.change_count;

        object.remove("a");
        state.observe(Value::Object(object));
        assert!(state.change_count > before);
    }

    #[test]
    fn first_report_repeats_new_value() {
        let mut state = CollectionState::new();
        state.observe(Value::from(5));
        let (new_value, old_value) = state.take_report();
        assert_eq!(new_value, old_value);
    }
}
