#![forbid(unsafe_code)]

//! The `then`-like interface recognized during promise resolution, and the
//! conversions that let plain closures act as fallible callbacks.

use std::rc::Rc;

use crate::value::Value;

/// Callback receiving a settled value.
pub type SettleFn = Box<dyn FnOnce(Value)>;

/// Callback receiving progress updates.
pub type ProgressFn = Rc<dyn Fn(Value)>;

/// A value that eventually settles.
///
/// Resolving a deferred with a [`Value::Thenable`] adopts the thenable's
/// eventual state: the deferred subscribes here and forwards whatever the
/// thenable delivers. Implementations must call at most one of `on_resolved`
/// or `on_rejected`, at most once.
pub trait Thenable {
    fn subscribe(
        self: Rc<Self>,
        on_resolved: SettleFn,
        on_rejected: SettleFn,
        on_progress: ProgressFn,
    );
}

/// Conversion of a callback's return value into "returned" or "threw".
///
/// Implemented for [`Value`] (always returned) and `Result<Value, E>`
/// (`Err` is the thrown value).
pub trait IntoEval {
    fn into_eval(self) -> Result<Value, Value>;
}

impl IntoEval for Value {
    fn into_eval(self) -> Result<Value, Value> {
        Ok(self)
    }
}

impl<E: Into<Value>> IntoEval for Result<Value, E> {
    fn into_eval(self) -> Result<Value, Value> {
        self.map_err(Into::into)
    }
}

/// Conversion of a side-effecting callback's return into success or a
/// thrown value. Implemented for `()` and `Result<(), E>`.
pub trait IntoOutcome {
    fn into_outcome(self) -> Result<(), Value>;
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Result<(), Value> {
        Ok(())
    }
}

impl<E: Into<Value>> IntoOutcome for Result<(), E> {
    fn into_outcome(self) -> Result<(), Value> {
        self.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_errors_become_thrown_values() {
        let r: Result<Value, &str> = Err("boom");
        assert_eq!(r.into_eval(), Err(Value::from("boom")));
        let o: Result<(), String> = Err("bad".to_string());
        assert_eq!(o.into_outcome(), Err(Value::from("bad")));
    }

    #[test]
    fn plain_values_are_returned() {
        assert_eq!(Value::from(1).into_eval(), Ok(Value::from(1)));
        assert_eq!(().into_outcome(), Ok(()));
    }
}
