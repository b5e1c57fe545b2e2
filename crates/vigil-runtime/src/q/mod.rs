#![forbid(unsafe_code)]

//! Promise factory and scheduling.
//!
//! [`Q`] creates deferreds and promises bound to one of two dispatch modes:
//!
//! - **Digest** ([`Q::new`]): continuations are queued with
//!   [`Scope::eval_async`] on the root, so they run inside a digest and
//!   watchers see their effects in the same digest.
//! - **Next turn** ([`Q::next_turn`]): continuations are handed straight to a
//!   [`Scheduler`] and no digest is triggered.
//!
//! # Usage
//!
//! ```ignore
//! let q = root.q();
//! let deferred = q.defer();
//! deferred.promise().then(|value| { println!("{value}"); Value::Undefined });
//! deferred.resolve(42);
//! root.digest()?;
//! ```

mod promise;

pub use promise::{Deferred, Handler, ProgressHandler, Promise, PromiseStatus};

use std::cell::Cell;
use std::rc::Rc;

use vigil_core::{Array, IntoOutcome, Map, Object, Value};

use crate::exception::{ErrorOrigin, ExceptionHandler, TracingExceptionHandler};
use crate::scheduler::Scheduler;
use crate::scope::{Scope, WeakScope};

/// Where promise continuations are scheduled.
#[derive(Clone)]
pub(crate) enum Dispatch {
    Digest(WeakScope),
    NextTurn {
        scheduler: Rc<dyn Scheduler>,
        handler: Rc<dyn ExceptionHandler>,
    },
}

impl Dispatch {
    pub(crate) fn schedule(&self, task: impl FnOnce() + 'static) {
        match self {
            Self::Digest(root) => {
                let Some(scope) = root.upgrade() else {
                    tracing::debug!("dropping promise continuation for dropped tree");
                    return;
                };
                let queued = scope.eval_async(move |_| {
                    task();
                    Value::Undefined
                });
                if let Err(err) = queued {
                    tracing::debug!(%err, "dropping promise continuation");
                }
            }
            Self::NextTurn { scheduler, .. } => {
                scheduler.defer(Box::new(task));
            }
        }
    }

    pub(crate) fn report(&self, error: &Value, origin: ErrorOrigin) {
        match self {
            Self::Digest(root) => match root.upgrade() {
                Some(scope) => scope.report(error, origin),
                None => TracingExceptionHandler.handle(error, origin),
            },
            Self::NextTurn { handler, .. } => handler.handle(error, origin),
        }
    }
}

/// Promise factory.
#[derive(Clone)]
pub struct Q {
    dispatch: Dispatch,
}

enum Slot {
    Index(usize),
    Key(String),
}

impl Slot {
    fn store(&self, container: &Value, value: Value) {
        match (self, container) {
            (Self::Index(index), Value::Array(array)) => array.set(*index, value),
            (Self::Key(key), Value::Object(object)) => {
                object.insert(key.as_str(), value);
            }
            _ => {}
        }
    }
}

impl Q {
    /// Digest-scheduled factory for `scope`'s tree.
    #[must_use]
    pub fn new(scope: &Scope) -> Self {
        let root = scope.root().unwrap_or_else(|| scope.clone());
        Self {
            dispatch: Dispatch::Digest(root.downgrade()),
        }
    }

    /// Factory whose continuations run on later scheduler turns with no
    /// digest.
    #[must_use]
    pub fn next_turn(scheduler: Rc<dyn Scheduler>, handler: Rc<dyn ExceptionHandler>) -> Self {
        Self {
            dispatch: Dispatch::NextTurn { scheduler, handler },
        }
    }

    /// Next-turn factory sharing `scope`'s scheduler and exception handler.
    #[must_use]
    pub fn next_turn_for(scope: &Scope) -> Self {
        Self::next_turn(scope.scheduler(), scope.exception_handler())
    }

    #[must_use]
    pub fn defer(&self) -> Deferred {
        Deferred::new(self.dispatch.clone())
    }

    /// Wrap a value in a promise. Thenables are adopted.
    pub fn when(&self, value: impl Into<Value>) -> Promise {
        let deferred = self.defer();
        deferred.resolve(value);
        deferred.promise()
    }

    /// Alias of [`Q::when`].
    pub fn resolve(&self, value: impl Into<Value>) -> Promise {
        self.when(value)
    }

    /// A promise rejected with `reason`.
    pub fn reject(&self, reason: impl Into<Value>) -> Promise {
        let deferred = self.defer();
        deferred.reject(reason);
        deferred.promise()
    }

    /// Run `resolver` with a fresh deferred and return its promise. A
    /// failure from `resolver` rejects the promise.
    pub fn promise<F, O>(&self, resolver: F) -> Promise
    where
        F: FnOnce(&Deferred) -> O,
        O: IntoOutcome,
    {
        let deferred = self.defer();
        if let Err(reason) = resolver(&deferred).into_outcome() {
            deferred.reject(reason);
        }
        deferred.promise()
    }

    /// Resolve with an array of the items' values in input order once all
    /// resolve; reject with the first rejection.
    pub fn all(&self, items: impl IntoIterator<Item = Value>) -> Promise {
        let items: Vec<Value> = items.into_iter().collect();
        let container = Value::Array(Array::from_vec(vec![Value::Undefined; items.len()]));
        let slots = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| (Slot::Index(index), item))
            .collect();
        self.aggregate(container, slots)
    }

    /// Like [`Q::all`] over a keyed map; resolves with an object holding
    /// the same keys in the same order.
    pub fn all_map(&self, items: Map) -> Promise {
        let container = Object::new();
        for key in items.keys() {
            container.insert(key.as_str(), Value::Undefined);
        }
        let slots = items
            .into_iter()
            .map(|(key, item)| (Slot::Key(key), item))
            .collect();
        self.aggregate(Value::Object(container), slots)
    }

    fn aggregate(&self, container: Value, slots: Vec<(Slot, Value)>) -> Promise {
        let deferred = self.defer();
        if slots.is_empty() {
            deferred.resolve(container);
            return deferred.promise();
        }
        let remaining = Rc::new(Cell::new(slots.len()));
        for (slot, item) in slots {
            let (on_value, on_reason) = (deferred.clone(), deferred.clone());
            let container = container.clone();
            let remaining = Rc::clone(&remaining);
            self.when(item).then_full(
                Some(Box::new(move |value: Value| -> Result<Value, Value> {
                    slot.store(&container, value);
                    remaining.set(remaining.get() - 1);
                    if remaining.get() == 0 {
                        on_value.resolve(container.clone());
                    }
                    Ok(Value::Undefined)
                })),
                Some(Box::new(move |reason: Value| -> Result<Value, Value> {
                    on_reason.reject(reason);
                    Ok(Value::Undefined)
                })),
                None,
            );
        }
        deferred.promise()
    }
}

impl std::fmt::Debug for Q {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.dispatch {
            Dispatch::Digest(_) => "digest",
            Dispatch::NextTurn { .. } => "next_turn",
        };
        f.debug_struct("Q").field("mode", &mode).finish()
    }
}

impl Scope {
    /// Digest-scheduled promise factory for this tree.
    #[must_use]
    pub fn q(&self) -> Q {
        Q::new(self)
    }
}
