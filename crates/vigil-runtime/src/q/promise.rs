#![forbid(unsafe_code)]

//! Promises and deferreds.
//!
//! A [`Deferred`] is the producer side; its [`Promise`] is the consumer
//! side. Continuations never run synchronously: settling a promise (or
//! chaining onto an already settled one) schedules its reaction queue
//! through the [`Dispatch`] the promise was created with.
//!
//! # Invariants
//!
//! 1. A promise settles at most once. Later resolve, reject, and notify
//!    calls are ignored.
//! 2. While a promise is adopting a thenable, outside resolve and reject
//!    calls are ignored; only the adopted thenable can settle it.
//! 3. Resolving a promise with itself rejects it with a type error.
//! 4. Each `then` creates a derived promise that settles with the
//!    handler's return value, or its failure.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use vigil_core::{IntoEval, ProgressFn, SettleFn, Thenable, Value};

use super::Dispatch;
use crate::exception::ErrorOrigin;

/// Fulfillment or rejection handler passed to [`Promise::then_full`].
pub type Handler = Box<dyn FnOnce(Value) -> Result<Value, Value>>;

/// Progress handler passed to [`Promise::then_full`]. Its return value is
/// forwarded as progress to the derived promise.
pub type ProgressHandler = Rc<dyn Fn(Value) -> Result<Value, Value>>;

/// Settlement state of a promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromiseStatus {
    Pending,
    Resolved,
    Rejected,
}

enum State {
    Pending,
    Resolved(Value),
    Rejected(Value),
}

struct Reaction {
    deferred: Deferred,
    on_fulfilled: Option<Handler>,
    on_rejected: Option<Handler>,
    on_progress: Option<ProgressHandler>,
}

pub(crate) struct PromiseInner {
    state: RefCell<State>,
    adopting: Cell<bool>,
    reactions: RefCell<Vec<Reaction>>,
    dispatch: Dispatch,
}

impl PromiseInner {
    fn is_settled(&self) -> bool {
        !matches!(*self.state.borrow(), State::Pending)
    }

    fn outcome(&self) -> Option<Result<Value, Value>> {
        match &*self.state.borrow() {
            State::Pending => None,
            State::Resolved(value) => Some(Ok(value.clone())),
            State::Rejected(reason) => Some(Err(reason.clone())),
        }
    }

    fn schedule_processing(self: &Rc<Self>) {
        let promise = Rc::clone(self);
        self.dispatch.schedule(move || promise.process_reactions());
    }

    fn process_reactions(&self) {
        let Some(outcome) = self.outcome() else {
            return;
        };
        let reactions = std::mem::take(&mut *self.reactions.borrow_mut());
        for reaction in reactions {
            let Reaction {
                deferred,
                on_fulfilled,
                on_rejected,
                ..
            } = reaction;
            let result = match outcome.clone() {
                Ok(value) => match on_fulfilled {
                    Some(handler) => handler(value),
                    None => Ok(value),
                },
                Err(reason) => match on_rejected {
                    Some(handler) => handler(reason),
                    None => Err(reason),
                },
            };
            match result {
                Ok(value) => deferred.resolve(value),
                Err(reason) => deferred.reject(reason),
            }
        }
    }
}

impl Thenable for PromiseInner {
    fn subscribe(self: Rc<Self>, on_resolved: SettleFn, on_rejected: SettleFn, on_progress: ProgressFn) {
        Promise { inner: self }.then_full(
            Some(Box::new(move |value: Value| -> Result<Value, Value> {
                on_resolved(value);
                Ok(Value::Undefined)
            })),
            Some(Box::new(move |reason: Value| -> Result<Value, Value> {
                on_rejected(reason);
                Ok(Value::Undefined)
            })),
            Some(Rc::new(move |progress: Value| -> Result<Value, Value> {
                on_progress(progress.clone());
                Ok(progress)
            })),
        );
    }
}

/// Consumer handle to an eventual value. Clones share the same promise.
#[derive(Clone)]
pub struct Promise {
    inner: Rc<PromiseInner>,
}

impl Promise {
    #[must_use]
    pub fn status(&self) -> PromiseStatus {
        match &*self.inner.state.borrow() {
            State::Pending => PromiseStatus::Pending,
            State::Resolved(_) => PromiseStatus::Resolved,
            State::Rejected(_) => PromiseStatus::Rejected,
        }
    }

    /// `Ok(value)` or `Err(reason)` once settled.
    #[must_use]
    pub fn settled_value(&self) -> Option<Result<Value, Value>> {
        self.inner.outcome()
    }

    /// Chain with explicit handlers. A missing fulfillment or rejection
    /// handler passes the outcome through unchanged; a missing progress
    /// handler forwards progress unchanged.
    pub fn then_full(
        &self,
        on_fulfilled: Option<Handler>,
        on_rejected: Option<Handler>,
        on_progress: Option<ProgressHandler>,
    ) -> Promise {
        let deferred = Deferred::new(self.inner.dispatch.clone());
        let derived = deferred.promise();
        self.inner.reactions.borrow_mut().push(Reaction {
            deferred,
            on_fulfilled,
            on_rejected,
            on_progress,
        });
        if self.inner.is_settled() {
            self.inner.schedule_processing();
        }
        derived
    }

    /// Run `on_fulfilled` with the value. Returning `Err` rejects the
    /// derived promise; returning a promise makes it adopt that promise.
    pub fn then<F, R>(&self, on_fulfilled: F) -> Promise
    where
        F: FnOnce(Value) -> R + 'static,
        R: IntoEval,
    {
        self.then_full(Some(handler(on_fulfilled)), None, None)
    }

    /// `then` with a rejection handler.
    pub fn then_or<F, R, E, S>(&self, on_fulfilled: F, on_rejected: E) -> Promise
    where
        F: FnOnce(Value) -> R + 'static,
        R: IntoEval,
        E: FnOnce(Value) -> S + 'static,
        S: IntoEval,
    {
        self.then_full(Some(handler(on_fulfilled)), Some(handler(on_rejected)), None)
    }

    /// Handle a rejection. Returning a value recovers.
    pub fn catch<E, S>(&self, on_rejected: E) -> Promise
    where
        E: FnOnce(Value) -> S + 'static,
        S: IntoEval,
    {
        self.then_full(None, Some(handler(on_rejected)), None)
    }

    /// Observe progress notifications. The callback's return value is
    /// forwarded to the derived promise's progress callbacks.
    pub fn progress<N, R>(&self, on_progress: N) -> Promise
    where
        N: Fn(Value) -> R + 'static,
        R: IntoEval,
    {
        self.then_full(None, None, Some(Rc::new(move |value: Value| on_progress(value).into_eval())))
    }

    /// Run `callback` on either outcome, then pass the original outcome
    /// through. If `callback` fails, the derived promise rejects with that
    /// failure. If it returns a promise, the outcome waits for it.
    pub fn finally<F, R>(&self, callback: F) -> Promise
    where
        F: FnOnce() -> R + 'static,
        R: IntoEval,
    {
        let callback = Rc::new(RefCell::new(Some(callback)));
        let dispatch = self.inner.dispatch.clone();
        let on_fulfilled = {
            let callback = Rc::clone(&callback);
            let dispatch = dispatch.clone();
            move |value: Value| run_finally(&callback, &dispatch, Ok(value))
        };
        let on_rejected = move |reason: Value| run_finally(&callback, &dispatch, Err(reason));
        self.then_full(Some(Box::new(on_fulfilled)), Some(Box::new(on_rejected)), None)
    }

    pub(crate) fn ptr_eq_inner(&self, other: &Rc<dyn Thenable>) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.inner), Rc::as_ptr(other))
    }
}

fn handler<F, R>(f: F) -> Handler
where
    F: FnOnce(Value) -> R + 'static,
    R: IntoEval,
{
    Box::new(move |value: Value| f(value).into_eval())
}

fn run_finally<F, R>(
    callback: &RefCell<Option<F>>,
    dispatch: &Dispatch,
    original: Result<Value, Value>,
) -> Result<Value, Value>
where
    F: FnOnce() -> R,
    R: IntoEval,
{
    let taken = callback.borrow_mut().take();
    let Some(callback) = taken else {
        return original;
    };
    match callback().into_eval() {
        Err(failure) => Err(failure),
        Ok(Value::Thenable(pending)) => {
            let deferred = Deferred::new(dispatch.clone());
            let (settle, fail) = (deferred.clone(), deferred.clone());
            pending.subscribe(
                Box::new(move |_: Value| match original {
                    Ok(value) => settle.resolve(value),
                    Err(reason) => settle.reject(reason),
                }),
                Box::new(move |reason: Value| fail.reject(reason)),
                Rc::new(|_: Value| {}),
            );
            Ok(deferred.promise().into())
        }
        Ok(_) => original,
    }
}

impl From<Promise> for Value {
    fn from(promise: Promise) -> Self {
        let thenable: Rc<dyn Thenable> = promise.inner;
        Value::Thenable(thenable)
    }
}

impl IntoEval for Promise {
    fn into_eval(self) -> Result<Value, Value> {
        Ok(self.into())
    }
}

impl std::fmt::Debug for Promise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("status", &self.status())
            .finish()
    }
}

/// Producer handle for a [`Promise`]. Clones control the same promise.
#[derive(Clone)]
pub struct Deferred {
    promise: Promise,
}

impl Deferred {
    pub(crate) fn new(dispatch: Dispatch) -> Self {
        Self {
            promise: Promise {
                inner: Rc::new(PromiseInner {
                    state: RefCell::new(State::Pending),
                    adopting: Cell::new(false),
                    reactions: RefCell::new(Vec::new()),
                    dispatch,
                }),
            },
        }
    }

    #[must_use]
    pub fn promise(&self) -> Promise {
        self.promise.clone()
    }

    /// Resolve with `value`. A thenable value is adopted: the promise
    /// settles when the thenable does, the same way.
    pub fn resolve(&self, value: impl Into<Value>) {
        if self.is_locked() {
            tracing::trace!("ignoring resolve of settled or adopting promise");
            return;
        }
        self.resolve_value(value.into());
    }

    /// Reject with `reason`.
    pub fn reject(&self, reason: impl Into<Value>) {
        if self.is_locked() {
            tracing::trace!("ignoring reject of settled or adopting promise");
            return;
        }
        self.settle(State::Rejected(reason.into()));
    }

    /// Send a progress notification to pending `then` callbacks. Ignored
    /// once settled.
    pub fn notify(&self, progress: impl Into<Value>) {
        self.notify_value(progress.into());
    }

    fn is_locked(&self) -> bool {
        let inner = &self.promise.inner;
        inner.is_settled() || inner.adopting.get()
    }

    fn resolve_value(&self, value: Value) {
        let Value::Thenable(thenable) = value else {
            self.settle(State::Resolved(value));
            return;
        };
        if self.promise.ptr_eq_inner(&thenable) {
            self.settle(State::Rejected(Value::from(
                "TypeError: a promise cannot be resolved with itself",
            )));
            return;
        }
        self.promise.inner.adopting.set(true);
        let (on_resolved, on_rejected, on_progress) = (self.clone(), self.clone(), self.clone());
        thenable.subscribe(
            Box::new(move |value: Value| on_resolved.resolve_value(value)),
            Box::new(move |reason: Value| on_rejected.settle(State::Rejected(reason))),
            Rc::new(move |progress: Value| on_progress.notify_value(progress)),
        );
    }

    fn settle(&self, state: State) {
        let inner = &self.promise.inner;
        if inner.is_settled() {
            return;
        }
        *inner.state.borrow_mut() = state;
        inner.adopting.set(false);
        inner.schedule_processing();
    }

    fn notify_value(&self, progress: Value) {
        let inner = &self.promise.inner;
        if inner.is_settled() {
            return;
        }
        let targets: Vec<(Deferred, Option<ProgressHandler>)> = inner
            .reactions
            .borrow()
            .iter()
            .map(|r| (r.deferred.clone(), r.on_progress.clone()))
            .collect();
        if targets.is_empty() {
            return;
        }
        let dispatch = inner.dispatch.clone();
        inner.dispatch.schedule(move || {
            for (child, on_progress) in targets {
                let forwarded = match on_progress {
                    None => progress.clone(),
                    Some(callback) => match callback(progress.clone()) {
                        Ok(value) => value,
                        Err(err) => {
                            dispatch.report(&err, ErrorOrigin::ProgressCallback);
                            continue;
                        }
                    },
                };
                child.notify_value(forwarded);
            }
        });
    }
}

impl std::fmt::Debug for Deferred {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("status", &self.promise.status())
            .field("adopting", &self.promise.inner.adopting.get())
            .finish()
    }
}
