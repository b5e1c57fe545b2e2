#![forbid(unsafe_code)]

//! Watcher registration.
//!
//! Watchers are stored newest-first on the scope that registered them.
//! Deregistration flips the watcher's `active` flag before removing it, so a
//! digest pass that already took a snapshot of the list skips it.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use vigil_core::{IntoEval, IntoOutcome, Value, deep_copy, values_equal};

use super::{Scope, ScopeInner};
use crate::error::ScopeError;
use crate::expression::Expression;

/// Watch function: computes the watched value from a scope.
pub type WatchFn = Rc<dyn Fn(&Scope) -> Result<Value, Value>>;

/// Watch listener: `(new, old, scope)`.
pub type Listener = Rc<dyn Fn(&Value, &Value, &Scope) -> Result<(), Value>>;

/// Box a closure as a [`WatchFn`].
pub fn watch_fn<F, R>(f: F) -> WatchFn
where
    F: Fn(&Scope) -> R + 'static,
    R: IntoEval,
{
    Rc::new(move |scope: &Scope| f(scope).into_eval())
}

/// Box a closure as a [`Listener`].
pub fn listener<F, O>(f: F) -> Listener
where
    F: Fn(&Value, &Value, &Scope) -> O + 'static,
    O: IntoOutcome,
{
    Rc::new(move |new: &Value, old: &Value, scope: &Scope| {
        f(new, old, scope).into_outcome()
    })
}

pub(crate) struct Watcher {
    pub(crate) id: u64,
    watch_fn: WatchFn,
    pub(crate) listener: Option<Listener>,
    /// `None` until the first evaluation, so the first comparison always
    /// reports a change.
    last: RefCell<Option<Value>>,
    deep: bool,
    active: Cell<bool>,
}

/// Outcome of evaluating one watcher.
pub(crate) enum Check {
    Clean,
    Changed { new: Value, old: Value },
    Failed(Value),
}

impl Watcher {
    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }

    pub(crate) fn deactivate(&self) {
        self.active.set(false);
    }

    pub(crate) fn check(&self, scope: &Scope) -> Check {
        let new = match (self.watch_fn)(scope) {
            Ok(value) => value,
            Err(err) => return Check::Failed(err),
        };
        let changed = match &*self.last.borrow() {
            None => true,
            Some(previous) => !values_equal(&new, previous, self.deep),
        };
        if !changed {
            return Check::Clean;
        }
        let snapshot = if self.deep { deep_copy(&new) } else { new.clone() };
        let old = self.last.replace(Some(snapshot)).unwrap_or_else(|| new.clone());
        Check::Changed { new, old }
    }
}

/// Handle returned by every registration. Deregistering is idempotent.
#[derive(Clone)]
pub struct Registration {
    teardown: Rc<RefCell<Option<Box<dyn FnOnce()>>>>,
}

impl Registration {
    pub(crate) fn new(teardown: impl FnOnce() + 'static) -> Self {
        Self {
            teardown: Rc::new(RefCell::new(Some(Box::new(teardown)))),
        }
    }

    /// Undo the registration. Later calls do nothing.
    pub fn deregister(&self) {
        let teardown = self.teardown.borrow_mut().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.teardown.borrow().is_some()
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("active", &self.is_active())
            .finish()
    }
}

impl Scope {
    /// Watch a value by identity. The listener runs on the first digest with
    /// `old == new`, then whenever the value changes.
    ///
    /// # Errors
    ///
    /// [`ScopeError::Destroyed`] if this scope was destroyed.
    pub fn watch<W, R, L, O>(&self, watch: W, on_change: L) -> Result<Registration, ScopeError>
    where
        W: Fn(&Scope) -> R + 'static,
        R: IntoEval,
        L: Fn(&Value, &Value, &Scope) -> O + 'static,
        O: IntoOutcome,
    {
        self.register_watcher(watch_fn(watch), Some(listener(on_change)), false)
    }

    /// Watch a value by structure. The stored snapshot is a deep copy, so
    /// in-place mutation of the watched container counts as a change.
    ///
    /// # Errors
    ///
    /// [`ScopeError::Destroyed`] if this scope was destroyed.
    pub fn watch_deep<W, R, L, O>(&self, watch: W, on_change: L) -> Result<Registration, ScopeError>
    where
        W: Fn(&Scope) -> R + 'static,
        R: IntoEval,
        L: Fn(&Value, &Value, &Scope) -> O + 'static,
        O: IntoOutcome,
    {
        self.register_watcher(watch_fn(watch), Some(listener(on_change)), true)
    }

    /// Watch without a listener; the watch function still runs every pass.
    ///
    /// # Errors
    ///
    /// [`ScopeError::Destroyed`] if this scope was destroyed.
    pub fn watch_silent<W, R>(&self, watch: W) -> Result<Registration, ScopeError>
    where
        W: Fn(&Scope) -> R + 'static,
        R: IntoEval,
    {
        self.register_watcher(watch_fn(watch), None, false)
    }

    /// Watch a compiled expression.
    ///
    /// - An expression with a watch delegate hands registration to it.
    /// - A constant expression deregisters itself after its first firing.
    /// - A literal expression is compared structurally.
    ///
    /// # Errors
    ///
    /// [`ScopeError::Destroyed`] if this scope was destroyed, or whatever
    /// the delegate returns.
    pub fn watch_expression(
        &self,
        expression: Expression,
        on_change: Option<Listener>,
        deep: bool,
    ) -> Result<Registration, ScopeError> {
        if let Some(delegate) = expression.watch_delegate() {
            return delegate(self, &expression, on_change, deep);
        }
        if expression.is_constant() {
            return self.watch_constant(expression, on_change);
        }
        let deep = deep || expression.is_literal();
        self.register_watcher(
            Rc::new(move |scope: &Scope| expression.evaluate(scope, None)),
            on_change,
            deep,
        )
    }

    fn watch_constant(
        &self,
        expression: Expression,
        on_change: Option<Listener>,
    ) -> Result<Registration, ScopeError> {
        let slot: Rc<RefCell<Option<Registration>>> = Rc::default();
        let own = Rc::clone(&slot);
        let once: Listener = Rc::new(move |new: &Value, old: &Value, scope: &Scope| {
            let result = match &on_change {
                Some(inner) => inner(new, old, scope),
                None => Ok(()),
            };
            let registration = own.borrow_mut().take();
            if let Some(registration) = registration {
                registration.deregister();
            }
            result
        });
        let registration = self.register_watcher(
            Rc::new(move |scope: &Scope| expression.evaluate(scope, None)),
            Some(once),
            false,
        )?;
        *slot.borrow_mut() = Some(registration.clone());
        Ok(registration)
    }

    pub(crate) fn register_watcher(
        &self,
        watch_fn: WatchFn,
        listener: Option<Listener>,
        deep: bool,
    ) -> Result<Registration, ScopeError> {
        self.ensure_alive()?;
        let tree = self.tree();
        let watcher = Rc::new(Watcher {
            id: tree.next_id(),
            watch_fn,
            listener,
            last: RefCell::new(None),
            deep,
            active: Cell::new(true),
        });
        self.inner.watchers.borrow_mut().insert(0, Rc::clone(&watcher));
        tree.last_dirty_watch.set(None);

        let id = watcher.id;
        let watcher = Rc::downgrade(&watcher);
        let scope: Weak<ScopeInner> = Rc::downgrade(&self.inner);
        Ok(Registration::new(move || {
            if let Some(watcher) = watcher.upgrade() {
                watcher.deactivate();
            }
            let Some(scope) = scope.upgrade() else {
                return;
            };
            let removed = {
                let mut watchers = scope.watchers.borrow_mut();
                let position = watchers.iter().position(|w| w.id == id);
                position.map(|p| watchers.remove(p))
            };
            drop(removed);
            scope.tree.last_dirty_watch.set(None);
        }))
    }

    /// Number of watchers on this scope and its descendants.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        let mut count = 0;
        self.every_scope(&mut |scope| {
            count += scope.inner.watchers.borrow().len();
            true
        });
        count
    }
}
