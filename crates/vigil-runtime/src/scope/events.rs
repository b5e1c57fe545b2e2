#![forbid(unsafe_code)]

//! Scope events.
//!
//! `emit` walks from a scope up to the root; `broadcast` walks the subtree
//! depth first. At each scope, the listeners registered for the event name
//! run newest first. A failing listener is reported and the rest still run.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use vigil_core::{IntoOutcome, Value};

use super::{Registration, Scope, ScopeInner};
use crate::error::ScopeError;
use crate::exception::ErrorOrigin;

/// Broadcast to a subtree just before it is torn down.
pub const DESTROY_EVENT: &str = "$destroy";

/// Event listener: `(event, args)`.
pub type EventListenerFn = Rc<dyn Fn(&Event, &[Value]) -> Result<(), Value>>;

pub(crate) struct EventListener {
    id: u64,
    callback: EventListenerFn,
    active: Cell<bool>,
}

impl EventListener {
    pub(crate) fn deactivate(&self) {
        self.active.set(false);
    }
}

/// A single dispatch of a named event.
pub struct Event {
    name: String,
    target_scope: Scope,
    current_scope: RefCell<Option<Scope>>,
    propagation_stopped: Cell<bool>,
    default_prevented: Cell<bool>,
}

impl Event {
    fn new(name: &str, target_scope: Scope) -> Self {
        Self {
            name: name.to_owned(),
            target_scope,
            current_scope: RefCell::new(None),
            propagation_stopped: Cell::new(false),
            default_prevented: Cell::new(false),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scope `emit` or `broadcast` was called on.
    #[must_use]
    pub fn target_scope(&self) -> &Scope {
        &self.target_scope
    }

    /// The scope whose listeners are running. `None` once dispatch ends.
    #[must_use]
    pub fn current_scope(&self) -> Option<Scope> {
        self.current_scope.borrow().clone()
    }

    /// Stop an emitted event after the current scope's listeners.
    /// Broadcasts ignore this.
    pub fn stop_propagation(&self) {
        self.propagation_stopped.set(true);
    }

    #[must_use]
    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped.get()
    }

    pub fn prevent_default(&self) {
        self.default_prevented.set(true);
    }

    #[must_use]
    pub fn default_prevented(&self) -> bool {
        self.default_prevented.get()
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("target_scope", &self.target_scope.id())
            .field("propagation_stopped", &self.propagation_stopped.get())
            .field("default_prevented", &self.default_prevented.get())
            .finish()
    }
}

impl Scope {
    /// Register `callback` for events named `name` on this scope.
    ///
    /// # Errors
    ///
    /// [`ScopeError::Destroyed`] if this scope was destroyed.
    pub fn on<F, O>(&self, name: impl Into<String>, callback: F) -> Result<Registration, ScopeError>
    where
        F: Fn(&Event, &[Value]) -> O + 'static,
        O: IntoOutcome,
    {
        self.ensure_alive()?;
        let name = name.into();
        let listener = Rc::new(EventListener {
            id: self.tree().next_id(),
            callback: Rc::new(move |event: &Event, args: &[Value]| {
                callback(event, args).into_outcome()
            }),
            active: Cell::new(true),
        });
        self.inner
            .listeners
            .borrow_mut()
            .entry(name.clone())
            .or_default()
            .insert(0, Rc::clone(&listener));

        let id = listener.id;
        let listener = Rc::downgrade(&listener);
        let scope: Weak<ScopeInner> = Rc::downgrade(&self.inner);
        Ok(Registration::new(move || {
            if let Some(listener) = listener.upgrade() {
                listener.deactivate();
            }
            let Some(scope) = scope.upgrade() else {
                return;
            };
            let removed = {
                let mut listeners = scope.listeners.borrow_mut();
                let Some(named) = listeners.get_mut(&name) else {
                    return;
                };
                let position = named.iter().position(|l| l.id == id);
                position.map(|p| named.remove(p))
            };
            drop(removed);
        }))
    }

    /// Dispatch `name` on this scope, then each ancestor up to the root,
    /// until a listener stops propagation.
    pub fn emit(&self, name: &str, args: &[Value]) -> Event {
        let event = Event::new(name, self.clone());
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            scope.fire(&event, args);
            if event.is_propagation_stopped() {
                break;
            }
            current = scope.parent();
        }
        *event.current_scope.borrow_mut() = None;
        tracing::trace!(event = name, scope = self.id(), "emitted");
        event
    }

    /// Dispatch `name` on this scope and every descendant, depth first.
    pub fn broadcast(&self, name: &str, args: &[Value]) -> Event {
        let event = Event::new(name, self.clone());
        self.every_scope(&mut |scope| {
            scope.fire(&event, args);
            true
        });
        *event.current_scope.borrow_mut() = None;
        tracing::trace!(event = name, scope = self.id(), "broadcast");
        event
    }

    /// Listeners registered on this scope for `name`.
    #[must_use]
    pub fn listener_count(&self, name: &str) -> usize {
        self.inner.listeners.borrow().get(name).map_or(0, Vec::len)
    }

    fn fire(&self, event: &Event, args: &[Value]) {
        let listeners = self
            .inner
            .listeners
            .borrow()
            .get(event.name())
            .cloned()
            .unwrap_or_default();
        *event.current_scope.borrow_mut() = Some(self.clone());
        for listener in listeners {
            if !listener.active.get() {
                continue;
            }
            if let Err(err) = (listener.callback)(event, args) {
                self.report(&err, ErrorOrigin::EventListener);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listeners_are_stored_per_name() {
        let root = Scope::new_root();
        root.on("a", |_, _| ()).unwrap();
        root.on("a", |_, _| ()).unwrap();
        root.on("b", |_, _| ()).unwrap();
        assert_eq!(root.listener_count("a"), 2);
        assert_eq!(root.listener_count("b"), 1);
        assert_eq!(root.listener_count("c"), 0);
    }

    #[test]
    fn deregistered_listener_is_removed() {
        let root = Scope::new_root();
        let registration = root.on("a", |_, _| ()).unwrap();
        registration.deregister();
        assert_eq!(root.listener_count("a"), 0);
    }

    #[test]
    fn event_records_target_and_name() {
        let root = Scope::new_root();
        let child = root.new_child(false).unwrap();
        let event = child.emit("ping", &[]);
        assert_eq!(event.name(), "ping");
        assert_eq!(event.target_scope(), &child);
        assert!(event.current_scope().is_none());
    }

    #[test]
    fn prevent_default_is_visible_to_caller() {
        let root = Scope::new_root();
        root.on("a", |event: &Event, _: &[Value]| event.prevent_default())
            .unwrap();
        assert!(root.emit("a", &[]).default_prevented());
        assert!(root.broadcast("a", &[]).default_prevented());
    }
}
