#![forbid(unsafe_code)]

//! Grouped watches: one listener over several watch functions, called at
//! most once per digest iteration however many members changed.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use vigil_core::{IntoOutcome, Value};

use super::{Registration, Scope, WatchFn};
use crate::error::ScopeError;

type GroupListener = Rc<dyn Fn(&[Value], &[Value], &Scope) -> Result<(), Value>>;

struct GroupState {
    new_values: RefCell<Vec<Value>>,
    old_values: RefCell<Vec<Value>>,
    scheduled: Cell<bool>,
    first_run: Cell<bool>,
}

impl Scope {
    /// Watch several values with one listener receiving `(new, old)` slices
    /// in member order. On the first call `old` equals `new`.
    ///
    /// An empty group calls the listener once with empty slices, unless it
    /// is deregistered before the next digest.
    ///
    /// # Errors
    ///
    /// [`ScopeError::Destroyed`] if this scope was destroyed.
    pub fn watch_group<L, O>(&self, watch_fns: Vec<WatchFn>, on_change: L) -> Result<Registration, ScopeError>
    where
        L: Fn(&[Value], &[Value], &Scope) -> O + 'static,
        O: IntoOutcome,
    {
        self.ensure_alive()?;
        let on_change: GroupListener =
            Rc::new(move |new: &[Value], old: &[Value], scope: &Scope| {
                on_change(new, old, scope).into_outcome()
            });

        if watch_fns.is_empty() {
            let should_call = Rc::new(Cell::new(true));
            let flag = Rc::clone(&should_call);
            self.eval_async(move |scope| {
                if flag.get() {
                    on_change(&[], &[], scope)?;
                }
                Ok::<_, Value>(Value::Undefined)
            })?;
            return Ok(Registration::new(move || should_call.set(false)));
        }

        let len = watch_fns.len();
        let state = Rc::new(GroupState {
            new_values: RefCell::new(vec![Value::Undefined; len]),
            old_values: RefCell::new(vec![Value::Undefined; len]),
            scheduled: Cell::new(false),
            first_run: Cell::new(true),
        });

        let mut members = Vec::with_capacity(len);
        for (index, watch_fn) in watch_fns.into_iter().enumerate() {
            let state = Rc::clone(&state);
            let on_change = Rc::clone(&on_change);
            let member = self.register_watcher(
                watch_fn,
                Some(Rc::new(move |new: &Value, old: &Value, scope: &Scope| {
                    state.new_values.borrow_mut()[index] = new.clone();
                    state.old_values.borrow_mut()[index] = old.clone();
                    if state.scheduled.replace(true) {
                        return Ok(());
                    }
                    let state = Rc::clone(&state);
                    let on_change = Rc::clone(&on_change);
                    scope
                        .eval_async(move |scope| {
                            state.scheduled.set(false);
                            let new_values = state.new_values.borrow().clone();
                            let old_values = if state.first_run.replace(false) {
                                new_values.clone()
                            } else {
                                state.old_values.borrow().clone()
                            };
                            on_change(&new_values, &old_values, scope)?;
                            Ok::<_, Value>(Value::Undefined)
                        })
                        .map_err(Value::from)
                })),
                false,
            )?;
            members.push(member);
        }

        Ok(Registration::new(move || {
            for member in &members {
                member.deregister();
            }
        }))
    }
}
