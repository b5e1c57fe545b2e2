#![forbid(unsafe_code)]

//! Deferred-work queues: `eval_async`, `apply_async`, `post_digest`.
//!
//! All three queues live on the tree. The async queue is drained at the top
//! of every digest iteration; the coalesced apply queue is flushed in one
//! `apply` on a later turn, or early by any digest that starts first; the
//! post-digest queue is drained once after a digest stabilizes.

use std::rc::Rc;

use vigil_core::{IntoEval, IntoOutcome, Value};

use super::{Scope, WeakScope};
use crate::error::ScopeError;
use crate::exception::ErrorOrigin;

type AsyncFn = Box<dyn FnOnce(&Scope) -> Result<Value, Value>>;

pub(crate) struct AsyncTask {
    scope: WeakScope,
    run: AsyncFn,
}

impl AsyncTask {
    fn new<F, R>(scope: &Scope, f: F) -> Self
    where
        F: FnOnce(&Scope) -> R + 'static,
        R: IntoEval,
    {
        Self {
            scope: scope.downgrade(),
            run: Box::new(move |scope: &Scope| f(scope).into_eval()),
        }
    }

    fn run(self, origin: ErrorOrigin) {
        let Some(scope) = self.scope.upgrade() else {
            tracing::debug!("skipping task for dropped scope");
            return;
        };
        if scope.is_destroyed() {
            tracing::debug!(scope = scope.id(), "skipping task for destroyed scope");
            return;
        }
        if let Err(err) = (self.run)(&scope) {
            scope.report(&err, origin);
        }
    }
}

pub(crate) type PostDigestTask = Box<dyn FnOnce() -> Result<(), Value>>;

impl Scope {
    /// Queue `f` to run against this scope during the current digest, or
    /// during one started on a later turn if none is running.
    ///
    /// # Errors
    ///
    /// [`ScopeError::Destroyed`] if this scope was destroyed.
    pub fn eval_async<F, R>(&self, f: F) -> Result<(), ScopeError>
    where
        F: FnOnce(&Scope) -> R + 'static,
        R: IntoEval,
    {
        self.ensure_alive()?;
        let tree = Rc::clone(self.tree());
        let was_empty = tree.async_queue.borrow().is_empty();
        if tree.phase.get().is_none() && was_empty {
            let scheduled = Rc::downgrade(&tree);
            tree.scheduler.defer(Box::new(move || {
                let Some(scheduled) = scheduled.upgrade() else {
                    return;
                };
                if scheduled.async_queue.borrow().is_empty() {
                    return;
                }
                let Some(root) = scheduled.root_scope() else {
                    return;
                };
                if let Err(err) = root.digest() {
                    scheduled.report(&Value::from(err), ErrorOrigin::ScheduledDigest);
                }
            }));
        }
        tree.async_queue
            .borrow_mut()
            .push_back(AsyncTask::new(self, f));
        Ok(())
    }

    /// Queue `f` for a coalesced `apply` on a later turn. Calls made before
    /// that turn share one digest.
    ///
    /// # Errors
    ///
    /// [`ScopeError::Destroyed`] if this scope was destroyed.
    pub fn apply_async<F, R>(&self, f: F) -> Result<(), ScopeError>
    where
        F: FnOnce(&Scope) -> R + 'static,
        R: IntoEval,
    {
        self.ensure_alive()?;
        let tree = Rc::clone(self.tree());
        tree.apply_async_queue
            .borrow_mut()
            .push_back(AsyncTask::new(self, f));
        if tree.apply_async_task.get().is_none() {
            let scheduled = Rc::downgrade(&tree);
            let id = tree.scheduler.defer(Box::new(move || {
                let Some(scheduled) = scheduled.upgrade() else {
                    return;
                };
                let Some(root) = scheduled.root_scope() else {
                    scheduled.apply_async_task.set(None);
                    return;
                };
                let result = root.apply(|scope| {
                    scope.flush_apply_async();
                    Value::Undefined
                });
                if let Err(err) = result {
                    scheduled.report(&Value::from(err), ErrorOrigin::ScheduledDigest);
                }
            }));
            tree.apply_async_task.set(Some(id));
        }
        Ok(())
    }

    /// Queue `f` to run once after the next digest stabilizes. It does not
    /// start a digest.
    ///
    /// # Errors
    ///
    /// [`ScopeError::Destroyed`] if this scope was destroyed.
    pub fn post_digest<F, O>(&self, f: F) -> Result<(), ScopeError>
    where
        F: FnOnce() -> O + 'static,
        O: IntoOutcome,
    {
        self.ensure_alive()?;
        self.tree()
            .post_digest_queue
            .borrow_mut()
            .push_back(Box::new(move || f().into_outcome()));
        Ok(())
    }

    pub(crate) fn drain_async_queue(&self) {
        let tree = Rc::clone(self.tree());
        loop {
            let next = tree.async_queue.borrow_mut().pop_front();
            let Some(task) = next else { break };
            task.run(ErrorOrigin::AsyncTask);
        }
    }

    pub(crate) fn flush_apply_async(&self) {
        let tree = Rc::clone(self.tree());
        loop {
            let next = tree.apply_async_queue.borrow_mut().pop_front();
            let Some(task) = next else { break };
            task.run(ErrorOrigin::ApplyAsyncTask);
        }
        tree.apply_async_task.set(None);
    }

    pub(crate) fn drain_post_digest(&self) {
        let tree = Rc::clone(self.tree());
        loop {
            let next = tree.post_digest_queue.borrow_mut().pop_front();
            let Some(task) = next else { break };
            if let Err(err) = task() {
                tree.report(&err, ErrorOrigin::PostDigest);
            }
        }
    }

    /// Tasks waiting in the async queue.
    #[must_use]
    pub fn pending_async(&self) -> usize {
        self.tree().async_queue.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TurnQueue;
    use std::cell::{Cell, RefCell};

    fn root_with_turns() -> (Scope, TurnQueue) {
        let turns = TurnQueue::new();
        let root = Scope::builder().scheduler(turns.clone()).build().unwrap();
        (root, turns)
    }

    #[test]
    fn eval_async_schedules_a_single_digest() {
        let (root, turns) = root_with_turns();
        root.eval_async(|_| Value::Undefined).unwrap();
        root.eval_async(|_| Value::Undefined).unwrap();
        assert_eq!(turns.pending(), 1);
        assert_eq!(root.pending_async(), 2);
        turns.run_turn();
        assert_eq!(root.pending_async(), 0);
    }

    #[test]
    fn scheduled_digest_skips_when_queue_already_drained() {
        let (root, turns) = root_with_turns();
        let fired = Rc::new(Cell::new(0));
        let f = Rc::clone(&fired);
        root.watch(|_| Value::Null, move |_, _, _| f.set(f.get() + 1))
            .unwrap();
        root.eval_async(|_| Value::Undefined).unwrap();
        root.digest().unwrap();
        assert_eq!(fired.get(), 1);
        turns.run_turn();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn apply_async_coalesces_into_one_turn() {
        let (root, turns) = root_with_turns();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = Rc::clone(&log);
            root.apply_async(move |_| {
                log.borrow_mut().push(i);
                Value::Undefined
            })
            .unwrap();
        }
        assert_eq!(turns.pending(), 1);
        turns.run_turn();
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn default_root_drives_its_own_turn_queue() {
        let root = Scope::new_root();
        let turns = root.turn_queue().unwrap();
        let ran = Rc::new(Cell::new(false));
        let r = Rc::clone(&ran);
        root.eval_async(move |_| {
            r.set(true);
            Value::Undefined
        })
        .unwrap();
        assert_eq!(turns.pending(), 1);
        turns.run_turn();
        assert!(ran.get());
        assert_eq!(root.pending_async(), 0);
    }

    #[test]
    fn custom_scheduler_has_no_built_in_queue() {
        let (root, _turns) = root_with_turns();
        assert!(root.turn_queue().is_none());
    }

    #[test]
    fn dropping_root_with_pending_work_frees_the_tree() {
        let root = Scope::new_root();
        let child = root.new_child(false).unwrap();
        root.eval_async(|_| Value::Undefined).unwrap();
        child.apply_async(|_| Value::Undefined).unwrap();
        let _chained = root.q().when(1).then(|v| v);
        assert!(root.pending_async() > 0);
        let tree = Rc::downgrade(root.tree());
        drop(child);
        drop(root);
        assert!(tree.upgrade().is_none());
    }

    #[test]
    fn post_digest_runs_after_digest_only() {
        let root = Scope::new_root();
        let ran = Rc::new(Cell::new(false));
        let r = Rc::clone(&ran);
        root.post_digest(move || r.set(true)).unwrap();
        assert!(!ran.get());
        root.digest().unwrap();
        assert!(ran.get());
    }

    #[test]
    fn failed_post_digest_task_does_not_stop_the_rest() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let root = Scope::builder()
            .exception_handler(move |e: &Value, o: ErrorOrigin| sink.borrow_mut().push((e.clone(), o)))
            .build()
            .unwrap();
        let ran = Rc::new(Cell::new(false));
        let r = Rc::clone(&ran);
        root.post_digest(|| Err::<(), _>("fail")).unwrap();
        root.post_digest(move || r.set(true)).unwrap();
        root.digest().unwrap();
        assert!(ran.get());
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0].1, ErrorOrigin::PostDigest);
    }
}
