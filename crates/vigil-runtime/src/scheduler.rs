#![forbid(unsafe_code)]

//! Next-turn task scheduling.
//!
//! The digest engine never blocks; work that must happen "later" (the digest
//! that rescues stranded `eval_async` work, the coalesced `apply_async` flush,
//! next-turn promise continuations) is handed to a [`Scheduler`].
//!
//! [`TurnQueue`] is the provided implementation: a deterministic FIFO of
//! tasks that the host drives by calling [`TurnQueue::run_turn`] from its
//! own event loop.
//!
//! # Invariants
//!
//! 1. Tasks run in the order they were deferred.
//! 2. A task deferred while a turn is running waits for the next turn.
//! 3. A cancelled task never runs; cancelling twice returns `false`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Handle to a deferred task, used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    #[inline]
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// Defers tasks to a later turn of the host's event loop.
pub trait Scheduler {
    /// Queue `task` for a later turn.
    fn defer(&self, task: Task) -> TaskId;

    /// Cancel a queued task. Returns `true` if it had not run yet.
    fn cancel(&self, id: TaskId) -> bool;
}

#[derive(Default)]
struct TurnState {
    next_id: u64,
    tasks: VecDeque<(TaskId, Task)>,
}

/// Deterministic, manually driven next-turn queue.
///
/// Clones share the same queue.
#[derive(Clone, Default)]
pub struct TurnQueue {
    state: Rc<RefCell<TurnState>>,
}

impl TurnQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.borrow().tasks.len()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state.borrow().tasks.is_empty()
    }

    /// Run every task queued before this call. Returns how many ran.
    pub fn run_turn(&self) -> usize {
        let batch = std::mem::take(&mut self.state.borrow_mut().tasks);
        let count = batch.len();
        tracing::trace!(tasks = count, "running turn");
        for (_, task) in batch {
            task();
        }
        count
    }

    /// Run turns until no task is waiting or `max_turns` turns have run.
    /// Returns the number of tasks that ran.
    pub fn run_until_idle(&self, max_turns: usize) -> usize {
        let mut total = 0;
        for _ in 0..max_turns {
            if self.is_idle() {
                break;
            }
            total += self.run_turn();
        }
        total
    }
}

impl Scheduler for TurnQueue {
    fn defer(&self, task: Task) -> TaskId {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = TaskId(state.next_id);
        state.tasks.push_back((id, task));
        id
    }

    fn cancel(&self, id: TaskId) -> bool {
        // The removed task is dropped after the borrow ends; it may own scopes.
        let removed = {
            let mut state = self.state.borrow_mut();
            let position = state.tasks.iter().position(|(queued, _)| *queued == id);
            position.and_then(|p| state.tasks.remove(p))
        };
        removed.is_some()
    }
}

impl std::fmt::Debug for TurnQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnQueue")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn tasks_run_in_fifo_order() {
        let queue = TurnQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = Rc::clone(&log);
            queue.defer(Box::new(move || log.borrow_mut().push(i)));
        }
        assert_eq!(queue.run_turn(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert!(queue.is_idle());
    }

    #[test]
    fn tasks_deferred_during_a_turn_wait_for_the_next() {
        let queue = TurnQueue::new();
        let ran = Rc::new(Cell::new(0));
        let (q, r) = (queue.clone(), Rc::clone(&ran));
        queue.defer(Box::new(move || {
            r.set(r.get() + 1);
            let r2 = Rc::clone(&r);
            q.defer(Box::new(move || r2.set(r2.get() + 1)));
        }));

        assert_eq!(queue.run_turn(), 1);
        assert_eq!(ran.get(), 1);
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.run_until_idle(8), 1);
        assert_eq!(ran.get(), 2);
    }

    #[test]
    fn cancelled_tasks_never_run() {
        let queue = TurnQueue::new();
        let ran = Rc::new(Cell::new(false));
        let r = Rc::clone(&ran);
        let id = queue.defer(Box::new(move || r.set(true)));
        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));
        queue.run_turn();
        assert!(!ran.get());
    }
}
