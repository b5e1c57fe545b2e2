#![forbid(unsafe_code)]

//! The digest loop and `apply`.
//!
//! A digest runs dirty passes over the subtree until a pass finds no change
//! and the async queue is empty. Each iteration first drains the async
//! queue, then makes one pass. Up to `digest_ttl` unstable passes are
//! allowed; the loop fails with [`ScopeError::InfiniteDigest`] when the pass
//! after them is still dirty.
//!
//! A pass stops early when it reaches the watcher that was last seen dirty
//! and finds it clean: everything after it was clean on the previous pass and
//! nothing before it changed since.

use std::rc::Rc;

use vigil_core::{IntoEval, Value};

use super::Scope;
use super::watch::Check;
use crate::error::{Phase, ScopeError};
use crate::exception::ErrorOrigin;

impl Scope {
    /// Run dirty passes over this scope and its descendants until stable,
    /// then drain the post-digest queue.
    ///
    /// # Errors
    ///
    /// - [`ScopeError::Destroyed`] if this scope was destroyed.
    /// - [`ScopeError::PhaseConflict`] if a digest or apply is running.
    /// - [`ScopeError::InfiniteDigest`] if the tree did not stabilize.
    pub fn digest(&self) -> Result<(), ScopeError> {
        self.ensure_alive()?;
        let tree = Rc::clone(self.tree());
        let _span = tracing::trace_span!("digest", scope = self.id()).entered();
        let guard = tree.begin_phase(Phase::Digest)?;
        tree.last_dirty_watch.set(None);

        if let Some(task) = tree.apply_async_task.take() {
            tree.scheduler.cancel(task);
            self.flush_apply_async();
        }

        let ttl = tree.config.digest_ttl;
        let mut unstable = 0;
        loop {
            self.drain_async_queue();
            let dirty = self.digest_once();
            if !dirty && tree.async_queue.borrow().is_empty() {
                break;
            }
            unstable += 1;
            if unstable > ttl {
                tracing::warn!(iterations = ttl, "digest did not stabilize");
                return Err(ScopeError::InfiniteDigest { iterations: ttl });
            }
        }
        drop(guard);
        tracing::trace!(passes = unstable + 1, "digest stable");

        self.drain_post_digest();
        Ok(())
    }

    /// One pass over the subtree. Returns whether any watcher fired.
    pub(crate) fn digest_once(&self) -> bool {
        let tree = Rc::clone(self.tree());
        let mut dirty = false;
        self.every_scope(&mut |scope| {
            let watchers = scope.inner.watchers.borrow().clone();
            for watcher in watchers {
                if !watcher.is_active() {
                    continue;
                }
                match watcher.check(scope) {
                    Check::Changed { new, old } => {
                        tree.last_dirty_watch.set(Some(watcher.id));
                        dirty = true;
                        if let Some(on_change) = &watcher.listener {
                            if let Err(err) = on_change(&new, &old, scope) {
                                tree.report(&err, ErrorOrigin::WatchListener);
                            }
                        }
                    }
                    Check::Clean => {
                        if tree.last_dirty_watch.get() == Some(watcher.id) {
                            return false;
                        }
                    }
                    Check::Failed(err) => tree.report(&err, ErrorOrigin::WatchFn),
                }
            }
            true
        });
        dirty
    }

    /// Visit this scope, then its descendants depth first. Stops as soon as
    /// `visit` returns `false`; the return value says whether it ran to the end.
    pub(crate) fn every_scope(&self, visit: &mut dyn FnMut(&Scope) -> bool) -> bool {
        if !visit(self) {
            return false;
        }
        let children = self.inner.children.borrow().clone();
        for child in &children {
            if !child.every_scope(visit) {
                return false;
            }
        }
        true
    }

    /// Evaluate `f` against this scope, then digest from the root. The
    /// digest runs even when `f` fails.
    ///
    /// Returns `f`'s value. A digest failure takes precedence over a
    /// failure of `f`, which is reported as [`ScopeError::Evaluation`].
    ///
    /// # Errors
    ///
    /// [`ScopeError::PhaseConflict`] if a digest or apply is running,
    /// and any error of [`Scope::digest`].
    pub fn apply<F, R>(&self, f: F) -> Result<Value, ScopeError>
    where
        F: FnOnce(&Scope) -> R,
        R: IntoEval,
    {
        self.ensure_alive()?;
        let tree = Rc::clone(self.tree());
        let outcome = {
            let _guard = tree.begin_phase(Phase::Apply)?;
            f(self).into_eval()
        };
        self.tree_root()?.digest()?;
        outcome.map_err(ScopeError::Evaluation)
    }

    /// Evaluate `f` against this scope with no digest.
    ///
    /// # Errors
    ///
    /// Whatever `f` fails with.
    pub fn eval<F, R>(&self, f: F) -> Result<Value, Value>
    where
        F: FnOnce(&Scope) -> R,
        R: IntoEval,
    {
        f(self).into_eval()
    }
}
