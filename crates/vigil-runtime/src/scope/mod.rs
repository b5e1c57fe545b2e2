#![forbid(unsafe_code)]

//! The scope tree.
//!
//! A [`Scope`] is a node in a tree of state containers. Each scope owns an
//! ordered field map, a watcher list, and event listeners. Queues, the phase
//! flag, the scheduler, and the exception handler belong to the tree and are
//! shared by every scope in it.
//!
//! # Architecture
//!
//! Scopes are `Rc` handles. A parent owns its children; a child refers back
//! to its parent, its field-inheritance source, and the root through `Weak`
//! links, so dropping the root handle releases the tree unless a child handle
//! is still held.
//!
//! Field lookup is an explicit two-level walk rather than delegation:
//!
//! - [`Scope::get`] checks the scope's own map, then each scope up the
//!   inheritance chain. Isolated scopes have no chain.
//! - [`Scope::set`] writes through: an unshadowed name that an ancestor holds
//!   is updated on that ancestor. Names nobody holds are created locally.
//! - [`Scope::set_local`] always shadows.
//!
//! # Invariants
//!
//! 1. Every live non-root scope appears exactly once in its parent's children.
//! 2. All scopes of a tree share one set of queues and one phase flag.
//! 3. A destroyed scope has no watchers or listeners, is unlinked from its
//!    parent, and rejects registrations with [`ScopeError::Destroyed`].
//! 4. No `RefCell` borrow is held while a user callback runs.

mod collection;
mod digest;
mod events;
mod group;
mod queue;
mod watch;

pub use events::{DESTROY_EVENT, Event, EventListenerFn};
pub use watch::{Listener, Registration, WatchFn, listener, watch_fn};

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use vigil_core::{Map, Value};

use crate::config::ScopeConfig;
use crate::error::{ConfigError, Phase, ScopeError};
use crate::exception::{ErrorOrigin, ExceptionHandler, TracingExceptionHandler};
use crate::scheduler::{Scheduler, TaskId, TurnQueue};

use events::EventListener;
use queue::{AsyncTask, PostDigestTask};
use watch::Watcher;

// ---------------------------------------------------------------------------
// Tree: state shared by every scope
// ---------------------------------------------------------------------------

pub(crate) struct Tree {
    config: ScopeConfig,
    scheduler: Rc<dyn Scheduler>,
    /// The built-in queue, when no scheduler was installed.
    turns: Option<TurnQueue>,
    exception_handler: Rc<dyn ExceptionHandler>,
    root: RefCell<Weak<ScopeInner>>,
    phase: Cell<Option<Phase>>,
    /// Id of the watcher that last changed; a clean pass stops when it
    /// comes back around to it.
    last_dirty_watch: Cell<Option<u64>>,
    next_id: Cell<u64>,
    async_queue: RefCell<VecDeque<AsyncTask>>,
    apply_async_queue: RefCell<VecDeque<AsyncTask>>,
    apply_async_task: Cell<Option<TaskId>>,
    post_digest_queue: RefCell<VecDeque<PostDigestTask>>,
}

impl Tree {
    fn next_id(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }

    pub(crate) fn report(&self, error: &Value, origin: ErrorOrigin) {
        self.exception_handler.handle(error, origin);
    }

    pub(crate) fn root_scope(&self) -> Option<Scope> {
        self.root.borrow().upgrade().map(|inner| Scope { inner })
    }

    fn begin_phase(&self, phase: Phase) -> Result<PhaseGuard<'_>, ScopeError> {
        if let Some(active) = self.phase.get() {
            return Err(ScopeError::PhaseConflict { active });
        }
        self.phase.set(Some(phase));
        Ok(PhaseGuard { tree: self })
    }
}

/// Clears the tree phase when dropped, on every exit path.
struct PhaseGuard<'a> {
    tree: &'a Tree,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.tree.phase.set(None);
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

pub(crate) struct ScopeInner {
    id: u64,
    tree: Rc<Tree>,
    isolated: bool,
    parent: RefCell<Weak<ScopeInner>>,
    inherit: Weak<ScopeInner>,
    children: RefCell<Vec<Scope>>,
    fields: RefCell<Map>,
    watchers: RefCell<Vec<Rc<Watcher>>>,
    listeners: RefCell<AHashMap<String, Vec<Rc<EventListener>>>>,
    destroyed: Cell<bool>,
}

/// Handle to a node in a scope tree. Clones refer to the same scope.
#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

impl Scope {
    /// Create a root scope with default configuration, its own
    /// [`TurnQueue`] (see [`Scope::turn_queue`]), and the tracing exception
    /// handler.
    #[must_use]
    pub fn new_root() -> Self {
        RootBuilder::new().build_unchecked()
    }

    /// Start configuring a root scope.
    #[must_use]
    pub fn builder() -> RootBuilder {
        RootBuilder::new()
    }

    fn from_tree(tree: Rc<Tree>, isolated: bool, parent: Weak<ScopeInner>, inherit: Weak<ScopeInner>) -> Self {
        let id = tree.next_id();
        Self {
            inner: Rc::new(ScopeInner {
                id,
                tree,
                isolated,
                parent: RefCell::new(parent),
                inherit,
                children: RefCell::new(Vec::new()),
                fields: RefCell::new(Map::new()),
                watchers: RefCell::new(Vec::new()),
                listeners: RefCell::new(AHashMap::new()),
                destroyed: Cell::new(false),
            }),
        }
    }

    pub(crate) fn tree(&self) -> &Rc<Tree> {
        &self.inner.tree
    }

    pub(crate) fn report(&self, error: &Value, origin: ErrorOrigin) {
        self.inner.tree.report(error, origin);
    }

    pub(crate) fn ensure_alive(&self) -> Result<(), ScopeError> {
        if self.inner.destroyed.get() {
            return Err(ScopeError::Destroyed);
        }
        Ok(())
    }

    fn tree_root(&self) -> Result<Scope, ScopeError> {
        self.inner.tree.root_scope().ok_or(ScopeError::Destroyed)
    }

    // -- tree structure ----------------------------------------------------

    /// Create a child scope. A non-isolated child sees this scope's fields
    /// through fallthrough; an isolated child starts empty.
    ///
    /// # Errors
    ///
    /// [`ScopeError::Destroyed`] if this scope was destroyed.
    pub fn new_child(&self, isolated: bool) -> Result<Scope, ScopeError> {
        self.new_child_in(isolated, self)
    }

    /// Create a child whose fields fall through to `self` but which is
    /// linked into the tree under `hierarchy_parent` (digest traversal,
    /// events, and destruction follow `hierarchy_parent`).
    ///
    /// # Errors
    ///
    /// [`ScopeError::Destroyed`] if either scope was destroyed.
    pub fn new_child_in(&self, isolated: bool, hierarchy_parent: &Scope) -> Result<Scope, ScopeError> {
        self.ensure_alive()?;
        hierarchy_parent.ensure_alive()?;
        let inherit = if isolated {
            Weak::new()
        } else {
            Rc::downgrade(&self.inner)
        };
        let child = Self::from_tree(
            Rc::clone(&hierarchy_parent.inner.tree),
            isolated,
            Rc::downgrade(&hierarchy_parent.inner),
            inherit,
        );
        hierarchy_parent
            .inner
            .children
            .borrow_mut()
            .push(child.clone());
        tracing::trace!(scope = child.id(), parent = hierarchy_parent.id(), isolated, "scope created");
        Ok(child)
    }

    /// Tear down this scope: broadcast [`DESTROY_EVENT`] to the subtree,
    /// unlink from the parent, and invalidate the watcher and listener
    /// storage of every scope in the subtree.
    ///
    /// Field storage stays readable.
    ///
    /// # Errors
    ///
    /// [`ScopeError::Destroyed`] if already destroyed.
    pub fn destroy(&self) -> Result<(), ScopeError> {
        self.ensure_alive()?;
        self.broadcast(DESTROY_EVENT, &[]);
        if let Some(parent) = self.parent() {
            let removed = {
                let mut siblings = parent.inner.children.borrow_mut();
                let position = siblings.iter().position(|s| s.ptr_eq(self));
                position.map(|p| siblings.remove(p))
            };
            drop(removed);
        }
        self.invalidate();
        tracing::debug!(scope = self.id(), "scope destroyed");
        Ok(())
    }

    fn invalidate(&self) {
        self.inner.destroyed.set(true);
        *self.inner.parent.borrow_mut() = Weak::new();
        let children = std::mem::take(&mut *self.inner.children.borrow_mut());
        for child in &children {
            child.invalidate();
        }
        let watchers = std::mem::take(&mut *self.inner.watchers.borrow_mut());
        for watcher in &watchers {
            watcher.deactivate();
        }
        let listeners = std::mem::take(&mut *self.inner.listeners.borrow_mut());
        for listener in listeners.values().flatten() {
            listener.deactivate();
        }
        self.inner.tree.last_dirty_watch.set(None);
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Hierarchy parent, `None` for the root and destroyed scopes.
    #[must_use]
    pub fn parent(&self) -> Option<Scope> {
        self.inner.parent.borrow().upgrade().map(|inner| Scope { inner })
    }

    /// The tree's root, while it is alive.
    #[must_use]
    pub fn root(&self) -> Option<Scope> {
        self.inner.tree.root_scope()
    }

    /// Direct children in creation order.
    #[must_use]
    pub fn children(&self) -> Vec<Scope> {
        self.inner.children.borrow().clone()
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.root().is_some_and(|root| root.ptr_eq(self))
    }

    #[must_use]
    pub fn is_isolated(&self) -> bool {
        self.inner.isolated
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// The phase currently running on this tree, if any.
    #[must_use]
    pub fn phase(&self) -> Option<Phase> {
        self.inner.tree.phase.get()
    }

    #[must_use]
    pub fn config(&self) -> &ScopeConfig {
        &self.inner.tree.config
    }

    /// The tree's next-turn scheduler.
    #[must_use]
    pub fn scheduler(&self) -> Rc<dyn Scheduler> {
        Rc::clone(&self.inner.tree.scheduler)
    }

    /// The built-in [`TurnQueue`] of a root built without a scheduler.
    /// The host drives it with [`TurnQueue::run_turn`]; `None` when a custom
    /// scheduler was installed.
    #[must_use]
    pub fn turn_queue(&self) -> Option<TurnQueue> {
        self.inner.tree.turns.clone()
    }

    /// The tree's exception handler.
    #[must_use]
    pub fn exception_handler(&self) -> Rc<dyn ExceptionHandler> {
        Rc::clone(&self.inner.tree.exception_handler)
    }

    /// Identity comparison.
    #[must_use]
    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakScope {
        WeakScope(Rc::downgrade(&self.inner))
    }

    // -- fields ------------------------------------------------------------

    /// Read a field, falling through the inheritance chain.
    /// Missing names read as `Undefined`.
    #[must_use]
    pub fn get(&self, name: &str) -> Value {
        let mut current = Some(Rc::clone(&self.inner));
        while let Some(scope) = current {
            let found = scope.fields.borrow().get(name).cloned();
            if let Some(value) = found {
                return value;
            }
            current = scope.inherit.upgrade();
        }
        Value::Undefined
    }

    /// Write a field. Updates the nearest scope in the inheritance chain
    /// that already holds `name`; otherwise creates it on this scope.
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let owner = self.field_owner(&name).unwrap_or_else(|| Rc::clone(&self.inner));
        let _previous = owner.fields.borrow_mut().insert(name, value.into());
    }

    /// Write a field on this scope, shadowing any inherited one.
    pub fn set_local(&self, name: impl Into<String>, value: impl Into<Value>) {
        let _previous = self
            .inner
            .fields
            .borrow_mut()
            .insert(name.into(), value.into());
    }

    /// Remove a field from this scope only. An inherited value becomes
    /// visible again.
    pub fn remove(&self, name: &str) -> Option<Value> {
        self.inner.fields.borrow_mut().shift_remove(name)
    }

    /// Whether `name` resolves anywhere in the inheritance chain.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.field_owner(name).is_some()
    }

    /// Whether this scope holds `name` itself.
    #[must_use]
    pub fn has_own(&self, name: &str) -> bool {
        self.inner.fields.borrow().contains_key(name)
    }

    /// Names held by this scope, in insertion order.
    #[must_use]
    pub fn own_keys(&self) -> Vec<String> {
        self.inner.fields.borrow().keys().cloned().collect()
    }

    fn field_owner(&self, name: &str) -> Option<Rc<ScopeInner>> {
        let mut current = Some(Rc::clone(&self.inner));
        while let Some(scope) = current {
            if scope.fields.borrow().contains_key(name) {
                return Some(scope);
            }
            current = scope.inherit.upgrade();
        }
        None
    }
}

/// Non-owning scope handle held by queued work, so pending tasks never keep
/// a dropped tree alive.
#[derive(Clone)]
pub(crate) struct WeakScope(Weak<ScopeInner>);

impl WeakScope {
    pub(crate) fn upgrade(&self) -> Option<Scope> {
        self.0.upgrade().map(|inner| Scope { inner })
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Scope {}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("isolated", &self.inner.isolated)
            .field("destroyed", &self.inner.destroyed.get())
            .field("children", &self.inner.children.borrow().len())
            .field("watchers", &self.inner.watchers.borrow().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RootBuilder
// ---------------------------------------------------------------------------

/// Builder for root scopes.
///
/// # Usage
///
/// ```ignore
/// let turns = TurnQueue::new();
/// let root = Scope::builder()
///     .digest_ttl(20)
///     .scheduler(turns.clone())
///     .exception_handler(|err: &Value, origin: ErrorOrigin| eprintln!("{origin}: {err}"))
///     .build()?;
/// ```
pub struct RootBuilder {
    config: ScopeConfig,
    scheduler: Option<Rc<dyn Scheduler>>,
    exception_handler: Option<Rc<dyn ExceptionHandler>>,
}

impl RootBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ScopeConfig::default(),
            scheduler: None,
            exception_handler: None,
        }
    }

    #[must_use]
    pub fn config(mut self, config: ScopeConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn digest_ttl(mut self, ttl: usize) -> Self {
        self.config.digest_ttl = ttl;
        self
    }

    #[must_use]
    pub fn scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Some(Rc::new(scheduler));
        self
    }

    #[must_use]
    pub fn shared_scheduler(mut self, scheduler: Rc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    #[must_use]
    pub fn exception_handler(mut self, handler: impl ExceptionHandler + 'static) -> Self {
        self.exception_handler = Some(Rc::new(handler));
        self
    }

    /// Validate the configuration and create the root scope.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`] from [`ScopeConfig::validate`].
    pub fn build(self) -> Result<Scope, ConfigError> {
        self.config.validate()?;
        Ok(self.build_unchecked())
    }

    fn build_unchecked(self) -> Scope {
        let (scheduler, turns) = match self.scheduler {
            Some(scheduler) => (scheduler, None),
            None => {
                let turns = TurnQueue::new();
                let scheduler: Rc<dyn Scheduler> = Rc::new(turns.clone());
                (scheduler, Some(turns))
            }
        };
        let tree = Rc::new(Tree {
            config: self.config,
            scheduler,
            turns,
            exception_handler: self
                .exception_handler
                .unwrap_or_else(|| Rc::new(TracingExceptionHandler)),
            root: RefCell::new(Weak::new()),
            phase: Cell::new(None),
            last_dirty_watch: Cell::new(None),
            next_id: Cell::new(0),
            async_queue: RefCell::new(VecDeque::new()),
            apply_async_queue: RefCell::new(VecDeque::new()),
            apply_async_task: Cell::new(None),
            post_digest_queue: RefCell::new(VecDeque::new()),
        });
        let root = Scope::from_tree(Rc::clone(&tree), false, Weak::new(), Weak::new());
        *tree.root.borrow_mut() = Rc::downgrade(&root.inner);
        root
    }
}

impl Default for RootBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
