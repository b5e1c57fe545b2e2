#![forbid(unsafe_code)]

//! Dirty-checked scope trees for Vigil.
//!
//! - [`Scope`]: a node in a tree of state containers with field
//!   fallthrough, watchers, event listeners, and deferred-work queues.
//! - [`Scope::digest`]: runs watchers to a fixed point, bounded by
//!   [`ScopeConfig::digest_ttl`].
//! - [`Q`], [`Deferred`], [`Promise`]: promises whose continuations are
//!   scheduled into the digest (or onto a [`Scheduler`] for [`Q::next_turn`]).
//! - [`Expression`]: an evaluation closure plus the constant, literal,
//!   assignable, and watch-delegate metadata the watch layer honors.
//!
//! Everything is single-threaded: handles are `Rc`-based and not `Send`.
//! The host drives time by calling [`TurnQueue::run_turn`] (or its own
//! [`Scheduler`]) from its event loop.
//!
//! # Invariants
//!
//! 1. At most one digest or apply runs per tree at a time.
//! 2. Watch and listener failures are reported to the tree's
//!    [`ExceptionHandler`] and never abort the digest.
//! 3. Promise callbacks never run synchronously inside `resolve`, `reject`,
//!    `notify`, or `then`.

pub mod config;
pub mod error;
pub mod exception;
pub mod expression;
pub mod q;
pub mod scheduler;
pub mod scope;

pub use config::{DEFAULT_DIGEST_TTL, ScopeConfig};
pub use error::{ConfigError, Phase, ScopeError};
pub use exception::{ErrorOrigin, ExceptionHandler, TracingExceptionHandler};
pub use expression::{Expression, Locals, WatchDelegate};
pub use q::{Deferred, Handler, ProgressHandler, Promise, PromiseStatus, Q};
pub use scheduler::{Scheduler, Task, TaskId, TurnQueue};
pub use scope::{
    DESTROY_EVENT, Event, EventListenerFn, Listener, Registration, RootBuilder, Scope, WatchFn,
    listener, watch_fn,
};
