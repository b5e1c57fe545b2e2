#![forbid(unsafe_code)]

//! Vigil public facade.
//!
//! Re-exports the value model from `vigil-core` and the scope tree, digest
//! loop, and promise engine from `vigil-runtime`.
//!
//! ```ignore
//! use vigil::prelude::*;
//!
//! let root = Scope::new_root();
//! root.set("name", "Jane");
//! root.watch(|s| s.get("name"), |new, _, s| {
//!     if let Some(name) = new.as_str() {
//!         s.set("greeting", format!("Hello, {name}"));
//!     }
//! })?;
//! root.digest()?;
//! ```

pub use vigil_core as core;
pub use vigil_runtime as runtime;

pub use vigil_core::{Array, Map, Object, Value, deep_copy, deep_equals, same_value};
pub use vigil_runtime::{
    ConfigError, Deferred, ErrorOrigin, Event, ExceptionHandler, Expression, Promise,
    PromiseStatus, Q, Registration, Scheduler, Scope, ScopeConfig, ScopeError, TurnQueue,
};

/// Common imports.
pub mod prelude {
    pub use vigil_core::{Array, IntoEval, IntoOutcome, Map, Object, Value};
    pub use vigil_runtime::{
        Deferred, Event, Expression, Promise, Q, Registration, Scheduler, Scope, ScopeConfig,
        ScopeError, TurnQueue, listener, watch_fn,
    };
}
