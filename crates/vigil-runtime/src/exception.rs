#![forbid(unsafe_code)]

//! Sink for failures that are caught rather than propagated.
//!
//! Watch functions, listeners, queued tasks, and event handlers run inside
//! loops that must keep going when one callback fails. Their failures are
//! handed to the tree's [`ExceptionHandler`] together with an
//! [`ErrorOrigin`]. The default handler logs through `tracing`.

use vigil_core::Value;

/// Where a caught failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorOrigin {
    WatchFn,
    WatchListener,
    AsyncTask,
    ApplyAsyncTask,
    PostDigest,
    EventListener,
    ProgressCallback,
    /// A digest or coalesced flush started by the scheduler.
    ScheduledDigest,
}

impl ErrorOrigin {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WatchFn => "watch_fn",
            Self::WatchListener => "watch_listener",
            Self::AsyncTask => "async_task",
            Self::ApplyAsyncTask => "apply_async_task",
            Self::PostDigest => "post_digest",
            Self::EventListener => "event_listener",
            Self::ProgressCallback => "progress_callback",
            Self::ScheduledDigest => "scheduled_digest",
        }
    }
}

impl std::fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives failures caught during digest and dispatch.
pub trait ExceptionHandler {
    fn handle(&self, error: &Value, origin: ErrorOrigin);
}

impl<F: Fn(&Value, ErrorOrigin)> ExceptionHandler for F {
    fn handle(&self, error: &Value, origin: ErrorOrigin) {
        self(error, origin);
    }
}

/// Default handler: one `error!` record per failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingExceptionHandler;

impl ExceptionHandler for TracingExceptionHandler {
    fn handle(&self, error: &Value, origin: ErrorOrigin) {
        tracing::error!(origin = origin.as_str(), error = %error, "callback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tracing_test::traced_test;

    #[test]
    fn closures_are_handlers() {
        let seen = RefCell::new(Vec::new());
        let handler = |e: &Value, o: ErrorOrigin| seen.borrow_mut().push((e.clone(), o));
        handler.handle(&Value::from("x"), ErrorOrigin::PostDigest);
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0].1, ErrorOrigin::PostDigest);
    }

    #[traced_test]
    #[test]
    fn tracing_handler_logs_origin() {
        TracingExceptionHandler.handle(&Value::from("kaboom"), ErrorOrigin::WatchFn);
        assert!(logs_contain("callback failed"));
        assert!(logs_contain("watch_fn"));
        assert!(logs_contain("kaboom"));
    }
}
