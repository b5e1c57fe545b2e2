#![forbid(unsafe_code)]

//! Error types for scope operations and configuration.

use vigil_core::Value;

/// The active phase of a scope tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Digest,
    Apply,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Digest => f.write_str("$digest"),
            Self::Apply => f.write_str("$apply"),
        }
    }
}

/// Failures reported by scope operations.
#[derive(Debug, Clone)]
pub enum ScopeError {
    /// The pass after `iterations` unstable passes was still dirty.
    /// The reactive graph oscillates or schedules async work forever.
    InfiniteDigest { iterations: usize },
    /// A digest or apply was started while another is running on the tree.
    PhaseConflict { active: Phase },
    /// The scope was destroyed; its storage may not be reused.
    Destroyed,
    /// The expression passed to `apply` failed with the given value.
    Evaluation(Value),
    /// `assign` was called on an expression with no assignment path.
    NotAssignable,
}

impl std::fmt::Display for ScopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InfiniteDigest { iterations } => {
                write!(f, "{iterations} digest iterations reached; aborting")
            }
            Self::PhaseConflict { active } => write!(f, "{active} already in progress"),
            Self::Destroyed => write!(f, "scope has been destroyed"),
            Self::Evaluation(value) => write!(f, "expression failed: {value}"),
            Self::NotAssignable => write!(f, "expression is not assignable"),
        }
    }
}

impl std::error::Error for ScopeError {}

impl From<ScopeError> for Value {
    fn from(err: ScopeError) -> Self {
        match err {
            ScopeError::Evaluation(value) => value,
            other => Value::from(other.to_string()),
        }
    }
}

/// Errors from building or loading a [`ScopeConfig`](crate::ScopeConfig).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `digest_ttl` must allow at least one pass.
    ZeroDigestTtl,
    /// The configuration text could not be parsed.
    Parse(String),
    /// The configuration file could not be read.
    Io(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroDigestTtl => write!(f, "digest_ttl must be at least 1"),
            Self::Parse(msg) => write!(f, "config parse error: {msg}"),
            Self::Io(msg) => write!(f, "config read error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
