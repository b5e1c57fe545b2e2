#![forbid(unsafe_code)]

//! Core value model for Vigil.
//!
//! Scopes store, watch, and pass around [`Value`]s. This crate owns their
//! representation and the two comparison modes dirty-checking relies on:
//! identity ([`same_value`]) and structure ([`deep_equals`]), plus the
//! snapshot operation ([`deep_copy`]) that makes structural watching sound.
//!
//! It also defines the [`Thenable`] interface that promise resolution adopts,
//! and the [`IntoEval`]/[`IntoOutcome`] conversions that let ordinary closures
//! report failure by returning `Err`.

pub mod compare;
pub mod thenable;
pub mod value;

pub use compare::{
    array_like_items, deep_copy, deep_equals, same_value, shallow_copy, values_equal,
};
pub use thenable::{IntoEval, IntoOutcome, ProgressFn, SettleFn, Thenable};
pub use value::{Array, Map, Object, Value};
