//! # Ember Scripting
//!
//! The interpreter contract the bridge drives, and a Rhai implementation.
//!
//! ## Contract
//!
//! An [`Interpreter`] goes through module startup (with argv and settings),
//! then any number of request cycles: declare request, request startup,
//! symbol seeding, execution against an [`OutputSink`], request shutdown.
//! Module shutdown returns it to the unstarted state.
//!
//! ## Rhai
//!
//! [`RhaiInterpreter`] keeps compiled scripts cached while warm and exposes
//! `echo`, `header`, `http_response_code`, `fwrite` (on `STDOUT` or `STDERR`),
//! `request_body` and `request_info` to scripts, plus the seeded symbols
//! (`_SERVER`, `_COOKIE`, `_GET`, `_POST`, `_ENV`, `argv`).

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod engine;
pub mod error;
pub mod form;
pub mod rhai_engine;

pub use engine::{
    symbols, FormTarget, Interpreter, OutputSink, RequestInfo, StartupOptions, HTTP_1_1,
};
pub use error::{Result, ScriptError};
pub use rhai_engine::{CacheStats, RhaiInterpreter, RhaiLimits};

/// Prelude with commonly used types
pub mod prelude {
    pub use crate::engine::{FormTarget, Interpreter, OutputSink, RequestInfo, StartupOptions};
    pub use crate::error::{Result, ScriptError};
    pub use crate::rhai_engine::{RhaiInterpreter, RhaiLimits};
}
