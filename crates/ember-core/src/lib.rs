//! # Ember Core
//!
//! Core types for the Ember embedded script bridge.
//!
//! This crate provides the pieces every invocation is built from:
//! - Growable output buffers with a chunked capacity policy
//! - Header assembly (status line vs. ordinary header fields)
//! - Request description, cookie parsing and the server info map
//! - Response composition and parsing
//! - Error types

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod buffer;
pub mod error;
pub mod headers;
pub mod request;
pub mod response;
pub mod types;

pub use buffer::{CapacityPolicy, OutputBuffer};
pub use error::{Error, Result};
pub use headers::{HeaderAssembler, HeaderKind, DEFAULT_STATUS_LINE};
pub use request::{CookieMap, RequestDescriptor, ServerConstants, ServerInfo};
pub use response::{compose, ResponseMessage};
pub use types::ScriptValue;

// Re-export commonly used HTTP types
pub use bytes::Bytes;
pub use http::StatusCode;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::buffer::{CapacityPolicy, OutputBuffer};
    pub use crate::error::{Error, Result};
    pub use crate::headers::{HeaderAssembler, HeaderKind};
    pub use crate::request::{CookieMap, RequestDescriptor, ServerConstants, ServerInfo};
    pub use crate::response::{compose, ResponseMessage};
    pub use crate::types::ScriptValue;
}
