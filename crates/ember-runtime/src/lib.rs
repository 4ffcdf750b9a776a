//! # Ember Runtime
//!
//! Invocation lifecycle and hosts for the Ember bridge:
//! - [`Bridge`]: request mode (warm interpreter) and command mode (fresh
//!   interpreter with argv)
//! - Request environment seeding
//! - [`BridgeWorker`]: the bridge on a dedicated thread behind an async handle
//! - [`Server`]: HTTP serve mode with a cookie jar and graceful shutdown

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod command;
pub mod context;
pub mod cookies;
pub mod env;
pub mod lifecycle;
pub mod seeder;
pub mod server;
pub mod shutdown;
pub mod worker;

pub use context::InvocationContext;
pub use cookies::CookieJar;
pub use env::{Environment, MemoryEnvironment, ProcessEnvironment};
pub use lifecycle::{Bridge, LifecycleState};
pub use seeder::RequestSeeder;
pub use server::{Server, ServerBuilder};
pub use shutdown::{ShutdownSignal, SignalHandler};
pub use worker::{BridgeHandle, BridgeWorker};

use ember_config::Config;
use ember_scripting::{RhaiInterpreter, RhaiLimits};

/// Runtime state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Server is initializing
    Initializing,
    /// Server is running
    Running,
    /// Server is shutting down
    ShuttingDown,
    /// Server is stopped
    Stopped,
}

/// Engine limits from the interpreter section; pending script output is
/// capped at the capture buffer ceiling
pub fn rhai_limits(config: &Config) -> RhaiLimits {
    let interpreter = &config.interpreter;
    RhaiLimits {
        max_operations: interpreter.max_operations,
        max_string_size: interpreter.max_string_size,
        max_array_size: interpreter.max_array_size,
        max_map_size: interpreter.max_map_size,
        max_expr_depth: interpreter.max_expr_depth,
        max_function_expr_depth: interpreter.max_function_expr_depth,
        max_output_size: config.buffer.max_size,
    }
}

/// Bridge over a Rhai interpreter and the process environment
pub fn rhai_bridge(config: &Config) -> Bridge<RhaiInterpreter> {
    Bridge::new(RhaiInterpreter::new(rhai_limits(config)), config)
}

/// Re-export commonly used types
pub mod prelude {
    pub use crate::env::{Environment, MemoryEnvironment, ProcessEnvironment};
    pub use crate::lifecycle::{Bridge, LifecycleState};
    pub use crate::server::{Server, ServerBuilder};
    pub use crate::shutdown::{ShutdownSignal, SignalHandler};
    pub use crate::worker::{BridgeHandle, BridgeWorker};
    pub use crate::RuntimeState;
}
