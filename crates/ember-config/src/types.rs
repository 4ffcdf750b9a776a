//! Configuration types

use ember_core::{CapacityPolicy, ServerConstants};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration
///
/// Every section has defaults, so an empty document is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Output and header buffer growth policy
    pub buffer: CapacityPolicy,

    /// Constants baked into the server info map
    pub server_info: ServerConstants,

    /// Request-mode settings
    pub request: RequestConfig,

    /// Command-mode settings
    pub command: CommandConfig,

    /// Interpreter limits
    pub interpreter: InterpreterConfig,

    /// HTTP serve mode
    pub serve: ServeConfig,

    /// Logging
    pub logging: LoggingConfig,
}

/// Request-mode configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RequestConfig {
    /// Environment variable holding the ambient cookie header
    pub cookie_env: String,

    /// Environment variable consulted when a request carries no content type
    pub content_type_env: String,

    /// Static environment variables exported before every request
    pub exports: BTreeMap<String, String>,

    /// Expose a snapshot of the process environment as `_ENV`
    pub expose_env: bool,
}

impl Default for RequestConfig {
    fn default() -> Self {
        let exports = [
            ("HTTP_HOST", "127.0.0.1"),
            ("APP_URL", "http://127.0.0.1"),
            ("ASSET_URL", "http://127.0.0.1/_assets/"),
            ("EMBER_EMBEDDED_RUNNING", "true"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            cookie_env: "HTTP_COOKIE".to_string(),
            content_type_env: "HTTP_CONTENT_TYPE".to_string(),
            exports,
            expose_env: true,
        }
    }
}

/// Command-mode configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommandConfig {
    /// `argv[0]` handed to the interpreter
    pub program_name: String,

    /// Entry script, relative to the app public path
    pub entry_script: PathBuf,

    /// Working directory, relative to the app public path
    pub working_dir: PathBuf,

    /// Maximum argv length including the program name
    pub max_args: usize,

    /// Environment variables exported before construction
    pub env: BTreeMap<String, String>,

    /// Interpreter settings applied at construction
    pub ini: BTreeMap<String, String>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        let env = [
            ("APP_RUNNING_IN_CONSOLE", "true"),
            ("PHP_SELF", "runner"),
            ("APP_ENV", "local"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let ini = [
            ("display_errors", "1"),
            ("implicit_flush", "1"),
            ("output_buffering", "0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            program_name: "ember".to_string(),
            entry_script: PathBuf::from("../runner"),
            working_dir: PathBuf::from(".."),
            max_args: 127,
            env,
            ini,
        }
    }
}

/// Interpreter limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Operation budget per execution (0 = unlimited)
    pub max_operations: u64,

    /// Maximum string size in bytes (0 = unlimited)
    pub max_string_size: usize,

    /// Maximum array length (0 = unlimited)
    pub max_array_size: usize,

    /// Maximum map size (0 = unlimited)
    pub max_map_size: usize,

    /// Maximum expression nesting depth
    pub max_expr_depth: usize,

    /// Maximum function body nesting depth
    pub max_function_expr_depth: usize,

    /// Settings applied to every request-mode construction
    pub ini: BTreeMap<String, String>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_operations: 1_000_000,
            max_string_size: 16 * 1024 * 1024,
            max_array_size: 100_000,
            max_map_size: 100_000,
            max_expr_depth: 64,
            max_function_expr_depth: 32,
            ini: BTreeMap::new(),
        }
    }
}

/// HTTP serve mode configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServeConfig {
    /// Listen address
    pub listen: SocketAddr,

    /// Script executed for every request
    pub script: PathBuf,

    /// Max request body size (bytes)
    pub max_body_size: usize,

    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Depth of the worker job queue
    pub queue_depth: usize,

    /// Collect `Set-Cookie` from script responses into one server-wide jar
    /// and send it with requests that carry no `Cookie` header. Every client
    /// shares that jar, so only enable it for a single local user.
    pub replay_cookies: bool,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            script: PathBuf::from("index.rhai"),
            max_body_size: 10 * 1024 * 1024,
            shutdown_timeout: Duration::from_secs(30),
            queue_depth: 64,
            replay_cookies: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
