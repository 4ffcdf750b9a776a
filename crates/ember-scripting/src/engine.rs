//! Interpreter contract

use crate::error::Result;
use ember_core::{RequestDescriptor, ScriptValue};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// HTTP/1.1 encoded as `major * 1000 + minor`
pub const HTTP_1_1: u16 = 1001;

/// Names of the symbols seeded into every request
pub mod symbols {
    /// Server info map
    pub const SERVER: &str = "_SERVER";
    /// Parsed cookies
    pub const COOKIE: &str = "_COOKIE";
    /// Parsed form body
    pub const POST: &str = "_POST";
    /// Parsed query string
    pub const GET: &str = "_GET";
    /// Environment snapshot
    pub const ENV: &str = "_ENV";
    /// Handle to the secondary stdout stream
    pub const STDOUT: &str = "STDOUT";
}

/// Request-level values declared before request startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    /// Request method
    pub method: String,
    /// Request URI including query string
    pub uri: String,
    /// Normalized content type
    pub content_type: String,
    /// Body length in bytes
    pub content_length: usize,
    /// Protocol version, see [`HTTP_1_1`]
    pub proto_num: u16,
    /// Raw cookie header, if any
    pub cookie_data: Option<String>,
}

impl RequestInfo {
    /// Declare a request with an already-normalized content type
    pub fn declare(
        request: &RequestDescriptor,
        content_type: impl Into<String>,
        cookie_data: Option<String>,
    ) -> Self {
        Self {
            method: request.method.clone(),
            uri: request.uri.clone(),
            content_type: content_type.into(),
            content_length: request.content_length(),
            proto_num: HTTP_1_1,
            cookie_data,
        }
    }
}

/// Module startup options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupOptions {
    /// Program arguments, program name first
    pub argv: Vec<String>,
    /// Interpreter settings applied at startup
    pub ini: BTreeMap<String, String>,
}

impl StartupOptions {
    /// Options with a single program name and no settings
    pub fn program(name: impl Into<String>) -> Self {
        Self {
            argv: vec![name.into()],
            ini: BTreeMap::new(),
        }
    }
}

/// Destination of a form-data parse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormTarget {
    /// Request body, populates `_POST`
    Post,
    /// Query string, populates `_GET`
    Query,
}

impl FormTarget {
    /// Symbol populated by this target
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Post => symbols::POST,
            Self::Query => symbols::GET,
        }
    }
}

/// Receiver of everything a script emits during one execution
pub trait OutputSink {
    /// Main output channel
    fn write(&mut self, bytes: &[u8]);

    /// One header line, either a status line or an ordinary field
    fn header(&mut self, line: &str);

    /// Secondary stream opened on the standard-output handle
    fn write_stdout(&mut self, bytes: &[u8]);
}

/// The embedded interpreter as driven by the bridge.
///
/// Calls arrive in lifecycle order: [`startup`](Interpreter::startup) once,
/// then per request [`declare_request`](Interpreter::declare_request),
/// [`request_startup`](Interpreter::request_startup), symbol seeding,
/// [`finish_request_startup`](Interpreter::finish_request_startup),
/// [`execute`](Interpreter::execute) and
/// [`request_shutdown`](Interpreter::request_shutdown).
pub trait Interpreter: Send + fmt::Debug {
    /// Interpreter name for logs
    fn name(&self) -> &str;

    /// Whether module startup has completed
    fn is_started(&self) -> bool;

    /// Module startup
    fn startup(&mut self, options: &StartupOptions) -> Result<()>;

    /// Declare request-level values consumed during request startup
    fn declare_request(&mut self, info: &RequestInfo);

    /// Begin a request
    fn request_startup(&mut self) -> Result<()>;

    /// Whether a request is active
    fn request_active(&self) -> bool;

    /// Install or replace a global symbol
    fn set_symbol(&mut self, name: &str, value: ScriptValue);

    /// Parse url-encoded data into the target's symbol
    fn parse_form_data(&mut self, target: FormTarget, data: &[u8]);

    /// Make the raw request body readable by scripts
    fn attach_request_body(&mut self, body: &[u8]);

    /// Open the standard-output handle as a secondary stream
    fn expose_stdout(&mut self);

    /// Route the standard streams into the main output channel
    fn route_stdio_to_output(&mut self) -> Result<()>;

    /// Complete request startup after seeding
    fn finish_request_startup(&mut self);

    /// Execute a script file, reporting emissions to `sink`.
    ///
    /// Emissions made before an error are still delivered. Fails with
    /// [`ScriptError::NoActiveRequest`] outside `request_startup` /
    /// `request_shutdown`.
    ///
    /// [`ScriptError::NoActiveRequest`]: crate::ScriptError::NoActiveRequest
    fn execute(&mut self, script: &Path, sink: &mut dyn OutputSink) -> Result<()>;

    /// Exit status of the last execution
    fn exit_status(&self) -> i32;

    /// End the active request, dropping per-request state
    fn request_shutdown(&mut self);

    /// Module shutdown
    fn shutdown(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_info_declare() {
        let request = RequestDescriptor::post("/submit?x=1", "a=1&b=2");
        let info = RequestInfo::declare(
            &request,
            ember_core::request::FORM_CONTENT_TYPE,
            Some("sid=abc".to_string()),
        );

        assert_eq!(info.method, "POST");
        assert_eq!(info.uri, "/submit?x=1");
        assert_eq!(info.content_length, 7);
        assert_eq!(info.proto_num, 1001);
        assert_eq!(info.cookie_data.as_deref(), Some("sid=abc"));
    }

    #[test]
    fn test_form_target_symbols() {
        assert_eq!(FormTarget::Post.symbol(), "_POST");
        assert_eq!(FormTarget::Query.symbol(), "_GET");
    }
}
