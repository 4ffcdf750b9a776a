//! Rhai interpreter implementation

use crate::engine::{
    symbols, FormTarget, Interpreter, OutputSink, RequestInfo, StartupOptions,
};
use crate::error::{Result, ScriptError};
use crate::form;
use ember_core::{CookieMap, ScriptValue};
use parking_lot::Mutex;
use rhai::{Dynamic, Engine, EvalAltResult, Scope, AST};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, trace, warn};

/// Handle name of the standard error stream
const STDERR_HANDLE: &str = "STDERR";

/// Exit status reported after a failed execution
const ERROR_EXIT_STATUS: i32 = 255;

/// Engine limits applied at module startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RhaiLimits {
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
    /// Bytes of body output and of header lines an execution may hold
    /// before further writes are dropped (0 = unlimited)
    pub max_output_size: usize,
}

impl Default for RhaiLimits {
    fn default() -> Self {
        Self {
            max_operations: 1_000_000,
            max_string_size: 16 * 1024 * 1024,
            max_array_size: 100_000,
            max_map_size: 100_000,
            max_expr_depth: 64,
            max_function_expr_depth: 32,
            max_output_size: 16 * 1024 * 1024,
        }
    }
}

/// AST cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of compiled scripts held
    pub cached_scripts: usize,
    /// Cache hits
    pub hits: u64,
    /// Cache misses (compilations)
    pub misses: u64,
}

/// Settings recognized at startup
#[derive(Debug, Clone, Copy, Default)]
struct Settings {
    display_errors: bool,
    implicit_flush: bool,
    output_buffering: usize,
}

impl Settings {
    fn parse(ini: &BTreeMap<String, String>) -> Result<Self> {
        let mut settings = Self::default();
        for (key, value) in ini {
            match key.as_str() {
                "display_errors" => settings.display_errors = parse_flag(key, value)?,
                "implicit_flush" => settings.implicit_flush = parse_flag(key, value)?,
                "output_buffering" => {
                    settings.output_buffering = match parse_flag(key, value) {
                        Ok(enabled) => usize::from(enabled) * 4096,
                        Err(_) => value.trim().parse().map_err(|_| invalid(key, value))?,
                    }
                }
                _ => debug!(setting = %key, "Ignoring unknown interpreter setting"),
            }
        }
        Ok(settings)
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" => Ok(true),
        "0" | "off" | "false" | "no" | "" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

fn invalid(key: &str, value: &str) -> ScriptError {
    ScriptError::InvalidSetting {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// One script emission, replayed into the sink in order
#[derive(Debug, Clone)]
enum Emission {
    Output(Vec<u8>),
    Header(String),
    Stdout(Vec<u8>),
}

/// State shared between the interpreter and registered functions.
///
/// Emissions wait here until the execution returns, so body output and
/// header lines are each capped at `output_limit` pending bytes; writes
/// that do not fit are dropped whole.
#[derive(Debug)]
struct ScriptIo {
    emissions: Vec<Emission>,
    output_limit: usize,
    pending_output: usize,
    pending_headers: usize,
    dropped_bytes: u64,
    request: Option<RequestInfo>,
    request_body: Vec<u8>,
    stdout_exposed: bool,
    stdio_routed: bool,
}

impl ScriptIo {
    fn new(output_limit: usize) -> Self {
        Self {
            emissions: Vec::new(),
            output_limit,
            pending_output: 0,
            pending_headers: 0,
            dropped_bytes: 0,
            request: None,
            request_body: Vec::new(),
            stdout_exposed: false,
            stdio_routed: false,
        }
    }

    /// Reserve `len` bytes against `pending`, or count them as dropped
    fn admit(limit: usize, pending: &mut usize, dropped: &mut u64, len: usize) -> bool {
        match pending.checked_add(len) {
            Some(total) if limit == 0 || total <= limit => {
                *pending = total;
                true
            }
            _ => {
                if *dropped == 0 {
                    warn!(limit, "Script output exceeded maximum size, dropping output");
                }
                *dropped += len as u64;
                false
            }
        }
    }

    fn push_body(&mut self, emission: Emission, len: usize) {
        if Self::admit(self.output_limit, &mut self.pending_output, &mut self.dropped_bytes, len) {
            self.emissions.push(emission);
        }
    }

    fn output(&mut self, bytes: Vec<u8>) {
        let len = bytes.len();
        self.push_body(Emission::Output(bytes), len);
    }

    fn header(&mut self, line: String) {
        // Each header line is framed with CRLF in the header block
        let len = line.len() + 2;
        if Self::admit(self.output_limit, &mut self.pending_headers, &mut self.dropped_bytes, len) {
            self.emissions.push(Emission::Header(line));
        }
    }

    fn write_handle(&mut self, handle: &str, bytes: Vec<u8>) -> bool {
        let len = bytes.len();
        match handle {
            _ if self.stdio_routed => self.push_body(Emission::Output(bytes), len),
            symbols::STDOUT if self.stdout_exposed => self.push_body(Emission::Stdout(bytes), len),
            STDERR_HANDLE => {
                warn!(stream = "stderr", "{}", String::from_utf8_lossy(&bytes));
            }
            _ => return false,
        }
        true
    }

    /// Hand the pending emissions over and reset the accounting
    fn take_emissions(&mut self) -> Vec<Emission> {
        if self.dropped_bytes > 0 {
            warn!(dropped = self.dropped_bytes, "Script output truncated");
        }
        self.pending_output = 0;
        self.pending_headers = 0;
        self.dropped_bytes = 0;
        std::mem::take(&mut self.emissions)
    }

    /// Bytes currently held for the sink
    #[cfg(test)]
    fn pending_bytes(&self) -> usize {
        self.pending_output + self.pending_headers
    }

    fn end_request(&mut self) {
        self.take_emissions();
        self.request = None;
        self.request_body.clear();
        self.stdout_exposed = false;
    }
}

#[derive(Debug)]
struct CachedScript {
    ast: AST,
    modified: Option<SystemTime>,
}

/// Rhai-backed interpreter with AST caching
#[derive(Debug)]
pub struct RhaiInterpreter {
    limits: RhaiLimits,
    /// Present between module startup and shutdown
    engine: Option<Engine>,
    settings: Settings,
    argv: Vec<String>,
    io: Arc<Mutex<ScriptIo>>,
    symbols: BTreeMap<String, ScriptValue>,
    request_active: bool,
    exit_status: i32,
    /// Compiled scripts keyed by path, invalidated on modification
    ast_cache: HashMap<PathBuf, CachedScript>,
    cache_hits: u64,
    cache_misses: u64,
}

impl RhaiInterpreter {
    /// Create an unstarted interpreter with the given limits
    pub fn new(limits: RhaiLimits) -> Self {
        Self {
            limits,
            engine: None,
            settings: Settings::default(),
            argv: Vec::new(),
            io: Arc::new(Mutex::new(ScriptIo::new(limits.max_output_size))),
            symbols: BTreeMap::new(),
            request_active: false,
            exit_status: 0,
            ast_cache: HashMap::new(),
            cache_hits: 0,
            cache_misses: 0,
        }
    }

    /// Engine limits
    pub fn limits(&self) -> RhaiLimits {
        self.limits
    }

    /// Current value of a seeded symbol
    pub fn symbol(&self, name: &str) -> Option<&ScriptValue> {
        self.symbols.get(name)
    }

    /// AST cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            cached_scripts: self.ast_cache.len(),
            hits: self.cache_hits,
            misses: self.cache_misses,
        }
    }

    /// Drop every compiled script
    pub fn clear_cache(&mut self) {
        self.ast_cache.clear();
        debug!("Rhai AST cache cleared");
    }

    fn build_engine(&self) -> Engine {
        let mut engine = Engine::new();

        engine.set_max_expr_depths(self.limits.max_expr_depth, self.limits.max_function_expr_depth);
        engine.set_max_operations(self.limits.max_operations);
        engine.set_max_string_size(self.limits.max_string_size);
        engine.set_max_array_size(self.limits.max_array_size);
        engine.set_max_map_size(self.limits.max_map_size);

        let io = Arc::clone(&self.io);
        engine.on_print(move |text| {
            let mut line = Vec::with_capacity(text.len() + 1);
            line.extend_from_slice(text.as_bytes());
            line.push(b'\n');
            io.lock().output(line);
        });
        engine.on_debug(|text, source, pos| {
            debug!(script_debug = text, source = ?source, position = %pos);
        });

        Self::register_io_functions(&mut engine, &self.io);
        Self::register_functions(&mut engine);
        engine
    }

    /// Functions that emit output or read the request
    fn register_io_functions(engine: &mut Engine, io: &Arc<Mutex<ScriptIo>>) {
        let shared = Arc::clone(io);
        engine.register_fn("echo", move |value: Dynamic| {
            shared.lock().output(value.to_string().into_bytes());
        });

        let shared = Arc::clone(io);
        engine.register_fn("header", move |line: &str| {
            if line.contains(['\r', '\n']) {
                warn!(header = line, "Header may not contain more than a single line, ignored");
                return;
            }
            shared.lock().header(line.to_string());
        });

        let shared = Arc::clone(io);
        engine.register_fn(
            "http_response_code",
            move |code: i64| -> std::result::Result<(), Box<EvalAltResult>> {
                let status = u16::try_from(code)
                    .ok()
                    .and_then(|code| http::StatusCode::from_u16(code).ok())
                    .ok_or_else(|| format!("invalid HTTP status code {code}"))?;
                let line = match status.canonical_reason() {
                    Some(reason) => format!("HTTP/1.1 {} {}", status.as_u16(), reason),
                    None => format!("HTTP/1.1 {}", status.as_u16()),
                };
                shared.lock().header(line);
                Ok(())
            },
        );

        let shared = Arc::clone(io);
        engine.register_fn(
            "fwrite",
            move |handle: &str, value: Dynamic| -> std::result::Result<i64, Box<EvalAltResult>> {
                let bytes = value.to_string().into_bytes();
                let written = bytes.len() as i64;
                if shared.lock().write_handle(handle, bytes) {
                    Ok(written)
                } else {
                    Err(format!("invalid stream handle {handle:?}").into())
                }
            },
        );

        let shared = Arc::clone(io);
        engine.register_fn("request_body", move || -> String {
            String::from_utf8_lossy(&shared.lock().request_body).into_owned()
        });

        let shared = Arc::clone(io);
        engine.register_fn("request_info", move || -> rhai::Map {
            let io = shared.lock();
            let mut info = rhai::Map::new();
            if let Some(request) = io.request.as_ref() {
                info.insert("method".into(), request.method.as_str().into());
                info.insert("uri".into(), request.uri.as_str().into());
                info.insert("content_type".into(), request.content_type.as_str().into());
                info.insert("content_length".into(), (request.content_length as i64).into());
                info.insert("proto_num".into(), i64::from(request.proto_num).into());
                if let Some(cookie) = request.cookie_data.as_deref() {
                    info.insert("cookie".into(), cookie.into());
                }
            }
            info
        });
    }

    /// Utility functions
    fn register_functions(engine: &mut Engine) {
        engine.register_fn("base64_encode", |s: &str| -> String {
            use base64::{engine::general_purpose, Engine as _};
            general_purpose::STANDARD.encode(s.as_bytes())
        });

        engine.register_fn("base64_decode", |s: &str| -> String {
            use base64::{engine::general_purpose, Engine as _};
            general_purpose::STANDARD
                .decode(s.as_bytes())
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .unwrap_or_default()
        });

        engine.register_fn("unix_time", || -> i64 { chrono::Utc::now().timestamp() });

        engine.register_fn("log_debug", |msg: &str| {
            debug!(script_log = msg);
        });

        engine.register_fn("log_info", |msg: &str| {
            tracing::info!(script_log = msg);
        });

        engine.register_fn("log_warn", |msg: &str| {
            warn!(script_log = msg);
        });
    }

    /// Get or compile the AST for a script file
    fn load_ast(&mut self, path: &Path) -> Result<AST> {
        let engine = self.engine.as_ref().ok_or(ScriptError::NotStarted)?;
        let modified = fs::metadata(path)?.modified().ok();

        if let Some(cached) = self.ast_cache.get(path) {
            if cached.modified == modified {
                self.cache_hits += 1;
                trace!(script = %path.display(), "AST cache hit");
                return Ok(cached.ast.clone());
            }
        }

        self.cache_misses += 1;
        trace!(script = %path.display(), "AST cache miss, compiling");

        let source = fs::read_to_string(path)?;
        let ast = engine.compile(&source)?;
        self.ast_cache.insert(
            path.to_path_buf(),
            CachedScript {
                ast: ast.clone(),
                modified,
            },
        );

        debug!(script = %path.display(), "Script compiled and cached");
        Ok(ast)
    }

    fn build_scope(&self) -> Scope<'static> {
        let mut scope = Scope::new();

        for (name, value) in &self.symbols {
            scope.push_dynamic(name.as_str(), to_dynamic(value));
        }

        let argv: rhai::Array = self.argv.iter().map(|arg| arg.as_str().into()).collect();
        scope.push_constant("argc", argv.len() as i64);
        scope.push_constant("argv", argv);

        let io = self.io.lock();
        if io.stdout_exposed || io.stdio_routed {
            scope.push_constant_dynamic(symbols::STDOUT, symbols::STDOUT.into());
        }
        scope.push_constant_dynamic(STDERR_HANDLE, STDERR_HANDLE.into());

        scope
    }

    /// Replay recorded emissions into the sink
    fn flush(&self, sink: &mut dyn OutputSink) {
        let emissions = self.io.lock().take_emissions();
        for emission in emissions {
            match emission {
                Emission::Output(bytes) => sink.write(&bytes),
                Emission::Header(line) => sink.header(&line),
                Emission::Stdout(bytes) => sink.write_stdout(&bytes),
            }
        }
    }

    fn report(&self, err: &ScriptError, sink: &mut dyn OutputSink) {
        warn!(error = %err, "Script execution failed");
        if self.settings.display_errors {
            sink.write(format!("\n{err}\n").as_bytes());
        }
    }
}

impl Default for RhaiInterpreter {
    fn default() -> Self {
        Self::new(RhaiLimits::default())
    }
}

impl Interpreter for RhaiInterpreter {
    fn name(&self) -> &str {
        "rhai"
    }

    fn is_started(&self) -> bool {
        self.engine.is_some()
    }

    fn startup(&mut self, options: &StartupOptions) -> Result<()> {
        if self.is_started() {
            return Err(ScriptError::startup("interpreter already started"));
        }

        self.settings = Settings::parse(&options.ini)?;
        self.argv = options.argv.clone();
        self.engine = Some(self.build_engine());

        debug!(
            argc = self.argv.len(),
            display_errors = self.settings.display_errors,
            implicit_flush = self.settings.implicit_flush,
            output_buffering = self.settings.output_buffering,
            "Rhai interpreter started"
        );
        Ok(())
    }

    fn declare_request(&mut self, info: &RequestInfo) {
        self.io.lock().request = Some(info.clone());
    }

    fn request_startup(&mut self) -> Result<()> {
        if !self.is_started() {
            return Err(ScriptError::NotStarted);
        }

        self.symbols.clear();
        for name in [symbols::SERVER, symbols::COOKIE, symbols::POST, symbols::GET] {
            self.symbols.insert(name.to_string(), ScriptValue::empty_map());
        }

        // The declared cookie header is honored on its own during startup
        let cookie_data = self
            .io
            .lock()
            .request
            .as_ref()
            .and_then(|request| request.cookie_data.clone());
        if let Some(cookie_data) = cookie_data {
            self.symbols
                .insert(symbols::COOKIE.to_string(), CookieMap::parse(&cookie_data).into());
        }

        self.request_active = true;
        self.exit_status = 0;
        Ok(())
    }

    fn request_active(&self) -> bool {
        self.request_active
    }

    fn set_symbol(&mut self, name: &str, value: ScriptValue) {
        self.symbols.insert(name.to_string(), value);
    }

    fn parse_form_data(&mut self, target: FormTarget, data: &[u8]) {
        self.symbols
            .insert(target.symbol().to_string(), form::decode(data));
    }

    fn attach_request_body(&mut self, body: &[u8]) {
        self.io.lock().request_body = body.to_vec();
    }

    fn expose_stdout(&mut self) {
        self.io.lock().stdout_exposed = true;
    }

    fn route_stdio_to_output(&mut self) -> Result<()> {
        if !self.is_started() {
            return Err(ScriptError::NotStarted);
        }
        self.io.lock().stdio_routed = true;
        Ok(())
    }

    fn finish_request_startup(&mut self) {
        trace!(symbols = self.symbols.len(), "Request startup complete");
    }

    fn execute(&mut self, script: &Path, sink: &mut dyn OutputSink) -> Result<()> {
        if self.engine.is_none() {
            return Err(ScriptError::NotStarted);
        }
        if !self.request_active {
            return Err(ScriptError::NoActiveRequest);
        }

        let ast = match self.load_ast(script) {
            Ok(ast) => ast,
            Err(err) => {
                self.exit_status = ERROR_EXIT_STATUS;
                self.report(&err, sink);
                return Err(err);
            }
        };

        let mut scope = self.build_scope();
        let result = match self.engine.as_ref() {
            Some(engine) => engine
                .run_ast_with_scope(&mut scope, &ast)
                .map_err(ScriptError::from),
            None => Err(ScriptError::NotStarted),
        };

        self.flush(sink);

        match result {
            Ok(()) => {
                self.exit_status = 0;
                Ok(())
            }
            Err(err) => {
                self.exit_status = ERROR_EXIT_STATUS;
                self.report(&err, sink);
                Err(err)
            }
        }
    }

    fn exit_status(&self) -> i32 {
        self.exit_status
    }

    fn request_shutdown(&mut self) {
        self.request_active = false;
        self.symbols.clear();
        self.io.lock().end_request();
    }

    fn shutdown(&mut self) {
        if self.request_active {
            self.request_shutdown();
        }
        self.engine = None;
        self.clear_cache();
        self.argv.clear();
        self.settings = Settings::default();
        *self.io.lock() = ScriptIo::new(self.limits.max_output_size);
        debug!("Rhai interpreter shut down");
    }
}

fn to_dynamic(value: &ScriptValue) -> Dynamic {
    match value {
        ScriptValue::Bool(b) => Dynamic::from(*b),
        ScriptValue::Int(i) => Dynamic::from(*i),
        ScriptValue::Str(s) => s.as_str().into(),
        ScriptValue::List(items) => Dynamic::from_array(items.iter().map(to_dynamic).collect()),
        ScriptValue::Map(map) => Dynamic::from_map(
            map.iter()
                .map(|(key, value)| (key.as_str().into(), to_dynamic(value)))
                .collect(),
        ),
    }
}
