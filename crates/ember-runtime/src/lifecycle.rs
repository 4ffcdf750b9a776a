//! Invocation lifecycle manager

use crate::command::{tokenize, CommandPaths};
use crate::context::InvocationContext;
use crate::env::{valid_name, Environment, ProcessEnvironment};
use crate::seeder::RequestSeeder;
use ember_config::{CommandConfig, Config};
use ember_core::response::responses;
use ember_core::{Error, RequestDescriptor, Result};
use ember_scripting::{Interpreter, StartupOptions};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Body returned by command mode when the interpreter cannot be constructed
pub const INIT_FAILED: &[u8] = b"Interpreter init failed.";

/// Lifecycle state of a [`Bridge`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No interpreter constructed
    Uninitialized,
    /// Interpreter constructed and idle
    Warm,
    /// Request environment being seeded
    Seeding,
    /// Script running
    Executing,
    /// Output being collected
    Capturing,
    /// Request-level teardown in progress
    ShuttingDownRequest,
    /// Request seeded and waiting for execution
    RequestActive,
    /// Interpreter shut down and buffers released
    Shutdown,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Warm => "warm",
            Self::Seeding => "seeding",
            Self::Executing => "executing",
            Self::Capturing => "capturing",
            Self::ShuttingDownRequest => "shutting-down-request",
            Self::RequestActive => "request-active",
            Self::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Drives one interpreter through request-mode and command-mode invocations.
///
/// Every operation takes `&mut self`; one invocation completes before the
/// next begins. The capture buffers live in an [`InvocationContext`] owned
/// by the bridge and are reset, not reallocated, between invocations.
#[derive(Debug)]
pub struct Bridge<I, E = ProcessEnvironment> {
    interpreter: I,
    env: E,
    context: InvocationContext,
    seeder: RequestSeeder,
    command: CommandConfig,
    request_ini: BTreeMap<String, String>,
    state: LifecycleState,
    /// Names set by the last `export_request_headers` call
    header_exports: Vec<String>,
}

impl<I: Interpreter> Bridge<I, ProcessEnvironment> {
    /// Bridge bound to the real process environment
    pub fn new(interpreter: I, config: &Config) -> Self {
        Self::with_environment(interpreter, ProcessEnvironment, config)
    }
}

impl<I: Interpreter, E: Environment> Bridge<I, E> {
    /// Bridge bound to a custom environment
    pub fn with_environment(interpreter: I, env: E, config: &Config) -> Self {
        Self {
            interpreter,
            env,
            context: InvocationContext::new(config.buffer),
            seeder: RequestSeeder::new(config.server_info.clone(), config.request.clone()),
            command: config.command.clone(),
            request_ini: config.interpreter.ini.clone(),
            state: LifecycleState::Uninitialized,
            header_exports: Vec::new(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// The driven interpreter
    pub fn interpreter(&self) -> &I {
        &self.interpreter
    }

    /// The ambient environment
    pub fn environment(&self) -> &E {
        &self.env
    }

    /// Capture state of the current or last invocation
    pub fn context(&self) -> &InvocationContext {
        &self.context
    }

    fn transition(&mut self, next: LifecycleState) {
        debug!(from = %self.state, to = %next, "Lifecycle transition");
        self.state = next;
    }

    /// Warm start. Does nothing when the interpreter is already started.
    pub fn initialize(&mut self) -> Result<()> {
        if self.interpreter.is_started() {
            return Ok(());
        }

        let options = StartupOptions {
            argv: Vec::new(),
            ini: self.request_ini.clone(),
        };
        if let Err(err) = self.interpreter.startup(&options) {
            error!(interpreter = self.interpreter.name(), error = %err, "Interpreter startup failed");
            self.state = LifecycleState::Uninitialized;
            return Err(Error::StartupFailure(err.to_string()));
        }

        self.transition(LifecycleState::Warm);
        info!(interpreter = self.interpreter.name(), "Interpreter warm");
        Ok(())
    }

    /// Execute `script` for `request` and return the composed HTTP response.
    ///
    /// Never fails: startup and allocation failures become canned 500
    /// responses.
    pub fn run_once(&mut self, request: &RequestDescriptor, script: &Path) -> Vec<u8> {
        match self.try_run_once(request, script) {
            Ok(response) => response,
            Err(err) => failure_response(&err),
        }
    }

    fn try_run_once(&mut self, request: &RequestDescriptor, script: &Path) -> Result<Vec<u8>> {
        request.validate()?;
        self.begin_request(request, Some(script))?;
        self.execute_seeded(script);
        self.context.compose()
    }

    /// Seed `request` without executing anything.
    ///
    /// A request left active by an earlier call is torn down first.
    pub fn set_request_info(&mut self, request: &RequestDescriptor) -> Result<()> {
        request.validate()?;
        self.begin_request(request, None)?;
        self.transition(LifecycleState::RequestActive);
        Ok(())
    }

    /// Execute `script` in the request seeded by [`set_request_info`], tear
    /// the request down and return the raw body.
    ///
    /// A script error still returns the partial body.
    ///
    /// [`set_request_info`]: Bridge::set_request_info
    pub fn execute_script(&mut self, script: &Path) -> Result<Vec<u8>> {
        if self.state != LifecycleState::RequestActive {
            return Err(Error::NoActiveRequest);
        }
        self.execute_seeded(script);
        Ok(self.context.body().to_vec())
    }

    fn begin_request(&mut self, request: &RequestDescriptor, script: Option<&Path>) -> Result<()> {
        if self.interpreter.request_active() {
            debug!("Tearing down stale request");
            self.interpreter.request_shutdown();
        }

        self.initialize()?;
        self.context.reset();
        self.seeder.export_environment(request, script, &mut self.env);

        self.transition(LifecycleState::Seeding);
        if let Err(err) = self
            .seeder
            .seed(request, &mut self.interpreter, &self.env, &mut self.context)
        {
            self.shutdown();
            return Err(err);
        }
        Ok(())
    }

    /// Execute, capture and tear down the seeded request
    fn execute_seeded(&mut self, script: &Path) {
        self.transition(LifecycleState::Executing);
        if let Err(err) = self.interpreter.execute(script, &mut self.context) {
            warn!(
                script = %script.display(),
                exit_status = self.interpreter.exit_status(),
                error = %err,
                "Script failed, returning partial output"
            );
        }

        self.transition(LifecycleState::Capturing);
        self.context.merge_stdout();
        let truncated = self.context.body().truncated_bytes();
        if truncated > 0 {
            warn!(truncated, "Response body truncated");
        }

        self.transition(LifecycleState::ShuttingDownRequest);
        self.interpreter.request_shutdown();
        self.transition(LifecycleState::Warm);
    }

    /// Run a console command with a freshly constructed interpreter and
    /// return its raw output.
    pub fn run_command(&mut self, command_line: &str, app_public_path: &Path) -> Vec<u8> {
        if self.interpreter.is_started() {
            debug!("Shutting down warm interpreter for command mode");
            self.interpreter.shutdown();
        }
        self.context.reset();

        let argv = tokenize(&self.command.program_name, command_line, self.command.max_args);
        let paths = CommandPaths::resolve(app_public_path, &self.command);

        if let Err(err) = self.env.set_current_dir(&paths.working_dir) {
            warn!(dir = %paths.working_dir.display(), error = %err, "Failed to change working directory");
        }
        for (name, value) in &self.command.env {
            self.env.set_var(name, value);
        }

        let options = StartupOptions {
            argv,
            ini: self.command.ini.clone(),
        };
        if let Err(err) = self.interpreter.startup(&options) {
            error!(error = %err, "Command interpreter startup failed");
            self.state = LifecycleState::Uninitialized;
            return INIT_FAILED.to_vec();
        }

        if let Err(err) = self
            .interpreter
            .request_startup()
            .and_then(|()| self.interpreter.route_stdio_to_output())
        {
            error!(error = %err, "Command request startup failed");
            self.interpreter.shutdown();
            self.state = LifecycleState::Uninitialized;
            return INIT_FAILED.to_vec();
        }
        self.interpreter.finish_request_startup();

        info!(
            argc = options.argv.len(),
            script = %paths.entry_script.display(),
            "Running command"
        );
        self.execute_seeded(&paths.entry_script);

        let output = self.context.body().to_vec();
        self.interpreter.shutdown();
        self.transition(LifecycleState::Uninitialized);
        output
    }

    /// Set an environment variable with `setenv` semantics.
    ///
    /// Returns 0 on success, including when the variable exists and
    /// `overwrite` is false, and -1 for an invalid name or value.
    pub fn set_environment_variable(&mut self, name: &str, value: &str, overwrite: bool) -> i32 {
        if !valid_name(name) || value.contains('\0') {
            warn!(name, "Rejected environment variable");
            return -1;
        }
        if !overwrite && self.env.var(name).is_some() {
            return 0;
        }
        self.env.set_var(name, value);
        0
    }

    /// Export host request headers as `HTTP_<NAME>` variables, removing the
    /// previous request's exports first.
    pub fn export_request_headers<'a, H>(&mut self, headers: H)
    where
        H: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for name in self.header_exports.drain(..) {
            self.env.remove_var(&name);
        }

        for (name, value) in headers {
            let var = header_variable(name);
            if !valid_name(&var) || value.contains('\0') {
                warn!(header = name, "Skipping header that cannot be exported");
                continue;
            }
            self.env.set_var(&var, value);
            self.header_exports.push(var);
        }

        debug!(exported = self.header_exports.len(), "Request headers exported");
    }

    /// Tear everything down and release the capture buffers. Idempotent.
    pub fn shutdown(&mut self) {
        if self.state == LifecycleState::Shutdown && !self.interpreter.is_started() {
            debug!("Bridge already shut down");
            return;
        }

        if self.interpreter.request_active() {
            self.interpreter.request_shutdown();
        }
        if self.interpreter.is_started() {
            self.interpreter.shutdown();
        }
        self.context.release();
        self.transition(LifecycleState::Shutdown);
        info!(interpreter = self.interpreter.name(), "Interpreter shut down");
    }
}

/// `Content-Type` → `HTTP_CONTENT_TYPE`
fn header_variable(name: &str) -> String {
    let mut var = String::with_capacity(name.len() + 5);
    var.push_str("HTTP_");
    var.extend(
        name.chars()
            .map(|c| if c == '-' { '_' } else { c.to_ascii_uppercase() }),
    );
    var
}

fn failure_response(err: &Error) -> Vec<u8> {
    match err {
        Error::StartupFailure(_) => responses::startup_failure(),
        Error::AllocationFailure(_) => responses::allocation_failure(),
        other => {
            warn!(error = %other, "Invocation failed");
            responses::internal_error(&other.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_variable() {
        assert_eq!(header_variable("Content-Type"), "HTTP_CONTENT_TYPE");
        assert_eq!(header_variable("cookie"), "HTTP_COOKIE");
        assert_eq!(header_variable("X-Forwarded-For"), "HTTP_X_FORWARDED_FOR");
    }

    #[test]
    fn test_failure_responses() {
        assert_eq!(
            failure_response(&Error::StartupFailure("x".into())),
            b"HTTP/1.1 500 Internal Server Error\r\nContent-Type: text/plain\r\n\r\nInterpreter init failed.".to_vec()
        );
        assert_eq!(
            failure_response(&Error::AllocationFailure("x".into())),
            b"HTTP/1.1 500 Internal Server Error\r\nContent-Type: text/plain\r\n\r\nAllocation failure".to_vec()
        );
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LifecycleState::ShuttingDownRequest.to_string(), "shutting-down-request");
        assert_eq!(LifecycleState::Warm.to_string(), "warm");
    }
}
