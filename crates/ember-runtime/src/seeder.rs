//! Request environment seeding

use crate::context::InvocationContext;
use crate::env::Environment;
use ember_config::RequestConfig;
use ember_core::request::{normalize_content_type, parses_form_body};
use ember_core::{CookieMap, Error, RequestDescriptor, Result, ScriptValue, ServerConstants, ServerInfo};
use ember_scripting::{symbols, FormTarget, Interpreter, RequestInfo};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, error, trace};

/// Translates a [`RequestDescriptor`] into the interpreter's per-request
/// environment.
#[derive(Debug, Clone)]
pub struct RequestSeeder {
    constants: ServerConstants,
    request: RequestConfig,
}

impl RequestSeeder {
    /// Create a seeder from server constants and request settings
    pub fn new(constants: ServerConstants, request: RequestConfig) -> Self {
        Self { constants, request }
    }

    /// Server constants used for `_SERVER`
    pub fn constants(&self) -> &ServerConstants {
        &self.constants
    }

    /// Export the request's process-level variables before seeding.
    ///
    /// `SCRIPT_FILENAME` names `script` when the script is known up front and
    /// falls back to the configured script name otherwise. `QUERY_STRING` is
    /// removed when the request has none so a previous request's value cannot
    /// leak.
    pub fn export_environment<E>(&self, request: &RequestDescriptor, script: Option<&Path>, env: &mut E)
    where
        E: Environment + ?Sized,
    {
        env.set_var("REQUEST_URI", &request.uri);
        env.set_var("REQUEST_METHOD", &request.method);
        match script {
            Some(script) => env.set_var("SCRIPT_FILENAME", &script.to_string_lossy()),
            None => env.set_var("SCRIPT_FILENAME", &self.constants.script_name),
        }
        env.set_var("PHP_SELF", &self.constants.self_path);

        let query = request.query_string();
        if query.is_empty() {
            env.remove_var("QUERY_STRING");
        } else {
            env.set_var("QUERY_STRING", query);
        }

        for (name, value) in &self.request.exports {
            env.set_var(name, value);
        }
    }

    /// Seed a request into a started interpreter.
    ///
    /// Fails with [`Error::StartupFailure`] when the interpreter refuses to
    /// start the request; nothing after request startup is attempted then.
    pub fn seed<I, E>(
        &self,
        request: &RequestDescriptor,
        interpreter: &mut I,
        env: &E,
        ctx: &mut InvocationContext,
    ) -> Result<()>
    where
        I: Interpreter + ?Sized,
        E: Environment + ?Sized,
    {
        let cookie_header = env.var(&self.request.cookie_env);
        let content_type = request
            .content_type
            .clone()
            .or_else(|| env.var(&self.request.content_type_env));
        let normalized = normalize_content_type(content_type.as_deref());

        let declared_type = match request.body {
            Some(_) => normalized.to_string(),
            None => content_type.clone().unwrap_or_default(),
        };
        interpreter.declare_request(&RequestInfo::declare(
            request,
            declared_type,
            cookie_header.clone(),
        ));

        interpreter.request_startup().map_err(|e| {
            error!(error = %e, method = %request.method, uri = %request.uri, "Request startup failed");
            Error::StartupFailure(e.to_string())
        })?;

        let query = request.query_string();
        if !query.is_empty() {
            interpreter.parse_form_data(FormTarget::Query, query.as_bytes());
        }

        let server = ServerInfo::now(request, &self.constants);
        trace!(keys = server.len(), "Server info populated");
        interpreter.set_symbol(symbols::SERVER, server.into());

        if let Some(header) = cookie_header.as_deref() {
            let cookies = CookieMap::parse(header);
            trace!(cookies = cookies.len(), "Cookies populated");
            interpreter.set_symbol(symbols::COOKIE, cookies.into());
        }

        interpreter.expose_stdout();
        ctx.open_stdout();

        if let Some(body) = request.body.as_deref() {
            interpreter.attach_request_body(body);
            if parses_form_body(normalized, &request.method) {
                interpreter.parse_form_data(FormTarget::Post, body);
            }
        }

        if self.request.expose_env {
            let vars: BTreeMap<String, ScriptValue> = env
                .vars()
                .into_iter()
                .map(|(k, v)| (k, ScriptValue::Str(v)))
                .collect();
            interpreter.set_symbol(symbols::ENV, ScriptValue::Map(vars));
        }

        interpreter.finish_request_startup();

        debug!(
            method = %request.method,
            uri = %request.uri,
            content_type = normalized,
            content_length = request.content_length(),
            cookies = cookie_header.is_some(),
            "Request seeded"
        );
        Ok(())
    }
}
