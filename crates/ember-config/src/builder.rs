//! Configuration builder

use crate::types::{CommandConfig, Config, InterpreterConfig, ServeConfig};
use ember_core::{CapacityPolicy, ServerConstants};
use std::path::PathBuf;

/// Builder for constructing configuration programmatically
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new configuration builder starting from defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the buffer growth policy
    pub fn buffer(mut self, policy: CapacityPolicy) -> Self {
        self.config.buffer = policy;
        self
    }

    /// Set the server info constants
    pub fn server_info(mut self, constants: ServerConstants) -> Self {
        self.config.server_info = constants;
        self
    }

    /// Export a static environment variable before every request
    pub fn export(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.request.exports.insert(name.into(), value.into());
        self
    }

    /// Toggle the `_ENV` snapshot
    pub fn expose_env(mut self, expose: bool) -> Self {
        self.config.request.expose_env = expose;
        self
    }

    /// Set command-mode configuration
    pub fn command(mut self, command: CommandConfig) -> Self {
        self.config.command = command;
        self
    }

    /// Set interpreter limits
    pub fn interpreter(mut self, interpreter: InterpreterConfig) -> Self {
        self.config.interpreter = interpreter;
        self
    }

    /// Set serve-mode configuration
    pub fn serve(mut self, serve: ServeConfig) -> Self {
        self.config.serve = serve;
        self
    }

    /// Set the serve-mode script
    pub fn script(mut self, script: impl Into<PathBuf>) -> Self {
        self.config.serve.script = script.into();
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> ember_core::Result<Config> {
        crate::validator::validate_config(&self.config)?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .buffer(CapacityPolicy::new(64, 1024))
            .export("APP_URL", "http://localhost")
            .script("app.rhai")
            .build()
            .unwrap();

        assert_eq!(config.buffer.chunk_size, 64);
        assert_eq!(
            config.request.exports.get("APP_URL").map(String::as_str),
            Some("http://localhost")
        );
        assert_eq!(config.serve.script, PathBuf::from("app.rhai"));
    }

    #[test]
    fn test_builder_rejects_invalid_policy() {
        let result = ConfigBuilder::new()
            .buffer(CapacityPolicy::new(1024, 64))
            .build();
        assert!(result.is_err());
    }
}
