//! Configuration validation

use crate::Config;
use ember_core::{Error, Result};

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_buffer(config)?;
    validate_server_info(config)?;
    validate_request(config)?;
    validate_command(config)?;
    validate_serve(config)?;

    Ok(())
}

fn validate_buffer(config: &Config) -> Result<()> {
    let buffer = &config.buffer;

    if buffer.chunk_size == 0 {
        return Err(Error::Config("buffer.chunk_size must be > 0".to_string()));
    }

    if buffer.max_size < buffer.chunk_size {
        return Err(Error::Config(format!(
            "buffer.max_size ({}) must be >= buffer.chunk_size ({})",
            buffer.max_size, buffer.chunk_size
        )));
    }

    if buffer.max_size % buffer.chunk_size != 0 {
        tracing::warn!(
            chunk_size = buffer.chunk_size,
            max_size = buffer.max_size,
            "buffer.max_size is not a multiple of chunk_size; the last partial chunk is never used"
        );
    }

    Ok(())
}

fn validate_server_info(config: &Config) -> Result<()> {
    let info = &config.server_info;

    if !info.script_name.starts_with('/') {
        return Err(Error::Config(format!(
            "server_info.script_name must be absolute, got {:?}",
            info.script_name
        )));
    }

    if info.server_port == 0 {
        return Err(Error::Config("server_info.server_port must be > 0".to_string()));
    }

    if !info.protocol.starts_with("HTTP/") {
        return Err(Error::Config(format!(
            "server_info.protocol must start with HTTP/, got {:?}",
            info.protocol
        )));
    }

    Ok(())
}

fn validate_request(config: &Config) -> Result<()> {
    if config.request.cookie_env.is_empty() {
        return Err(Error::Config("request.cookie_env cannot be empty".to_string()));
    }

    for name in config.request.exports.keys() {
        validate_env_name(name, "request.exports")?;
    }

    Ok(())
}

fn validate_command(config: &Config) -> Result<()> {
    let command = &config.command;

    if command.program_name.is_empty() || command.program_name.contains(char::is_whitespace) {
        return Err(Error::Config(format!(
            "command.program_name must be a single non-empty token, got {:?}",
            command.program_name
        )));
    }

    if command.max_args == 0 {
        return Err(Error::Config("command.max_args must be > 0".to_string()));
    }

    if command.entry_script.as_os_str().is_empty() {
        return Err(Error::Config("command.entry_script cannot be empty".to_string()));
    }

    for name in command.env.keys() {
        validate_env_name(name, "command.env")?;
    }

    Ok(())
}

fn validate_serve(config: &Config) -> Result<()> {
    if config.serve.max_body_size == 0 {
        return Err(Error::Config("serve.max_body_size must be > 0".to_string()));
    }

    if config.serve.queue_depth == 0 {
        return Err(Error::Config("serve.queue_depth must be > 0".to_string()));
    }

    if config.serve.shutdown_timeout.as_secs() > 300 {
        tracing::warn!("serve.shutdown_timeout is very high (>5 minutes)");
    }

    Ok(())
}

fn validate_env_name(name: &str, section: &str) -> Result<()> {
    if name.is_empty() || name.contains('=') || name.contains('\0') {
        return Err(Error::Config(format!(
            "{section}: invalid environment variable name {:?}",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_zero_chunk_size() {
        let mut config = Config::default();
        config.buffer.chunk_size = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_ceiling_below_chunk() {
        let mut config = Config::default();
        config.buffer.chunk_size = 1024;
        config.buffer.max_size = 512;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_relative_script_name() {
        let mut config = Config::default();
        config.server_info.script_name = "index.php".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_program_name_with_space() {
        let mut config = Config::default();
        config.command.program_name = "my runner".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_export_name() {
        let mut config = Config::default();
        config
            .request
            .exports
            .insert("BAD=NAME".to_string(), "x".to_string());
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("request.exports"));
    }
}
