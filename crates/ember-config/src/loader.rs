//! Configuration loading

use crate::{Config, ConfigFormat};
use ember_core::{Error, Result};
use regex::Regex;
use std::env;
use std::fs;
use std::path::Path;

/// Load configuration from a file
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file {}: {e}", path.display())))?;

    let format = ConfigFormat::from_path(path)?;

    load_from_str(&content, format)
}

/// Expand environment variables in configuration string
/// Supports syntax: ${VAR} and ${VAR:-default}
fn expand_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}")
        .map_err(|e| Error::Config(format!("Invalid regex: {e}")))?;

    let mut result = String::with_capacity(content.len());
    let mut last_match = 0;

    for cap in re.captures_iter(content) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let var_name = var_name.as_str();
        let default_value = cap.get(3).map(|m| m.as_str());

        let value = match (env::var(var_name), default_value) {
            (Ok(val), _) => val,
            (Err(_), Some(default)) => default.to_string(),
            (Err(_), None) => {
                return Err(Error::Config(format!(
                    "Environment variable '{var_name}' not set and no default provided"
                )));
            }
        };

        result.push_str(&content[last_match..full_match.start()]);
        result.push_str(&value);
        last_match = full_match.end();
    }

    result.push_str(&content[last_match..]);

    Ok(result)
}

/// Load configuration from a string
pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<Config> {
    let expanded_content = expand_env_vars(content)?;

    // An empty YAML document deserializes to unit, not to a map
    if format == ConfigFormat::Yaml && expanded_content.trim().is_empty() {
        return Ok(Config::default());
    }

    let config = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse YAML: {e}")))?,
        ConfigFormat::Toml => toml::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {e}")))?,
        ConfigFormat::Json => serde_json::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse JSON: {e}")))?,
    };

    Ok(config)
}

/// Load configuration, apply `EMBER_*` overrides from the process
/// environment and validate the result.
///
/// Without a path the defaults are used.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            tracing::debug!(path = %path.as_ref().display(), "Loading configuration");
            load_from_file(path)?
        }
        None => Config::default(),
    };

    apply_overrides(&mut config, |name| env::var(name).ok())?;
    crate::validator::validate_config(&config)?;

    Ok(config)
}

/// Override selected fields from `lookup`:
///
/// | variable | field |
/// |---|---|
/// | `EMBER_LISTEN` | `serve.listen` |
/// | `EMBER_SCRIPT` | `serve.script` |
/// | `EMBER_MAX_BODY_SIZE` | `serve.max_body_size` |
/// | `EMBER_BUFFER_MAX_SIZE` | `buffer.max_size` |
/// | `EMBER_LOG_LEVEL` | `logging.level` |
pub fn apply_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    fn parsed<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        value
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid {name} {value:?}: {e}")))
    }

    if let Some(value) = lookup("EMBER_LISTEN") {
        config.serve.listen = parsed("EMBER_LISTEN", &value)?;
    }
    if let Some(value) = lookup("EMBER_SCRIPT") {
        config.serve.script = value.into();
    }
    if let Some(value) = lookup("EMBER_MAX_BODY_SIZE") {
        config.serve.max_body_size = parsed("EMBER_MAX_BODY_SIZE", &value)?;
    }
    if let Some(value) = lookup("EMBER_BUFFER_MAX_SIZE") {
        config.buffer.max_size = parsed("EMBER_BUFFER_MAX_SIZE", &value)?;
    }
    if let Some(value) = lookup("EMBER_LOG_LEVEL") {
        config.logging.level = value;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML_CONFIG: &str = r#"
buffer:
  chunk_size: 1024
  max_size: 65536

server_info:
  script_name: "/index.rhai"
  server_port: 8080

request:
  exports:
    APP_URL: "http://localhost"

command:
  program_name: "runner"
  max_args: 16

serve:
  listen: "127.0.0.1:9000"
  shutdown_timeout: "5s"
"#;

    #[test]
    fn test_load_yaml_config() {
        let config = load_from_str(YAML_CONFIG, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.buffer.chunk_size, 1024);
        assert_eq!(config.buffer.max_size, 65536);
        assert_eq!(config.server_info.script_name, "/index.rhai");
        assert_eq!(config.server_info.server_port, 8080);
        // Unspecified constants keep their defaults
        assert_eq!(config.server_info.https, "off");
        assert_eq!(config.request.exports.len(), 1);
        assert_eq!(config.command.program_name, "runner");
        assert_eq!(config.serve.listen.to_string(), "127.0.0.1:9000");
        assert_eq!(config.serve.shutdown_timeout.as_secs(), 5);
    }

    #[test]
    fn test_load_toml_config() {
        let toml_config = r#"
[buffer]
chunk_size = 4096
max_size = 8192

[logging]
level = "debug"
json = true

[serve]
replay_cookies = true
"#;
        let config = load_from_str(toml_config, ConfigFormat::Toml).unwrap();
        assert_eq!(config.buffer.chunk_size, 4096);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert!(config.serve.replay_cookies);
        assert_eq!(config.serve.queue_depth, 64);
    }

    #[test]
    fn test_load_json_config() {
        let json_config = r#"{ "interpreter": { "max_operations": 500 } }"#;
        let config = load_from_str(json_config, ConfigFormat::Json).unwrap();
        assert_eq!(config.interpreter.max_operations, 500);
        assert_eq!(config.buffer, ember_core::CapacityPolicy::default());
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = load_from_str("", ConfigFormat::Yaml).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_yaml() {
        let result = load_from_str("buffer: [1, 2", ConfigFormat::Yaml);
        assert!(result.is_err());
    }

    #[test]
    fn test_env_var_default() {
        env::remove_var("EMBER_TEST_UNSET_PORT");
        let yaml = r#"
server_info:
  server_port: ${EMBER_TEST_UNSET_PORT:-8443}
"#;
        let config = load_from_str(yaml, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.server_info.server_port, 8443);
    }

    #[test]
    fn test_env_var_override_default() {
        env::set_var("EMBER_TEST_SERVER_NAME", "app.local");
        let yaml = r#"
server_info:
  server_name: "${EMBER_TEST_SERVER_NAME:-127.0.0.1}"
"#;
        let config = load_from_str(yaml, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.server_info.server_name, "app.local");
        env::remove_var("EMBER_TEST_SERVER_NAME");
    }

    #[test]
    fn test_missing_env_var_no_default() {
        env::remove_var("EMBER_TEST_MISSING_VAR");
        let yaml = r#"
serve:
  listen: "${EMBER_TEST_MISSING_VAR}"
"#;
        let result = load_from_str(yaml, ConfigFormat::Yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("EMBER_TEST_MISSING_VAR"));
    }

    #[test]
    fn test_multiple_env_vars() {
        env::set_var("EMBER_TEST_HOST", "localhost");
        env::set_var("EMBER_TEST_PORT", "8080");

        let expanded = expand_env_vars("http://${EMBER_TEST_HOST}:${EMBER_TEST_PORT}/").unwrap();
        assert_eq!(expanded, "http://localhost:8080/");

        env::remove_var("EMBER_TEST_HOST");
        env::remove_var("EMBER_TEST_PORT");
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(YAML_CONFIG.as_bytes()).unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.command.max_args, 16);
    }

    #[test]
    fn test_load_config_without_path() {
        let config = load_config(None::<&Path>).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_config_rejects_invalid() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(br#"{ "buffer": { "chunk_size": 0 } }"#).unwrap();

        assert!(load_config(Some(file.path())).is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let vars: std::collections::HashMap<&str, &str> = [
            ("EMBER_LISTEN", "0.0.0.0:9000"),
            ("EMBER_SCRIPT", "/srv/app/index.rhai"),
            ("EMBER_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        apply_overrides(&mut config, |name| vars.get(name).map(|v| v.to_string())).unwrap();

        assert_eq!(config.serve.listen.port(), 9000);
        assert_eq!(config.serve.script, std::path::PathBuf::from("/srv/app/index.rhai"));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.serve.max_body_size, Config::default().serve.max_body_size);
    }

    #[test]
    fn test_apply_overrides_rejects_bad_values() {
        let mut config = Config::default();
        let result = apply_overrides(&mut config, |name| {
            (name == "EMBER_MAX_BODY_SIZE").then(|| "lots".to_string())
        });
        assert!(result.is_err());
    }
}
