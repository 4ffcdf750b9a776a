//! Ember CLI

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ember_config::{load_config, Config};
use ember_core::RequestDescriptor;
use ember_runtime::{rhai_bridge, BridgeWorker, Server, SignalHandler};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "ember")]
#[command(about = "Embedded script interpreter bridge", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file (YAML, TOML or JSON)
    #[arg(short, long, global = true, env = "EMBER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve one script over HTTP
    Serve {
        /// Script executed for every request
        #[arg(short, long)]
        script: Option<PathBuf>,

        /// Listen address
        #[arg(long)]
        listen: Option<SocketAddr>,
    },

    /// Run a script once for a single request and print the raw response
    Request {
        /// Script to execute
        script: PathBuf,

        /// Request URI, query included
        #[arg(short, long, default_value = "/")]
        uri: String,

        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Request body
        #[arg(short, long)]
        data: Option<String>,

        /// Content type of the body
        #[arg(long)]
        content_type: Option<String>,

        /// Request header as `Name: Value` (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },

    /// Run a console command through the entry script
    Command {
        /// Public directory of the application
        #[arg(short, long, default_value = "public")]
        app_public: PathBuf,

        /// Command line handed to the entry script
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        args: Vec<String>,
    },

    /// Validate configuration file
    Validate {
        /// Print the effective configuration as JSON
        #[arg(long)]
        print: bool,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("Ember interpreter bridge");
        println!("Version: {}", env!("CARGO_PKG_VERSION"));
        println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
        return Ok(());
    }

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) if matches!(cli.command, Commands::Validate { .. }) => {
            eprintln!("✗ Configuration validation failed: {}", e);
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("Failed to load configuration"),
    };

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    init_tracing(level, cli.json_logs || config.logging.json)?;

    match cli.command {
        Commands::Serve { script, listen } => serve(config, script, listen).await,

        Commands::Request {
            script,
            uri,
            method,
            data,
            content_type,
            headers,
        } => {
            let mut request = RequestDescriptor::new(method, uri);
            if let Some(content_type) = content_type {
                request = request.with_content_type(content_type);
            }
            if let Some(data) = data {
                request = request.with_body(data);
            }

            let headers = parse_headers(&headers)?;
            let mut bridge = rhai_bridge(&config);
            bridge.export_request_headers(headers.iter().map(|(n, v)| (n.as_str(), v.as_str())));

            let response = bridge.run_once(&request, &script);
            bridge.shutdown();

            std::io::stdout().lock().write_all(&response)?;
            Ok(())
        }

        Commands::Command { app_public, args } => {
            let mut bridge = rhai_bridge(&config);
            let output = bridge.run_command(&args.join(" "), &app_public);
            bridge.shutdown();

            std::io::stdout().lock().write_all(&output)?;
            Ok(())
        }

        Commands::Validate { print } => {
            tracing::info!("✓ Configuration is valid");
            tracing::info!("  Listen: {}", config.serve.listen);
            tracing::info!("  Script: {}", config.serve.script.display());
            tracing::info!("  Buffer ceiling: {} bytes", config.buffer.max_size);
            tracing::info!("  Exports: {}", config.request.exports.len());
            if print {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            Ok(())
        }

        Commands::Version => Ok(()),
    }
}

async fn serve(mut config: Config, script: Option<PathBuf>, listen: Option<SocketAddr>) -> Result<()> {
    if let Some(script) = script {
        config.serve.script = script;
    }
    if let Some(listen) = listen {
        config.serve.listen = listen;
    }

    tracing::info!(
        listen = %config.serve.listen,
        script = %config.serve.script.display(),
        "Starting Ember"
    );

    let worker = BridgeWorker::spawn(rhai_bridge(&config), config.serve.queue_depth)?;
    let server = Server::builder()
        .config(config)
        .bridge(worker.handle())
        .build()?;

    let shutdown_signal = server.shutdown_signal();
    tokio::spawn(async move {
        let handler = SignalHandler::new(shutdown_signal);
        handler.run().await;
    });

    server.run().await?;
    worker.join().await?;

    tracing::info!("Ember stopped");
    Ok(())
}

/// `Name: Value` pairs from the command line
fn parse_headers(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|line| match line.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok((name.trim().to_string(), value.trim().to_string()))
            }
            _ => bail!("invalid header {:?}, expected `Name: Value`", line),
        })
        .collect()
}

fn init_tracing(level: &str, json: bool) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid log level {:?}", level))?,
    };

    // stdout carries responses and command output, logs go to stderr
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_level(true)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_headers() {
        let headers = parse_headers(&["Cookie: a=1".to_string(), "X-Id:7".to_string()]).unwrap();
        assert_eq!(
            headers,
            vec![
                ("Cookie".to_string(), "a=1".to_string()),
                ("X-Id".to_string(), "7".to_string())
            ]
        );
        assert!(parse_headers(&["nocolon".to_string()]).is_err());
        assert!(parse_headers(&[": empty".to_string()]).is_err());
    }

    #[test]
    fn test_cli_parses_command() {
        let cli = Cli::parse_from(["ember", "command", "-a", "/srv/app/public", "migrate", "--force"]);
        match cli.command {
            Commands::Command { app_public, args } => {
                assert_eq!(app_public, PathBuf::from("/srv/app/public"));
                assert_eq!(args, vec!["migrate", "--force"]);
            }
            _ => panic!("expected command"),
        }
    }

    #[test]
    fn test_cli_parses_request() {
        let cli = Cli::parse_from([
            "ember", "request", "index.rhai", "-X", "POST", "-u", "/f?x=1", "-d", "a=1", "-H", "Cookie: s=1",
        ]);
        match cli.command {
            Commands::Request { method, uri, data, headers, .. } => {
                assert_eq!(method, "POST");
                assert_eq!(uri, "/f?x=1");
                assert_eq!(data.as_deref(), Some("a=1"));
                assert_eq!(headers, vec!["Cookie: s=1"]);
            }
            _ => panic!("expected request"),
        }
    }
}
