//! One-shot command runner built on a relink session.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use relink::{
    ConfigError, Event, LoggingConfig, Session, SessionConfig, TcpTransport, Value, logging,
};
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "relink-cli")]
#[command(about = "Run a command through a resilient session")]
struct Args {
    /// Path to configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Give up if no reply arrives within this many milliseconds
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Command and arguments, e.g. `GET key`
    command: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CliConfig {
    session: SessionConfig,
    logging: LoggingConfig,
}

impl CliConfig {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.session.validate()?;
        Ok(config)
    }
}

fn main() {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return;
    }

    if args.command.is_empty() {
        eprintln!("No command given. Usage: relink-cli [--config <path>] <COMMAND> [ARGS]...");
        std::process::exit(2);
    }

    let config = match &args.config {
        Some(path) => match CliConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => CliConfig::default(),
    };

    logging::init(&config.logging);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let timeout = Duration::from_millis(args.timeout_ms);
    match runtime.block_on(run(config.session, args.command, timeout)) {
        Ok(value) => println!("{}", format_value(&value, 0)),
        Err(e) => {
            eprintln!("(error) {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(
    config: SessionConfig,
    command: Vec<String>,
    timeout: Duration,
) -> Result<Value, Box<dyn std::error::Error>> {
    let (session, mut events) = Session::new(config, TcpTransport::new());

    let reply = session.raw_call(command)?;
    let result = tokio::time::timeout(timeout, reply).await;

    session.end();
    while let Some(event) = events.recv().await {
        match event {
            Event::Error(e) if e.is_connection_error() => {
                tracing::warn!(error = %e, "connection error")
            }
            Event::Error(e) => tracing::debug!(error = %e, "command error"),
            Event::Ended => break,
            _ => {}
        }
    }

    Ok(result.map_err(|_| "timed out waiting for reply")??)
}

/// Render a reply the way interactive RESP clients do.
fn format_value(value: &Value, indent: usize) -> String {
    match value {
        Value::SimpleString(s) => String::from_utf8_lossy(s).into_owned(),
        Value::Error(e) => format!("(error) {}", String::from_utf8_lossy(e)),
        Value::Integer(n) => format!("(integer) {}", n),
        Value::BulkString(s) => format!("\"{}\"", String::from_utf8_lossy(s).escape_debug()),
        Value::Null => "(nil)".to_string(),
        Value::Array(items) if items.is_empty() => "(empty array)".to_string(),
        Value::Array(items) => {
            let width = items.len().to_string().len();
            let pad = " ".repeat(indent);
            items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let prefix = format!("{:>width$}) ", i + 1);
                    let body = format_value(item, indent + prefix.len());
                    if i == 0 {
                        format!("{}{}", prefix, body)
                    } else {
                        format!("{}{}{}", pad, prefix, body)
                    }
                })
                .collect::<Vec<_>>()
                .join("\n")
        }
    }
}

const DEFAULT_CONFIG: &str = r#"# relink-cli configuration

[session]
# Host name or IP address. A path starting with "/" connects to a Unix socket.
host = "127.0.0.1"
port = 6379
# Database selected after connecting (0 skips SELECT)
db = 0
# Password for AUTH, optionally with an ACL user
# credential = "secret"
# username = "default"
# Reconnect attempts after a failure: -1 (or "unbounded") for no limit
max_retries = -1
retry_enabled = true
reconnect_delay_ms = 1000
# Deadline for connect plus handshake
connect_timeout_ms = 5000
skip_client_naming = false
skip_quit_on_shutdown = false
# Announced with CLIENT SETNAME; derived from the endpoint when unset
# name = "relink-cli"

[logging]
# Log level: "error", "warn", "info", "debug", "trace"
# Can be overridden with RUST_LOG environment variable
level = "warn"
# Log format: "pretty" (human-readable), "json", or "compact"
format = "pretty"
# Include timestamps
timestamps = true
# Include module target
target = false
"#;

fn print_default_config() {
    print!("{}", DEFAULT_CONFIG);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_scalars() {
        assert_eq!(format_value(&Value::SimpleString(b"OK".to_vec()), 0), "OK");
        assert_eq!(format_value(&Value::Integer(3), 0), "(integer) 3");
        assert_eq!(format_value(&Value::BulkString(b"a\"b".to_vec()), 0), "\"a\\\"b\"");
        assert_eq!(format_value(&Value::Null, 0), "(nil)");
        assert_eq!(
            format_value(&Value::Error(b"ERR no".to_vec()), 0),
            "(error) ERR no"
        );
    }

    #[test]
    fn format_nested_array() {
        let value = Value::Array(vec![
            Value::Integer(1),
            Value::Array(vec![
                Value::BulkString(b"a".to_vec()),
                Value::BulkString(b"b".to_vec()),
            ]),
        ]);
        assert_eq!(
            format_value(&value, 0),
            "1) (integer) 1\n2) 1) \"a\"\n   2) \"b\""
        );
        assert_eq!(format_value(&Value::Array(vec![]), 0), "(empty array)");
    }

    #[test]
    fn default_config_parses() {
        let config: CliConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        config.session.validate().unwrap();
        assert_eq!(config.session.port, 6379);
        assert_eq!(config.session.max_retries, relink::Retries::Unbounded);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn unknown_section_rejected() {
        assert!(toml::from_str::<CliConfig>("[server]\nport = 1\n").is_err());
    }
}
