//! Session configuration.
//!
//! All options have defaults, so an empty TOML document is a valid
//! configuration that connects to `127.0.0.1:6379`, database 0, with
//! unbounded reconnects every second.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::transport::Endpoint;

/// Configuration for a [`Session`](crate::Session).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Host name or IP address. A value starting with `/` is a Unix socket path.
    pub host: String,
    /// TCP port (ignored for Unix sockets).
    pub port: u16,
    /// Database index. A value above 0 is selected during the handshake.
    pub db: u32,
    /// Password sent with AUTH during the handshake.
    pub credential: Option<String>,
    /// ACL user name sent together with `credential`.
    pub username: Option<String>,
    /// Reconnect attempts allowed after a failure (`-1` for unbounded).
    pub max_retries: Retries,
    /// Whether to reconnect at all.
    pub retry_enabled: bool,
    /// Fixed delay between reconnect attempts, in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Deadline for connect plus handshake, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Start connecting as soon as the session is created.
    pub auto_connect: bool,
    /// Skip `CLIENT SETNAME` during the handshake.
    pub skip_client_naming: bool,
    /// Skip sending `QUIT` on shutdown.
    pub skip_quit_on_shutdown: bool,
    /// Client name. Derived from the endpoint and process id when unset.
    pub name: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            db: 0,
            credential: None,
            username: None,
            max_retries: Retries::Unbounded,
            retry_enabled: true,
            reconnect_delay_ms: 1000,
            connect_timeout_ms: 5000,
            auto_connect: true,
            skip_client_naming: false,
            skip_quit_on_shutdown: false,
            name: None,
        }
    }
}

impl SessionConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".to_string()));
        }
        if !self.is_unix_socket() && self.port == 0 {
            return Err(ConfigError::Invalid("port must not be 0".to_string()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if let Some(name) = &self.name
            && name.contains(char::is_whitespace)
        {
            return Err(ConfigError::Invalid(
                "name must not contain whitespace".to_string(),
            ));
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn is_unix_socket(&self) -> bool {
        self.host.starts_with('/')
    }

    pub fn endpoint(&self) -> Endpoint {
        if self.is_unix_socket() {
            Endpoint::Unix(self.host.clone().into())
        } else {
            Endpoint::Tcp {
                host: self.host.clone(),
                port: self.port,
            }
        }
    }

    /// The name announced with `CLIENT SETNAME`.
    pub fn client_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None if self.is_unix_socket() => {
                format!("relink[{}:PID-{}]", self.host, std::process::id())
            }
            None => format!(
                "relink[{}:{}:PID-{}]",
                self.host,
                self.port,
                std::process::id()
            ),
        }
    }
}

/// Bound on reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Retries {
    #[default]
    Unbounded,
    Limited(u32),
}

impl<'de> Deserialize<'de> for Retries {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RetriesValue {
            Int(i64),
            String(String),
        }

        match RetriesValue::deserialize(deserializer)? {
            RetriesValue::Int(n) if n < 0 => Ok(Retries::Unbounded),
            RetriesValue::Int(n) => u32::try_from(n)
                .map(Retries::Limited)
                .map_err(|_| serde::de::Error::custom(format!("max_retries too large: {n}"))),
            RetriesValue::String(s) => match s.to_lowercase().as_str() {
                "unbounded" | "infinite" | "forever" => Ok(Retries::Unbounded),
                _ => Err(serde::de::Error::custom(format!(
                    "invalid max_retries value: '{s}' (expected an integer or 'unbounded')"
                ))),
            },
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "info" or "relink=debug".
    pub level: String,
    pub format: LogFormat,
    pub timestamps: bool,
    /// Include the event target (module path).
    pub target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            timestamps: true,
            target: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
