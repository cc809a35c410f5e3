//! Configuration module for the linewise server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments (and the `PORT` environment variable) take precedence over
//! config file values.

use clap::Parser;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::framer::DEFAULT_MAX_LINE_LENGTH;
use crate::protocols::Protocol;

/// Port used when nothing else is configured.
pub const DEFAULT_PORT: u16 = 12345;

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "linewise")]
#[command(author = "linewise authors")]
#[command(version = "0.1.0")]
#[command(about = "A line-oriented TCP request/response server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host or address to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Exchange served on every connection
    #[arg(long, value_enum)]
    pub protocol: Option<Protocol>,

    /// Prefix for echo replies
    #[arg(long)]
    pub prefix: Option<String>,

    /// Maximum number of concurrent sessions
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Per-read/per-write deadline in seconds (0 disables)
    #[arg(short = 't', long)]
    pub io_timeout_secs: Option<u64>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and session limits
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
    /// How long shutdown waits for in-flight sessions
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
    /// Extra bind attempts, with exponential backoff
    #[serde(default)]
    pub bind_retries: u32,
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    /// Number of worker threads
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            io_timeout_secs: default_io_timeout_secs(),
            drain_timeout_secs: default_drain_timeout_secs(),
            bind_retries: 0,
            max_line_length: default_max_line_length(),
            workers: None,
        }
    }
}

/// Exchange selection
#[derive(Debug, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default)]
    pub kind: Protocol,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Discard one free-form line before the compute operands
    #[serde(default)]
    pub skip_preamble: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            kind: Protocol::default(),
            prefix: default_prefix(),
            skip_preamble: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_connections() -> usize {
    1024
}

fn default_io_timeout_secs() -> u64 {
    30
}

fn default_drain_timeout_secs() -> u64 {
    10
}

fn default_max_line_length() -> usize {
    DEFAULT_MAX_LINE_LENGTH
}

fn default_prefix() -> String {
    "Server".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A host/port pair naming where to listen or connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Settings each session needs, shared read-only between sessions.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub protocol: Protocol,
    pub prefix: String,
    pub skip_preamble: bool,
    pub io_timeout: Option<Duration>,
    pub max_line_length: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            prefix: default_prefix(),
            skip_preamble: false,
            io_timeout: Some(Duration::from_secs(default_io_timeout_secs())),
            max_line_length: default_max_line_length(),
        }
    }
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: Endpoint,
    pub max_connections: usize,
    pub drain_timeout: Duration,
    pub bind_retries: u32,
    pub workers: Option<usize>,
    pub session: SessionConfig,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let TomlConfig {
            server,
            protocol,
            logging,
        } = toml_config;

        let io_timeout_secs = cli.io_timeout_secs.unwrap_or(server.io_timeout_secs);

        Config {
            endpoint: Endpoint::new(
                cli.host.unwrap_or(server.host),
                cli.port.unwrap_or(server.port),
            ),
            max_connections: cli.max_connections.unwrap_or(server.max_connections).max(1),
            drain_timeout: Duration::from_secs(server.drain_timeout_secs),
            bind_retries: server.bind_retries,
            workers: cli.workers.or(server.workers),
            session: SessionConfig {
                protocol: cli.protocol.unwrap_or(protocol.kind),
                prefix: cli.prefix.unwrap_or(protocol.prefix),
                skip_preamble: protocol.skip_preamble,
                // 0 disables the deadline
                io_timeout: (io_timeout_secs > 0).then(|| Duration::from_secs(io_timeout_secs)),
                max_line_length: server.max_line_length,
            },
            log_level: cli.log_level.unwrap_or(logging.level),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::default(), TomlConfig::default())
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
}
