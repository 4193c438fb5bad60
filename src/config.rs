//! Configuration module for window-relay.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::error::ConfigError;
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Command-line arguments for the receiver
#[derive(Parser, Debug, Default)]
#[command(name = "window-relay")]
#[command(author = "window-relay authors")]
#[command(version = "0.1.0")]
#[command(about = "Readiness-multiplexed receiver that streams each connection into a file", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Stream address to bind to (e.g., 0.0.0.0:9898)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Also receive datagrams on this address (e.g., 0.0.0.0:9898)
    #[arg(long = "datagram")]
    pub datagram_listen: Option<String>,

    /// Number of worker threads, each with its own poll loop
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum concurrent connections per worker
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Per-connection window size in bytes
    #[arg(short = 'b', long)]
    pub buffer_size: Option<usize>,

    /// Directory received files are written to
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Send an acknowledgement after each completed transfer
    #[arg(long)]
    pub ack: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and worker configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Stream address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Datagram address to bind to
    pub datagram_listen: Option<String>,
    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Maximum concurrent connections per worker
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Events returned by a single poll
    #[serde(default = "default_poll_capacity")]
    pub poll_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            datagram_listen: None,
            workers: default_workers(),
            max_connections: default_max_connections(),
            poll_capacity: default_poll_capacity(),
        }
    }
}

/// Transfer configuration
#[derive(Debug, Deserialize)]
pub struct TransferConfig {
    /// Per-connection window size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Directory received files are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Acknowledge completed transfers
    #[serde(default)]
    pub acknowledge: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            output_dir: default_output_dir(),
            acknowledge: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
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

fn default_listen() -> String {
    "0.0.0.0:9898".to_string()
}

fn default_workers() -> usize {
    1
}

fn default_max_connections() -> usize {
    1024
}

fn default_poll_capacity() -> usize {
    256
}

fn default_buffer_size() -> usize {
    1024
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub datagram_listen: Option<SocketAddr>,
    pub workers: usize,
    pub max_connections: usize,
    pub poll_capacity: usize,
    pub buffer_size: usize,
    pub output_dir: PathBuf,
    pub acknowledge: bool,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let server = ServerConfig::default();
        let transfer = TransferConfig::default();
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 9898)),
            datagram_listen: None,
            workers: server.workers,
            max_connections: server.max_connections,
            poll_capacity: server.poll_capacity,
            buffer_size: transfer.buffer_size,
            output_dir: transfer.output_dir,
            acknowledge: transfer.acknowledge,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = parse_addr(cli.listen.unwrap_or(toml_config.server.listen))?;
        let datagram_listen = cli
            .datagram_listen
            .or(toml_config.server.datagram_listen)
            .map(parse_addr)
            .transpose()?;

        let buffer_size = cli.buffer_size.unwrap_or(toml_config.transfer.buffer_size);
        if buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }

        Ok(Config {
            listen,
            datagram_listen,
            workers: cli.workers.unwrap_or(toml_config.server.workers).max(1),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections)
                .max(1),
            poll_capacity: toml_config.server.poll_capacity.max(1),
            buffer_size,
            output_dir: cli.output_dir.unwrap_or(toml_config.transfer.output_dir),
            acknowledge: cli.ack || toml_config.transfer.acknowledge,
            log_level: if !cli.log_level.is_empty() && cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

fn parse_addr(addr: String) -> Result<SocketAddr, ConfigError> {
    addr.parse().map_err(|_| ConfigError::InvalidListen(addr))
}
