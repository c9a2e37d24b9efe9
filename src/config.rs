//! Configuration module for the file exchange server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Port used when neither the CLI nor the config file names one
pub const DEFAULT_PORT: u16 = 5050;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "file-exchange")]
#[command(author = "file-exchange authors")]
#[command(version = "0.1.0")]
#[command(about = "A file exchange server", long_about = None)]
pub struct CliArgs {
    /// `[HOST] PORT` to bind to; a single value is taken as the port
    #[arg(value_name = "ADDRESS", num_args = 0..=2)]
    pub address: Vec<String>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory holding uploaded files
    #[arg(short = 'd', long)]
    pub storage_dir: Option<PathBuf>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Seconds to wait for the next request before closing (0 = never)
    #[arg(long)]
    pub idle_timeout: Option<u64>,

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
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to; defaults to this machine's resolved address
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Idle timeout in seconds
    #[serde(default)]
    pub idle_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
            max_connections: default_max_connections(),
            idle_timeout: 0,
        }
    }
}

/// Storage-related configuration
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
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

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_connections() -> usize {
    10000
}

fn default_directory() -> PathBuf {
    PathBuf::from("SERVERFILES")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub storage_dir: PathBuf,
    pub max_connections: usize,
    pub idle_timeout: Option<Duration>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let (cli_host, cli_port) = split_address(&cli.address)?;
        let host = cli_host.or(toml_config.server.host);
        let port = cli_port.unwrap_or(toml_config.server.port);

        let idle = cli.idle_timeout.unwrap_or(toml_config.server.idle_timeout);
        let max_connections = cli
            .max_connections
            .unwrap_or(toml_config.server.max_connections);
        if max_connections == 0 || max_connections > Semaphore::MAX_PERMITS {
            return Err(ConfigError::InvalidConnectionLimit(max_connections));
        }

        Ok(Config {
            listen: resolve_listen(host.as_deref(), port)?,
            storage_dir: cli.storage_dir.unwrap_or(toml_config.storage.directory),
            max_connections,
            idle_timeout: (idle > 0).then(|| Duration::from_secs(idle)),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Split positional `[HOST] PORT` arguments.
fn split_address(args: &[String]) -> Result<(Option<String>, Option<u16>), ConfigError> {
    let parse_port = |raw: &String| {
        raw.parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort(raw.clone()))
    };

    match args {
        [] => Ok((None, None)),
        [port] => Ok((None, Some(parse_port(port)?))),
        [host, port] => Ok((Some(host.clone()), Some(parse_port(port)?))),
        _ => Err(ConfigError::InvalidAddress(args.join(" "))),
    }
}

/// Resolve the bind address, falling back to this machine's own address.
fn resolve_listen(host: Option<&str>, port: u16) -> Result<SocketAddr, ConfigError> {
    match host {
        Some(host) => (host, port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ConfigError::InvalidAddress(format!("{}:{}", host, port))),
        None => Ok(SocketAddr::new(local_address(), port)),
    }
}

/// Address this machine's hostname resolves to, preferring IPv4.
pub fn local_address() -> IpAddr {
    let fallback = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let Some(name) = hostname::get().ok().and_then(|n| n.into_string().ok()) else {
        return fallback;
    };

    match (name.as_str(), 0).to_socket_addrs() {
        Ok(addrs) => {
            let addrs: Vec<_> = addrs.map(|a| a.ip()).collect();
            addrs
                .iter()
                .find(|ip| ip.is_ipv4())
                .or_else(|| addrs.first())
                .copied()
                .unwrap_or(fallback)
        }
        Err(_) => fallback,
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidPort(String),
    InvalidAddress(String),
    InvalidConnectionLimit(usize),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidPort(raw) => write!(f, "Invalid port '{}'", raw),
            ConfigError::InvalidAddress(raw) => write!(f, "Cannot resolve address '{}'", raw),
            ConfigError::InvalidConnectionLimit(n) => write!(
                f,
                "max_connections must be between 1 and {}, got {}",
                Semaphore::MAX_PERMITS,
                n
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("file-exchange").chain(list.iter().copied()))
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, None);
        assert_eq!(config.server.port, 5050);
        assert_eq!(config.server.idle_timeout, 0);
        assert_eq!(config.storage.directory, PathBuf::from("SERVERFILES"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "0.0.0.0"
            port = 6000
            max_connections = 16
            idle_timeout = 30

            [storage]
            directory = "/srv/files"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(config.server.port, 6000);
        assert_eq!(config.server.max_connections, 16);
        assert_eq!(config.server.idle_timeout, 30);
        assert_eq!(config.storage.directory, PathBuf::from("/srv/files"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_positional_host_and_port() {
        let config = Config::from_args(args(&["127.0.0.1", "6001"])).unwrap();
        assert_eq!(config.listen, "127.0.0.1:6001".parse().unwrap());
        assert_eq!(config.idle_timeout, None);
    }

    #[test]
    fn test_positional_port_only() {
        let config = Config::from_args(args(&["7000"])).unwrap();
        assert_eq!(config.listen.port(), 7000);
        assert_eq!(config.listen.ip(), local_address());
    }

    #[test]
    fn test_default_port() {
        let config = Config::from_args(args(&[])).unwrap();
        assert_eq!(config.listen.port(), DEFAULT_PORT);
        assert_eq!(config.max_connections, 10000);
    }

    #[test]
    fn test_invalid_port() {
        assert!(matches!(
            Config::from_args(args(&["not-a-port"])),
            Err(ConfigError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_connection_limit_bounds() {
        assert!(matches!(
            Config::from_args(args(&["--max-connections", "0"])),
            Err(ConfigError::InvalidConnectionLimit(0))
        ));

        let too_many = (Semaphore::MAX_PERMITS + 1).to_string();
        assert!(matches!(
            Config::from_args(args(&["--max-connections", &too_many])),
            Err(ConfigError::InvalidConnectionLimit(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, "[server]\nmax_connections = 0\n").unwrap();
        assert!(matches!(
            Config::from_args(args(&["-c", path.to_str().unwrap()])),
            Err(ConfigError::InvalidConnectionLimit(0))
        ));

        let config = Config::from_args(args(&["--max-connections", "1"])).unwrap();
        assert_eq!(config.max_connections, 1);
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(
            &path,
            "[server]\nhost = \"127.0.0.1\"\nport = 6000\nidle_timeout = 5\n[logging]\nlevel = \"warn\"\n",
        )
        .unwrap();
        let path_arg = path.to_str().unwrap();

        let config = Config::from_args(args(&["-c", path_arg])).unwrap();
        assert_eq!(config.listen, "127.0.0.1:6000".parse().unwrap());
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.log_level, "warn");

        let config =
            Config::from_args(args(&["-c", path_arg, "6100", "--idle-timeout", "0"])).unwrap();
        assert_eq!(config.listen.port(), 6100);
        assert_eq!(config.idle_timeout, None);
    }
}
