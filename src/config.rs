//! Configuration Module
//!
//! Handles configuration loading from a YAML file with command-line
//! overrides. Every setting has a default so the server runs with no
//! configuration at all.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Arg, Command};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Result, UploadError};

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("./uploads")
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("./uploads.db")
}

fn default_asset_dir() -> PathBuf {
    PathBuf::from("./assets")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

fn default_max_text_body_bytes() -> usize {
    1024 * 1024
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to bind the HTTP listener to
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Port to bind the HTTP listener to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory where uploaded files are stored
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,

    /// Path of the persisted upload registry
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,

    /// Directory holding the HTML templates and static assets
    #[serde(default = "default_asset_dir")]
    pub asset_dir: PathBuf,

    /// Default log level when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional directory for rolling log files; console-only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Seconds allowed for registry persistence during shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Maximum accepted body size for text edit requests
    #[serde(default = "default_max_text_body_bytes")]
    pub max_text_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            port: default_port(),
            uploads_dir: default_uploads_dir(),
            registry_path: default_registry_path(),
            asset_dir: default_asset_dir(),
            log_level: default_log_level(),
            log_dir: None,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            max_text_body_bytes: default_max_text_body_bytes(),
        }
    }
}

impl Config {
    /// Load configuration from CLI arguments and an optional YAML file.
    pub fn load() -> Result<Config> {
        let matches = Command::new("filedrop")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Streaming multipart file-upload server")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Path to YAML configuration file"),
            )
            .arg(
                Arg::new("listen-address")
                    .long("listen-address")
                    .value_name("ADDR")
                    .help("Address to bind to"),
            )
            .arg(
                Arg::new("port")
                    .short('p')
                    .long("port")
                    .value_name("PORT")
                    .help("Port to bind to"),
            )
            .arg(
                Arg::new("uploads-dir")
                    .long("uploads-dir")
                    .value_name("DIR")
                    .help("Directory where uploaded files are stored"),
            )
            .arg(
                Arg::new("registry")
                    .long("registry")
                    .value_name("FILE")
                    .help("Path of the persisted upload registry"),
            )
            .arg(
                Arg::new("asset-dir")
                    .long("asset-dir")
                    .value_name("DIR")
                    .help("Directory holding HTML templates and static assets"),
            )
            .get_matches();

        let mut config = match matches.get_one::<String>("config") {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        if let Some(addr) = matches.get_one::<String>("listen-address") {
            config.listen_address = addr.clone();
        }
        if let Some(port) = matches.get_one::<String>("port") {
            config.port = port.parse().map_err(|e| {
                UploadError::ConfigError(format!("invalid port '{}': {}", port, e))
            })?;
        }
        if let Some(dir) = matches.get_one::<String>("uploads-dir") {
            config.uploads_dir = PathBuf::from(dir);
        }
        if let Some(path) = matches.get_one::<String>("registry") {
            config.registry_path = PathBuf::from(path);
        }
        if let Some(dir) = matches.get_one::<String>("asset-dir") {
            config.asset_dir = PathBuf::from(dir);
        }

        config.validate()?;
        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Config> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            UploadError::ConfigError(format!("failed to read config file {}: {}", path, e))
        })?;
        let config: Config = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.listen_address.is_empty() {
            return Err(UploadError::ConfigError(
                "listen_address must not be empty".to_string(),
            ));
        }
        if self.max_text_body_bytes == 0 {
            return Err(UploadError::ConfigError(
                "max_text_body_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The socket address to bind the listener to.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.listen_address, self.port)
            .parse()
            .map_err(|e| {
                UploadError::ConfigError(format!(
                    "invalid listen address {}:{}: {}",
                    self.listen_address, self.port, e
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.uploads_dir, PathBuf::from("./uploads"));
        assert!(config.log_dir.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_yaml_parsing_with_partial_keys() {
        let config: Config = serde_yaml::from_str("port: 9000\nlog_level: debug\n").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.log_level, "debug");
        // Unspecified keys fall back to defaults
        assert_eq!(config.registry_path, PathBuf::from("./uploads.db"));
    }

    #[test]
    fn test_socket_addr() {
        let mut config = Config::default();
        config.listen_address = "127.0.0.1".to_string();
        config.port = 9999;
        assert_eq!(
            config.socket_addr().unwrap(),
            "127.0.0.1:9999".parse().unwrap()
        );
    }

    #[test]
    fn test_invalid_listen_address_rejected() {
        let mut config = Config::default();
        config.listen_address = "not an address".to_string();
        assert!(config.socket_addr().is_err());
    }
}
