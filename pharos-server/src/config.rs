//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via PHAROS_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// HTTP health endpoint configuration.
    pub http: HttpConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable
    /// overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("PHAROS_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.http.apply_env_overrides();
    }

    /// Returns the address the health endpoint binds to.
    pub fn http_bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr(&self.network.host, self.http.port)
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host to listen on.
    pub host: String,
    /// Port to listen for client connections on.
    pub port: u16,
    /// Number of accept loops sharing the port (0 = one per core).
    pub listeners: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: pharos_protocol::DEFAULT_PORT,
            listeners: 0,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("PHAROS_HOST") {
            if !host.is_empty() {
                self.host = host;
            }
        }

        if let Ok(port) = std::env::var("PHAROS_PORT") {
            if let Ok(parsed) = port.parse() {
                self.port = parsed;
            }
        }

        if let Ok(listeners) = std::env::var("PHAROS_LISTENERS") {
            if let Ok(n) = listeners.parse() {
                self.listeners = n;
            }
        }
    }

    /// Resolves the configured listener count (0 = one per core).
    pub fn num_listeners(&self) -> usize {
        if self.listeners > 0 {
            self.listeners
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    /// Returns the address the TCP listeners bind to.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr(&self.host, self.port)
    }
}

/// HTTP health endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Enable the HTTP health endpoint.
    pub enabled: bool,
    /// Port to listen for HTTP requests on.
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 7362,
        }
    }
}

impl HttpConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("PHAROS_HTTP_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }

        if let Ok(port) = std::env::var("PHAROS_HTTP_PORT") {
            if let Ok(parsed) = port.parse() {
                self.port = parsed;
            }
        }
    }
}

fn parse_addr(host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    format!("{}:{}", host, port)
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("invalid listen address {}:{}", host, port)))
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
