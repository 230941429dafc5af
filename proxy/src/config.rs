//! Proxy configuration.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

/// Main proxy configuration.
///
/// Every section has defaults, so the proxy runs with nothing but the port
/// argument from the command line.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Listener configuration.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Upstream endpoint configuration.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Buffer sizing.
    #[serde(default)]
    pub buffers: BufferConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Address to listen on for client connections. The command-line port
    /// argument overrides the port part.
    #[serde(default = "ProxyConfig::default_listen")]
    pub listen: SocketAddr,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: Self::default_listen(),
        }
    }
}

impl ProxyConfig {
    fn default_listen() -> SocketAddr {
        "0.0.0.0:6379".parse().unwrap()
    }
}

/// Upstream endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Address of the upstream RESP server.
    #[serde(default = "UpstreamConfig::default_addr")]
    pub addr: SocketAddr,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            addr: Self::default_addr(),
        }
    }
}

impl UpstreamConfig {
    fn default_addr() -> SocketAddr {
        "127.0.0.1:6379".parse().unwrap()
    }
}

/// Buffer sizing.
#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    /// Initial capacity of per-session receive buffers in bytes. Buffers
    /// grow past this as needed and shrink back when drained.
    #[serde(default = "BufferConfig::default_recv")]
    pub recv: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            recv: Self::default_recv(),
        }
    }
}

impl BufferConfig {
    fn default_recv() -> usize {
        16 * 1024
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Log format: "pretty", "json", or "compact".
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            format: Self::default_format(),
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }

    fn default_format() -> String {
        "pretty".to_string()
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
