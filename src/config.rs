//! Configuration management
//!
//! Handles loading and validating server configuration from TOML files.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::connection::ConnectionManagerConfig;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub quic: QuicConfig,
    pub tls: TlsConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address every worker binds its QUIC endpoint to
    pub bind_addr: SocketAddr,
    /// Number of worker threads (0 = auto)
    #[serde(default)]
    pub workers: usize,
}

impl ServerConfig {
    /// Get effective worker count (auto-detect if 0)
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

/// QUIC protocol configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QuicConfig {
    /// Maximum concurrent bidirectional streams per connection
    #[serde(default = "default_max_streams")]
    pub max_streams_per_conn: u32,
    /// Connection idle timeout in seconds, enforced by the connection manager
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Transport keep-alive interval in seconds (0 = disabled)
    #[serde(default)]
    pub keep_alive_secs: u64,
}

impl Default for QuicConfig {
    fn default() -> Self {
        Self {
            max_streams_per_conn: default_max_streams(),
            idle_timeout_secs: default_idle_timeout(),
            keep_alive_secs: 0,
        }
    }
}

impl QuicConfig {
    /// Connection manager settings derived from the QUIC section
    pub fn manager_config(&self) -> ConnectionManagerConfig {
        ConnectionManagerConfig {
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
        }
    }
}

/// TLS configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    /// Path to certificate file
    pub cert_path: String,
    /// Path to private key file
    pub key_path: String,
    /// Auto-generate self-signed cert if missing
    #[serde(default)]
    pub auto_generate: bool,
}

/// Shutdown configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    /// How long connections are only notified before idle ones get closed
    /// (0 = close idle connections right away)
    #[serde(default = "default_idle_grace_ms")]
    pub idle_grace_ms: u64,
    /// Upper bound on the graceful drain before remaining connections are dropped
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            idle_grace_ms: default_idle_grace_ms(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

impl ShutdownConfig {
    pub fn idle_grace(&self) -> Duration {
        Duration::from_millis(self.idle_grace_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics endpoint
    #[serde(default)]
    pub enabled: bool,
    /// Metrics server bind address
    #[serde(default = "default_metrics_addr")]
    pub bind_addr: SocketAddr,
    /// Optional JSON monitoring API address
    #[serde(default)]
    pub api_addr: Option<SocketAddr>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: default_metrics_addr(),
            api_addr: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_max_streams() -> u32 { 100 }
fn default_idle_timeout() -> u64 { 30 }
fn default_idle_grace_ms() -> u64 { 5_000 }
fn default_drain_timeout() -> u64 { 30 }
fn default_metrics_addr() -> SocketAddr { SocketAddr::from(([127, 0, 0, 1], 9090)) }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.quic.max_streams_per_conn == 0 {
            anyhow::bail!("max_streams_per_conn must be > 0");
        }
        if self.quic.idle_timeout_secs == 0 {
            anyhow::bail!("idle_timeout_secs must be > 0");
        }
        if self.shutdown.drain_timeout_secs == 0 {
            anyhow::bail!("drain_timeout_secs must be > 0");
        }
        if self.shutdown.idle_grace() >= self.shutdown.drain_timeout() {
            anyhow::bail!("idle_grace_ms must be shorter than drain_timeout_secs");
        }
        Ok(())
    }
}
