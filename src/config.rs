//! Configuration module for lash.

use serde::Deserialize;
use std::path::Path;

use crate::{LashError, Result};

/// Sandbox resource configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxConfig {
    /// Memory limit per sandbox in megabytes (0 = unlimited).
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: usize,
    /// Sandbox lifetime deadline in milliseconds (0 = no deadline).
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,
    /// Command-function call budget per evaluation.
    #[serde(default = "default_command_budget")]
    pub command_budget: i64,
    /// Bulk-allocation element threshold for the fail-fast guard.
    #[serde(default = "default_alloc_threshold")]
    pub alloc_threshold: u64,
    /// Path to the system word list.
    #[serde(default = "default_word_list_path")]
    pub word_list_path: String,
}

fn default_memory_limit_mb() -> usize {
    128
}

fn default_max_timeout_ms() -> u64 {
    60_000
}

fn default_command_budget() -> i64 {
    20
}

fn default_alloc_threshold() -> u64 {
    20_000_000
}

fn default_word_list_path() -> String {
    "/usr/share/dict/words".to_string()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: default_memory_limit_mb(),
            max_timeout_ms: default_max_timeout_ms(),
            command_budget: default_command_budget(),
            alloc_threshold: default_alloc_threshold(),
            word_list_path: default_word_list_path(),
        }
    }
}

/// Network fetch configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Module registry URL template; `{name}` is replaced with the module name.
    #[serde(default = "default_registry_url")]
    pub registry_url: String,
    /// User agent string sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Total request timeout in seconds.
    #[serde(default = "default_total_timeout")]
    pub total_timeout_secs: u64,
    /// Maximum number of redirects to follow.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Maximum response body size in kilobytes.
    #[serde(default = "default_max_body_kb")]
    pub max_body_kb: u64,
}

fn default_registry_url() -> String {
    "https://unpkg.com/{name}".to_string()
}

fn default_user_agent() -> String {
    concat!("lash/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_total_timeout() -> u64 {
    30
}

fn default_max_redirects() -> usize {
    5
}

fn default_max_body_kb() -> u64 {
    4096
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            registry_url: default_registry_url(),
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout(),
            total_timeout_secs: default_total_timeout(),
            max_redirects: default_max_redirects(),
            max_body_kb: default_max_body_kb(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path (empty = console only).
    #[serde(default)]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Sandbox resource settings.
    #[serde(default)]
    pub sandbox: SandboxConfig,
    /// Network fetch settings.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| LashError::Config(format!("failed to read config: {}", e)))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| LashError::Config(format!("invalid config: {}", e)))
    }
}
