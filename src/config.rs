//! File configuration for the engine.
//!
//! ```toml
//! [sandbox]
//! max_memory_mb = 128
//! default_timeout_ms = 5000
//! max_timeout_ms = 20000
//!
//! [logging]
//! level = "info"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{EngineError, Result};
use crate::sandbox::config::SandboxConfig;

/// Sandbox limits in file units.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SandboxSection {
    /// Memory ceiling per isolate in MiB.
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,
    /// Timeout for versions that request 0.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Host-wide timeout ceiling.
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,
    #[serde(default = "default_epoch_tick_ms")]
    pub epoch_tick_ms: u64,
    #[serde(default = "default_timeout_grace_ms")]
    pub timeout_grace_ms: u64,
    #[serde(default = "default_max_table_elements")]
    pub max_table_elements: u64,
    /// Capacity of each captured stdout/stderr pipe in KiB.
    #[serde(default = "default_max_console_kb")]
    pub max_console_kb: usize,
    #[serde(default = "default_max_log_lines")]
    pub max_log_lines: usize,
    #[serde(default = "default_module_cache_capacity")]
    pub module_cache_capacity: usize,
}

fn default_max_memory_mb() -> u64 {
    128
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_max_timeout_ms() -> u64 {
    20_000
}

fn default_epoch_tick_ms() -> u64 {
    10
}

fn default_timeout_grace_ms() -> u64 {
    250
}

fn default_max_table_elements() -> u64 {
    10_000
}

fn default_max_console_kb() -> usize {
    64
}

fn default_max_log_lines() -> usize {
    100
}

fn default_module_cache_capacity() -> usize {
    256
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            max_memory_mb: default_max_memory_mb(),
            default_timeout_ms: default_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            epoch_tick_ms: default_epoch_tick_ms(),
            timeout_grace_ms: default_timeout_grace_ms(),
            max_table_elements: default_max_table_elements(),
            max_console_kb: default_max_console_kb(),
            max_log_lines: default_max_log_lines(),
            module_cache_capacity: default_module_cache_capacity(),
        }
    }
}

impl SandboxSection {
    /// Convert to runtime limits.
    pub fn to_sandbox_config(&self) -> SandboxConfig {
        SandboxConfig::builder()
            .max_memory(self.max_memory_mb.saturating_mul(1024 * 1024))
            .default_timeout(Duration::from_millis(self.default_timeout_ms))
            .max_timeout(Duration::from_millis(self.max_timeout_ms))
            .epoch_tick_interval(Duration::from_millis(self.epoch_tick_ms))
            .timeout_grace(Duration::from_millis(self.timeout_grace_ms))
            .max_table_elements(self.max_table_elements)
            .max_console_bytes(self.max_console_kb.saturating_mul(1024))
            .max_log_lines(self.max_log_lines)
            .module_cache_capacity(self.module_cache_capacity)
            .build()
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub sandbox: SandboxSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string and validate the limits.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| EngineError::Config(format!("config parse error: {e}")))?;
        config.sandbox_config().validate()?;
        Ok(config)
    }

    pub fn sandbox_config(&self) -> SandboxConfig {
        self.sandbox.to_sandbox_config()
    }
}
