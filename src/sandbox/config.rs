//! Sandbox configuration with builder pattern.

use std::time::Duration;

use crate::error::{EngineError, Result};

/// Host-wide limits applied to every isolate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Memory ceiling per isolate in bytes, independent of host memory.
    pub max_memory: u64,
    /// Timeout used when a version requests 0.
    pub default_timeout: Duration,
    /// Upper bound for any requested timeout.
    pub max_timeout: Duration,
    /// Epoch interruption interval for cooperative timeout.
    pub epoch_tick_interval: Duration,
    /// Extra time the host waits past the deadline before abandoning the guest thread.
    pub timeout_grace: Duration,
    /// Maximum table elements per isolate.
    pub max_table_elements: u64,
    /// Capacity of each captured stdout/stderr pipe.
    pub max_console_bytes: usize,
    /// Guest `log` lines kept per run; later lines are counted and dropped.
    pub max_log_lines: usize,
    /// Compiled modules kept in the runner's cache.
    pub module_cache_capacity: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_memory: 128 * 1024 * 1024, // 128MB
            default_timeout: Duration::from_secs(5),
            max_timeout: Duration::from_secs(20),
            epoch_tick_interval: Duration::from_millis(10),
            timeout_grace: Duration::from_millis(250),
            max_table_elements: 10_000,
            max_console_bytes: 64 * 1024,
            max_log_lines: 100,
            module_cache_capacity: 256,
        }
    }
}

impl SandboxConfig {
    /// Create a new builder for SandboxConfig.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Reject limits no isolate could run under.
    pub fn validate(&self) -> Result<()> {
        if self.max_memory == 0 {
            return Err(EngineError::Config("max_memory must be non-zero".to_string()));
        }
        if self.epoch_tick_interval.is_zero() {
            return Err(EngineError::Config(
                "epoch_tick_interval must be non-zero".to_string(),
            ));
        }
        if self.max_timeout.is_zero() {
            return Err(EngineError::Config("max_timeout must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Timeout a run actually gets: 0 means the default, and nothing exceeds
    /// the ceiling.
    pub fn effective_timeout(&self, requested: Duration) -> Duration {
        let timeout = if requested.is_zero() {
            self.default_timeout
        } else {
            requested
        };
        timeout.min(self.max_timeout)
    }

    /// Epoch ticks that cover `timeout`, rounded up and never zero.
    pub fn deadline_ticks(&self, timeout: Duration) -> u64 {
        let tick = self.epoch_tick_interval.as_nanos().max(1);
        let ticks = timeout.as_nanos().div_ceil(tick);
        u64::try_from(ticks).unwrap_or(u64::MAX).max(1)
    }
}

/// Builder for creating SandboxConfig instances.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfigBuilder {
    max_memory: Option<u64>,
    default_timeout: Option<Duration>,
    max_timeout: Option<Duration>,
    epoch_tick_interval: Option<Duration>,
    timeout_grace: Option<Duration>,
    max_table_elements: Option<u64>,
    max_console_bytes: Option<usize>,
    max_log_lines: Option<usize>,
    module_cache_capacity: Option<usize>,
}

impl SandboxConfigBuilder {
    /// Set the maximum memory limit in bytes.
    pub fn max_memory(mut self, bytes: u64) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Set the host-wide timeout ceiling.
    pub fn max_timeout(mut self, timeout: Duration) -> Self {
        self.max_timeout = Some(timeout);
        self
    }

    /// Set the epoch tick interval for timeout checking.
    pub fn epoch_tick_interval(mut self, interval: Duration) -> Self {
        self.epoch_tick_interval = Some(interval);
        self
    }

    pub fn timeout_grace(mut self, grace: Duration) -> Self {
        self.timeout_grace = Some(grace);
        self
    }

    pub fn max_table_elements(mut self, elements: u64) -> Self {
        self.max_table_elements = Some(elements);
        self
    }

    pub fn max_console_bytes(mut self, bytes: usize) -> Self {
        self.max_console_bytes = Some(bytes);
        self
    }

    pub fn max_log_lines(mut self, lines: usize) -> Self {
        self.max_log_lines = Some(lines);
        self
    }

    pub fn module_cache_capacity(mut self, capacity: usize) -> Self {
        self.module_cache_capacity = Some(capacity);
        self
    }

    /// Build the SandboxConfig.
    pub fn build(self) -> SandboxConfig {
        let default = SandboxConfig::default();
        SandboxConfig {
            max_memory: self.max_memory.unwrap_or(default.max_memory),
            default_timeout: self.default_timeout.unwrap_or(default.default_timeout),
            max_timeout: self.max_timeout.unwrap_or(default.max_timeout),
            epoch_tick_interval: self.epoch_tick_interval.unwrap_or(default.epoch_tick_interval),
            timeout_grace: self.timeout_grace.unwrap_or(default.timeout_grace),
            max_table_elements: self.max_table_elements.unwrap_or(default.max_table_elements),
            max_console_bytes: self.max_console_bytes.unwrap_or(default.max_console_bytes),
            max_log_lines: self.max_log_lines.unwrap_or(default.max_log_lines),
            module_cache_capacity: self
                .module_cache_capacity
                .unwrap_or(default.module_cache_capacity),
        }
    }
}
