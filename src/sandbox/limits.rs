//! Resource limiting for isolates.

use thiserror::Error;
use wasmtime::ResourceLimiter;

/// A growth request the limiter refused. Raised as a trap at the growing
/// instruction, or as the instantiation error.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitExceeded {
    #[error("memory growth to {desired} bytes exceeds the {limit}-byte ceiling")]
    Memory { desired: u64, limit: u64 },

    #[error("table growth to {desired} elements exceeds the {limit}-element ceiling")]
    Table { desired: u64, limit: u64 },
}

/// Resource limiter that enforces the per-isolate memory and table ceilings.
#[derive(Debug)]
pub struct IsolateLimiter {
    /// Maximum memory in bytes.
    max_memory: u64,
    /// Current memory allocation.
    current_memory: u64,
    /// Peak memory allocation (highest ever seen).
    peak_memory: u64,
    /// Maximum table elements.
    max_table_elements: u64,
    /// Whether a growth request was denied.
    limit_exceeded: bool,
}

impl IsolateLimiter {
    pub fn new(max_memory: u64, max_table_elements: u64) -> Self {
        Self {
            max_memory,
            current_memory: 0,
            peak_memory: 0,
            max_table_elements,
            limit_exceeded: false,
        }
    }

    /// Check if any limit has been exceeded.
    pub fn limit_exceeded(&self) -> bool {
        self.limit_exceeded
    }

    pub fn current_memory(&self) -> u64 {
        self.current_memory
    }

    /// Get the peak memory usage (highest ever observed).
    pub fn peak_memory(&self) -> u64 {
        self.peak_memory
    }

    pub fn max_memory(&self) -> u64 {
        self.max_memory
    }
}

impl ResourceLimiter for IsolateLimiter {
    fn memory_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        let desired_bytes = desired as u64;

        if desired_bytes > self.max_memory {
            self.limit_exceeded = true;
            return Err(LimitExceeded::Memory {
                desired: desired_bytes,
                limit: self.max_memory,
            }
            .into());
        }

        self.current_memory = desired_bytes;
        self.peak_memory = self.peak_memory.max(desired_bytes);
        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        if desired as u64 > self.max_table_elements {
            self.limit_exceeded = true;
            return Err(LimitExceeded::Table {
                desired: desired as u64,
                limit: self.max_table_elements,
            }
            .into());
        }
        Ok(true)
    }
}
