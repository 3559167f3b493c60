//! Monitor configuration that downstream crates can serialize/deserialize.
//!
//! A `MonitorSettings` value is handed to every monitor at construction.
//! Monitors never consult process-global state, so tests build a dedicated
//! settings value per scenario.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// How many spare `pool_allocation_size` chunks a monitor may keep from
    /// its parent while they are unused. 1 hands almost everything back on
    /// release; large values favour fewer trips to the parent.
    pub max_allocated_but_unused_blocks: u64,

    /// Default chunk size requested from a parent when a monitor runs short.
    pub pool_allocation_size: u64,

    /// Allocated totals above this are reported to the log.
    pub noteworthy_usage_bytes: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            max_allocated_but_unused_blocks: 10,
            pool_allocation_size: 10 * 1024, // 10 KiB
            noteworthy_usage_bytes: 1024 * 1024, // 1 MiB
        }
    }
}

impl MonitorSettings {
    /// Load settings from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `BYTEMON_MAX_ALLOCATED_UNUSED_BLOCKS`: spare chunks kept per monitor
    /// - `BYTEMON_ALLOCATION_CHUNK_SIZE`: default chunk size in bytes
    /// - `BYTEMON_NOTEWORTHY_USAGE_BYTES`: logging threshold in bytes
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("BYTEMON_MAX_ALLOCATED_UNUSED_BLOCKS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.max_allocated_but_unused_blocks = v;
            }
        }

        if let Ok(s) = std::env::var("BYTEMON_ALLOCATION_CHUNK_SIZE") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.pool_allocation_size = v;
            }
        }

        if let Ok(s) = std::env::var("BYTEMON_NOTEWORTHY_USAGE_BYTES") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.noteworthy_usage_bytes = v;
            }
        }

        cfg
    }

    /// Same settings with a different slack multiplier.
    pub fn with_max_allocated_but_unused_blocks(mut self, blocks: u64) -> Self {
        self.max_allocated_but_unused_blocks = blocks;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_allocated_but_unused_blocks == 0 {
            return Err(Error::Config(
                "max_allocated_but_unused_blocks must be at least 1".to_string(),
            ));
        }
        if self.pool_allocation_size == 0 {
            return Err(Error::Config(
                "pool_allocation_size must be at least 1 byte".to_string(),
            ));
        }
        Ok(())
    }
}
