//! Engine configuration
//!
//! Loaded from TOML or assembled with the `with_*` builders. Every field has
//! a default, so an empty document is a valid configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Synchronization engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Cadence of the idle reconciliation pass
    pub reconcile_interval_ms: u64,
    /// Longest extra wait for an idle slice before the pass runs anyway
    pub max_idle_wait_ms: u64,
    /// Yields the default idle detector performs before declaring idle
    pub idle_yield_rounds: u32,
    /// Capacity of the host event queue
    pub event_queue_capacity: usize,
}

impl SyncConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With reconciliation interval
    #[inline]
    #[must_use]
    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval_ms = duration_ms(interval);
        self
    }

    /// With maximum idle wait
    #[inline]
    #[must_use]
    pub fn with_max_idle_wait(mut self, wait: Duration) -> Self {
        self.max_idle_wait_ms = duration_ms(wait);
        self
    }

    /// With idle yield rounds
    #[inline]
    #[must_use]
    pub fn with_idle_yield_rounds(mut self, rounds: u32) -> Self {
        self.idle_yield_rounds = rounds;
        self
    }

    /// With event queue capacity
    #[inline]
    #[must_use]
    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity;
        self
    }

    /// Reconciliation interval
    #[inline]
    #[must_use]
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    /// Maximum idle wait
    #[inline]
    #[must_use]
    pub fn max_idle_wait(&self) -> Duration {
        Duration::from_millis(self.max_idle_wait_ms)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] for a zero interval or zero queue capacity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconcile_interval_ms == 0 {
            return Err(ConfigError::invalid("reconcile_interval_ms must be positive"));
        }
        if self.event_queue_capacity == 0 {
            return Err(ConfigError::invalid("event_queue_capacity must be positive"));
        }
        Ok(())
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// Parse failures and out-of-range values.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// I/O, parse and validation failures.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_ms: 100,
            max_idle_wait_ms: 500,
            idle_yield_rounds: 4,
            event_queue_capacity: 1024,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
