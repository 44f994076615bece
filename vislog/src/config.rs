//! Writer configuration.
//!
//! Configuration is fixed when a [`LogWriter`](crate::writer::LogWriter) is
//! opened. It controls the flush cadence, how empty sampling periods are
//! persisted, and how sampler randomness is seeded.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Largest accepted sync cycle.
///
/// Records are buffered in memory between flushes, so this bounds the buffer
/// a misconfigured writer can build up.
pub const MAX_SYNC_CYCLE: usize = 1_000_000;

/// What `finish_sampling` does when a period retained no samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmptyPeriodPolicy {
    /// Do not append a record for the period.
    #[default]
    Skip,
    /// Append a record with an empty sample batch.
    Persist,
}

/// Configuration for a [`LogWriter`](crate::writer::LogWriter).
///
/// # Example
///
/// ```rust
/// use vislog::config::{EmptyPeriodPolicy, WriterConfig};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = WriterConfig {
///     sync_cycle: 100,
///     empty_periods: EmptyPeriodPolicy::Persist,
///     sampling_seed: Some(42),
///     fsync: false,
/// };
/// config.validate()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Number of appended records after which buffered records are flushed.
    ///
    /// `0` disables automatic flushing; only
    /// [`LogWriter::save`](crate::writer::LogWriter::save) persists.
    pub sync_cycle: usize,

    /// Whether empty sampling periods produce a record.
    pub empty_periods: EmptyPeriodPolicy,

    /// Seed for reservoir samplers. `None` seeds from the operating system.
    ///
    /// Each sampler derives its own seed from this value and its tablet's
    /// mode and tag, so two tags never share a random stream.
    pub sampling_seed: Option<u64>,

    /// Whether flushes call `fsync` on segment and index files.
    pub fsync: bool,
}

impl WriterConfig {
    /// Creates a configuration with the given sync cycle and defaults for
    /// everything else.
    pub fn with_sync_cycle(sync_cycle: usize) -> Self {
        Self {
            sync_cycle,
            ..Self::default()
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if `sync_cycle` exceeds
    /// [`MAX_SYNC_CYCLE`].
    pub fn validate(&self) -> Result<()> {
        if self.sync_cycle > MAX_SYNC_CYCLE {
            return Err(ConfigError::InvalidValue {
                field: "sync_cycle",
                reason: format!("{} exceeds the maximum of {MAX_SYNC_CYCLE}", self.sync_cycle),
            }
            .into());
        }
        Ok(())
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            sync_cycle: 0,
            empty_periods: EmptyPeriodPolicy::Skip,
            sampling_seed: None,
            fsync: true,
        }
    }
}

/// Validates the parameters of an image or audio component.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] if `num_samples` or `step_cycle`
/// is zero.
pub fn validate_sampling(num_samples: usize, step_cycle: u64) -> Result<()> {
    if num_samples == 0 {
        return Err(ConfigError::InvalidValue {
            field: "num_samples",
            reason: "reservoir capacity must be > 0".to_string(),
        }
        .into());
    }
    if step_cycle == 0 {
        return Err(ConfigError::InvalidValue {
            field: "step_cycle",
            reason: "a sampling period must span at least one step".to_string(),
        }
        .into());
    }
    Ok(())
}
