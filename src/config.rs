//! Protocol Configuration
//!
//! Defaults suit interactive use (dice, card games); every value can be
//! overridden from the environment.

use std::time::Duration;

/// Tunables for rounds and batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Leaves per Merkle batch.
    pub batch_size: usize,
    /// Pre-build the next batch once this many leaves remain.
    pub prefetch_threshold: usize,
    /// Time a coordinated round has to reach quorum.
    pub round_timeout: Duration,
    /// Time a direct two-party exchange waits for each peer message.
    pub exchange_timeout: Duration,
    /// Exhausted batches kept per key for re-disclosure; older ones are dropped.
    pub retained_batches: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            batch_size: 512,
            prefetch_threshold: 32,
            round_timeout: Duration::from_secs(30),
            exchange_timeout: Duration::from_secs(10),
            retained_batches: 16,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable present but unparsable.
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },

    /// Batches must hold at least one leaf.
    #[error("batch_size must be at least 1")]
    EmptyBatch,

    /// Prefetch threshold must leave room to use the batch.
    #[error("prefetch_threshold {threshold} must be below batch_size {batch_size}")]
    PrefetchTooLarge {
        /// Configured threshold.
        threshold: usize,
        /// Configured batch size.
        batch_size: usize,
    },

    /// Timeouts must be non-zero.
    #[error("{0} must be non-zero")]
    ZeroTimeout(&'static str),
}

fn env_parse<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        Err(_) => Ok(None),
    }
}

impl ProtocolConfig {
    /// Create config from environment variables, falling back to defaults.
    ///
    /// - `VERIRAND_BATCH_SIZE`
    /// - `VERIRAND_PREFETCH_THRESHOLD`
    /// - `VERIRAND_ROUND_TIMEOUT_SECS`
    /// - `VERIRAND_EXCHANGE_TIMEOUT_SECS`
    /// - `VERIRAND_RETAINED_BATCHES`
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            batch_size: env_parse("VERIRAND_BATCH_SIZE")?.unwrap_or(defaults.batch_size),
            prefetch_threshold: env_parse("VERIRAND_PREFETCH_THRESHOLD")?
                .unwrap_or(defaults.prefetch_threshold),
            round_timeout: env_parse("VERIRAND_ROUND_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.round_timeout),
            exchange_timeout: env_parse("VERIRAND_EXCHANGE_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.exchange_timeout),
            retained_batches: env_parse("VERIRAND_RETAINED_BATCHES")?
                .unwrap_or(defaults.retained_batches),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::EmptyBatch);
        }
        if self.prefetch_threshold >= self.batch_size {
            return Err(ConfigError::PrefetchTooLarge {
                threshold: self.prefetch_threshold,
                batch_size: self.batch_size,
            });
        }
        if self.round_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("round_timeout"));
        }
        if self.exchange_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("exchange_timeout"));
        }
        Ok(())
    }
}
