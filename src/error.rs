//! Error taxonomy
//!
//! Transient errors are retried on the next scheduled cycle; data-quality
//! errors skip the offending item; invariant violations abort a backtest
//! run; configuration errors are fatal at startup.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BotError {
    /// Network timeout, rate limit. Retried next cycle, never fatal.
    #[error("transient: {0}")]
    Transient(String),

    /// Unparseable event, missing price. The item is skipped and logged.
    #[error("data quality: {0}")]
    DataQuality(String),

    /// E.g. a backtest attempted to use a price dated before the decision
    /// point. Fatal for that run; aborting beats silently corrupting the
    /// no-look-ahead guarantee.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Missing required threshold, invalid risk limit. Fatal at startup.
    #[error("configuration: {0}")]
    Configuration(String),
}

impl BotError {
    /// Whether this error must abort the current run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BotError::InvariantViolation(_) | BotError::Configuration(_)
        )
    }
}
