//! Signal providers
//!
//! Pluggable scoring capability: each provider turns one event plus
//! contextual history into a bounded [0, 1] score with a rationale.
//! New signals are added by implementing [`SignalProvider`] and wiring
//! one more multiplicative factor into the combiner, not by branching
//! on type.

pub mod sentiment;
pub mod technical;

pub use sentiment::SentimentProvider;
pub use technical::TechnicalProvider;

use crate::types::{Event, PricePoint, SignalScore};

/// Context available to providers at decision time. `as_of_ms` is the
/// decision instant; `price_history` must only contain points dated at or
/// before it, which is what lets the same provider run unchanged in live
/// and backtest modes.
#[derive(Debug, Clone)]
pub struct SignalContext<'a> {
    pub as_of_ms: i64,
    pub price_history: &'a [PricePoint],
}

impl<'a> SignalContext<'a> {
    pub fn new(as_of_ms: i64, price_history: &'a [PricePoint]) -> Self {
        Self {
            as_of_ms,
            price_history,
        }
    }
}

/// Capability implemented by every signal provider
pub trait SignalProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Score one event. Providers abstain (`is_available = false`) rather
    /// than erroring when input is insufficient.
    fn score(&self, event: &Event, ctx: &SignalContext<'_>) -> SignalScore;
}

/// Fixed registry of providers, evaluated in registration order
pub struct SignalRegistry {
    providers: Vec<Box<dyn SignalProvider>>,
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    pub fn register(&mut self, provider: Box<dyn SignalProvider>) {
        self.providers.push(provider);
    }

    pub fn score_all(&self, event: &Event, ctx: &SignalContext<'_>) -> Vec<SignalScore> {
        self.providers.iter().map(|p| p.score(event, ctx)).collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

impl Default for SignalRegistry {
    fn default() -> Self {
        Self::new()
    }
}
