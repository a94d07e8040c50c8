//! Filter chain
//!
//! Ordered, short-circuiting predicates that may veto an event before any
//! signal combination happens. Rejection is an expected outcome, modeled
//! as a tagged decision rather than an error. Each filter is a pure
//! function of (event, context); the chain also computes the per-filter
//! factors the combiner consumes, even on acceptance.

use chrono::{TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::config::FiltersConfig;
use crate::types::{Event, EventCategory};

/// Which driver is evaluating the chain. The time-of-day filter only
/// vetoes in live mode; historical data lacks minute-level execution
/// realism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Live,
    Backtest,
}

/// Filter decision
#[derive(Debug, Clone, PartialEq)]
pub enum FilterDecision {
    Accept,
    Reject(FilterReason),
}

impl FilterDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, FilterDecision::Accept)
    }
}

/// Rejection reason, rendered snake_case for logs and CSV
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FilterReason {
    StaleEvent,
    ImmaterialCategory,
    OutsideTradingWindow,
    NeutralSentiment,
    SentimentUnavailable,
}

impl std::fmt::Display for FilterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterReason::StaleEvent => write!(f, "stale_event"),
            FilterReason::ImmaterialCategory => write!(f, "immaterial_category"),
            FilterReason::OutsideTradingWindow => write!(f, "outside_trading_window"),
            FilterReason::NeutralSentiment => write!(f, "neutral_sentiment"),
            FilterReason::SentimentUnavailable => write!(f, "sentiment_unavailable"),
        }
    }
}

/// Context passed to every filter
#[derive(Debug, Clone)]
pub struct FilterContext {
    /// Decision instant in ms; backtests pass the event's own timestamp
    pub now_ms: i64,
    pub mode: RunMode,
    /// Sentiment score for the directional filter; None when the provider
    /// abstained
    pub sentiment_score: Option<f64>,
}

/// Result of running the whole chain on one event
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub decision: FilterDecision,
    /// (0, 1]; decays with event age
    pub freshness_factor: f64,
    /// Around 1.0; boosts flagged/material events, damps low-importance ones
    pub materiality_factor: f64,
    /// 1.0 outside live mode or outside the window; boost inside
    pub time_of_day_factor: f64,
    /// Names of the filters that passed, in evaluation order
    pub passed: Vec<String>,
    /// Name of the filter that rejected, if any
    pub failed: Vec<String>,
}

/// Ordered filter chain: freshness, materiality, time-of-day, directional
pub struct FilterChain {
    config: FiltersConfig,
}

impl FilterChain {
    pub fn new(config: FiltersConfig) -> Self {
        Self { config }
    }

    /// Run filters in fixed order, short-circuiting at the first rejection
    pub fn evaluate(&self, event: &Event, ctx: &FilterContext) -> FilterOutcome {
        let mut outcome = FilterOutcome {
            decision: FilterDecision::Accept,
            freshness_factor: 1.0,
            materiality_factor: 1.0,
            time_of_day_factor: 1.0,
            passed: Vec::new(),
            failed: Vec::new(),
        };

        let checks: [(&str, fn(&Self, &Event, &FilterContext, &mut FilterOutcome) -> Option<FilterReason>); 4] = [
            ("freshness", Self::check_freshness),
            ("materiality", Self::check_materiality),
            ("time_of_day", Self::check_time_of_day),
            ("directional", Self::check_directional),
        ];

        for (name, check) in checks {
            if let Some(reason) = check(self, event, ctx, &mut outcome) {
                outcome.failed.push(name.to_string());
                outcome.decision = FilterDecision::Reject(reason);
                return outcome;
            }
            outcome.passed.push(name.to_string());
        }

        outcome
    }

    /// Filter 1: reject if the information edge has decayed. Always
    /// computes the freshness factor for the combiner.
    fn check_freshness(
        &self,
        event: &Event,
        ctx: &FilterContext,
        outcome: &mut FilterOutcome,
    ) -> Option<FilterReason> {
        let age_secs = ((ctx.now_ms - event.source_ts).max(0)) / 1000;
        let half_life = self.config.freshness_half_life_secs as f64;
        outcome.freshness_factor = 0.5_f64.powf(age_secs as f64 / half_life).clamp(0.0, 1.0);
        // Factor of exactly 0 would zero the odds; the clamp below keeps
        // it strictly positive for any accepted event.
        outcome.freshness_factor = outcome.freshness_factor.max(1e-6);

        if age_secs > self.config.max_age_secs {
            return Some(FilterReason::StaleEvent);
        }
        None
    }

    /// Filter 2: reject low-importance categories unless flagged material
    /// or rescued by a high-impact keyword.
    fn check_materiality(
        &self,
        event: &Event,
        _ctx: &FilterContext,
        outcome: &mut FilterOutcome,
    ) -> Option<FilterReason> {
        let label = event.category.label();
        let low_importance = self
            .config
            .low_importance_categories
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&label));

        let haystack = {
            let mut s = event.headline.to_lowercase();
            if let Some(body) = &event.raw_body {
                s.push(' ');
                s.push_str(&body.to_lowercase());
            }
            s
        };
        let keyword_hits = self
            .config
            .high_impact_keywords
            .iter()
            .filter(|k| haystack.contains(&k.to_lowercase()))
            .count();

        let mut factor = 1.0;
        if event.is_flagged_material {
            factor *= 1.2;
        }
        // Each keyword hit adds a mild boost, saturating at two hits.
        factor *= 1.0 + 0.1 * (keyword_hits.min(2) as f64);
        if low_importance {
            factor *= 0.8;
        }
        if matches!(event.category, EventCategory::MergerAcquisition) {
            factor *= 1.1;
        }
        outcome.materiality_factor = factor;

        if low_importance && !event.is_flagged_material && keyword_hits == 0 {
            return Some(FilterReason::ImmaterialCategory);
        }
        None
    }

    /// Filter 3: veto outside the optimal trading window, live mode only.
    fn check_time_of_day(
        &self,
        _event: &Event,
        ctx: &FilterContext,
        outcome: &mut FilterOutcome,
    ) -> Option<FilterReason> {
        let hour = Utc
            .timestamp_millis_opt(ctx.now_ms)
            .single()
            .map(|dt| dt.hour())
            .unwrap_or(0);
        let inside = hour >= self.config.trading_window_start_hour
            && hour < self.config.trading_window_end_hour;

        outcome.time_of_day_factor = if inside {
            self.config.time_of_day_boost
        } else {
            1.0
        };

        if ctx.mode == RunMode::Live && !inside {
            return Some(FilterReason::OutsideTradingWindow);
        }
        None
    }

    /// Filter 4: no tradeable direction when sentiment is neutral or the
    /// provider abstained.
    fn check_directional(
        &self,
        _event: &Event,
        ctx: &FilterContext,
        _outcome: &mut FilterOutcome,
    ) -> Option<FilterReason> {
        match ctx.sentiment_score {
            None => Some(FilterReason::SentimentUnavailable),
            Some(score) => {
                if (score - 0.5).abs() <= self.config.neutral_band {
                    Some(FilterReason::NeutralSentiment)
                } else {
                    None
                }
            }
        }
    }
}
