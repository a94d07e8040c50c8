//! Core types used throughout EdgeBot
//!
//! Defines common data structures for disclosure events, signals,
//! confidence, positions and the backtest audit trail.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trading direction for a simulated position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Long
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Disclosure category as reported by the upstream source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    Earnings,
    Guidance,
    MergerAcquisition,
    CapitalIncrease,
    Buyback,
    Dividend,
    Litigation,
    ExecutiveChange,
    Other(String),
}

impl EventCategory {
    /// Parse from the source's free-text category label
    pub fn from_label(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "earnings" | "quarterly_report" => EventCategory::Earnings,
            "guidance" | "forecast" => EventCategory::Guidance,
            "merger" | "acquisition" | "m&a" => EventCategory::MergerAcquisition,
            "capital_increase" | "rights_issue" => EventCategory::CapitalIncrease,
            "buyback" | "share_repurchase" => EventCategory::Buyback,
            "dividend" => EventCategory::Dividend,
            "litigation" | "lawsuit" => EventCategory::Litigation,
            "executive_change" | "management_change" => EventCategory::ExecutiveChange,
            other => EventCategory::Other(other.to_string()),
        }
    }

    /// Canonical label used in config lists and CSV output
    pub fn label(&self) -> String {
        match self {
            EventCategory::Earnings => "earnings".to_string(),
            EventCategory::Guidance => "guidance".to_string(),
            EventCategory::MergerAcquisition => "merger".to_string(),
            EventCategory::CapitalIncrease => "capital_increase".to_string(),
            EventCategory::Buyback => "buyback".to_string(),
            EventCategory::Dividend => "dividend".to_string(),
            EventCategory::Litigation => "litigation".to_string(),
            EventCategory::ExecutiveChange => "executive_change".to_string(),
            EventCategory::Other(s) => s.clone(),
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One external disclosure, normalized at ingest time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Source-stable opaque id; duplicate ingestion is a no-op
    pub id: String,
    /// Ticker-like entity identifier
    pub subject: String,
    /// Headline text
    pub headline: String,
    /// Disclosure category
    pub category: EventCategory,
    /// Source flagged this disclosure as material
    pub is_flagged_material: bool,
    /// When the event occurred upstream (ms since epoch)
    pub source_ts: i64,
    /// When this system observed it (ms since epoch)
    pub ingested_ts: i64,
    /// Optional full body text
    pub raw_body: Option<String>,
}

impl Event {
    /// Source timestamp as a chrono instant
    pub fn source_time(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.source_ts)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// Output of one signal provider for one event. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalScore {
    /// Provider name (e.g. "sentiment", "technical")
    pub signal_name: String,
    /// 0..=1, higher = more bullish
    pub score: f64,
    /// Human-readable explanation of the score
    pub rationale: String,
    /// Providers abstain when insufficient input exists
    pub is_available: bool,
    /// Extracted themes (sentiment) or indicator names (technical)
    pub themes: Vec<String>,
}

impl SignalScore {
    /// An abstaining score that the combiner and filters ignore
    pub fn unavailable(signal_name: &str, why: &str) -> Self {
        Self {
            signal_name: signal_name.to_string(),
            score: 0.5,
            rationale: why.to_string(),
            is_available: false,
            themes: Vec::new(),
        }
    }
}

/// One multiplicative odds adjustment applied by the combiner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorAdjustment {
    /// Factor name (e.g. "freshness")
    pub name: String,
    /// The multiplicative factor applied to the odds
    pub factor: f64,
    /// Intermediate odds after this factor was applied
    pub odds_after: f64,
}

/// Calibrated probability produced by the Bayesian combiner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Confidence {
    /// Strictly inside (0, 1); clamped to the configured open interval
    pub final_probability: f64,
    /// Direction the probability refers to
    pub direction: Direction,
    /// Ordered list of every adjustment applied, for auditability
    pub factor_breakdown: Vec<FactorAdjustment>,
}

/// Position lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Proposed,
    Open,
    Closed,
    Rejected,
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionStatus::Proposed => write!(f, "PROPOSED"),
            PositionStatus::Open => write!(f, "OPEN"),
            PositionStatus::Closed => write!(f, "CLOSED"),
            PositionStatus::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Why a position was closed. Exactly one reason per close, first match
/// in priority order: take-profit, stop-loss, trailing-stop, time-stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    TimeStop,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::TakeProfit => write!(f, "TAKE_PROFIT"),
            ExitReason::StopLoss => write!(f, "STOP_LOSS"),
            ExitReason::TrailingStop => write!(f, "TRAILING_STOP"),
            ExitReason::TimeStop => write!(f, "TIME_STOP"),
        }
    }
}

/// Outcome classification of a closed position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeClass {
    Win,
    Loss,
    Breakeven,
}

impl fmt::Display for OutcomeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeClass::Win => write!(f, "WIN"),
            OutcomeClass::Loss => write!(f, "LOSS"),
            OutcomeClass::Breakeven => write!(f, "BREAKEVEN"),
        }
    }
}

/// A simulated trade; references exactly one event and at most one
/// confidence. Owned exclusively by the lifecycle manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Position id
    pub id: String,
    /// Triggering event id
    pub event_id: String,
    /// Recommendation id
    pub recommendation_id: String,
    /// Subject entity
    pub subject: String,
    /// Trade direction
    pub direction: Direction,
    /// Confidence probability at entry
    pub confidence_at_entry: f64,
    /// Capital allocated to this position
    pub size: f64,
    /// Entry price (0.0 until opened)
    pub entry_price: f64,
    /// Entry timestamp in ms (0 until opened)
    pub entry_ts: i64,
    /// Latest observed price
    pub current_price: f64,
    /// Highest price since open
    pub peak_price: f64,
    /// Lowest price since open
    pub trough_price: f64,
    /// Exit price, once closed
    pub exit_price: Option<f64>,
    /// Exit timestamp in ms, once closed
    pub exit_ts: Option<i64>,
    /// Exit reason, once closed
    pub exit_reason: Option<ExitReason>,
    /// Realized return as a fraction (direction-adjusted), once closed
    pub return_pct: Option<f64>,
    /// Lifecycle state
    pub status: PositionStatus,
    /// WIN / LOSS / BREAKEVEN, once closed
    pub outcome: Option<OutcomeClass>,
}

impl Position {
    /// Direction-adjusted return of `price` versus entry
    pub fn return_at(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        match self.direction {
            Direction::Long => (price - self.entry_price) / self.entry_price,
            Direction::Short => (self.entry_price - price) / self.entry_price,
        }
    }
}

/// Snapshot of an accepted recommendation, persisted by the event store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    pub event_id: String,
    pub direction: Direction,
    pub confidence: f64,
    pub entry_price: f64,
    /// Full signal scores as JSON for offline analysis
    pub signals_json: String,
    pub generated_ts: i64,
    /// Comma-joined list of filters that passed
    pub filters_passed: String,
    /// Comma-joined list of filters that rejected (empty when accepted)
    pub filters_failed: String,
    pub rationale: String,
}

/// Kind of an activity-log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityKind {
    Accept,
    Reject,
    Open,
    Exit,
    CircuitBreaker,
    IcUpdate,
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityKind::Accept => write!(f, "ACCEPT"),
            ActivityKind::Reject => write!(f, "REJECT"),
            ActivityKind::Open => write!(f, "OPEN"),
            ActivityKind::Exit => write!(f, "EXIT"),
            ActivityKind::CircuitBreaker => write!(f, "CIRCUIT_BREAKER"),
            ActivityKind::IcUpdate => write!(f, "IC_UPDATE"),
        }
    }
}

/// One entry in the strictly time-ordered backtest audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// Timestamp in ms; entries are appended in non-decreasing order
    pub ts: i64,
    pub kind: ActivityKind,
    /// Triggering event id (empty for portfolio-level entries)
    pub event_id: String,
    /// Human-readable reason or detail
    pub detail: String,
}

/// One (predicted confidence, realized outcome) pair. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ICRecord {
    pub prediction_id: String,
    pub signal_name: String,
    pub predicted_confidence: f64,
    /// Realized return (continuous); sign carries the binary outcome
    pub realized_outcome: f64,
    pub recorded_ts: i64,
}

/// A single (timestamp, price) observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Timestamp in ms
    pub ts: i64,
    pub price: f64,
}
