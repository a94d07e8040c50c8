//! Position lifecycle manager
//!
//! Owns every simulated position and drives the state machine
//! `PROPOSED → OPEN → CLOSED` (or `PROPOSED → REJECTED`). Exit rules are
//! evaluated in priority order on every monitor tick: take-profit,
//! stop-loss, trailing-stop, time-stop; the first matching rule closes
//! the position with that reason. Positions live behind a lock so no two
//! tasks mutate the same position concurrently in live mode.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use uuid::Uuid;

use crate::config::RiskConfig;
use crate::types::{
    Confidence, Event, ExitReason, OutcomeClass, Position, PositionStatus,
};

/// Lifecycle thresholds, derived from risk config plus the mode-specific
/// confidence threshold
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Minimum confidence to open
    pub min_confidence: f64,
    /// Take-profit on direction-adjusted return
    pub take_profit_pct: f64,
    /// Stop-loss (positive number)
    pub stop_loss_pct: f64,
    /// Trailing drawdown from the favorable extreme
    pub trailing_stop_pct: f64,
    /// Time-stop holding limit in ms
    pub max_hold_ms: i64,
    /// |return| below this is BREAKEVEN
    pub breakeven_epsilon: f64,
}

impl LifecycleConfig {
    pub fn from_risk(risk: &RiskConfig, min_confidence: f64) -> Self {
        Self {
            min_confidence,
            take_profit_pct: risk.take_profit_pct,
            stop_loss_pct: risk.stop_loss_pct,
            trailing_stop_pct: risk.trailing_stop_pct,
            max_hold_ms: risk.max_hold_days * 86_400_000,
            breakeven_epsilon: risk.breakeven_epsilon,
        }
    }
}

pub struct LifecycleManager {
    config: LifecycleConfig,
    /// All positions by id, including terminal ones
    positions: RwLock<HashMap<String, Position>>,
}

impl LifecycleManager {
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            config,
            positions: RwLock::new(HashMap::new()),
        }
    }

    /// Propose a position for an event. Below-threshold confidence yields
    /// a terminal REJECTED position, never an error.
    pub fn propose(&self, event: &Event, confidence: &Confidence, size: f64) -> Position {
        let status = if confidence.final_probability >= self.config.min_confidence {
            PositionStatus::Proposed
        } else {
            PositionStatus::Rejected
        };

        let position = Position {
            id: Uuid::new_v4().to_string(),
            event_id: event.id.clone(),
            recommendation_id: Uuid::new_v4().to_string(),
            subject: event.subject.clone(),
            direction: confidence.direction,
            confidence_at_entry: confidence.final_probability,
            size,
            entry_price: 0.0,
            entry_ts: 0,
            current_price: 0.0,
            peak_price: 0.0,
            trough_price: 0.0,
            exit_price: None,
            exit_ts: None,
            exit_reason: None,
            return_pct: None,
            status,
            outcome: None,
        };

        if let Ok(mut positions) = self.positions.write() {
            positions.insert(position.id.clone(), position.clone());
        }
        position
    }

    /// Record entry price and timestamp for a proposed position
    pub fn open(&self, position_id: &str, price: f64, ts: i64) -> Result<Position> {
        let mut positions = self
            .positions
            .write()
            .map_err(|e| anyhow!("positions lock poisoned: {}", e))?;
        let position = positions
            .get_mut(position_id)
            .ok_or_else(|| anyhow!("unknown position {}", position_id))?;

        if position.status != PositionStatus::Proposed {
            return Err(anyhow!(
                "cannot open position {} in state {}",
                position_id,
                position.status
            ));
        }

        position.status = PositionStatus::Open;
        position.entry_price = price;
        position.entry_ts = ts;
        position.current_price = price;
        position.peak_price = price;
        position.trough_price = price;
        Ok(position.clone())
    }

    /// Update price extremes and return the first exit rule whose
    /// condition holds, if any. Does not close the position itself.
    pub fn monitor(&self, position_id: &str, latest_price: f64, ts: i64) -> Option<ExitReason> {
        let mut positions = self.positions.write().ok()?;
        let position = positions.get_mut(position_id)?;
        if position.status != PositionStatus::Open {
            return None;
        }

        position.current_price = latest_price;
        position.peak_price = position.peak_price.max(latest_price);
        position.trough_price = position.trough_price.min(latest_price);

        Self::first_matching_exit(&self.config, position, latest_price, ts)
    }

    /// Exit rules in priority order; mutually exclusive per tick.
    fn first_matching_exit(
        config: &LifecycleConfig,
        position: &Position,
        latest_price: f64,
        ts: i64,
    ) -> Option<ExitReason> {
        let ret = position.return_at(latest_price);

        if ret >= config.take_profit_pct {
            return Some(ExitReason::TakeProfit);
        }
        if ret <= -config.stop_loss_pct {
            return Some(ExitReason::StopLoss);
        }

        let drawdown = match position.direction {
            crate::types::Direction::Long => {
                if position.peak_price > 0.0 {
                    (position.peak_price - latest_price) / position.peak_price
                } else {
                    0.0
                }
            }
            crate::types::Direction::Short => {
                if position.trough_price > 0.0 {
                    (latest_price - position.trough_price) / position.trough_price
                } else {
                    0.0
                }
            }
        };
        if drawdown >= config.trailing_stop_pct {
            return Some(ExitReason::TrailingStop);
        }

        if ts - position.entry_ts >= config.max_hold_ms {
            return Some(ExitReason::TimeStop);
        }

        None
    }

    /// Close a position, classify the outcome, and return the snapshot
    pub fn close(
        &self,
        position_id: &str,
        price: f64,
        ts: i64,
        reason: ExitReason,
    ) -> Result<Position> {
        let mut positions = self
            .positions
            .write()
            .map_err(|e| anyhow!("positions lock poisoned: {}", e))?;
        let position = positions
            .get_mut(position_id)
            .ok_or_else(|| anyhow!("unknown position {}", position_id))?;

        if position.status != PositionStatus::Open {
            return Err(anyhow!(
                "cannot close position {} in state {}",
                position_id,
                position.status
            ));
        }

        let ret = position.return_at(price);
        position.status = PositionStatus::Closed;
        position.current_price = price;
        position.exit_price = Some(price);
        position.exit_ts = Some(ts);
        position.exit_reason = Some(reason);
        position.return_pct = Some(ret);
        position.outcome = Some(self.classify(ret));
        Ok(position.clone())
    }

    /// WIN above a small positive epsilon, LOSS below the negative one,
    /// BREAKEVEN between
    pub fn classify(&self, realized_return: f64) -> OutcomeClass {
        if realized_return > self.config.breakeven_epsilon {
            OutcomeClass::Win
        } else if realized_return < -self.config.breakeven_epsilon {
            OutcomeClass::Loss
        } else {
            OutcomeClass::Breakeven
        }
    }

    pub fn position(&self, position_id: &str) -> Option<Position> {
        self.positions.read().ok()?.get(position_id).cloned()
    }

    /// Open positions, sorted by (entry_ts, id) for deterministic iteration
    pub fn open_positions(&self) -> Vec<Position> {
        let mut open: Vec<Position> = self
            .positions
            .read()
            .map(|p| {
                p.values()
                    .filter(|pos| pos.status == PositionStatus::Open)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        open.sort_by(|a, b| a.entry_ts.cmp(&b.entry_ts).then(a.id.cmp(&b.id)));
        open
    }

    /// All positions, sorted by (entry_ts, id)
    pub fn all_positions(&self) -> Vec<Position> {
        let mut all: Vec<Position> = self
            .positions
            .read()
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by(|a, b| a.entry_ts.cmp(&b.entry_ts).then(a.id.cmp(&b.id)));
        all
    }
}
