//! Price access
//!
//! [`PriceTable`] is the deterministic in-memory price book shared by the
//! backtest simulator and the technical signal provider; `price_at` and
//! `first_price_after` are the two lookups the no-look-ahead invariant
//! hangs on. [`HttpPriceFeed`] is the live quote poller; every request
//! carries a bounded timeout and a failure is a skipped cycle, not a
//! fatal error.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::BotError;
use crate::types::PricePoint;

/// In-memory per-subject price series, kept sorted by timestamp
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    series: HashMap<String, Vec<PricePoint>>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self {
            series: HashMap::new(),
        }
    }

    /// Replace the series for one subject; input is sorted on insert
    pub fn insert_series(&mut self, subject: &str, mut points: Vec<PricePoint>) {
        points.sort_by_key(|p| p.ts);
        points.dedup_by_key(|p| p.ts);
        self.series.insert(subject.to_string(), points);
    }

    /// Append one observation, keeping the series sorted
    pub fn push_point(&mut self, subject: &str, point: PricePoint) {
        let series = self.series.entry(subject.to_string()).or_default();
        match series.last() {
            Some(last) if last.ts >= point.ts => {
                // Out-of-order arrival; insert at the right place, replace
                // an observation with the identical timestamp.
                match series.binary_search_by_key(&point.ts, |p| p.ts) {
                    Ok(idx) => series[idx] = point,
                    Err(idx) => series.insert(idx, point),
                }
            }
            _ => series.push(point),
        }
    }

    /// Most recent price at or before `ts`
    pub fn price_at(&self, subject: &str, ts: i64) -> Option<f64> {
        let series = self.series.get(subject)?;
        let idx = series.partition_point(|p| p.ts <= ts);
        if idx == 0 {
            None
        } else {
            Some(series[idx - 1].price)
        }
    }

    /// Latest known price for a subject
    pub fn latest_price(&self, subject: &str) -> Option<f64> {
        self.series.get(subject)?.last().map(|p| p.price)
    }

    /// First observation strictly after `ts`; this is the T+1 entry lookup
    pub fn first_price_after(&self, subject: &str, ts: i64) -> Option<PricePoint> {
        let series = self.series.get(subject)?;
        let idx = series.partition_point(|p| p.ts <= ts);
        series.get(idx).copied()
    }

    /// Up to `max_points` observations dated at or before `ts`, oldest
    /// first. Feeds the technical provider without leaking the future.
    pub fn history_before(&self, subject: &str, ts: i64, max_points: usize) -> Vec<PricePoint> {
        let Some(series) = self.series.get(subject) else {
            return Vec::new();
        };
        let end = series.partition_point(|p| p.ts <= ts);
        let start = end.saturating_sub(max_points);
        series[start..end].to_vec()
    }

    /// All observations for a subject within (after_ts, up_to_ts]
    pub fn points_between(&self, subject: &str, after_ts: i64, up_to_ts: i64) -> Vec<PricePoint> {
        let Some(series) = self.series.get(subject) else {
            return Vec::new();
        };
        let start = series.partition_point(|p| p.ts <= after_ts);
        let end = series.partition_point(|p| p.ts <= up_to_ts);
        series[start..end].to_vec()
    }

    pub fn subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = self.series.keys().cloned().collect();
        subjects.sort();
        subjects
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    price: f64,
}

/// Polled HTTP quote source used in live mode
pub struct HttpPriceFeed {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPriceFeed {
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("Failed to build quote HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the latest quote for a subject. Timeouts and HTTP failures
    /// surface as transient errors for the caller to skip the cycle on.
    pub async fn latest(&self, subject: &str) -> Result<f64> {
        let url = format!("{}/{}", self.base_url, subject);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BotError::Transient(format!("quote fetch {}: {}", subject, e)))?;

        if !response.status().is_success() {
            return Err(
                BotError::Transient(format!("quote fetch {}: {}", subject, response.status()))
                    .into(),
            );
        }

        let quote: QuoteResponse = response
            .json()
            .await
            .map_err(|e| BotError::DataQuality(format!("quote parse {}: {}", subject, e)))?;

        if !quote.price.is_finite() || quote.price <= 0.0 {
            return Err(
                BotError::DataQuality(format!("quote {}: bad price {}", subject, quote.price))
                    .into(),
            );
        }
        Ok(quote.price)
    }
}
