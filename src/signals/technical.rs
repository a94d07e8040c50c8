//! Technical indicator provider
//!
//! Computes a momentum oscillator, moving-average crossover, trend
//! strength and volatility from a bounded historical price window.
//! Abstains below the minimum sample size rather than emitting noisy
//! numbers. Deterministic given identical price history and `as_of`,
//! which is what lets the same code run unchanged in live and backtest
//! modes.

use crate::config::SignalsConfig;
use crate::signals::{SignalContext, SignalProvider};
use crate::types::{Event, PricePoint, SignalScore};

pub const SIGNAL_NAME: &str = "technical";

pub struct TechnicalProvider {
    config: SignalsConfig,
}

impl TechnicalProvider {
    pub fn new(config: SignalsConfig) -> Self {
        Self { config }
    }

    /// Wilder-style momentum oscillator in [0, 100]
    fn oscillator(prices: &[f64], period: usize) -> f64 {
        let window = &prices[prices.len().saturating_sub(period + 1)..];
        let mut gains = 0.0;
        let mut losses = 0.0;
        for pair in window.windows(2) {
            let delta = pair[1] - pair[0];
            if delta >= 0.0 {
                gains += delta;
            } else {
                losses -= delta;
            }
        }
        if gains + losses == 0.0 {
            return 50.0;
        }
        100.0 * gains / (gains + losses)
    }

    fn sma(prices: &[f64], period: usize) -> f64 {
        let window = &prices[prices.len().saturating_sub(period)..];
        window.iter().sum::<f64>() / window.len() as f64
    }

    /// Directional consistency in [0, 1]: |net move| / sum of |moves|
    fn trend_strength(prices: &[f64], period: usize) -> f64 {
        let window = &prices[prices.len().saturating_sub(period + 1)..];
        let mut gross = 0.0;
        for pair in window.windows(2) {
            gross += (pair[1] - pair[0]).abs();
        }
        if gross == 0.0 {
            return 0.0;
        }
        let net = (window[window.len() - 1] - window[0]).abs();
        (net / gross).clamp(0.0, 1.0)
    }

    /// Standard deviation of single-step returns over the window
    fn volatility(prices: &[f64], period: usize) -> f64 {
        let window = &prices[prices.len().saturating_sub(period + 1)..];
        let returns: Vec<f64> = window
            .windows(2)
            .filter(|p| p[0] > 0.0)
            .map(|p| (p[1] - p[0]) / p[0])
            .collect();
        if returns.len() < 2 {
            return 0.0;
        }
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance =
            returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        variance.sqrt()
    }
}

impl SignalProvider for TechnicalProvider {
    fn name(&self) -> &'static str {
        SIGNAL_NAME
    }

    fn score(&self, _event: &Event, ctx: &SignalContext<'_>) -> SignalScore {
        // History after the decision point must never leak in, so drop it
        // here regardless of what the caller assembled.
        let usable: Vec<&PricePoint> = ctx
            .price_history
            .iter()
            .filter(|p| p.ts <= ctx.as_of_ms)
            .collect();

        if usable.len() < self.config.min_price_history {
            return SignalScore::unavailable(
                SIGNAL_NAME,
                &format!(
                    "insufficient history: {} of {} samples",
                    usable.len(),
                    self.config.min_price_history
                ),
            );
        }

        let prices: Vec<f64> = usable.iter().map(|p| p.price).collect();
        let osc = Self::oscillator(&prices, self.config.oscillator_period);
        let fast = Self::sma(&prices, self.config.fast_ma_period);
        let slow = Self::sma(&prices, self.config.slow_ma_period);
        let trend = Self::trend_strength(&prices, self.config.slow_ma_period);
        let vol = Self::volatility(&prices, self.config.volatility_window);

        // Oscillator pull away from 50 plus crossover tilt, scaled by how
        // directional the window actually was; high volatility shrinks the
        // tilt back toward neutral.
        let osc_tilt = (osc - 50.0) / 100.0;
        let cross_tilt = if slow > 0.0 {
            ((fast - slow) / slow).clamp(-0.05, 0.05) * 3.0
        } else {
            0.0
        };
        let raw_tilt = (osc_tilt * 0.6 + cross_tilt) * (0.5 + 0.5 * trend);
        let vol_damp = 1.0 / (1.0 + 20.0 * vol);
        let score = (0.5 + raw_tilt * vol_damp).clamp(0.0, 1.0);

        SignalScore {
            signal_name: SIGNAL_NAME.to_string(),
            score,
            rationale: format!(
                "osc={:.1} fast_ma={:.2} slow_ma={:.2} trend={:.2} vol={:.4}",
                osc, fast, slow, trend, vol
            ),
            is_available: true,
            themes: vec![
                "oscillator".to_string(),
                "ma_crossover".to_string(),
                "trend_strength".to_string(),
                "volatility".to_string(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventCategory;

    fn test_config() -> SignalsConfig {
        SignalsConfig {
            min_price_history: 30,
            oscillator_period: 14,
            fast_ma_period: 5,
            slow_ma_period: 20,
            volatility_window: 20,
        }
    }

    fn make_event() -> Event {
        Event {
            id: "e1".into(),
            subject: "ACME".into(),
            headline: "irrelevant".into(),
            category: EventCategory::Earnings,
            is_flagged_material: false,
            source_ts: 0,
            ingested_ts: 0,
            raw_body: None,
        }
    }

    fn series(prices: &[f64]) -> Vec<PricePoint> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| PricePoint {
                ts: (i as i64) * 60_000,
                price: p,
            })
            .collect()
    }

    #[test]
    fn test_abstains_below_min_samples() {
        let provider = TechnicalProvider::new(test_config());
        let history = series(&[100.0; 10]);
        let ctx = SignalContext::new(i64::MAX, &history);
        let s = provider.score(&make_event(), &ctx);
        assert!(!s.is_available);
        assert!(s.rationale.contains("insufficient history"));
    }

    #[test]
    fn test_uptrend_scores_bullish() {
        let provider = TechnicalProvider::new(test_config());
        let prices: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let history = series(&prices);
        let ctx = SignalContext::new(i64::MAX, &history);
        let s = provider.score(&make_event(), &ctx);
        assert!(s.is_available);
        assert!(s.score > 0.6, "expected bullish, got {}", s.score);
    }

    #[test]
    fn test_downtrend_scores_bearish() {
        let provider = TechnicalProvider::new(test_config());
        let prices: Vec<f64> = (0..40).map(|i| 200.0 - i as f64).collect();
        let history = series(&prices);
        let ctx = SignalContext::new(i64::MAX, &history);
        let s = provider.score(&make_event(), &ctx);
        assert!(s.is_available);
        assert!(s.score < 0.4, "expected bearish, got {}", s.score);
    }

    #[test]
    fn test_deterministic_given_same_inputs() {
        let provider = TechnicalProvider::new(test_config());
        let prices: Vec<f64> = (0..50).map(|i| 100.0 + ((i * 7) % 13) as f64).collect();
        let history = series(&prices);
        let ctx = SignalContext::new(i64::MAX, &history);
        let a = provider.score(&make_event(), &ctx);
        let b = provider.score(&make_event(), &ctx);
        assert_eq!(a.score.to_bits(), b.score.to_bits());
        assert_eq!(a.rationale, b.rationale);
    }

    #[test]
    fn test_future_prices_excluded_by_as_of() {
        let provider = TechnicalProvider::new(test_config());
        // 40 points; as_of cuts after index 29, leaving exactly 30
        let prices: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let history = series(&prices);
        let as_of = 29 * 60_000;
        let full_ctx = SignalContext::new(i64::MAX, &history);
        let cut_ctx = SignalContext::new(as_of, &history);

        let full = provider.score(&make_event(), &full_ctx);
        let cut = provider.score(&make_event(), &cut_ctx);
        assert!(cut.is_available);
        // Different usable windows must be allowed to differ; same cut
        // must match a manually truncated history.
        let truncated = series(&prices[..30]);
        let manual_ctx = SignalContext::new(i64::MAX, &truncated);
        let manual = provider.score(&make_event(), &manual_ctx);
        assert_eq!(cut.score.to_bits(), manual.score.to_bits());
        let _ = full;
    }
}
