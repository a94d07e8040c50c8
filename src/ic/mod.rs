//! Information-coefficient tracking
//!
//! Pairs each signal's predicted confidence with the realized return of
//! the resulting position and measures skill as the Spearman rank
//! correlation between the two series, per signal. Below the minimum
//! sample count the tracker reports insufficient data rather than a
//! noisy estimate.

use std::collections::HashMap;

use serde::Serialize;

use crate::types::ICRecord;

/// A computed IC for one signal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IcResult {
    pub ic: f64,
    /// Two-sided p-value from the t approximation
    pub p_value: f64,
    pub n: usize,
    pub interpretation: &'static str,
}

/// Outcome of an IC computation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum IcComputation {
    /// Not enough paired samples yet
    InsufficientData { have: usize, need: usize },
    Computed(IcResult),
}

/// One signal's contribution to a prediction, awaiting its outcome
#[derive(Debug, Clone)]
struct PendingPrediction {
    signal_name: String,
    predicted_confidence: f64,
}

pub struct IcTracker {
    min_samples: usize,
    /// Signal scores awaiting realized outcomes, by prediction id
    pending: HashMap<String, Vec<PendingPrediction>>,
    /// Completed pairs, append-only
    records: Vec<ICRecord>,
}

impl IcTracker {
    pub fn new(min_samples: usize) -> Self {
        Self {
            min_samples: min_samples.max(2),
            pending: HashMap::new(),
            records: Vec::new(),
        }
    }

    /// Register the signal scores behind a prediction. Scores from an
    /// abstaining signal should not be registered.
    pub fn record_prediction(
        &mut self,
        prediction_id: &str,
        signal_name: &str,
        predicted_confidence: f64,
    ) {
        self.pending
            .entry(prediction_id.to_string())
            .or_default()
            .push(PendingPrediction {
                signal_name: signal_name.to_string(),
                predicted_confidence,
            });
    }

    /// Resolve a prediction with its realized return. Returns the
    /// completed records, one per signal that contributed. Unknown
    /// prediction ids resolve to nothing.
    pub fn record_outcome(
        &mut self,
        prediction_id: &str,
        realized_outcome: f64,
        ts: i64,
    ) -> Vec<ICRecord> {
        let Some(pending) = self.pending.remove(prediction_id) else {
            return Vec::new();
        };

        let mut completed = Vec::with_capacity(pending.len());
        for p in pending {
            let record = ICRecord {
                prediction_id: prediction_id.to_string(),
                signal_name: p.signal_name,
                predicted_confidence: p.predicted_confidence,
                realized_outcome,
                recorded_ts: ts,
            };
            self.records.push(record.clone());
            completed.push(record);
        }
        completed
    }

    /// IC for one signal in isolation
    pub fn compute(&self, signal_name: &str) -> IcComputation {
        let pairs: Vec<(f64, f64)> = self
            .records
            .iter()
            .filter(|r| r.signal_name == signal_name)
            .map(|r| (r.predicted_confidence, r.realized_outcome))
            .collect();

        if pairs.len() < self.min_samples {
            return IcComputation::InsufficientData {
                have: pairs.len(),
                need: self.min_samples,
            };
        }

        let predicted: Vec<f64> = pairs.iter().map(|p| p.0).collect();
        let realized: Vec<f64> = pairs.iter().map(|p| p.1).collect();
        let ic = spearman(&predicted, &realized);
        let n = pairs.len();

        IcComputation::Computed(IcResult {
            ic,
            p_value: p_value(ic, n),
            n,
            interpretation: interpret(ic),
        })
    }

    /// IC per signal for every signal with at least one record
    pub fn per_signal(&self) -> HashMap<String, IcComputation> {
        let mut names: Vec<&str> = self.records.iter().map(|r| r.signal_name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names
            .into_iter()
            .map(|name| (name.to_string(), self.compute(name)))
            .collect()
    }

    pub fn records(&self) -> &[ICRecord] {
        &self.records
    }

    pub fn sample_count(&self, signal_name: &str) -> usize {
        self.records
            .iter()
            .filter(|r| r.signal_name == signal_name)
            .count()
    }
}

/// Spearman rank correlation with tie-averaged ranks
fn spearman(xs: &[f64], ys: &[f64]) -> f64 {
    let rx = average_ranks(xs);
    let ry = average_ranks(ys);
    pearson(&rx, &ry)
}

/// Fractional ranks: tied values share the mean of the ranks they span
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // ranks are 1-based; the tied run [i, j] shares the mean rank
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = rank;
        }
        i = j + 1;
    }
    ranks
}

fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    // A constant series has no rank ordering to correlate against
    if var_x == 0.0 || var_y == 0.0 {
        return 0.0;
    }
    (cov / (var_x * var_y).sqrt()).clamp(-1.0, 1.0)
}

/// Two-sided p-value via the t statistic with a normal tail
/// approximation, adequate at the sample sizes the tracker sees
fn p_value(ic: f64, n: usize) -> f64 {
    if n < 3 {
        return 1.0;
    }
    if ic.abs() >= 1.0 {
        return 0.0;
    }
    let df = (n - 2) as f64;
    let t = ic * (df / (1.0 - ic * ic)).sqrt();
    let z = t.abs();
    (1.0 - erf(z / std::f64::consts::SQRT_2)).clamp(0.0, 1.0)
}

/// Abramowitz & Stegun 7.1.26, max absolute error 1.5e-7
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();
    sign * y
}

fn interpret(ic: f64) -> &'static str {
    let magnitude = ic.abs();
    if magnitude >= 0.10 {
        "strong"
    } else if magnitude >= 0.05 {
        "good"
    } else if magnitude >= 0.02 {
        "weak"
    } else {
        "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved_tracker(pairs: &[(f64, f64)]) -> IcTracker {
        let mut tracker = IcTracker::new(2);
        for (i, (predicted, realized)) in pairs.iter().enumerate() {
            let id = format!("p{}", i);
            tracker.record_prediction(&id, "sentiment", *predicted);
            tracker.record_outcome(&id, *realized, 1_000 + i as i64);
        }
        tracker
    }

    #[test]
    fn test_insufficient_data_below_min_samples() {
        let mut tracker = IcTracker::new(30);
        tracker.record_prediction("p1", "sentiment", 0.7);
        tracker.record_outcome("p1", 0.05, 1_000);

        assert_eq!(
            tracker.compute("sentiment"),
            IcComputation::InsufficientData { have: 1, need: 30 }
        );
    }

    #[test]
    fn test_perfect_monotone_agreement_gives_ic_one() {
        let tracker = resolved_tracker(&[
            (0.6, 0.01),
            (0.7, 0.02),
            (0.8, 0.05),
            (0.9, 0.08),
            (0.95, 0.12),
        ]);
        match tracker.compute("sentiment") {
            IcComputation::Computed(result) => {
                assert!((result.ic - 1.0).abs() < 1e-9);
                assert_eq!(result.interpretation, "strong");
                assert!(result.p_value < 0.05);
            }
            other => panic!("expected computed IC, got {:?}", other),
        }
    }

    #[test]
    fn test_inverse_ordering_gives_negative_ic() {
        let tracker = resolved_tracker(&[(0.9, -0.05), (0.8, -0.02), (0.7, 0.01), (0.6, 0.04)]);
        match tracker.compute("sentiment") {
            IcComputation::Computed(result) => assert!((result.ic + 1.0).abs() < 1e-9),
            other => panic!("expected computed IC, got {:?}", other),
        }
    }

    #[test]
    fn test_ties_use_average_ranks() {
        let ranks = average_ranks(&[1.0, 2.0, 2.0, 3.0]);
        assert_eq!(ranks, vec![1.0, 2.5, 2.5, 4.0]);
    }

    #[test]
    fn test_constant_predictions_give_zero_ic() {
        let tracker = resolved_tracker(&[(0.7, 0.01), (0.7, -0.02), (0.7, 0.03)]);
        match tracker.compute("sentiment") {
            IcComputation::Computed(result) => assert_eq!(result.ic, 0.0),
            other => panic!("expected computed IC, got {:?}", other),
        }
    }

    #[test]
    fn test_signals_tracked_in_isolation() {
        let mut tracker = IcTracker::new(2);
        for (i, (s, t)) in [(0.6, 0.4), (0.7, 0.3), (0.8, 0.2)].iter().enumerate() {
            let id = format!("p{}", i);
            tracker.record_prediction(&id, "sentiment", *s);
            tracker.record_prediction(&id, "technical", *t);
            tracker.record_outcome(&id, 0.01 * (i as f64 + 1.0), 1_000);
        }

        let per_signal = tracker.per_signal();
        let sentiment = per_signal.get("sentiment").unwrap();
        let technical = per_signal.get("technical").unwrap();
        match (sentiment, technical) {
            (IcComputation::Computed(s), IcComputation::Computed(t)) => {
                assert!((s.ic - 1.0).abs() < 1e-9);
                assert!((t.ic + 1.0).abs() < 1e-9);
            }
            other => panic!("expected computed ICs, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_prediction_outcome_is_ignored() {
        let mut tracker = IcTracker::new(2);
        assert!(tracker.record_outcome("missing", 0.01, 1_000).is_empty());
        assert_eq!(tracker.records().len(), 0);
    }

    #[test]
    fn test_erf_reference_values() {
        assert!((erf(0.0)).abs() < 1e-7);
        assert!((erf(1.0) - 0.8427008).abs() < 1e-4);
        assert!((erf(-1.0) + 0.8427008).abs() < 1e-4);
        assert!((erf(2.0) - 0.9953223).abs() < 1e-4);
    }
}
