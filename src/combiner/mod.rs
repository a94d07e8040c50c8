//! Bayesian confidence combiner
//!
//! Naive addition of bounded adjustments can exceed 1.0 and is not a
//! probability. This combiner converts the base signal to odds
//! (`p / (1 - p)`), multiplies by each independent factor (factors > 1
//! boost confidence, < 1 dampen it), converts back to a probability and
//! clamps to the configured open interval. The output is a valid,
//! boundable probability no matter how many boosting factors stack, and
//! adding a new signal means adding one more multiplicative odds factor.

use crate::config::CombinerConfig;
use crate::types::{Confidence, Direction, FactorAdjustment, SignalScore};

/// The multiplicative odds factors consumed by [`Combiner::combine`],
/// in application order.
#[derive(Debug, Clone, Copy)]
pub struct Factors {
    pub freshness: f64,
    pub time_of_day: f64,
    pub technical: f64,
    pub materiality: f64,
    pub contrarian: f64,
}

impl Factors {
    fn ordered(&self) -> [(&'static str, f64); 5] {
        [
            ("freshness", self.freshness),
            ("time_of_day", self.time_of_day),
            ("technical", self.technical),
            ("materiality", self.materiality),
            ("contrarian", self.contrarian),
        ]
    }
}

pub struct Combiner {
    config: CombinerConfig,
}

impl Combiner {
    pub fn new(config: CombinerConfig) -> Self {
        Self { config }
    }

    /// Direction implied by a (non-neutral) sentiment score
    pub fn direction_from_sentiment(score: f64) -> Direction {
        if score >= 0.5 {
            Direction::Long
        } else {
            Direction::Short
        }
    }

    /// Probability of success in the chosen direction. A strongly bearish
    /// sentiment is a strong short signal, so the base is folded around
    /// the midpoint.
    pub fn base_probability(sentiment_score: f64, direction: Direction) -> f64 {
        match direction {
            Direction::Long => sentiment_score,
            Direction::Short => 1.0 - sentiment_score,
        }
    }

    /// Odds factor from the technical signal: alignment with the trade
    /// direction boosts, opposition dampens. An abstaining signal maps to
    /// the neutral factor 1.0.
    pub fn technical_factor(&self, technical: &SignalScore, direction: Direction) -> f64 {
        if !technical.is_available {
            return 1.0;
        }
        let tilt = match direction {
            Direction::Long => technical.score - 0.5,
            Direction::Short => 0.5 - technical.score,
        };
        1.0 + tilt * self.config.technical_factor_scale
    }

    /// Odds damping for crowded sentiment: when the crowd already agrees
    /// this strongly, part of the move is likely priced in.
    pub fn contrarian_factor(&self, sentiment_score: f64) -> f64 {
        if (sentiment_score - 0.5).abs() >= self.config.contrarian_extreme_threshold {
            self.config.contrarian_damping
        } else {
            1.0
        }
    }

    /// Merge the base signal and factors into one calibrated probability.
    /// Each factor's value and the resulting intermediate odds are
    /// retained in the breakdown for auditability.
    pub fn combine(&self, base_signal: f64, direction: Direction, factors: &Factors) -> Confidence {
        // Odds are undefined at exactly 0 or 1; pre-clamp before converting.
        let eps = self.config.epsilon;
        let base = base_signal.clamp(eps, 1.0 - eps);
        let mut odds = base / (1.0 - base);

        let mut breakdown = Vec::with_capacity(6);
        breakdown.push(FactorAdjustment {
            name: "base_signal".to_string(),
            factor: base,
            odds_after: odds,
        });

        for (name, factor) in factors.ordered() {
            // A non-positive factor cannot be an odds multiplier; treat it
            // as fully dampening instead of flipping the sign.
            let factor = factor.max(eps);
            odds *= factor;
            breakdown.push(FactorAdjustment {
                name: name.to_string(),
                factor,
                odds_after: odds,
            });
        }

        let probability = odds / (1.0 + odds);
        let final_probability =
            probability.clamp(self.config.min_probability, self.config.max_probability);

        Confidence {
            final_probability,
            direction,
            factor_breakdown: breakdown,
        }
    }
}
