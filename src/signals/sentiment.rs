//! Rule-based sentiment provider
//!
//! Polarity classification over headline and body text using a fixed
//! keyword lexicon. Returns a score in [0, 1] (0.5 = neutral), a
//! rationale with the matched terms, and the extracted themes. Degrades
//! to `is_available = false` on empty text instead of erroring.

use crate::signals::{SignalContext, SignalProvider};
use crate::types::{Event, SignalScore};

pub const SIGNAL_NAME: &str = "sentiment";

/// (term, theme) pairs; themes group related vocabulary for reporting
const BULLISH_TERMS: &[(&str, &str)] = &[
    ("record profit", "earnings_beat"),
    ("record revenue", "earnings_beat"),
    ("beats estimates", "earnings_beat"),
    ("exceeds expectations", "earnings_beat"),
    ("raises guidance", "guidance_up"),
    ("upgraded", "analyst_action"),
    ("buyback", "capital_return"),
    ("share repurchase", "capital_return"),
    ("special dividend", "capital_return"),
    ("acquisition", "expansion"),
    ("new contract", "expansion"),
    ("partnership", "expansion"),
    ("approval", "regulatory_win"),
    ("breakthrough", "innovation"),
    ("surge", "momentum"),
    ("all-time high", "momentum"),
];

const BEARISH_TERMS: &[(&str, &str)] = &[
    ("misses estimates", "earnings_miss"),
    ("profit warning", "earnings_miss"),
    ("loss widens", "earnings_miss"),
    ("cuts guidance", "guidance_down"),
    ("lowers guidance", "guidance_down"),
    ("downgraded", "analyst_action"),
    ("lawsuit", "legal_risk"),
    ("investigation", "legal_risk"),
    ("recall", "operational_risk"),
    ("halt", "operational_risk"),
    ("delisting", "operational_risk"),
    ("bankruptcy", "distress"),
    ("default", "distress"),
    ("capital increase", "dilution"),
    ("rights issue", "dilution"),
    ("resignation", "management_risk"),
    ("plunge", "momentum"),
];

/// Strong modifiers double the weight of a nearby polarity hit
const INTENSIFIERS: &[&str] = &["sharply", "significantly", "materially", "unexpectedly"];

pub struct SentimentProvider;

impl SentimentProvider {
    pub fn new() -> Self {
        Self
    }

    fn scan(text: &str) -> (f64, f64, Vec<String>, Vec<String>) {
        let lower = text.to_lowercase();
        let intensity = if INTENSIFIERS.iter().any(|w| lower.contains(w)) {
            2.0
        } else {
            1.0
        };

        let mut bull = 0.0;
        let mut bear = 0.0;
        let mut matched = Vec::new();
        let mut themes = Vec::new();

        for (term, theme) in BULLISH_TERMS {
            if lower.contains(term) {
                bull += intensity;
                matched.push((*term).to_string());
                if !themes.contains(&(*theme).to_string()) {
                    themes.push((*theme).to_string());
                }
            }
        }
        for (term, theme) in BEARISH_TERMS {
            if lower.contains(term) {
                bear += intensity;
                matched.push((*term).to_string());
                if !themes.contains(&(*theme).to_string()) {
                    themes.push((*theme).to_string());
                }
            }
        }

        (bull, bear, matched, themes)
    }
}

impl Default for SentimentProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalProvider for SentimentProvider {
    fn name(&self) -> &'static str {
        SIGNAL_NAME
    }

    fn score(&self, event: &Event, _ctx: &SignalContext<'_>) -> SignalScore {
        let mut text = event.headline.clone();
        if let Some(body) = &event.raw_body {
            text.push(' ');
            text.push_str(body);
        }
        if text.trim().is_empty() {
            return SignalScore::unavailable(SIGNAL_NAME, "empty text");
        }

        let (bull, bear, matched, themes) = Self::scan(&text);
        let total = bull + bear;
        if total == 0.0 {
            // Text present but no lexicon hit: a valid neutral reading,
            // not an abstention.
            return SignalScore {
                signal_name: SIGNAL_NAME.to_string(),
                score: 0.5,
                rationale: "no polarity terms matched".to_string(),
                is_available: true,
                themes: Vec::new(),
            };
        }

        let score = 0.5 + 0.5 * (bull - bear) / total;
        SignalScore {
            signal_name: SIGNAL_NAME.to_string(),
            score: score.clamp(0.0, 1.0),
            rationale: format!(
                "bullish={:.0} bearish={:.0} matched=[{}]",
                bull,
                bear,
                matched.join(", ")
            ),
            is_available: true,
            themes,
        }
    }
}
