//! Live trading loop
//!
//! Polls the disclosure feed and the quote source on independent
//! intervals, runs the same filter/signal/combiner pipeline as the
//! backtester, and manages open positions against fresh quotes. A cycle
//! that exceeds its interval is skipped with a warning rather than
//! allowed to pile up. Shutdown is cooperative via a watch channel.

use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::combiner::{Combiner, Factors};
use crate::config::AppConfig;
use crate::filters::{FilterChain, FilterContext, RunMode};
use crate::ic::{IcComputation, IcTracker};
use crate::ingest::{DedupIngestor, EventSource};
use crate::lifecycle::{LifecycleConfig, LifecycleManager};
use crate::prices::{HttpPriceFeed, PriceTable};
use crate::signals::sentiment::SIGNAL_NAME as SENTIMENT;
use crate::signals::{SentimentProvider, SignalContext, SignalRegistry, TechnicalProvider};
use crate::store::EventStore;
use crate::types::{
    ActivityEntry, ActivityKind, Event, ICRecord, PositionStatus, PricePoint, Recommendation,
};

/// How many history points signal providers may look at per event
const MAX_HISTORY_POINTS: usize = 500;

/// Minimum paired IC samples before live reporting
const IC_MIN_SAMPLES: usize = 20;

/// Where accepted recommendations, exits, and IC updates are announced
pub trait NotificationSink: Send + Sync {
    fn notify(&self, entry: &ActivityEntry);
}

/// Default sink: structured log lines only
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, entry: &ActivityEntry) {
        info!(
            kind = %entry.kind,
            event_id = %entry.event_id,
            detail = %entry.detail,
            "Activity"
        );
    }
}

/// A decision waiting for the first quote observed after it
struct PendingEntry {
    position_id: String,
    event_id: String,
    subject: String,
    decided_ts: i64,
}

pub struct LiveDriver<S: EventSource> {
    config: AppConfig,
    ingestor: DedupIngestor<S>,
    feed: HttpPriceFeed,
    prices: PriceTable,
    filters: FilterChain,
    signals: SignalRegistry,
    combiner: Combiner,
    lifecycle: LifecycleManager,
    ic: IcTracker,
    store: Option<EventStore>,
    sink: Box<dyn NotificationSink>,
    pending: Vec<PendingEntry>,
}

impl<S: EventSource> LiveDriver<S> {
    pub fn new(config: AppConfig, source: S, sink: Box<dyn NotificationSink>) -> Result<Self> {
        let feed = HttpPriceFeed::new(&config.live.quote_url, config.live.request_timeout_ms)?;

        let mut signals = SignalRegistry::new();
        signals.register(Box::new(SentimentProvider::new()));
        signals.register(Box::new(TechnicalProvider::new(config.signals.clone())));

        let lifecycle = LifecycleManager::new(LifecycleConfig::from_risk(
            &config.risk,
            config.strategy.min_confidence_live,
        ));

        // Dry runs never touch the store
        let store = if config.persistence.csv_enabled && !config.bot.dry_run {
            Some(EventStore::new(&config.persistence.data_dir)?)
        } else {
            None
        };

        Ok(Self {
            ingestor: DedupIngestor::new(source, config.ingest.seen_window),
            filters: FilterChain::new(config.filters.clone()),
            combiner: Combiner::new(config.combiner.clone()),
            signals,
            lifecycle,
            ic: IcTracker::new(IC_MIN_SAMPLES),
            feed,
            prices: PriceTable::new(),
            store,
            sink,
            pending: Vec::new(),
            config,
        })
    }

    /// Run until the shutdown flag flips
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(config = %self.config.digest(), "Live driver starting");
        if self.config.bot.dry_run {
            warn!("Dry run: decisions are logged, nothing is persisted");
        }

        let poll_secs = self.config.ingest.poll_interval_secs;
        let mut poll = tokio::time::interval(Duration::from_secs(poll_secs));
        let mut refresh =
            tokio::time::interval(Duration::from_secs(self.config.live.price_refresh_secs));
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    let budget = Duration::from_secs(poll_secs);
                    match tokio::time::timeout(budget, self.poll_cycle()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            if e.downcast_ref::<crate::error::BotError>()
                                .is_some_and(|b| b.is_fatal())
                            {
                                return Err(e);
                            }
                            error!(error = %e, "Poll cycle failed");
                        }
                        Err(_) => warn!("Poll cycle exceeded its interval, skipped"),
                    }
                }
                _ = refresh.tick() => {
                    if let Err(e) = self.refresh_cycle().await {
                        error!(error = %e, "Price refresh failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(
            open = self.lifecycle.open_positions().len(),
            "Live driver shutting down"
        );
        Ok(())
    }

    /// One ingest cycle: fetch, dedup, and evaluate new disclosures
    async fn poll_cycle(&mut self) -> Result<()> {
        let events = self.ingestor.poll().await?;
        for event in events {
            if let Some(store) = &self.store {
                if !store.save_event(&event).await? {
                    debug!(event_id = %event.id, "Event already stored, skipped");
                    continue;
                }
            }
            if let Err(e) = self.evaluate(&event).await {
                error!(event_id = %event.id, error = %e, "Event evaluation failed");
            }
        }
        Ok(())
    }

    async fn evaluate(&mut self, event: &Event) -> Result<()> {
        let as_of = event.ingested_ts;
        let history = self
            .prices
            .history_before(&event.subject, as_of, MAX_HISTORY_POINTS);
        let ctx = SignalContext::new(as_of, &history);
        let scores = self.signals.score_all(event, &ctx);

        let sentiment_score = scores
            .iter()
            .find(|s| s.signal_name == SENTIMENT && s.is_available)
            .map(|s| s.score);

        let filter_ctx = FilterContext {
            now_ms: chrono::Utc::now().timestamp_millis(),
            mode: RunMode::Live,
            sentiment_score,
        };
        let outcome = self.filters.evaluate(event, &filter_ctx);

        if !outcome.decision.is_accept() {
            self.record(ActivityEntry {
                ts: as_of,
                kind: ActivityKind::Reject,
                event_id: event.id.clone(),
                detail: outcome.failed.join(","),
            })
            .await?;
            return Ok(());
        }

        let Some(sentiment) = sentiment_score else {
            // The directional filter guarantees presence on accept
            return Ok(());
        };

        let direction = Combiner::direction_from_sentiment(sentiment);
        let base = Combiner::base_probability(sentiment, direction);
        let technical = scores
            .iter()
            .find(|s| s.signal_name == crate::signals::technical::SIGNAL_NAME)
            .map(|s| self.combiner.technical_factor(s, direction))
            .unwrap_or(1.0);

        let factors = Factors {
            freshness: outcome.freshness_factor,
            time_of_day: outcome.time_of_day_factor,
            technical,
            materiality: outcome.materiality_factor,
            contrarian: self.combiner.contrarian_factor(sentiment),
        };
        let confidence = self.combiner.combine(base, direction, &factors);

        // Live sizing is notional: paper capital never changes hands
        let size = 1_000.0 * self.config.risk.max_capital_fraction_per_trade;
        let position = self.lifecycle.propose(event, &confidence, size);

        let recommendation = Recommendation {
            id: position.recommendation_id.clone(),
            event_id: event.id.clone(),
            direction,
            confidence: confidence.final_probability,
            entry_price: self.prices.latest_price(&event.subject).unwrap_or(0.0),
            signals_json: serde_json::to_string(&scores).unwrap_or_default(),
            generated_ts: as_of,
            filters_passed: outcome.passed.join(","),
            filters_failed: String::new(),
            rationale: format!(
                "{} p={:.3} sentiment={:.3}",
                direction, confidence.final_probability, sentiment
            ),
        };
        if let Some(store) = &self.store {
            store.save_recommendation(&recommendation).await?;
        }

        if position.status == PositionStatus::Rejected {
            self.record(ActivityEntry {
                ts: as_of,
                kind: ActivityKind::Reject,
                event_id: event.id.clone(),
                detail: format!("below_threshold p={:.3}", confidence.final_probability),
            })
            .await?;
            return Ok(());
        }

        for score in &scores {
            if score.is_available {
                self.ic
                    .record_prediction(&position.id, &score.signal_name, score.score);
            }
        }

        self.pending.push(PendingEntry {
            position_id: position.id.clone(),
            event_id: event.id.clone(),
            subject: event.subject.clone(),
            decided_ts: as_of,
        });
        self.record(ActivityEntry {
            ts: as_of,
            kind: ActivityKind::Accept,
            event_id: event.id.clone(),
            detail: format!("{} p={:.3}", direction, confidence.final_probability),
        })
        .await?;
        Ok(())
    }

    /// One quote cycle: refresh every subject with exposure, fill pending
    /// entries on the fresh quote, and monitor open positions
    async fn refresh_cycle(&mut self) -> Result<()> {
        let mut subjects: Vec<String> = self
            .lifecycle
            .open_positions()
            .into_iter()
            .map(|p| p.subject)
            .chain(self.pending.iter().map(|p| p.subject.clone()))
            .collect();
        subjects.sort();
        subjects.dedup();

        for subject in subjects {
            let price = match self.feed.latest(&subject).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(subject = %subject, error = %e, "Quote fetch failed, skipping subject");
                    continue;
                }
            };
            let ts = chrono::Utc::now().timestamp_millis();
            self.prices.push_point(&subject, PricePoint { ts, price });

            self.fill_pending(&subject, price, ts).await?;
            self.monitor_open(&subject, price, ts).await?;
        }
        Ok(())
    }

    /// Entries only fill on quotes observed strictly after the decision
    async fn fill_pending(&mut self, subject: &str, price: f64, ts: i64) -> Result<()> {
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].subject == subject && ts > self.pending[i].decided_ts {
                let entry = self.pending.remove(i);
                let position = self.lifecycle.open(&entry.position_id, price, ts)?;
                if let Some(store) = &self.store {
                    store.save_position(&position).await?;
                }
                self.record(ActivityEntry {
                    ts,
                    kind: ActivityKind::Open,
                    event_id: entry.event_id,
                    detail: format!("{} {} @ {:.4}", position.direction, subject, price),
                })
                .await?;
            } else {
                i += 1;
            }
        }
        Ok(())
    }

    async fn monitor_open(&mut self, subject: &str, price: f64, ts: i64) -> Result<()> {
        for position in self.lifecycle.open_positions() {
            if position.subject != subject {
                continue;
            }
            if let Some(reason) = self.lifecycle.monitor(&position.id, price, ts) {
                let closed = self.lifecycle.close(&position.id, price, ts, reason)?;
                let ret = closed.return_pct.unwrap_or(0.0);

                let resolved = self.ic.record_outcome(&closed.id, ret, ts);
                if let Some(store) = &self.store {
                    store.save_position(&closed).await?;
                    for record in &resolved {
                        store.save_ic_sample(record).await?;
                    }
                }

                self.record(ActivityEntry {
                    ts,
                    kind: ActivityKind::Exit,
                    event_id: closed.event_id.clone(),
                    detail: format!("{} {} return {:+.4}", reason, subject, ret),
                })
                .await?;
                self.push_ic_updates(&resolved, &closed.event_id, ts).await?;
            }
        }
        Ok(())
    }

    /// Announce the refreshed per-signal IC once a resolved outcome gives
    /// a signal enough paired samples to compute one
    async fn push_ic_updates(
        &self,
        resolved: &[ICRecord],
        event_id: &str,
        ts: i64,
    ) -> Result<()> {
        let mut signals: Vec<&str> = resolved.iter().map(|r| r.signal_name.as_str()).collect();
        signals.sort_unstable();
        signals.dedup();

        for signal in signals {
            if let IcComputation::Computed(result) = self.ic.compute(signal) {
                self.record(ActivityEntry {
                    ts,
                    kind: ActivityKind::IcUpdate,
                    event_id: event_id.to_string(),
                    detail: format!(
                        "{} ic={:+.4} p={:.4} n={} {}",
                        signal, result.ic, result.p_value, result.n, result.interpretation
                    ),
                })
                .await?;
            }
        }
        Ok(())
    }

    async fn record(&self, entry: ActivityEntry) -> Result<()> {
        if let Some(store) = &self.store {
            store.save_activity(&entry).await?;
        }
        self.sink.notify(&entry);
        Ok(())
    }
}
