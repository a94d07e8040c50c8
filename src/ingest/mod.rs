//! Disclosure ingestion
//!
//! Polls a disclosure feed, normalizes raw items into [`Event`]s, and
//! deduplicates against a bounded window of recently seen ids. Malformed
//! items are logged and skipped so one bad record never poisons a cycle;
//! fetch failures are retried with backoff and then surrendered to the
//! next poll.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;

use crate::config::IngestConfig;
use crate::error::BotError;
use crate::types::{Event, EventCategory};

/// A disclosure item as delivered by the feed, before normalization
#[derive(Debug, Clone, Deserialize)]
pub struct RawDisclosure {
    /// Feed-assigned unique id
    pub id: String,
    /// Instrument or entity the disclosure is about
    pub subject: String,
    /// Headline text
    pub headline: String,
    /// Category label, feed vocabulary
    #[serde(default)]
    pub category: String,
    /// Feed-side materiality flag
    #[serde(default)]
    pub material: bool,
    /// Publication timestamp in epoch ms
    pub published_ts: i64,
    /// Optional full text
    #[serde(default)]
    pub body: Option<String>,
}

/// Where disclosures come from. Backtests feed from files, live mode
/// from the HTTP feed.
#[async_trait]
pub trait EventSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Most recent items, newest last. May include items already seen.
    async fn fetch_recent(&self) -> Result<Vec<RawDisclosure>>;
}

/// HTTP JSON feed source
pub struct HttpEventSource {
    client: reqwest::Client,
    url: String,
    max_retries: usize,
}

impl HttpEventSource {
    pub fn new(config: &IngestConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.fetch_timeout_ms))
            .build()
            .context("failed to build ingest HTTP client")?;
        Ok(Self {
            client,
            url: config.source_url.clone(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    fn name(&self) -> &'static str {
        "http_feed"
    }

    async fn fetch_recent(&self) -> Result<Vec<RawDisclosure>> {
        let mut attempt = 0usize;
        loop {
            match self.fetch_once().await {
                Ok(items) => return Ok(items),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let jitter = rand::thread_rng().gen_range(0..250u64);
                    let backoff =
                        Duration::from_millis(500 * (1 << attempt.min(4)) as u64 + jitter);
                    tracing::warn!(
                        source = %self.name(),
                        attempt,
                        error = %e,
                        "Fetch failed, retrying after {:?}",
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    return Err(BotError::Transient(format!(
                        "feed fetch exhausted {} retries: {}",
                        self.max_retries, e
                    ))
                    .into())
                }
            }
        }
    }
}

impl HttpEventSource {
    async fn fetch_once(&self) -> Result<Vec<RawDisclosure>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("feed request failed")?
            .error_for_status()
            .context("feed returned error status")?;
        let items: Vec<RawDisclosure> =
            response.json().await.context("feed returned invalid JSON")?;
        Ok(items)
    }
}

/// Deduplicating ingestor over any [`EventSource`]
pub struct DedupIngestor<S: EventSource> {
    source: S,
    /// Ids in insertion order, oldest at the front
    seen_order: VecDeque<String>,
    /// Fast membership check
    seen: HashSet<String>,
    /// Window capacity; oldest ids evicted past this
    seen_window: usize,
}

impl<S: EventSource> DedupIngestor<S> {
    pub fn new(source: S, seen_window: usize) -> Self {
        Self {
            source,
            seen_order: VecDeque::with_capacity(seen_window),
            seen: HashSet::with_capacity(seen_window),
            seen_window: seen_window.max(1),
        }
    }

    /// Fetch, normalize, and deduplicate one cycle of disclosures.
    /// Returns only events not seen inside the current window, in feed
    /// order.
    pub async fn poll(&mut self) -> Result<Vec<Event>> {
        let raw = self.source.fetch_recent().await?;
        let now_ms = chrono::Utc::now().timestamp_millis();

        let mut fresh = Vec::new();
        for item in raw {
            if self.seen.contains(&item.id) {
                tracing::debug!(event_id = %item.id, "Duplicate disclosure skipped");
                continue;
            }
            match normalize(item, now_ms) {
                Ok(event) => {
                    self.mark_seen(event.id.clone());
                    fresh.push(event);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Malformed disclosure skipped");
                }
            }
        }

        if !fresh.is_empty() {
            tracing::info!(
                source = %self.source.name(),
                count = fresh.len(),
                "Ingested new disclosures"
            );
        }
        Ok(fresh)
    }

    fn mark_seen(&mut self, id: String) {
        while self.seen_order.len() >= self.seen_window {
            if let Some(evicted) = self.seen_order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.seen.insert(id.clone());
        self.seen_order.push_back(id);
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}

/// Turn a raw feed item into an [`Event`]. `ingested_ts` is the local
/// clock floored at `source_ts` so a lagging clock can never make an
/// event look ingested before it was published.
fn normalize(raw: RawDisclosure, now_ms: i64) -> Result<Event> {
    if raw.id.trim().is_empty() {
        return Err(BotError::DataQuality("disclosure with empty id".into()).into());
    }
    if raw.subject.trim().is_empty() {
        return Err(
            BotError::DataQuality(format!("disclosure {} has empty subject", raw.id)).into(),
        );
    }
    if raw.published_ts <= 0 {
        return Err(BotError::DataQuality(format!(
            "disclosure {} has invalid timestamp {}",
            raw.id, raw.published_ts
        ))
        .into());
    }

    let ingested_ts = now_ms.max(raw.published_ts);
    if now_ms < raw.published_ts {
        tracing::debug!(
            event_id = %raw.id,
            skew_ms = raw.published_ts - now_ms,
            "Local clock behind feed timestamp"
        );
    }

    Ok(Event {
        id: raw.id,
        subject: raw.subject.trim().to_uppercase(),
        headline: raw.headline,
        category: EventCategory::from_label(&raw.category),
        is_flagged_material: raw.material,
        source_ts: raw.published_ts,
        ingested_ts,
        raw_body: raw.body,
    })
}

/// Load historical disclosures from a JSON file for backtesting.
/// Items are normalized with `ingested_ts == source_ts` and sorted by
/// source timestamp. A file with no usable items is a data-quality
/// error so a backtest on empty input fails instead of reporting a
/// trivially clean run.
pub fn load_events_file(path: &std::path::Path) -> Result<Vec<Event>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read events file {}", path.display()))?;
    let raw: Vec<RawDisclosure> =
        serde_json::from_str(&text).context("events file is not a JSON array of disclosures")?;

    let mut events = Vec::with_capacity(raw.len());
    let mut skipped = 0usize;
    for item in raw {
        let ts = item.published_ts;
        match normalize(item, ts) {
            Ok(event) => events.push(event),
            Err(e) => {
                skipped += 1;
                tracing::warn!(error = %e, "Skipping malformed historical disclosure");
            }
        }
    }
    if skipped > 0 {
        tracing::warn!(skipped, "Some historical disclosures were skipped");
    }

    if events.is_empty() {
        return Err(BotError::DataQuality(format!(
            "events file {} contains no usable disclosures",
            path.display()
        ))
        .into());
    }

    events.sort_by(|a, b| a.source_ts.cmp(&b.source_ts).then(a.id.cmp(&b.id)));
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StubSource {
        batches: Mutex<VecDeque<Vec<RawDisclosure>>>,
    }

    impl StubSource {
        fn new(batches: Vec<Vec<RawDisclosure>>) -> Self {
            Self {
                batches: Mutex::new(batches.into()),
            }
        }
    }

    #[async_trait]
    impl EventSource for StubSource {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn fetch_recent(&self) -> Result<Vec<RawDisclosure>> {
            Ok(self.batches.lock().unwrap().pop_front().unwrap_or_default())
        }
    }

    fn raw(id: &str, ts: i64) -> RawDisclosure {
        RawDisclosure {
            id: id.into(),
            subject: "acme".into(),
            headline: "quarterly results".into(),
            category: "earnings".into(),
            material: true,
            published_ts: ts,
            body: None,
        }
    }

    #[tokio::test]
    async fn test_duplicates_suppressed_across_polls() {
        let source = StubSource::new(vec![
            vec![raw("a", 1_000), raw("b", 2_000)],
            vec![raw("b", 2_000), raw("c", 3_000)],
        ]);
        let mut ingestor = DedupIngestor::new(source, 100);

        let first = ingestor.poll().await.unwrap();
        assert_eq!(first.len(), 2);
        let second = ingestor.poll().await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, "c");
    }

    #[tokio::test]
    async fn test_seen_window_evicts_oldest() {
        let source = StubSource::new(vec![
            vec![raw("a", 1_000), raw("b", 2_000), raw("c", 3_000)],
            // "a" was evicted by the window of 2, so it re-ingests
            vec![raw("a", 1_000)],
        ]);
        let mut ingestor = DedupIngestor::new(source, 2);

        let first = ingestor.poll().await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(ingestor.seen_count(), 2);

        let second = ingestor.poll().await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, "a");
    }

    #[tokio::test]
    async fn test_malformed_items_skipped_not_fatal() {
        let mut bad = raw("", 1_000);
        bad.id = "".into();
        let mut no_subject = raw("x", 1_000);
        no_subject.subject = " ".into();
        let source = StubSource::new(vec![vec![bad, no_subject, raw("ok", 2_000)]]);
        let mut ingestor = DedupIngestor::new(source, 100);

        let events = ingestor.poll().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "ok");
    }

    #[test]
    fn test_normalize_floors_ingested_ts_at_source_ts() {
        // Local clock 5s behind the feed
        let event = normalize(raw("a", 10_000), 5_000).unwrap();
        assert_eq!(event.ingested_ts, 10_000);

        let event = normalize(raw("b", 10_000), 12_000).unwrap();
        assert_eq!(event.ingested_ts, 12_000);
    }

    #[test]
    fn test_normalize_uppercases_subject() {
        let event = normalize(raw("a", 1_000), 1_000).unwrap();
        assert_eq!(event.subject, "ACME");
        assert_eq!(event.category, EventCategory::Earnings);
    }

    #[test]
    fn test_empty_events_file_is_a_data_quality_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("events.json");
        std::fs::write(&path, "[]").unwrap();

        let err = load_events_file(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BotError>(),
            Some(BotError::DataQuality(_))
        ));
    }

    #[test]
    fn test_all_malformed_events_file_is_a_data_quality_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("events.json");
        std::fs::write(
            &path,
            r#"[{"id": "", "subject": " ", "headline": "x", "published_ts": 1000}]"#,
        )
        .unwrap();

        let err = load_events_file(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BotError>(),
            Some(BotError::DataQuality(_))
        ));
    }
}
