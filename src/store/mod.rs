//! CSV event store
//!
//! Append-only storage for events, recommendations, position snapshots,
//! and information-coefficient samples. Writers append to per-day files
//! and only emit headers on a fresh file, so restarts never duplicate
//! header rows. Writing an event id that is already on disk is a no-op.

use anyhow::{Context, Result};
use chrono::Utc;
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::info;

use crate::types::{ActivityEntry, Event, ICRecord, Position, Recommendation};

/// Flat event row for CSV storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub subject: String,
    pub headline: String,
    pub category: String,
    pub is_flagged_material: bool,
    pub source_ts: i64,
    pub ingested_ts: i64,
}

impl From<&Event> for EventRecord {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id.clone(),
            subject: event.subject.clone(),
            headline: event.headline.clone(),
            category: event.category.label().to_string(),
            is_flagged_material: event.is_flagged_material,
            source_ts: event.source_ts,
            ingested_ts: event.ingested_ts,
        }
    }
}

/// Flat recommendation row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRecord {
    pub id: String,
    pub event_id: String,
    pub direction: String,
    pub confidence: f64,
    pub entry_price: f64,
    pub signals_json: String,
    pub filters_passed: String,
    pub filters_failed: String,
    pub rationale: String,
    pub generated_ts: i64,
}

impl From<&Recommendation> for RecommendationRecord {
    fn from(rec: &Recommendation) -> Self {
        Self {
            id: rec.id.clone(),
            event_id: rec.event_id.clone(),
            direction: rec.direction.to_string(),
            confidence: rec.confidence,
            entry_price: rec.entry_price,
            signals_json: rec.signals_json.clone(),
            filters_passed: rec.filters_passed.clone(),
            filters_failed: rec.filters_failed.clone(),
            rationale: rec.rationale.clone(),
            generated_ts: rec.generated_ts,
        }
    }
}

/// Flat position row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRecord {
    pub id: String,
    pub event_id: String,
    pub subject: String,
    pub direction: String,
    pub status: String,
    pub confidence_at_entry: f64,
    pub size: f64,
    pub entry_price: f64,
    pub entry_ts: i64,
    pub peak_price: f64,
    pub trough_price: f64,
    pub exit_price: Option<f64>,
    pub exit_ts: Option<i64>,
    pub exit_reason: Option<String>,
    pub return_pct: Option<f64>,
    pub outcome: Option<String>,
}

impl From<&Position> for PositionRecord {
    fn from(position: &Position) -> Self {
        Self {
            id: position.id.clone(),
            event_id: position.event_id.clone(),
            subject: position.subject.clone(),
            direction: position.direction.to_string(),
            status: position.status.to_string(),
            confidence_at_entry: position.confidence_at_entry,
            size: position.size,
            entry_price: position.entry_price,
            entry_ts: position.entry_ts,
            peak_price: position.peak_price,
            trough_price: position.trough_price,
            exit_price: position.exit_price,
            exit_ts: position.exit_ts,
            exit_reason: position.exit_reason.map(|r| r.to_string()),
            return_pct: position.return_pct,
            outcome: position.outcome.map(|o| o.to_string()),
        }
    }
}

/// Flat IC sample row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcSampleRecord {
    pub prediction_id: String,
    pub signal_name: String,
    pub predicted_confidence: f64,
    pub realized_outcome: f64,
    pub recorded_ts: i64,
}

impl From<&ICRecord> for IcSampleRecord {
    fn from(record: &ICRecord) -> Self {
        Self {
            prediction_id: record.prediction_id.clone(),
            signal_name: record.signal_name.clone(),
            predicted_confidence: record.predicted_confidence,
            realized_outcome: record.realized_outcome,
            recorded_ts: record.recorded_ts,
        }
    }
}

/// Flat activity row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub ts: i64,
    pub kind: String,
    pub event_id: String,
    pub detail: String,
}

impl From<&ActivityEntry> for ActivityRecord {
    fn from(entry: &ActivityEntry) -> Self {
        Self {
            ts: entry.ts,
            kind: entry.kind.to_string(),
            event_id: entry.event_id.clone(),
            detail: entry.detail.clone(),
        }
    }
}

/// CSV store for all trading artifacts
pub struct EventStore {
    data_dir: PathBuf,
    event_writer: Arc<AsyncRwLock<csv::Writer<std::fs::File>>>,
    recommendation_writer: Arc<AsyncRwLock<csv::Writer<std::fs::File>>>,
    position_writer: Arc<AsyncRwLock<csv::Writer<std::fs::File>>>,
    ic_writer: Arc<AsyncRwLock<csv::Writer<std::fs::File>>>,
    activity_writer: Arc<AsyncRwLock<csv::Writer<std::fs::File>>>,
    /// Ids already written this session or found on disk at startup
    known_event_ids: Arc<AsyncRwLock<HashSet<String>>>,
}

impl EventStore {
    pub fn new(data_dir: &str) -> Result<Self> {
        let data_dir = PathBuf::from(data_dir);
        fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        for folder in ["events", "recommendations", "positions", "ic_samples", "activity"] {
            fs::create_dir_all(data_dir.join(folder))
                .with_context(|| format!("Failed creating {} directory", folder))?;
        }

        let today = Utc::now().format("%Y-%m-%d");

        let event_path = data_dir.join("events").join(format!("events_{}.csv", today));
        let known_event_ids = Self::load_known_ids(&event_path)?;

        let event_writer = Self::create_writer(&event_path)?;
        let recommendation_writer = Self::create_writer(
            &data_dir
                .join("recommendations")
                .join(format!("recommendations_{}.csv", today)),
        )?;
        let position_writer = Self::create_writer(
            &data_dir
                .join("positions")
                .join(format!("positions_{}.csv", today)),
        )?;
        let ic_writer = Self::create_writer(
            &data_dir
                .join("ic_samples")
                .join(format!("ic_samples_{}.csv", today)),
        )?;
        let activity_writer = Self::create_writer(
            &data_dir
                .join("activity")
                .join(format!("activity_{}.csv", today)),
        )?;

        info!(data_dir = %data_dir.display(), "Event store opened");

        Ok(Self {
            data_dir,
            event_writer: Arc::new(AsyncRwLock::new(event_writer)),
            recommendation_writer: Arc::new(AsyncRwLock::new(recommendation_writer)),
            position_writer: Arc::new(AsyncRwLock::new(position_writer)),
            ic_writer: Arc::new(AsyncRwLock::new(ic_writer)),
            activity_writer: Arc::new(AsyncRwLock::new(activity_writer)),
            known_event_ids: Arc::new(AsyncRwLock::new(known_event_ids)),
        })
    }

    fn create_writer(path: &Path) -> Result<csv::Writer<std::fs::File>> {
        let file_has_data =
            path.exists() && fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

        let writer = WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file);

        Ok(writer)
    }

    fn load_known_ids(path: &Path) -> Result<HashSet<String>> {
        let mut ids = HashSet::new();
        if !path.exists() {
            return Ok(ids);
        }
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .with_context(|| format!("Failed to read existing events file {}", path.display()))?;
        for row in reader.deserialize::<EventRecord>() {
            if let Ok(record) = row {
                ids.insert(record.id);
            }
        }
        Ok(ids)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Persist an event. Returns false (without writing) when the id is
    /// already known.
    pub async fn save_event(&self, event: &Event) -> Result<bool> {
        {
            let mut known = self.known_event_ids.write().await;
            if !known.insert(event.id.clone()) {
                return Ok(false);
            }
        }
        let mut writer = self.event_writer.write().await;
        writer
            .serialize(EventRecord::from(event))
            .context("Failed to write event record")?;
        writer.flush().context("Failed to flush event writer")?;
        Ok(true)
    }

    pub async fn save_recommendation(&self, recommendation: &Recommendation) -> Result<()> {
        let mut writer = self.recommendation_writer.write().await;
        writer
            .serialize(RecommendationRecord::from(recommendation))
            .context("Failed to write recommendation record")?;
        writer
            .flush()
            .context("Failed to flush recommendation writer")?;
        Ok(())
    }

    /// Persist a position snapshot. Called on every state transition, so
    /// a position id may appear multiple times with advancing status.
    pub async fn save_position(&self, position: &Position) -> Result<()> {
        let mut writer = self.position_writer.write().await;
        writer
            .serialize(PositionRecord::from(position))
            .context("Failed to write position record")?;
        writer.flush().context("Failed to flush position writer")?;
        Ok(())
    }

    pub async fn save_ic_sample(&self, record: &ICRecord) -> Result<()> {
        let mut writer = self.ic_writer.write().await;
        writer
            .serialize(IcSampleRecord::from(record))
            .context("Failed to write IC sample record")?;
        writer.flush().context("Failed to flush IC writer")?;
        Ok(())
    }

    pub async fn save_activity(&self, entry: &ActivityEntry) -> Result<()> {
        let mut writer = self.activity_writer.write().await;
        writer
            .serialize(ActivityRecord::from(entry))
            .context("Failed to write activity record")?;
        writer.flush().context("Failed to flush activity writer")?;
        Ok(())
    }

    pub async fn is_known_event(&self, event_id: &str) -> bool {
        self.known_event_ids.read().await.contains(event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventCategory;
    use tempfile::TempDir;

    fn make_event(id: &str) -> Event {
        Event {
            id: id.into(),
            subject: "ACME".into(),
            headline: "guidance raised".into(),
            category: EventCategory::Earnings,
            is_flagged_material: true,
            source_ts: 1_000,
            ingested_ts: 1_000,
            raw_body: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_event_write_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = EventStore::new(dir.path().to_str().unwrap()).unwrap();

        assert!(store.save_event(&make_event("e1")).await.unwrap());
        assert!(!store.save_event(&make_event("e1")).await.unwrap());
        assert!(store.save_event(&make_event("e2")).await.unwrap());
        assert!(store.is_known_event("e1").await);
    }

    #[tokio::test]
    async fn test_known_ids_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = EventStore::new(dir.path().to_str().unwrap()).unwrap();
            assert!(store.save_event(&make_event("e1")).await.unwrap());
        }
        let store = EventStore::new(dir.path().to_str().unwrap()).unwrap();
        assert!(store.is_known_event("e1").await);
        assert!(!store.save_event(&make_event("e1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_reopen_does_not_duplicate_headers() {
        let dir = TempDir::new().unwrap();
        {
            let store = EventStore::new(dir.path().to_str().unwrap()).unwrap();
            store.save_event(&make_event("e1")).await.unwrap();
        }
        {
            let store = EventStore::new(dir.path().to_str().unwrap()).unwrap();
            store.save_event(&make_event("e2")).await.unwrap();
        }

        let today = Utc::now().format("%Y-%m-%d");
        let path = dir
            .path()
            .join("events")
            .join(format!("events_{}.csv", today));
        let text = std::fs::read_to_string(&path).unwrap();
        let header_rows = text.lines().filter(|l| l.starts_with("id,")).count();
        assert_eq!(header_rows, 1);
        assert_eq!(text.lines().count(), 3);
    }
}
