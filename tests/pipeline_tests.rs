//! End-to-end pipeline tests
//!
//! Exercise the full flow: events through filters, signals, the
//! combiner, the lifecycle manager, and the backtest simulator, plus
//! the CSV store on a temp directory.

use std::collections::HashMap;

use edgebot::backtest::{BacktestParams, BacktestSimulator};
use edgebot::config::AppConfig;
use edgebot::ic::{IcComputation, IcTracker};
use edgebot::prices::PriceTable;
use edgebot::store::EventStore;
use edgebot::types::{
    ActivityKind, Event, EventCategory, ExitReason, OutcomeClass, PositionStatus, PricePoint,
};
use tempfile::TempDir;

fn base_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.filters.max_age_secs = 86_400 * 365;
    config.filters.neutral_band = 0.02;
    config.strategy.min_confidence_backtest = 0.5;
    config.risk.max_positions_per_category = 10;
    config.signals.min_price_history = 5;
    config
}

fn params(capital: f64) -> BacktestParams {
    BacktestParams {
        starting_capital: capital,
        confidence_threshold: 0.5,
    }
}

fn event(id: &str, subject: &str, headline: &str, category: EventCategory, ts: i64) -> Event {
    Event {
        id: id.into(),
        subject: subject.into(),
        headline: headline.into(),
        category,
        is_flagged_material: true,
        source_ts: ts,
        ingested_ts: ts,
        raw_body: None,
    }
}

fn flat_then_move(
    subject: &str,
    start: i64,
    move_ts: i64,
    base: f64,
    moved: f64,
    points: i64,
) -> PriceTable {
    let mut table = PriceTable::new();
    table.insert_series(
        subject,
        (0..points)
            .map(|i| {
                let ts = start + i * 60_000;
                PricePoint {
                    ts,
                    price: if ts <= move_ts { base } else { moved },
                }
            })
            .collect(),
    );
    table
}

const START: i64 = 1_700_000_000_000;

#[test]
fn bullish_event_long_win_flows_through_whole_pipeline() {
    let event_ts = START + 30 * 60_000;
    // Price steps +12% shortly after the event: long entry, take-profit
    let prices = flat_then_move("ACME", START, event_ts + 60_000, 100.0, 112.0, 300);
    let run = BacktestSimulator::new(base_config(), prices, params(10_000.0))
        .run(vec![event(
            "e1",
            "ACME",
            "record profit beats estimates",
            EventCategory::Earnings,
            event_ts,
        )])
        .unwrap();

    assert_eq!(run.metrics.events_accepted, 1);
    assert_eq!(run.metrics.wins, 1);
    let closed = run
        .positions
        .iter()
        .find(|p| p.status == PositionStatus::Closed)
        .unwrap();
    assert_eq!(closed.direction, edgebot::types::Direction::Long);
    assert_eq!(closed.exit_reason, Some(ExitReason::TakeProfit));
    assert_eq!(closed.outcome, Some(OutcomeClass::Win));
    assert!(closed.entry_ts > event_ts);
    assert!(run.metrics.ending_capital > 10_000.0);

    // One recommendation with a populated signal trace
    assert_eq!(run.recommendations.len(), 1);
    assert!(run.recommendations[0].signals_json.contains("sentiment"));
    assert!(run.recommendations[0].filters_passed.contains("freshness"));
}

#[test]
fn bearish_event_opens_short() {
    let event_ts = START + 30 * 60_000;
    // Price steps down 12% after the event: a short take-profit
    let prices = flat_then_move("ACME", START, event_ts + 60_000, 100.0, 88.0, 300);
    let run = BacktestSimulator::new(base_config(), prices, params(10_000.0))
        .run(vec![event(
            "e1",
            "ACME",
            "profit warning as loss widens",
            EventCategory::Earnings,
            event_ts,
        )])
        .unwrap();

    let closed = run
        .positions
        .iter()
        .find(|p| p.status == PositionStatus::Closed)
        .unwrap();
    assert_eq!(closed.direction, edgebot::types::Direction::Short);
    assert_eq!(closed.outcome, Some(OutcomeClass::Win));
    assert!(closed.return_pct.unwrap() > 0.0);
}

#[test]
fn neutral_headline_rejected_by_directional_filter() {
    let event_ts = START + 30 * 60_000;
    let prices = flat_then_move("ACME", START, event_ts, 100.0, 100.0, 300);
    let run = BacktestSimulator::new(base_config(), prices, params(10_000.0))
        .run(vec![event(
            "e1",
            "ACME",
            "company publishes annual report",
            EventCategory::Earnings,
            event_ts,
        )])
        .unwrap();

    assert_eq!(run.metrics.events_accepted, 0);
    assert_eq!(run.metrics.events_rejected, 1);
    let reject = run
        .activity
        .iter()
        .find(|a| a.kind == ActivityKind::Reject)
        .unwrap();
    assert!(reject.detail.contains("neutral_sentiment"));
}

#[test]
fn stale_event_rejected_for_freshness() {
    let mut config = base_config();
    config.filters.max_age_secs = 1800;
    let event_ts = START + 30 * 60_000;
    let prices = flat_then_move("ACME", START, event_ts, 100.0, 100.0, 300);

    let mut stale = event(
        "e1",
        "ACME",
        "record profit beats estimates",
        EventCategory::Earnings,
        event_ts,
    );
    // Ingested two hours after publication
    stale.ingested_ts = event_ts + 2 * 3600 * 1000;

    let run = BacktestSimulator::new(config, prices, params(10_000.0))
        .run(vec![stale])
        .unwrap();

    assert_eq!(run.metrics.events_accepted, 0);
    let reject = run
        .activity
        .iter()
        .find(|a| a.kind == ActivityKind::Reject)
        .unwrap();
    assert!(reject.detail.contains("stale_event"));
}

#[test]
fn circuit_breaker_halts_entries_for_rest_of_day() {
    let mut config = base_config();
    config.risk.daily_loss_halt_pct = 0.001;
    config.risk.stop_loss_pct = 0.05;

    let e1_ts = START + 10 * 60_000;
    // Crash after the first entry: stop-loss trips the daily breaker
    let prices = flat_then_move("ACME", START, e1_ts + 60_000, 100.0, 90.0, 300);
    let e2_ts = e1_ts + 30 * 60_000;

    let run = BacktestSimulator::new(config, prices, params(10_000.0))
        .run(vec![
            event(
                "e1",
                "ACME",
                "record profit beats estimates",
                EventCategory::Earnings,
                e1_ts,
            ),
            event(
                "e2",
                "ACME",
                "record revenue exceeds expectations",
                EventCategory::Earnings,
                e2_ts,
            ),
        ])
        .unwrap();

    assert_eq!(run.metrics.circuit_breaker_trips, 1);
    assert!(run
        .activity
        .iter()
        .any(|a| a.kind == ActivityKind::CircuitBreaker));
    assert!(run
        .activity
        .iter()
        .any(|a| a.kind == ActivityKind::Reject && a.detail == "circuit_breaker_active"));
}

#[test]
fn technical_abstains_with_thin_history_but_event_still_trades() {
    let event_ts = START + 3 * 60_000;
    // Only 3 points before the event, below min_price_history of 5
    let prices = flat_then_move("ACME", START, event_ts + 60_000, 100.0, 112.0, 300);
    let run = BacktestSimulator::new(base_config(), prices, params(10_000.0))
        .run(vec![event(
            "e1",
            "ACME",
            "record profit beats estimates",
            EventCategory::Earnings,
            event_ts,
        )])
        .unwrap();

    assert_eq!(run.metrics.events_accepted, 1);
    let rec = &run.recommendations[0];
    assert!(rec.signals_json.contains("\"is_available\":false"));
}

#[test]
fn ic_tracker_resolves_only_closed_positions() {
    let mut tracker = IcTracker::new(3);
    for i in 0..4 {
        let id = format!("p{}", i);
        tracker.record_prediction(&id, "sentiment", 0.6 + 0.1 * i as f64);
    }
    // Only three of four outcomes arrive
    tracker.record_outcome("p0", 0.01, START);
    tracker.record_outcome("p1", 0.02, START);
    tracker.record_outcome("p2", 0.03, START);

    match tracker.compute("sentiment") {
        IcComputation::Computed(result) => {
            assert_eq!(result.n, 3);
            assert!((result.ic - 1.0).abs() < 1e-9);
        }
        other => panic!("expected computed IC, got {:?}", other),
    }
}

#[tokio::test]
async fn store_round_trips_a_full_run() {
    let dir = TempDir::new().unwrap();
    let store = EventStore::new(dir.path().to_str().unwrap()).unwrap();

    let event_ts = START + 30 * 60_000;
    let prices = flat_then_move("ACME", START, event_ts + 60_000, 100.0, 112.0, 300);
    let run = BacktestSimulator::new(base_config(), prices, params(10_000.0))
        .run(vec![event(
            "e1",
            "ACME",
            "record profit beats estimates",
            EventCategory::Earnings,
            event_ts,
        )])
        .unwrap();

    for recommendation in &run.recommendations {
        store.save_recommendation(recommendation).await.unwrap();
    }
    for position in &run.positions {
        store.save_position(position).await.unwrap();
    }
    for entry in &run.activity {
        store.save_activity(entry).await.unwrap();
    }

    for folder in ["recommendations", "positions", "activity"] {
        let files: Vec<_> = std::fs::read_dir(dir.path().join(folder))
            .unwrap()
            .collect();
        assert_eq!(files.len(), 1, "expected one CSV in {}", folder);
    }
}

#[test]
fn identical_inputs_identical_outputs() {
    let event_ts = START + 30 * 60_000;
    let events = vec![
        event(
            "e1",
            "ACME",
            "record profit beats estimates",
            EventCategory::Earnings,
            event_ts,
        ),
        event(
            "e2",
            "BOLT",
            "lawsuit investigation widens",
            EventCategory::Litigation,
            event_ts + 5 * 60_000,
        ),
    ];

    let run_once = || {
        let mut prices = flat_then_move("ACME", START, event_ts + 60_000, 100.0, 104.0, 300);
        let bolt: Vec<PricePoint> = (0..300)
            .map(|i| PricePoint {
                ts: START + i * 60_000,
                price: 50.0 - 0.01 * i as f64,
            })
            .collect();
        prices.insert_series("BOLT", bolt);
        BacktestSimulator::new(base_config(), prices, params(10_000.0))
            .run(events.clone())
            .unwrap()
    };

    let a = run_once();
    let b = run_once();

    assert_eq!(a.metrics.ending_capital.to_bits(), b.metrics.ending_capital.to_bits());
    assert_eq!(a.activity.len(), b.activity.len());
    let summarize = |run: &edgebot::backtest::BacktestRun| -> HashMap<String, String> {
        run.positions
            .iter()
            .map(|p| (p.event_id.clone(), format!("{}:{:?}", p.status, p.return_pct)))
            .collect()
    };
    assert_eq!(summarize(&a), summarize(&b));
}
