//! EdgeBot entrypoint
//!
//! Subcommands:
//!   run-backtest --events <file> [--prices <file>] [--capital N]
//!                [--confidence-threshold P]
//!   run-live     [--poll-interval-secs N] [--dry-run]
//!
//! Exit codes: 0 success, 1 runtime failure, 2 usage error.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use edgebot::backtest::{BacktestParams, BacktestRun, BacktestSimulator};
use edgebot::config::AppConfig;
use edgebot::error::BotError;
use edgebot::ic::IcComputation;
use edgebot::ingest::{load_events_file, HttpEventSource};
use edgebot::live::{LiveDriver, LogSink};
use edgebot::prices::PriceTable;
use edgebot::store::EventStore;
use edgebot::types::PricePoint;

struct BacktestArgs {
    events: PathBuf,
    prices: Option<PathBuf>,
    capital: f64,
    confidence_threshold: Option<f64>,
}

fn usage() -> ExitCode {
    eprintln!(
        "usage: edgebot run-backtest --events <file> [--prices <file>] \
         [--capital N] [--confidence-threshold P]\n       \
         edgebot run-live [--poll-interval-secs N] [--dry-run]"
    );
    ExitCode::from(2)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        return usage();
    };

    let result = match command.as_str() {
        "run-backtest" => match parse_backtest_args(&args[1..]) {
            Some(parsed) => run_backtest(parsed),
            None => return usage(),
        },
        "run-live" => match parse_live_args(&args[1..]) {
            Some((dry_run_flag, poll_override)) => run_live(dry_run_flag, poll_override),
            None => return usage(),
        },
        _ => return usage(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "Fatal");
            // Configuration problems are a distinct exit class
            if matches!(
                e.downcast_ref::<BotError>(),
                Some(BotError::Configuration(_))
            ) {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn parse_backtest_args(args: &[String]) -> Option<BacktestArgs> {
    let mut events = None;
    let mut prices = None;
    let mut capital = 10_000.0;
    let mut confidence_threshold = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--events" => events = Some(PathBuf::from(iter.next()?)),
            "--prices" => prices = Some(PathBuf::from(iter.next()?)),
            "--capital" => capital = iter.next()?.parse().ok()?,
            "--confidence-threshold" => confidence_threshold = Some(iter.next()?.parse().ok()?),
            _ => return None,
        }
    }

    Some(BacktestArgs {
        events: events?,
        prices,
        capital,
        confidence_threshold,
    })
}

fn run_backtest(args: BacktestArgs) -> Result<()> {
    let config = AppConfig::load()?;
    info!(config = %config.digest(), "Configuration loaded");

    let events = load_events_file(&args.events)?;
    let prices_path = args
        .prices
        .clone()
        .unwrap_or_else(|| args.events.with_extension("prices.json"));
    let prices = load_price_file(&prices_path)?;

    let params = BacktestParams {
        starting_capital: args.capital,
        confidence_threshold: args
            .confidence_threshold
            .unwrap_or(config.strategy.min_confidence_backtest),
    };

    let persist = config.persistence.csv_enabled && !config.bot.dry_run;
    let data_dir = config.persistence.data_dir.clone();
    let run = BacktestSimulator::new(config, prices, params).run(events)?;
    report(&run);

    if persist {
        persist_run(&data_dir, &run)?;
    }
    Ok(())
}

/// Price file format: `{"SUBJECT": [{"ts": ..., "price": ...}, ...]}`
fn load_price_file(path: &std::path::Path) -> Result<PriceTable> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read price file {}", path.display()))?;
    let series: std::collections::HashMap<String, Vec<PricePoint>> =
        serde_json::from_str(&text).context("price file is not a map of subject to points")?;

    let mut table = PriceTable::new();
    for (subject, points) in series {
        table.insert_series(&subject, points);
    }
    Ok(table)
}

fn report(run: &BacktestRun) {
    let m = &run.metrics;
    info!(
        events = m.events_total,
        accepted = m.events_accepted,
        rejected = m.events_rejected,
        opened = m.positions_opened,
        closed = m.positions_closed,
        open_at_end = m.open_at_end,
        "Backtest event flow"
    );
    info!(
        wins = m.wins,
        losses = m.losses,
        breakevens = m.breakevens,
        win_rate = format!("{:.1}%", m.win_rate * 100.0),
        avg_return = format!("{:+.2}%", m.avg_return_pct * 100.0),
        profit_factor = format!("{:.2}", m.profit_factor),
        expectancy = format!("{:+.2}", m.expectancy),
        "Backtest outcomes"
    );
    info!(
        starting = m.starting_capital,
        ending = format!("{:.2}", m.ending_capital),
        total_return = format!("{:+.2}%", m.total_return_pct * 100.0),
        max_drawdown = format!("{:.2}%", m.max_drawdown_pct * 100.0),
        circuit_breaker_trips = m.circuit_breaker_trips,
        "Backtest capital"
    );

    let mut signals: Vec<_> = run.ic_by_signal.iter().collect();
    signals.sort_by(|a, b| a.0.cmp(b.0));
    for (name, computation) in signals {
        match computation {
            IcComputation::Computed(result) => info!(
                signal = %name,
                ic = format!("{:.4}", result.ic),
                p_value = format!("{:.4}", result.p_value),
                n = result.n,
                interpretation = result.interpretation,
                "Information coefficient"
            ),
            IcComputation::InsufficientData { have, need } => info!(
                signal = %name,
                have,
                need,
                "Information coefficient: insufficient data"
            ),
        }
    }
}

fn persist_run(data_dir: &str, run: &BacktestRun) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime for persistence")?;
    runtime.block_on(async {
        let store = EventStore::new(data_dir)?;
        for recommendation in &run.recommendations {
            store.save_recommendation(recommendation).await?;
        }
        for position in &run.positions {
            store.save_position(position).await?;
        }
        for entry in &run.activity {
            store.save_activity(entry).await?;
        }
        info!(data_dir = %store.data_dir().display(), "Backtest artifacts persisted");
        Ok::<(), anyhow::Error>(())
    })
}

fn parse_live_args(args: &[String]) -> Option<(bool, Option<u64>)> {
    let mut dry_run = false;
    let mut poll_override = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--dry-run" => dry_run = true,
            "--poll-interval-secs" => poll_override = Some(iter.next()?.parse().ok()?),
            _ => return None,
        }
    }
    Some((dry_run, poll_override))
}

fn run_live(dry_run_flag: bool, poll_override: Option<u64>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    runtime.block_on(async {
        let mut config = AppConfig::load()?;
        if dry_run_flag {
            config.bot.dry_run = true;
        }
        if let Some(secs) = poll_override {
            config.ingest.poll_interval_secs = secs;
        }
        config.validate()?;
        info!(config = %config.digest(), "Configuration loaded");

        let source = HttpEventSource::new(&config.ingest)?;
        let driver = LiveDriver::new(config, source, Box::new(LogSink))?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
        });

        driver.run(shutdown_rx).await
    })
}
