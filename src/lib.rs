//! EdgeBot Library
//!
//! Event-driven disclosure trading simulator: ingest, filter, score,
//! combine, and manage simulated positions, with a no-look-ahead
//! backtester and per-signal information-coefficient tracking.

pub mod backtest;
pub mod combiner;
pub mod config;
pub mod error;
pub mod filters;
pub mod ic;
pub mod ingest;
pub mod lifecycle;
pub mod live;
pub mod prices;
pub mod signals;
pub mod store;
pub mod types;
