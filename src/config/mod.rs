//! Configuration management for EdgeBot
//!
//! Loads from optional config files + environment variables via .env.
//! Invalid configuration is fatal at startup, before any event is
//! processed.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::BotError;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub ingest: IngestConfig,
    pub filters: FiltersConfig,
    pub signals: SignalsConfig,
    pub combiner: CombinerConfig,
    pub strategy: StrategyConfig,
    pub risk: RiskConfig,
    pub live: LiveConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Version tag for logging and CSV
    pub tag: String,
    /// Dry run mode (no store writes, no notifications)
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Event source base URL
    pub source_url: String,
    /// Poll interval in seconds
    pub poll_interval_secs: u64,
    /// Per-request timeout in milliseconds; must stay below the poll interval
    pub fetch_timeout_ms: u64,
    /// Retries within one cycle before surrendering to the next
    pub max_retries: usize,
    /// Bounded window of recently seen event ids
    pub seen_window: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FiltersConfig {
    /// Maximum event age in seconds before the edge is considered decayed
    pub max_age_secs: i64,
    /// Half-life of the freshness decay curve in seconds
    pub freshness_half_life_secs: i64,
    /// Category labels treated as low importance
    pub low_importance_categories: Vec<String>,
    /// Keywords that rescue a low-importance event
    pub high_impact_keywords: Vec<String>,
    /// Optimal trading window, UTC hours [start, end)
    pub trading_window_start_hour: u32,
    pub trading_window_end_hour: u32,
    /// Odds boost inside the optimal window
    pub time_of_day_boost: f64,
    /// Sentiment scores within this distance of 0.5 are untradeable
    pub neutral_band: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalsConfig {
    /// Minimum price samples before the technical provider will score
    pub min_price_history: usize,
    /// Momentum oscillator lookback
    pub oscillator_period: usize,
    /// Fast moving average period
    pub fast_ma_period: usize,
    /// Slow moving average period
    pub slow_ma_period: usize,
    /// Volatility window
    pub volatility_window: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CombinerConfig {
    /// Lower bound of the clamped open interval
    pub min_probability: f64,
    /// Upper bound of the clamped open interval
    pub max_probability: f64,
    /// Pre-clamp epsilon guarding the odds conversion
    pub epsilon: f64,
    /// Sentiment beyond this distance from 0.5 is treated as crowded
    pub contrarian_extreme_threshold: f64,
    /// Odds damping applied to crowded sentiment (1.0 disables)
    pub contrarian_damping: f64,
    /// Scale of the technical-alignment odds factor
    pub technical_factor_scale: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    /// Minimum confidence to open in live mode
    pub min_confidence_live: f64,
    /// Minimum confidence to open in backtest mode
    pub min_confidence_backtest: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Take-profit threshold on direction-adjusted return (e.g. 0.10)
    pub take_profit_pct: f64,
    /// Stop-loss threshold (positive number, e.g. 0.05 = -5%)
    pub stop_loss_pct: f64,
    /// Trailing-stop drawdown from peak (e.g. 0.03)
    pub trailing_stop_pct: f64,
    /// Time-stop holding limit in days
    pub max_hold_days: i64,
    /// |return| below this is BREAKEVEN
    pub breakeven_epsilon: f64,
    /// Maximum capital fraction allocated to one trade
    pub max_capital_fraction_per_trade: f64,
    /// Maximum concurrent positions per category
    pub max_positions_per_category: usize,
    /// Daily loss (fraction of starting capital) that trips the breaker
    pub daily_loss_halt_pct: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    /// Quote source base URL
    pub quote_url: String,
    /// Price refresh interval in seconds
    pub price_refresh_secs: u64,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory for the CSV event store
    pub data_dir: String,
    /// Enable CSV persistence
    pub csv_enabled: bool,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .set_default("bot.tag", env!("CARGO_PKG_VERSION"))?
            .set_default("bot.dry_run", true)?
            // Ingest defaults
            .set_default("ingest.source_url", "http://localhost:9300/disclosures")?
            .set_default("ingest.poll_interval_secs", 30)?
            .set_default("ingest.fetch_timeout_ms", 10_000)?
            .set_default("ingest.max_retries", 2)?
            .set_default("ingest.seen_window", 10_000)?
            // Filter defaults
            .set_default("filters.max_age_secs", 1800)?
            .set_default("filters.freshness_half_life_secs", 600)?
            .set_default(
                "filters.low_importance_categories",
                vec!["dividend", "executive_change"],
            )?
            .set_default(
                "filters.high_impact_keywords",
                vec!["merger", "acquisition", "bankruptcy", "halt", "record"],
            )?
            .set_default("filters.trading_window_start_hour", 9)?
            .set_default("filters.trading_window_end_hour", 15)?
            .set_default("filters.time_of_day_boost", 1.1)?
            .set_default("filters.neutral_band", 0.05)?
            // Signal defaults
            .set_default("signals.min_price_history", 30)?
            .set_default("signals.oscillator_period", 14)?
            .set_default("signals.fast_ma_period", 5)?
            .set_default("signals.slow_ma_period", 20)?
            .set_default("signals.volatility_window", 20)?
            // Combiner defaults
            .set_default("combiner.min_probability", 0.01)?
            .set_default("combiner.max_probability", 0.99)?
            .set_default("combiner.epsilon", 1e-6)?
            .set_default("combiner.contrarian_extreme_threshold", 0.40)?
            .set_default("combiner.contrarian_damping", 0.9)?
            .set_default("combiner.technical_factor_scale", 0.8)?
            // Strategy defaults
            .set_default("strategy.min_confidence_live", 0.60)?
            .set_default("strategy.min_confidence_backtest", 0.60)?
            // Risk defaults
            .set_default("risk.take_profit_pct", 0.10)?
            .set_default("risk.stop_loss_pct", 0.05)?
            .set_default("risk.trailing_stop_pct", 0.03)?
            .set_default("risk.max_hold_days", 7)?
            .set_default("risk.breakeven_epsilon", 0.002)?
            .set_default("risk.max_capital_fraction_per_trade", 0.10)?
            .set_default("risk.max_positions_per_category", 2)?
            .set_default("risk.daily_loss_halt_pct", 0.05)?
            // Live defaults
            .set_default("live.quote_url", "http://localhost:9301/quotes")?
            .set_default("live.price_refresh_secs", 15)?
            .set_default("live.request_timeout_ms", 5_000)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.csv_enabled", true)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (EDGEBOT_*)
            .add_source(Environment::with_prefix("EDGEBOT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Validate cross-field constraints. Fatal before any event is processed.
    pub fn validate(&self) -> Result<()> {
        fn fail(msg: impl Into<String>) -> Result<()> {
            Err(BotError::Configuration(msg.into()).into())
        }

        if !(0.0 < self.combiner.min_probability
            && self.combiner.min_probability < self.combiner.max_probability
            && self.combiner.max_probability < 1.0)
        {
            return fail("combiner probability clamp must satisfy 0 < min < max < 1");
        }
        for (name, v) in [
            ("strategy.min_confidence_live", self.strategy.min_confidence_live),
            (
                "strategy.min_confidence_backtest",
                self.strategy.min_confidence_backtest,
            ),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return fail(format!("{} must be within [0, 1], got {}", name, v));
            }
        }
        if self.risk.take_profit_pct <= 0.0
            || self.risk.stop_loss_pct <= 0.0
            || self.risk.trailing_stop_pct <= 0.0
        {
            return fail("risk exit thresholds must be positive");
        }
        if self.risk.max_hold_days <= 0 {
            return fail("risk.max_hold_days must be positive");
        }
        if !(0.0 < self.risk.max_capital_fraction_per_trade
            && self.risk.max_capital_fraction_per_trade <= 1.0)
        {
            return fail("risk.max_capital_fraction_per_trade must be in (0, 1]");
        }
        if self.risk.daily_loss_halt_pct <= 0.0 {
            return fail("risk.daily_loss_halt_pct must be positive");
        }
        if self.filters.max_age_secs <= 0 || self.filters.freshness_half_life_secs <= 0 {
            return fail("filter age settings must be positive");
        }
        if self.filters.trading_window_start_hour >= 24
            || self.filters.trading_window_end_hour > 24
            || self.filters.trading_window_start_hour >= self.filters.trading_window_end_hour
        {
            return fail("trading window hours must satisfy start < end <= 24");
        }
        if self.ingest.fetch_timeout_ms >= self.ingest.poll_interval_secs * 1000 {
            return fail("ingest.fetch_timeout_ms must be below the poll interval");
        }
        if self.live.request_timeout_ms >= self.live.price_refresh_secs * 1000 {
            return fail("live.request_timeout_ms must be below the price refresh interval");
        }
        if self.signals.min_price_history == 0 {
            return fail("signals.min_price_history must be positive");
        }
        Ok(())
    }

    /// Generate a digest of the config for startup logging
    pub fn digest(&self) -> String {
        format!(
            "bot={} dry_run={} poll={}s min_conf_live={:.2} min_conf_bt={:.2} clamp=({:.2},{:.2})",
            self.bot.tag,
            self.bot.dry_run,
            self.ingest.poll_interval_secs,
            self.strategy.min_confidence_live,
            self.strategy.min_confidence_backtest,
            self.combiner.min_probability,
            self.combiner.max_probability
        )
    }
}

/// Programmatic defaults, matching the loader's `set_default` values.
/// Used by backtests and tests that never touch files or environment.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bot: BotConfig {
                tag: env!("CARGO_PKG_VERSION").to_string(),
                dry_run: true,
            },
            ingest: IngestConfig {
                source_url: "http://localhost:9300/disclosures".into(),
                poll_interval_secs: 30,
                fetch_timeout_ms: 10_000,
                max_retries: 2,
                seen_window: 10_000,
            },
            filters: FiltersConfig {
                max_age_secs: 1800,
                freshness_half_life_secs: 600,
                low_importance_categories: vec!["dividend".into(), "executive_change".into()],
                high_impact_keywords: vec![
                    "merger".into(),
                    "acquisition".into(),
                    "bankruptcy".into(),
                    "halt".into(),
                    "record".into(),
                ],
                trading_window_start_hour: 9,
                trading_window_end_hour: 15,
                time_of_day_boost: 1.1,
                neutral_band: 0.05,
            },
            signals: SignalsConfig {
                min_price_history: 30,
                oscillator_period: 14,
                fast_ma_period: 5,
                slow_ma_period: 20,
                volatility_window: 20,
            },
            combiner: CombinerConfig {
                min_probability: 0.01,
                max_probability: 0.99,
                epsilon: 1e-6,
                contrarian_extreme_threshold: 0.40,
                contrarian_damping: 0.9,
                technical_factor_scale: 0.8,
            },
            strategy: StrategyConfig {
                min_confidence_live: 0.60,
                min_confidence_backtest: 0.60,
            },
            risk: RiskConfig {
                take_profit_pct: 0.10,
                stop_loss_pct: 0.05,
                trailing_stop_pct: 0.03,
                max_hold_days: 7,
                breakeven_epsilon: 0.002,
                max_capital_fraction_per_trade: 0.10,
                max_positions_per_category: 2,
                daily_loss_halt_pct: 0.05,
            },
            live: LiveConfig {
                quote_url: "http://localhost:9301/quotes".into(),
                price_refresh_secs: 15,
                request_timeout_ms: 5_000,
            },
            persistence: PersistenceConfig {
                data_dir: "./data".into(),
                csv_enabled: true,
            },
        }
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
