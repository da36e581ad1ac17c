//! Application configuration loading and validation.
//!
//! Provides the main [`Config`] struct that aggregates all settings.
//! Configuration is loaded from a TOML file; `RANGELOCK_JOURNAL_DIR`
//! overrides the journal directory.
//!
//! # Example
//!
//! ```no_run
//! use rangelock::infrastructure::config::settings::Config;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.toml")?;
//!     config.init_logging();
//!     Ok(())
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveTime};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use super::logging::LoggingConfig;
use crate::application::{
    AlertQuota, Backoff, EngineOptions, RetryPolicy, SessionSchedule, StreamSettings,
};
use crate::domain::{parse_local_time, GapPolicy, InstrumentRegistry, InstrumentSpec, TimeService};
use crate::error::{ConfigError, Result};

/// Environment variable that overrides `engine.journal_dir`.
pub const JOURNAL_DIR_ENV: &str = "RANGELOCK_JOURNAL_DIR";

/// Clock, calendar and dispatcher settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// IANA timezone of the exchange session.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Local time at which the next trading date begins.
    #[serde(default = "default_roll_time")]
    pub roll_time: String,
    #[serde(default = "default_market_close")]
    pub market_close: String,
    #[serde(default = "default_journal_dir")]
    pub journal_dir: PathBuf,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_stall_secs")]
    pub stall_secs: u64,
    /// Bound on one historical bar request.
    #[serde(default = "default_hydration_timeout_secs")]
    pub hydration_timeout_secs: u64,
    /// How long PRE_HYDRATION may wait for bars before arming anyway.
    #[serde(default = "default_hydration_wait_secs")]
    pub hydration_wait_secs: u64,
    /// Delay after slot time before a tick locks the range without a
    /// post-slot bar.
    #[serde(default = "default_lock_grace_secs")]
    pub lock_grace_secs: u64,
    #[serde(default = "default_bar_interval_secs")]
    pub bar_interval_secs: u64,
}

fn default_timezone() -> String {
    "America/Chicago".to_string()
}

fn default_roll_time() -> String {
    "17:00".to_string()
}

fn default_market_close() -> String {
    "16:00".to_string()
}

fn default_journal_dir() -> PathBuf {
    PathBuf::from("journal")
}

const fn default_tick_interval_ms() -> u64 {
    1_000
}

const fn default_stall_secs() -> u64 {
    30
}

const fn default_hydration_timeout_secs() -> u64 {
    10
}

const fn default_hydration_wait_secs() -> u64 {
    30
}

const fn default_lock_grace_secs() -> u64 {
    5
}

const fn default_bar_interval_secs() -> u64 {
    60
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            roll_time: default_roll_time(),
            market_close: default_market_close(),
            journal_dir: default_journal_dir(),
            tick_interval_ms: default_tick_interval_ms(),
            stall_secs: default_stall_secs(),
            hydration_timeout_secs: default_hydration_timeout_secs(),
            hydration_wait_secs: default_hydration_wait_secs(),
            lock_grace_secs: default_lock_grace_secs(),
            bar_interval_secs: default_bar_interval_secs(),
        }
    }
}

/// Gap tolerance while building a range, in minutes.
#[derive(Debug, Clone, Deserialize)]
pub struct RangeConfig {
    #[serde(default = "default_max_single_gap")]
    pub max_single_gap_mins: i64,
    #[serde(default = "default_max_cumulative_gap")]
    pub max_cumulative_gap_mins: i64,
    #[serde(default = "default_max_recent_gap")]
    pub max_recent_gap_mins: i64,
    #[serde(default = "default_recent_window")]
    pub recent_window_mins: i64,
}

const fn default_max_single_gap() -> i64 {
    3
}

const fn default_max_cumulative_gap() -> i64 {
    10
}

const fn default_max_recent_gap() -> i64 {
    5
}

const fn default_recent_window() -> i64 {
    10
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            max_single_gap_mins: default_max_single_gap(),
            max_cumulative_gap_mins: default_max_cumulative_gap(),
            max_recent_gap_mins: default_max_recent_gap(),
            recent_window_mins: default_recent_window(),
        }
    }
}

/// Order sizing, retries and break-even.
#[derive(Debug, Clone, Deserialize)]
pub struct OrdersConfig {
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default = "default_entry_attempts")]
    pub entry_attempts: u32,
    #[serde(default = "default_protective_attempts")]
    pub protective_attempts: u32,
    #[serde(default)]
    pub backoff: Backoff,
    /// Upper bound on one adapter call.
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,
    /// Fraction of the target distance that promotes the stop to break-even.
    #[serde(default = "default_break_even_fraction")]
    pub break_even_fraction: Decimal,
}

const fn default_quantity() -> u32 {
    1
}

const fn default_entry_attempts() -> u32 {
    3
}

const fn default_protective_attempts() -> u32 {
    3
}

const fn default_submit_timeout_ms() -> u64 {
    5_000
}

fn default_break_even_fraction() -> Decimal {
    dec!(0.65)
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            quantity: default_quantity(),
            entry_attempts: default_entry_attempts(),
            protective_attempts: default_protective_attempts(),
            backoff: Backoff::default(),
            submit_timeout_ms: default_submit_timeout_ms(),
            break_even_fraction: default_break_even_fraction(),
        }
    }
}

/// Alert quota per (event kind, key).
#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_per_minute")]
    pub per_minute: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
    /// Log alerts through tracing in addition to persisting incidents.
    #[serde(default = "default_log_alerts")]
    pub log: bool,
}

const fn default_per_minute() -> u32 {
    6
}

const fn default_burst() -> u32 {
    3
}

const fn default_log_alerts() -> bool {
    true
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            per_minute: default_per_minute(),
            burst: default_burst(),
            log: default_log_alerts(),
        }
    }
}

/// One tradable instrument.
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentConfig {
    pub symbol: String,
    pub tick_size: Decimal,
    pub target_points: Decimal,
    /// Zero caps the stop at the range size only.
    #[serde(default)]
    pub max_stop_points: Decimal,
    /// Feed symbols that resolve to this instrument (e.g. micro contracts).
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// One named session and the local time its range starts.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub name: String,
    pub range_start: String,
}

/// Inputs for replay runs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplayConfig {
    pub bars: Option<PathBuf>,
    pub timetable: Option<PathBuf>,
    /// Largest quantity the paper venue fills per order per bar.
    pub max_fill_per_bar: Option<u32>,
}

/// Main application configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub range: RangeConfig,
    #[serde(default)]
    pub orders: OrdersConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub instruments: Vec<InstrumentConfig>,
    #[serde(default)]
    pub sessions: Vec<SessionConfig>,
    #[serde(default)]
    pub replay: ReplayConfig,
}

impl Config {
    /// Parse configuration from TOML content.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML content is malformed or validation fails.
    #[allow(clippy::result_large_err)]
    pub fn parse_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;

        if let Ok(dir) = std::env::var(JOURNAL_DIR_ENV) {
            if !dir.trim().is_empty() {
                config.engine.journal_dir = PathBuf::from(dir);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, the TOML content is
    /// malformed, or validation fails.
    #[allow(clippy::result_large_err)]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse_toml(&content)
    }

    #[allow(clippy::result_large_err)]
    fn validate(&self) -> Result<()> {
        self.time_service()?;
        local_time("market_close", &self.engine.market_close)?;

        if self.engine.tick_interval_ms == 0 {
            return Err(invalid("tick_interval_ms", "must be greater than 0"));
        }
        if self.engine.bar_interval_secs == 0 {
            return Err(invalid("bar_interval_secs", "must be greater than 0"));
        }
        if self.engine.stall_secs.saturating_mul(1_000) <= self.engine.tick_interval_ms {
            return Err(invalid("stall_secs", "must exceed the tick interval"));
        }

        let range = &self.range;
        if range.max_single_gap_mins <= 0
            || range.max_cumulative_gap_mins <= 0
            || range.max_recent_gap_mins <= 0
            || range.recent_window_mins <= 0
        {
            return Err(invalid("range", "gap thresholds must be greater than 0"));
        }
        if range.max_recent_gap_mins > range.recent_window_mins {
            return Err(invalid("max_recent_gap_mins", "must not exceed recent_window_mins"));
        }

        if self.orders.quantity == 0 {
            return Err(invalid("quantity", "must be greater than 0"));
        }
        if self.orders.entry_attempts == 0 || self.orders.protective_attempts == 0 {
            return Err(invalid("attempts", "must be greater than 0"));
        }
        if self.orders.submit_timeout_ms == 0 {
            return Err(invalid("submit_timeout_ms", "must be greater than 0"));
        }
        if self.orders.break_even_fraction <= Decimal::ZERO
            || self.orders.break_even_fraction >= Decimal::ONE
        {
            return Err(invalid("break_even_fraction", "must be between 0 and 1 exclusive"));
        }

        if self.alerts.per_minute == 0 || self.alerts.burst == 0 {
            return Err(invalid("alerts", "quota must be greater than 0"));
        }

        if self.instruments.is_empty() {
            return Err(ConfigError::MissingField { field: "instruments" }.into());
        }
        self.registry()?;

        if self.sessions.is_empty() {
            return Err(ConfigError::MissingField { field: "sessions" }.into());
        }
        self.schedule()?;

        Ok(())
    }

    /// Calendar and timezone service.
    #[allow(clippy::result_large_err)]
    pub fn time_service(&self) -> Result<TimeService> {
        let roll_time = local_time("roll_time", &self.engine.roll_time)?;
        TimeService::new(&self.engine.timezone, roll_time).map_err(|e| invalid("timezone", e))
    }

    /// Instrument registry with aliases.
    #[allow(clippy::result_large_err)]
    pub fn registry(&self) -> Result<InstrumentRegistry> {
        let mut registry = InstrumentRegistry::new();
        for instrument in &self.instruments {
            let spec = InstrumentSpec::try_new(
                &instrument.symbol,
                instrument.tick_size,
                instrument.target_points,
                instrument.max_stop_points,
            )
            .map_err(|e| invalid("instruments", e))?;
            if registry.spec(spec.instrument()).is_some() {
                return Err(invalid(
                    "instruments",
                    format!("duplicate instrument {}", instrument.symbol),
                ));
            }
            registry.register(spec, &instrument.aliases);
        }
        Ok(registry)
    }

    /// Session range starts plus market close.
    #[allow(clippy::result_large_err)]
    pub fn schedule(&self) -> Result<SessionSchedule> {
        let market_close = local_time("market_close", &self.engine.market_close)?;
        let mut schedule = SessionSchedule::new(market_close);
        for session in &self.sessions {
            if schedule.range_start(&session.name).is_some() {
                return Err(invalid("sessions", format!("duplicate session {}", session.name)));
            }
            let start = local_time("range_start", &session.range_start)?;
            schedule = schedule.with_session(session.name.clone(), start);
        }
        Ok(schedule)
    }

    /// Gap tolerance rules.
    #[must_use]
    pub fn gap_policy(&self) -> GapPolicy {
        let bar_interval = i64::try_from(self.engine.bar_interval_secs).unwrap_or(i64::MAX);
        GapPolicy {
            bar_interval: Duration::seconds(bar_interval),
            max_single_gap: Duration::minutes(self.range.max_single_gap_mins),
            max_cumulative_gap: Duration::minutes(self.range.max_cumulative_gap_mins),
            max_recent_gap: Duration::minutes(self.range.max_recent_gap_mins),
            recent_window: Duration::minutes(self.range.recent_window_mins),
        }
    }

    /// Knobs shared by every stream.
    #[must_use]
    pub fn stream_settings(&self) -> StreamSettings {
        let secs = |value: u64| Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX));
        StreamSettings {
            gap_policy: self.gap_policy(),
            hydration_timeout: secs(self.engine.hydration_wait_secs),
            lock_grace: secs(self.engine.lock_grace_secs),
            quantity: self.orders.quantity,
            break_even_fraction: self.orders.break_even_fraction,
            entry_retry: RetryPolicy::new(self.orders.entry_attempts, self.orders.backoff),
            protective_retry: RetryPolicy::new(self.orders.protective_attempts, self.orders.backoff),
            call_timeout: StdDuration::from_millis(self.orders.submit_timeout_ms),
            simulated: false,
        }
    }

    /// Dispatcher timing.
    #[must_use]
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            tick_interval: StdDuration::from_millis(self.engine.tick_interval_ms),
            stall_threshold: StdDuration::from_secs(self.engine.stall_secs),
            hydration_timeout: StdDuration::from_secs(self.engine.hydration_timeout_secs),
        }
    }

    #[must_use]
    pub fn alert_quota(&self) -> AlertQuota {
        AlertQuota {
            per_minute: self.alerts.per_minute,
            burst: self.alerts.burst,
        }
    }

    /// Initialize logging with the configured settings.
    pub fn init_logging(&self) {
        self.logging.init();
    }
}

fn invalid(field: &'static str, reason: impl ToString) -> crate::error::Error {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
    .into()
}

#[allow(clippy::result_large_err)]
fn local_time(field: &'static str, value: &str) -> Result<NaiveTime> {
    parse_local_time(value).map_err(|e| invalid(field, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Instrument;

    const MINIMAL: &str = r#"
        [[instruments]]
        symbol = "ES"
        tick_size = "0.25"
        target_points = "4"
        max_stop_points = "3"
        aliases = ["MES"]

        [[sessions]]
        name = "S1"
        range_start = "08:00"
    "#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = Config::parse_toml(MINIMAL).unwrap();
        assert_eq!(config.engine.timezone, "America/Chicago");
        assert_eq!(config.orders.quantity, 1);
        assert_eq!(config.logging.level, "info");

        let registry = config.registry().unwrap();
        assert_eq!(registry.canonicalize("MES"), Instrument::new("ES"));
        let schedule = config.schedule().unwrap();
        assert_eq!(
            schedule.range_start("S1"),
            NaiveTime::from_hms_opt(8, 0, 0)
        );

        let settings = config.stream_settings();
        assert_eq!(settings.gap_policy.max_single_gap, Duration::minutes(3));
        assert_eq!(settings.call_timeout, StdDuration::from_secs(5));
    }

    #[test]
    fn missing_instruments_is_reported() {
        let toml = r#"
            [[sessions]]
            name = "S1"
            range_start = "08:00"
        "#;
        let err = Config::parse_toml(toml).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Config(ConfigError::MissingField { field: "instruments" })
        ));
    }

    #[test]
    fn bad_values_are_rejected() {
        let cases = [
            "[engine]\ntimezone = \"Mars/Olympus\"\n",
            "[engine]\nmarket_close = \"25:00\"\n",
            "[orders]\nbreak_even_fraction = \"1.5\"\n",
            "[orders]\nquantity = 0\n",
            "[range]\nmax_recent_gap_mins = 20\n",
        ];
        for case in cases {
            let toml = format!("{case}\n{MINIMAL}");
            assert!(
                matches!(
                    Config::parse_toml(&toml),
                    Err(crate::error::Error::Config(ConfigError::InvalidValue { .. }))
                ),
                "expected rejection for {case}"
            );
        }
    }

    #[test]
    fn duplicate_sessions_are_rejected() {
        let toml = format!("{MINIMAL}\n[[sessions]]\nname = \"S1\"\nrange_start = \"09:00\"\n");
        assert!(Config::parse_toml(&toml).is_err());
    }
}
