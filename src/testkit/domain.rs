//! Builders for domain primitives used across tests.
//!
//! Provides concise factory functions for [`InstrumentSpec`], [`StreamConfig`],
//! [`Bar`] and [`StreamSettings`] so tests focus on assertions rather than
//! construction boilerplate.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::application::{Backoff, RetryPolicy, StreamConfig, StreamSettings};
use crate::domain::{Bar, BarSource, Instrument, InstrumentRegistry, InstrumentSpec, StreamKey};

/// 2025-03-10, a Monday.
pub fn trading_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 10).expect("valid date")
}

/// Instant on the test trading date.
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    at_secs(hour, minute, 0)
}

pub fn at_secs(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    let naive = trading_date()
        .and_hms_opt(hour, minute, second)
        .expect("valid time");
    Utc.from_utc_datetime(&naive)
}

pub fn time(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
}

/// ES: tick 0.25, target 4 points, stop capped at 12 points.
pub fn es_spec() -> InstrumentSpec {
    InstrumentSpec::try_new("ES", dec!(0.25), dec!(4), dec!(12)).expect("valid spec")
}

/// Registry holding ES, reachable as `MES` too.
pub fn registry() -> InstrumentRegistry {
    let mut registry = InstrumentRegistry::new();
    registry.register(es_spec(), &["MES".to_string()]);
    registry
}

pub fn stream_key(name: &str) -> StreamKey {
    StreamKey::new(trading_date(), name, Instrument::new("ES"), "S1", time(14, 0))
}

/// Enabled ES stream: range 13:00 to 14:00, market close 20:00.
pub fn stream_config(name: &str) -> StreamConfig {
    StreamConfig {
        key: stream_key(name),
        spec: es_spec(),
        enabled: true,
        is_trading_day: true,
        range_start: at(13, 0),
        slot_time: at(14, 0),
        market_close: at(20, 0),
    }
}

/// Live bar closing at `timestamp`.
pub fn bar(timestamp: DateTime<Utc>, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Bar {
    bar_from(BarSource::Live, timestamp, open, high, low, close)
}

pub fn bar_from(
    source: BarSource,
    timestamp: DateTime<Utc>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
) -> Bar {
    Bar::try_new(timestamp, open, high, low, close, dec!(100), source).expect("consistent bar")
}

/// Bar that never leaves `price`.
pub fn flat_bar(timestamp: DateTime<Utc>, price: Decimal) -> Bar {
    bar(timestamp, price, price, price, price)
}

/// One-minute bars closing at every minute from `from` through `to`.
///
/// Bars open and close at the midpoint of `high`/`low`. The second bar
/// prints `high`, the third prints `low`, the rest stay halfway inside.
pub fn range_bars(
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    high: Decimal,
    low: Decimal,
    source: BarSource,
) -> Vec<Bar> {
    let mid = (high + low) / dec!(2);
    let inner_high = mid + (high - mid) / dec!(2);
    let inner_low = mid - (mid - low) / dec!(2);
    let mut bars = Vec::new();
    let mut ts = from;
    let mut index = 0usize;
    while ts <= to {
        let bar_high = if index == 1 { high } else { inner_high };
        let bar_low = if index == 2 { low } else { inner_low };
        bars.push(bar_from(source, ts, mid, bar_high, bar_low, mid));
        ts += Duration::minutes(1);
        index += 1;
    }
    bars
}

/// The canonical 99.00 to 100.00 range over the whole window, freeze close
/// 99.50. Breakout levels are 100.25 long and 98.75 short.
pub fn canonical_range(source: BarSource) -> Vec<Bar> {
    range_bars(at(13, 0), at(14, 0), dec!(100.00), dec!(99.00), source)
}

/// Three attempts with no pause between them.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Backoff::Fixed { delay_ms: 0 })
}

/// Default settings with instant retries and a short call timeout.
pub fn settings() -> StreamSettings {
    StreamSettings {
        entry_retry: fast_retry(),
        protective_retry: fast_retry(),
        call_timeout: StdDuration::from_millis(200),
        ..StreamSettings::default()
    }
}
