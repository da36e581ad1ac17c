//! Trading intents and their deterministic identifiers.
//!
//! Re-deriving the same decision (same stream, direction and prices) always
//! yields the same [`IntentId`], which is what makes order submission
//! idempotent across retries and restarts.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::{IntentId, StreamKey};
use super::instrument::InstrumentSpec;
use super::range::RangeWindow;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }

    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// +1 for long, -1 for short.
    #[must_use]
    pub fn sign(self) -> Decimal {
        match self {
            Self::Long => Decimal::ONE,
            Self::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of an order within one intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Entry,
    Stop,
    Target,
}

impl OrderKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Stop => "stop",
            Self::Target => "target",
        }
    }

    #[must_use]
    pub const fn is_protective(self) -> bool {
        matches!(self, Self::Stop | Self::Target)
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the entry order rests at the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrderType {
    /// Stop-market at the breakout level, waiting for price to break out.
    StopMarket,
    /// Marketable limit used when price is already through the level at lock.
    Limit,
}

/// Why the intent was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    BreakoutStop,
    ImmediateAtLock,
}

/// Long and short breakout levels derived from a locked range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakoutLevels {
    pub long: Decimal,
    pub short: Decimal,
}

impl BreakoutLevels {
    /// One tick beyond each range extreme, rounded to the instrument tick.
    #[must_use]
    pub fn from_range(range: &RangeWindow, spec: &InstrumentSpec) -> Self {
        Self {
            long: spec.round(range.range_high + spec.tick_size()),
            short: spec.round(range.range_low - spec.tick_size()),
        }
    }

    #[must_use]
    pub const fn level(&self, direction: Direction) -> Decimal {
        match direction {
            Direction::Long => self.long,
            Direction::Short => self.short,
        }
    }

    /// Direction whose level the freeze close already sits at or through.
    #[must_use]
    pub fn crossed_at_lock(&self, freeze_close: Decimal) -> Option<Direction> {
        if freeze_close >= self.long {
            Some(Direction::Long)
        } else if freeze_close <= self.short {
            Some(Direction::Short)
        } else {
            None
        }
    }
}

/// A trading decision, before or at the point of submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub id: IntentId,
    pub stream: StreamKey,
    pub direction: Direction,
    pub entry_type: EntryOrderType,
    pub entry_price: Decimal,
    pub stop_price: Decimal,
    pub target_price: Decimal,
    pub breakout_level: Decimal,
    /// Nominal trigger computed from the entry price; the live trigger is
    /// recomputed from the actual fill price.
    pub break_even_trigger_price: Decimal,
    pub break_even_stop_price: Decimal,
    pub quantity: u32,
    pub trigger_reason: TriggerReason,
}

/// Inputs for [`Intent::derive`].
#[derive(Debug, Clone, Copy)]
pub struct IntentParams<'a> {
    pub stream: &'a StreamKey,
    pub direction: Direction,
    pub entry_type: EntryOrderType,
    pub entry_price: Decimal,
    pub range: &'a RangeWindow,
    pub levels: BreakoutLevels,
    pub spec: &'a InstrumentSpec,
    pub quantity: u32,
    pub break_even_fraction: Decimal,
    pub trigger_reason: TriggerReason,
}

impl Intent {
    /// Derive a fully priced intent.
    ///
    /// Stop distance is the range size capped by the instrument's maximum
    /// stop (never less than one tick); target distance is the instrument's
    /// target points.
    #[must_use]
    pub fn derive(params: IntentParams<'_>) -> Self {
        let spec = params.spec;
        let sign = params.direction.sign();
        let entry = spec.round(params.entry_price);

        let mut stop_distance = params.range.size();
        if spec.max_stop_points() > Decimal::ZERO {
            stop_distance = stop_distance.min(spec.max_stop_points());
        }
        stop_distance = stop_distance.max(spec.tick_size());

        let stop_price = spec.round(entry - sign * stop_distance);
        let target_price = spec.round(entry + sign * spec.target_points());
        let breakout_level = params.levels.level(params.direction);
        let break_even_stop_price = spec.round(breakout_level - sign * spec.tick_size());

        let id = Self::compute_id(
            params.stream,
            params.direction,
            params.entry_type,
            entry,
            stop_price,
            target_price,
        );

        Self {
            id,
            stream: params.stream.clone(),
            direction: params.direction,
            entry_type: params.entry_type,
            entry_price: entry,
            stop_price,
            target_price,
            breakout_level,
            break_even_trigger_price: break_even_trigger(
                params.direction,
                entry,
                spec.target_points(),
                params.break_even_fraction,
            ),
            break_even_stop_price,
            quantity: params.quantity,
            trigger_reason: params.trigger_reason,
        }
    }

    /// Deterministic identifier: BLAKE3 over the canonical decision string.
    #[must_use]
    pub fn compute_id(
        stream: &StreamKey,
        direction: Direction,
        entry_type: EntryOrderType,
        entry_price: Decimal,
        stop_price: Decimal,
        target_price: Decimal,
    ) -> IntentId {
        let entry_type = match entry_type {
            EntryOrderType::StopMarket => "stop_market",
            EntryOrderType::Limit => "limit",
        };
        let canonical = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            stream.trading_date,
            stream.stream,
            stream.instrument,
            stream.session,
            stream.slot_time.format("%H:%M:%S"),
            direction.as_str(),
            entry_type,
            entry_price.normalize(),
            stop_price.normalize(),
            target_price.normalize(),
        );
        let hash = blake3::hash(canonical.as_bytes());
        let hex = hash.to_hex();
        IntentId::new(&hex.as_str()[..32])
    }

    /// Target distance in points.
    #[must_use]
    pub fn target_distance(&self) -> Decimal {
        (self.target_price - self.entry_price).abs()
    }

    /// Break-even trigger measured from the actual average fill price.
    #[must_use]
    pub fn break_even_trigger_for_fill(&self, fill_price: Decimal, fraction: Decimal) -> Decimal {
        break_even_trigger(self.direction, fill_price, self.target_distance(), fraction)
    }
}

fn break_even_trigger(
    direction: Direction,
    reference: Decimal,
    target_distance: Decimal,
    fraction: Decimal,
) -> Decimal {
    reference + direction.sign() * target_distance * fraction
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bar::BarSource;
    use crate::domain::id::Instrument;
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn key() -> StreamKey {
        StreamKey::new(
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            "ES1",
            Instrument::from("ES"),
            "S1",
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        )
    }

    fn range() -> RangeWindow {
        RangeWindow {
            range_start: Utc.with_ymd_and_hms(2025, 3, 10, 13, 0, 0).unwrap(),
            slot_time: Utc.with_ymd_and_hms(2025, 3, 10, 14, 0, 0).unwrap(),
            range_high: dec!(100.00),
            range_low: dec!(99.00),
            freeze_close: dec!(99.50),
            freeze_close_source: BarSource::Live,
            bars_used: 60,
        }
    }

    fn spec() -> InstrumentSpec {
        InstrumentSpec::try_new("ES", dec!(0.25), dec!(4), dec!(12)).unwrap()
    }

    fn long_intent(entry: Decimal) -> Intent {
        let spec = spec();
        let range = range();
        let stream = key();
        Intent::derive(IntentParams {
            stream: &stream,
            direction: Direction::Long,
            entry_type: EntryOrderType::StopMarket,
            entry_price: entry,
            range: &range,
            levels: BreakoutLevels::from_range(&range, &spec),
            spec: &spec,
            quantity: 1,
            break_even_fraction: dec!(0.65),
            trigger_reason: TriggerReason::BreakoutStop,
        })
    }

    #[test]
    fn breakout_levels_are_one_tick_outside_range() {
        let levels = BreakoutLevels::from_range(&range(), &spec());
        assert_eq!(levels.long, dec!(100.25));
        assert_eq!(levels.short, dec!(98.75));
    }

    #[test]
    fn crossed_at_lock_detects_either_side() {
        let levels = BreakoutLevels {
            long: dec!(100.25),
            short: dec!(98.75),
        };
        assert_eq!(levels.crossed_at_lock(dec!(100.25)), Some(Direction::Long));
        assert_eq!(levels.crossed_at_lock(dec!(98.5)), Some(Direction::Short));
        assert_eq!(levels.crossed_at_lock(dec!(99.5)), None);
    }

    #[test]
    fn same_decision_yields_same_id() {
        assert_eq!(long_intent(dec!(100.25)).id, long_intent(dec!(100.250)).id);
        assert_ne!(long_intent(dec!(100.25)).id, long_intent(dec!(100.50)).id);
        assert_eq!(long_intent(dec!(100.25)).id.as_str().len(), 32);
    }

    #[test]
    fn prices_follow_range_and_target() {
        let intent = long_intent(dec!(100.25));
        assert_eq!(intent.stop_price, dec!(99.25));
        assert_eq!(intent.target_price, dec!(104.25));
        assert_eq!(intent.break_even_stop_price, dec!(100.00));
    }

    #[test]
    fn break_even_trigger_uses_fill_price() {
        let intent = long_intent(dec!(100.25));
        assert_eq!(
            intent.break_even_trigger_for_fill(dec!(100.30), dec!(0.65)),
            dec!(102.90)
        );
    }
}
