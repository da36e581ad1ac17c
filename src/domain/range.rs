//! Range window computation and gap tolerance.
//!
//! A range is the high/low band of the bars whose timestamps fall inside
//! `[range_start, slot_time]`. The slot boundary is inclusive: a bar closing
//! exactly at slot time belongs to the range.
//!
//! [`RangeBuffer`] maintains the band incrementally while bars arrive;
//! [`RangeComputer::compute`] is the single-pass batch equivalent used at
//! lock time. Both must agree for the same bar set.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::bar::{Bar, BarSource};

/// Frozen range values. Immutable once a stream reaches `RANGE_LOCKED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeWindow {
    pub range_start: DateTime<Utc>,
    pub slot_time: DateTime<Utc>,
    pub range_high: Decimal,
    pub range_low: Decimal,
    pub freeze_close: Decimal,
    pub freeze_close_source: BarSource,
    pub bars_used: usize,
}

impl RangeWindow {
    #[must_use]
    pub fn size(&self) -> Decimal {
        self.range_high - self.range_low
    }
}

/// Thresholds for missing data inside the range window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapPolicy {
    /// Expected spacing between consecutive bars.
    pub bar_interval: Duration,
    pub max_single_gap: Duration,
    pub max_cumulative_gap: Duration,
    /// Limit on gap time inside the trailing `recent_window`.
    pub max_recent_gap: Duration,
    pub recent_window: Duration,
}

impl Default for GapPolicy {
    fn default() -> Self {
        Self {
            bar_interval: Duration::minutes(1),
            max_single_gap: Duration::minutes(3),
            max_cumulative_gap: Duration::minutes(10),
            max_recent_gap: Duration::minutes(5),
            recent_window: Duration::minutes(10),
        }
    }
}

/// Measured gap time for a bar sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapStats {
    pub largest: Duration,
    pub cumulative: Duration,
    pub recent: Duration,
}

impl Default for GapStats {
    fn default() -> Self {
        Self {
            largest: Duration::zero(),
            cumulative: Duration::zero(),
            recent: Duration::zero(),
        }
    }
}

/// Which gap limit was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum GapViolation {
    SingleGap { gap_secs: i64, limit_secs: i64 },
    CumulativeGap { gap_secs: i64, limit_secs: i64 },
    RecentGap { gap_secs: i64, limit_secs: i64 },
}

impl fmt::Display for GapViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleGap { gap_secs, limit_secs } => {
                write!(f, "single gap {gap_secs}s exceeds {limit_secs}s")
            }
            Self::CumulativeGap { gap_secs, limit_secs } => {
                write!(f, "cumulative gap {gap_secs}s exceeds {limit_secs}s")
            }
            Self::RecentGap { gap_secs, limit_secs } => {
                write!(f, "trailing-window gap {gap_secs}s exceeds {limit_secs}s")
            }
        }
    }
}

impl GapPolicy {
    /// First exceeded threshold, if any. Limits are inclusive.
    #[must_use]
    pub fn check(&self, stats: &GapStats) -> Option<GapViolation> {
        if stats.largest > self.max_single_gap {
            return Some(GapViolation::SingleGap {
                gap_secs: stats.largest.num_seconds(),
                limit_secs: self.max_single_gap.num_seconds(),
            });
        }
        if stats.cumulative > self.max_cumulative_gap {
            return Some(GapViolation::CumulativeGap {
                gap_secs: stats.cumulative.num_seconds(),
                limit_secs: self.max_cumulative_gap.num_seconds(),
            });
        }
        if stats.recent > self.max_recent_gap {
            return Some(GapViolation::RecentGap {
                gap_secs: stats.recent.num_seconds(),
                limit_secs: self.max_recent_gap.num_seconds(),
            });
        }
        None
    }
}

/// Stateless range and gap calculations.
pub struct RangeComputer;

impl RangeComputer {
    /// Whether a bar timestamp belongs to the window (slot inclusive).
    #[must_use]
    pub fn admits(range_start: DateTime<Utc>, slot_time: DateTime<Utc>, ts: DateTime<Utc>) -> bool {
        range_start <= ts && ts <= slot_time
    }

    /// Single retrospective pass over `bars`.
    ///
    /// Bars outside the window are ignored. The freeze close is the close of
    /// the latest admitted bar. Returns `None` when no bar is admitted.
    pub fn compute<'a>(
        bars: impl IntoIterator<Item = &'a Bar>,
        range_start: DateTime<Utc>,
        slot_time: DateTime<Utc>,
    ) -> Option<RangeWindow> {
        let mut high: Option<Decimal> = None;
        let mut low: Option<Decimal> = None;
        let mut last: Option<&Bar> = None;
        let mut count = 0usize;

        for bar in bars {
            if !Self::admits(range_start, slot_time, bar.timestamp) {
                continue;
            }
            count += 1;
            high = Some(high.map_or(bar.high, |h| h.max(bar.high)));
            low = Some(low.map_or(bar.low, |l| l.min(bar.low)));
            if last.map_or(true, |l| bar.timestamp >= l.timestamp) {
                last = Some(bar);
            }
        }

        let last = last?;
        Some(RangeWindow {
            range_start,
            slot_time,
            range_high: high?,
            range_low: low?,
            freeze_close: last.close,
            freeze_close_source: last.source,
            bars_used: count,
        })
    }

    /// Gap statistics over ascending timestamps.
    #[must_use]
    pub fn gap_stats(timestamps: &[DateTime<Utc>], policy: &GapPolicy) -> GapStats {
        let mut stats = GapStats::default();
        let Some(newest) = timestamps.last().copied() else {
            return stats;
        };
        let recent_start = newest - policy.recent_window;

        for pair in timestamps.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let gap = (b - a) - policy.bar_interval;
            if gap <= Duration::zero() {
                continue;
            }
            stats.largest = stats.largest.max(gap);
            stats.cumulative = stats.cumulative + gap;

            // Missing span is (a + interval, b); count the part inside the trailing window.
            let missing_start = (a + policy.bar_interval).max(recent_start);
            let missing_end = b.min(newest);
            if missing_end > missing_start {
                stats.recent = stats.recent + (missing_end - missing_start);
            }
        }
        stats
    }
}

/// What happened to a bar offered to a [`RangeBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A higher-precedence source replaced an existing bar.
    Replaced,
    /// Same timestamp already held by an equal or higher precedence source.
    Duplicate,
    OutsideWindow,
}

/// Ordered, deduplicated bars for one range window with an incrementally
/// maintained high/low.
#[derive(Debug, Clone)]
pub struct RangeBuffer {
    range_start: DateTime<Utc>,
    slot_time: DateTime<Utc>,
    bars: BTreeMap<DateTime<Utc>, Bar>,
    high: Option<Decimal>,
    low: Option<Decimal>,
}

impl RangeBuffer {
    #[must_use]
    pub fn new(range_start: DateTime<Utc>, slot_time: DateTime<Utc>) -> Self {
        Self {
            range_start,
            slot_time,
            bars: BTreeMap::new(),
            high: None,
            low: None,
        }
    }

    pub fn insert(&mut self, bar: Bar) -> InsertOutcome {
        if !RangeComputer::admits(self.range_start, self.slot_time, bar.timestamp) {
            return InsertOutcome::OutsideWindow;
        }

        match self.bars.get(&bar.timestamp) {
            Some(existing) if !bar.supersedes(existing) => InsertOutcome::Duplicate,
            Some(_) => {
                self.bars.insert(bar.timestamp, bar);
                // A replaced bar may have carried the extreme; recompute.
                self.recompute_extremes();
                InsertOutcome::Replaced
            }
            None => {
                self.high = Some(self.high.map_or(bar.high, |h| h.max(bar.high)));
                self.low = Some(self.low.map_or(bar.low, |l| l.min(bar.low)));
                self.bars.insert(bar.timestamp, bar);
                InsertOutcome::Inserted
            }
        }
    }

    fn recompute_extremes(&mut self) {
        self.high = self.bars.values().map(|b| b.high).max();
        self.low = self.bars.values().map(|b| b.low).min();
    }

    #[must_use]
    pub const fn high(&self) -> Option<Decimal> {
        self.high
    }

    #[must_use]
    pub const fn low(&self) -> Option<Decimal> {
        self.low
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> impl Iterator<Item = &Bar> {
        self.bars.values()
    }

    #[must_use]
    pub fn gap_stats(&self, policy: &GapPolicy) -> GapStats {
        let timestamps: Vec<_> = self.bars.keys().copied().collect();
        RangeComputer::gap_stats(&timestamps, policy)
    }

    /// Gap statistics that also count the leading edge (range start to the
    /// first bar) and the trailing edge (last bar to slot time).
    #[must_use]
    pub fn gap_stats_with_edges(&self, policy: &GapPolicy) -> GapStats {
        let mut timestamps = Vec::with_capacity(self.bars.len() + 2);
        if self.bars.keys().next().is_some_and(|first| *first > self.range_start) {
            timestamps.push(self.range_start);
        }
        timestamps.extend(self.bars.keys().copied());
        if self.bars.keys().last().is_some_and(|last| *last < self.slot_time) {
            timestamps.push(self.slot_time);
        }
        RangeComputer::gap_stats(&timestamps, policy)
    }

    #[must_use]
    pub const fn range_start(&self) -> DateTime<Utc> {
        self.range_start
    }

    #[must_use]
    pub const fn slot_time(&self) -> DateTime<Utc> {
        self.slot_time
    }

    /// Batch computation over the buffered bars.
    #[must_use]
    pub fn compute(&self) -> Option<RangeWindow> {
        RangeComputer::compute(self.bars.values(), self.range_start, self.slot_time)
    }

    /// True when the buffer spans the whole window with no gap at all.
    #[must_use]
    pub fn covers_window(&self, policy: &GapPolicy) -> bool {
        let (Some(first), Some(last)) = (self.bars.keys().next(), self.bars.keys().last()) else {
            return false;
        };
        *first <= self.range_start + policy.bar_interval
            && *last >= self.slot_time
            && self.gap_stats(policy).largest == Duration::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, 0).unwrap()
    }

    fn bar(h: u32, m: u32, high: Decimal, low: Decimal, source: BarSource) -> Bar {
        Bar {
            timestamp: at(h, m),
            open: low,
            high,
            low,
            close: high,
            volume: dec!(1),
            source,
        }
    }

    #[test]
    fn slot_time_bar_is_admitted() {
        assert!(RangeComputer::admits(at(8, 0), at(9, 0), at(9, 0)));
        assert!(RangeComputer::admits(at(8, 0), at(9, 0), at(8, 0)));
        assert!(!RangeComputer::admits(at(8, 0), at(9, 0), at(9, 1)));
        assert!(!RangeComputer::admits(at(8, 0), at(9, 0), at(7, 59)));
    }

    #[test]
    fn incremental_matches_batch() {
        let mut buffer = RangeBuffer::new(at(8, 0), at(9, 0));
        let bars: Vec<Bar> = (0..60)
            .map(|m| {
                let wiggle = Decimal::from((m * 7) % 13);
                bar(8, m, dec!(100) + wiggle, dec!(95) + wiggle / dec!(2), BarSource::Live)
            })
            .collect();
        // Out-of-order delivery must not matter.
        for b in bars.iter().rev() {
            buffer.insert(b.clone());
        }
        let batch = RangeComputer::compute(bars.iter(), at(8, 0), at(9, 0)).unwrap();
        assert_eq!(buffer.high(), Some(batch.range_high));
        assert_eq!(buffer.low(), Some(batch.range_low));
        assert_eq!(buffer.compute().unwrap(), batch);
    }

    #[test]
    fn freeze_close_is_latest_admitted_bar() {
        let bars = vec![
            bar(8, 58, dec!(101), dec!(100), BarSource::Live),
            bar(9, 0, dec!(102), dec!(101), BarSource::Live),
            bar(9, 1, dec!(110), dec!(109), BarSource::Live),
        ];
        let window = RangeComputer::compute(bars.iter(), at(8, 0), at(9, 0)).unwrap();
        assert_eq!(window.freeze_close, dec!(102));
        assert_eq!(window.range_high, dec!(102));
        assert_eq!(window.bars_used, 2);
    }

    #[test]
    fn higher_precedence_replaces_and_recomputes() {
        let mut buffer = RangeBuffer::new(at(8, 0), at(9, 0));
        assert_eq!(
            buffer.insert(bar(8, 5, dec!(120), dec!(100), BarSource::FileReplay)),
            InsertOutcome::Inserted
        );
        assert_eq!(
            buffer.insert(bar(8, 5, dec!(105), dec!(100), BarSource::Live)),
            InsertOutcome::Replaced
        );
        assert_eq!(buffer.high(), Some(dec!(105)));
        assert_eq!(
            buffer.insert(bar(8, 5, dec!(130), dec!(90), BarSource::RequestedHistorical)),
            InsertOutcome::Duplicate
        );
        assert_eq!(buffer.high(), Some(dec!(105)));
    }

    #[test]
    fn equal_precedence_keeps_first_seen() {
        let mut buffer = RangeBuffer::new(at(8, 0), at(9, 0));
        buffer.insert(bar(8, 5, dec!(101), dec!(100), BarSource::Live));
        assert_eq!(
            buffer.insert(bar(8, 5, dec!(140), dec!(100), BarSource::Live)),
            InsertOutcome::Duplicate
        );
        assert_eq!(buffer.high(), Some(dec!(101)));
    }

    #[test]
    fn gap_stats_measure_missing_bars() {
        let policy = GapPolicy::default();
        // 08:00..=08:56 present, 08:57..08:59 missing, 09:00 present.
        let mut ts: Vec<_> = (0..=56).map(|m| at(8, m)).collect();
        ts.push(at(9, 0));
        let stats = RangeComputer::gap_stats(&ts, &policy);
        assert_eq!(stats.largest, Duration::minutes(3));
        assert_eq!(stats.cumulative, Duration::minutes(3));
        assert_eq!(stats.recent, Duration::minutes(3));
        assert_eq!(policy.check(&stats), None);
    }

    #[test]
    fn gap_policy_reports_first_violation() {
        let policy = GapPolicy {
            max_single_gap: Duration::minutes(2),
            ..GapPolicy::default()
        };
        let stats = GapStats {
            largest: Duration::minutes(3),
            cumulative: Duration::minutes(3),
            recent: Duration::minutes(3),
        };
        assert_eq!(
            policy.check(&stats),
            Some(GapViolation::SingleGap {
                gap_secs: 180,
                limit_secs: 120
            })
        );
    }

    #[test]
    fn recent_window_ignores_old_gaps() {
        let policy = GapPolicy::default();
        let mut ts = vec![at(8, 0), at(8, 6)];
        ts.extend((7..=40).map(|m| at(8, m)));
        let stats = RangeComputer::gap_stats(&ts, &policy);
        assert_eq!(stats.largest, Duration::minutes(5));
        assert_eq!(stats.recent, Duration::zero());
    }

    #[test]
    fn edge_gaps_count_only_when_asked() {
        let policy = GapPolicy::default();
        let mut buffer = RangeBuffer::new(at(8, 0), at(9, 0));
        for m in 0..=30 {
            buffer.insert(bar(8, m, dec!(101), dec!(100), BarSource::Live));
        }
        assert_eq!(buffer.gap_stats(&policy).largest, Duration::zero());
        // 08:30 -> 09:00 trailing edge: 29 minutes missing.
        let stats = buffer.gap_stats_with_edges(&policy);
        assert_eq!(stats.largest, Duration::minutes(29));
        assert!(policy.check(&stats).is_some());
    }

    #[test]
    fn covers_window_requires_full_gap_free_span() {
        let policy = GapPolicy::default();
        let mut buffer = RangeBuffer::new(at(8, 0), at(9, 0));
        for m in 0..60 {
            buffer.insert(bar(8, m, dec!(101), dec!(100), BarSource::Live));
        }
        assert!(!buffer.covers_window(&policy));
        buffer.insert(bar(9, 0, dec!(101), dec!(100), BarSource::Live));
        assert!(buffer.covers_window(&policy));
    }
}
