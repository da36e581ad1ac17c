//! Trading-day transitions and the session schedule.

use std::collections::HashMap;
use std::fmt;

use chrono::{NaiveDate, NaiveTime};

/// How the engine moves onto a trading date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayTransition {
    /// First date seen by this process. Nothing is dropped.
    Initialize(NaiveDate),
    /// The trading date changed; the previous day's streams are dropped.
    Rollover { previous: NaiveDate, new: NaiveDate },
}

impl DayTransition {
    /// Transition implied by observing `observed` while on `current`.
    #[must_use]
    pub fn detect(current: Option<NaiveDate>, observed: NaiveDate) -> Option<Self> {
        match current {
            None => Some(Self::Initialize(observed)),
            Some(previous) if previous != observed => Some(Self::Rollover {
                previous,
                new: observed,
            }),
            Some(_) => None,
        }
    }

    /// Date the engine is on after the transition.
    #[must_use]
    pub const fn date(&self) -> NaiveDate {
        match self {
            Self::Initialize(date) | Self::Rollover { new: date, .. } => *date,
        }
    }

    #[must_use]
    pub const fn is_rollover(&self) -> bool {
        matches!(self, Self::Rollover { .. })
    }
}

impl fmt::Display for DayTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialize(date) => write!(f, "initialize {date}"),
            Self::Rollover { previous, new } => write!(f, "rollover {previous} -> {new}"),
        }
    }
}

/// Local range-start time per session plus the market close.
#[derive(Debug, Clone)]
pub struct SessionSchedule {
    range_starts: HashMap<String, NaiveTime>,
    market_close: NaiveTime,
}

impl SessionSchedule {
    #[must_use]
    pub fn new(market_close: NaiveTime) -> Self {
        Self {
            range_starts: HashMap::new(),
            market_close,
        }
    }

    #[must_use]
    pub fn with_session(mut self, name: impl Into<String>, range_start: NaiveTime) -> Self {
        self.range_starts.insert(name.into(), range_start);
        self
    }

    #[must_use]
    pub fn range_start(&self, session: &str) -> Option<NaiveTime> {
        self.range_starts.get(session).copied()
    }

    #[must_use]
    pub const fn market_close(&self) -> NaiveTime {
        self.market_close
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.range_starts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.range_starts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    #[test]
    fn first_observation_initializes() {
        assert_eq!(
            DayTransition::detect(None, date(10)),
            Some(DayTransition::Initialize(date(10)))
        );
    }

    #[test]
    fn same_date_is_no_transition() {
        assert_eq!(DayTransition::detect(Some(date(10)), date(10)), None);
    }

    #[test]
    fn new_date_rolls_over() {
        let transition = DayTransition::detect(Some(date(10)), date(11)).unwrap();
        assert!(transition.is_rollover());
        assert_eq!(transition.date(), date(11));
        assert_eq!(transition.to_string(), "rollover 2025-03-10 -> 2025-03-11");
    }

    #[test]
    fn schedule_lookup() {
        let schedule = SessionSchedule::new(NaiveTime::from_hms_opt(16, 0, 0).unwrap())
            .with_session("S1", NaiveTime::from_hms_opt(2, 0, 0).unwrap());
        assert_eq!(schedule.range_start("S1"), NaiveTime::from_hms_opt(2, 0, 0));
        assert_eq!(schedule.range_start("S2"), None);
        assert_eq!(schedule.len(), 1);
    }
}
