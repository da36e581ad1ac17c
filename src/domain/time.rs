//! Conversions between UTC and the exchange's local session timezone.
//!
//! All public APIs take and return `DateTime<Utc>`; the local timezone is
//! only used to interpret wall-clock session rules. Local times that fall in
//! a DST gap resolve to the first valid instant after the gap, ambiguous
//! local times (DST fall-back) resolve to the earlier instant.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use super::error::DomainError;

/// Resolves timestamps to trading dates and session instants.
#[derive(Debug, Clone, Copy)]
pub struct TimeService {
    tz: Tz,
    /// Local time at which the next trading date begins (e.g. 17:00 for CME).
    /// Midnight disables the overnight roll.
    roll_time: NaiveTime,
}

impl TimeService {
    /// Build a service for the named IANA timezone.
    pub fn new(timezone: &str, roll_time: NaiveTime) -> Result<Self, DomainError> {
        let tz: Tz = timezone
            .parse()
            .map_err(|_| DomainError::UnknownTimezone(timezone.to_string()))?;
        Ok(Self { tz, roll_time })
    }

    #[must_use]
    pub const fn timezone(&self) -> Tz {
        self.tz
    }

    #[must_use]
    pub fn to_local(&self, ts: DateTime<Utc>) -> DateTime<Tz> {
        ts.with_timezone(&self.tz)
    }

    /// Convert a local wall-clock time on `date` to UTC.
    #[must_use]
    pub fn to_utc(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let naive = date.and_time(time);
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(t) => t.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            LocalResult::None => {
                // Spring-forward gap: walk forward until the clock exists again.
                let mut candidate = naive;
                for _ in 0..16 {
                    candidate += Duration::minutes(15);
                    if let Some(t) = self.tz.from_local_datetime(&candidate).earliest() {
                        return t.with_timezone(&Utc);
                    }
                }
                Utc.from_utc_datetime(&naive)
            }
        }
    }

    /// Trading date a timestamp belongs to.
    ///
    /// Times at or after the roll time belong to the next calendar day, and
    /// weekend dates roll forward to Monday, so a Friday-evening or Sunday
    /// overnight bar lands on the following Monday session.
    #[must_use]
    pub fn trading_date(&self, ts: DateTime<Utc>) -> NaiveDate {
        let local = self.to_local(ts);
        let mut date = local.date_naive();
        if self.roll_time != NaiveTime::MIN && local.time() >= self.roll_time {
            date = date.succ_opt().unwrap_or(date);
        }
        next_weekday(date)
    }

    /// Whether `date` is a weekday session date.
    #[must_use]
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// UTC instant of a session wall-clock time for a trading date.
    ///
    /// Times at or after the roll time belong to the evening before the
    /// trading date (overnight sessions).
    #[must_use]
    pub fn session_instant(&self, trading_date: NaiveDate, local: NaiveTime) -> DateTime<Utc> {
        let calendar_date = if self.roll_time != NaiveTime::MIN && local >= self.roll_time {
            previous_calendar_day(trading_date)
        } else {
            trading_date
        };
        self.to_utc(calendar_date, local)
    }
}

fn next_weekday(mut date: NaiveDate) -> NaiveDate {
    while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }
    date
}

fn previous_calendar_day(date: NaiveDate) -> NaiveDate {
    // Monday's overnight session opens on Sunday evening.
    date.pred_opt().unwrap_or(date)
}

/// Parse an `HH:MM` (or `HH:MM:SS`) wall-clock string.
pub fn parse_local_time(value: &str) -> Result<NaiveTime, DomainError> {
    let trimmed = value.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|_| DomainError::InvalidLocalTime {
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TimeService {
        TimeService::new("America/Chicago", NaiveTime::from_hms_opt(17, 0, 0).unwrap()).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        assert!(matches!(
            TimeService::new("Mars/Olympus", NaiveTime::MIN),
            Err(DomainError::UnknownTimezone(_))
        ));
    }

    #[test]
    fn evening_bar_rolls_to_next_trading_date() {
        // 2025-03-11 23:30 UTC = 18:30 CDT on Tuesday
        let ts = Utc.with_ymd_and_hms(2025, 3, 11, 23, 30, 0).unwrap();
        assert_eq!(service().trading_date(ts), date(2025, 3, 12));
    }

    #[test]
    fn friday_evening_rolls_to_monday() {
        // 2025-03-14 22:30 UTC = 17:30 CDT Friday
        let ts = Utc.with_ymd_and_hms(2025, 3, 14, 22, 30, 0).unwrap();
        assert_eq!(service().trading_date(ts), date(2025, 3, 17));
    }

    #[test]
    fn morning_bar_stays_on_calendar_date() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 12, 14, 0, 0).unwrap();
        assert_eq!(service().trading_date(ts), date(2025, 3, 12));
    }

    #[test]
    fn session_instant_tracks_dst() {
        let svc = service();
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        // Before US DST (CST, UTC-6) and after (CDT, UTC-5).
        assert_eq!(
            svc.session_instant(date(2025, 3, 7), nine),
            Utc.with_ymd_and_hms(2025, 3, 7, 15, 0, 0).unwrap()
        );
        assert_eq!(
            svc.session_instant(date(2025, 3, 10), nine),
            Utc.with_ymd_and_hms(2025, 3, 10, 14, 0, 0).unwrap()
        );
    }

    #[test]
    fn overnight_session_time_uses_previous_evening() {
        let svc = service();
        let six_pm = NaiveTime::from_hms_opt(18, 0, 0).unwrap();
        assert_eq!(
            svc.session_instant(date(2025, 3, 12), six_pm),
            Utc.with_ymd_and_hms(2025, 3, 11, 23, 0, 0).unwrap()
        );
    }

    #[test]
    fn spring_forward_gap_resolves_after_gap() {
        let svc = TimeService::new("America/Chicago", NaiveTime::MIN).unwrap();
        let two_thirty = NaiveTime::from_hms_opt(2, 30, 0).unwrap();
        // 02:30 does not exist on 2025-03-09; first valid is 03:00 CDT = 08:00 UTC.
        assert_eq!(
            svc.to_utc(date(2025, 3, 9), two_thirty),
            Utc.with_ymd_and_hms(2025, 3, 9, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn parses_local_times() {
        assert_eq!(
            parse_local_time("07:30").unwrap(),
            NaiveTime::from_hms_opt(7, 30, 0).unwrap()
        );
        assert!(parse_local_time("7h30").is_err());
    }
}
