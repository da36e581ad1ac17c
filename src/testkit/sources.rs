//! In-memory bar provider and timetable.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use parking_lot::Mutex;

use crate::domain::{Bar, Instrument};
use crate::error::SourceError;
use crate::port::{BarProvider, TimetableEntry, TimetableRow, TimetableSource};

/// Serves fixed bars per instrument, optionally slow or failing.
#[derive(Default)]
pub struct StaticBarProvider {
    bars: Mutex<HashMap<Instrument, Vec<Bar>>>,
    failure: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
    requests: Mutex<Vec<(Instrument, DateTime<Utc>, DateTime<Utc>)>>,
}

impl StaticBarProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bars(self, instrument: &str, bars: Vec<Bar>) -> Self {
        self.set_bars(instrument, bars);
        self
    }

    pub fn set_bars(&self, instrument: &str, mut bars: Vec<Bar>) {
        bars.sort_by_key(|b| b.timestamp);
        self.bars.lock().insert(Instrument::new(instrument), bars);
    }

    /// Fail every request with `reason`.
    pub fn failing(self, reason: &str) -> Self {
        *self.failure.lock() = Some(reason.to_string());
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = Some(delay);
        self
    }

    /// Every `(instrument, from, to)` requested so far.
    pub fn requests(&self) -> Vec<(Instrument, DateTime<Utc>, DateTime<Utc>)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl BarProvider for StaticBarProvider {
    async fn fetch(
        &self,
        instrument: &Instrument,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, SourceError> {
        self.requests.lock().push((instrument.clone(), from, to));
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = self.failure.lock().clone() {
            return Err(SourceError::Unavailable(reason));
        }
        Ok(self
            .bars
            .lock()
            .get(instrument)
            .map(|bars| {
                bars.iter()
                    .filter(|b| from <= b.timestamp && b.timestamp <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Timetable rows keyed by trading date.
#[derive(Default)]
pub struct StaticTimetable {
    rows: Mutex<HashMap<NaiveDate, Vec<TimetableRow>>>,
}

impl StaticTimetable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(self, date: NaiveDate, rows: Vec<TimetableRow>) -> Self {
        self.set_rows(date, rows);
        self
    }

    pub fn set_rows(&self, date: NaiveDate, rows: Vec<TimetableRow>) {
        self.rows.lock().insert(date, rows);
    }
}

#[async_trait]
impl TimetableSource for StaticTimetable {
    async fn load(&self, date: NaiveDate) -> Result<Vec<TimetableRow>, SourceError> {
        Ok(self.rows.lock().get(&date).cloned().unwrap_or_default())
    }
}

/// Enabled timetable row in session `S1`.
pub fn row(stream: &str, instrument: &str, slot_time: NaiveTime) -> TimetableRow {
    TimetableRow::Valid(TimetableEntry {
        stream: stream.to_string(),
        instrument: instrument.to_string(),
        session: "S1".to_string(),
        slot_time,
        enabled: true,
    })
}
