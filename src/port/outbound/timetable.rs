//! Daily timetable source.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// One configured stream for a trading date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimetableEntry {
    pub stream: String,
    /// Raw instrument symbol; canonicalised by the engine.
    pub instrument: String,
    pub session: String,
    pub slot_time: NaiveTime,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

const fn default_enabled() -> bool {
    true
}

/// A timetable line, parsed or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimetableRow {
    Valid(TimetableEntry),
    /// Malformed line; the stream is not created.
    Invalid { raw: String, reason: String },
}

/// Loads the timetable for a trading date.
#[async_trait]
pub trait TimetableSource: Send + Sync {
    async fn load(&self, date: NaiveDate) -> Result<Vec<TimetableRow>, SourceError>;
}
