//! JSON timetable file.
//!
//! ```json
//! {
//!   "trading_date": "2025-03-10",
//!   "streams": [
//!     {"stream": "ES1", "instrument": "ES", "session": "S1", "slot_time": "09:00", "enabled": true}
//!   ]
//! }
//! ```
//!
//! Each row is parsed on its own so one bad line does not hide the rest.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::domain::parse_local_time;
use crate::error::SourceError;
use crate::port::{TimetableEntry, TimetableRow, TimetableSource};

#[derive(Debug, Deserialize)]
struct TimetableFile {
    #[serde(default)]
    trading_date: Option<NaiveDate>,
    #[serde(default)]
    streams: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    stream: String,
    instrument: String,
    session: String,
    slot_time: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

const fn default_enabled() -> bool {
    true
}

/// Reads the timetable from a file on every load.
#[derive(Debug, Clone)]
pub struct FileTimetable {
    path: PathBuf,
}

impl FileTimetable {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn parse_row(value: &Value) -> TimetableRow {
        let raw = value.to_string();
        let entry: RawEntry = match serde_json::from_value(value.clone()) {
            Ok(entry) => entry,
            Err(e) => {
                return TimetableRow::Invalid {
                    raw,
                    reason: e.to_string(),
                }
            }
        };
        if entry.stream.trim().is_empty() || entry.instrument.trim().is_empty() {
            return TimetableRow::Invalid {
                raw,
                reason: "stream and instrument must not be empty".to_string(),
            };
        }
        match parse_local_time(&entry.slot_time) {
            Ok(slot_time) => TimetableRow::Valid(TimetableEntry {
                stream: entry.stream,
                instrument: entry.instrument,
                session: entry.session,
                slot_time,
                enabled: entry.enabled,
            }),
            Err(e) => TimetableRow::Invalid {
                raw,
                reason: e.to_string(),
            },
        }
    }
}

#[async_trait]
impl TimetableSource for FileTimetable {
    async fn load(&self, date: NaiveDate) -> Result<Vec<TimetableRow>, SourceError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SourceError::Read {
                path: self.path.clone(),
                source,
            })?;
        let file: TimetableFile =
            serde_json::from_str(&content).map_err(|e| SourceError::Malformed {
                path: self.path.clone(),
                line: e.line(),
                reason: e.to_string(),
            })?;

        if let Some(file_date) = file.trading_date {
            if file_date != date {
                warn!(
                    path = %self.path.display(),
                    %file_date,
                    requested = %date,
                    "Timetable is for another trading date; no streams loaded"
                );
                return Ok(Vec::new());
            }
        }
        Ok(file.streams.iter().map(Self::parse_row).collect())
    }
}
