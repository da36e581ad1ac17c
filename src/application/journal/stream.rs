//! Per-stream, per-day lifecycle record.
//!
//! Saved synchronously on every state transition as pretty JSON under
//! `streams/<date>/<stream>.json`, replaced atomically.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::fs::write_atomic;
use crate::domain::{
    GapViolation, IntentId, OrderLifecycle, RangeWindow, StreamKey, StreamState, TerminalReason,
};
use crate::error::{JournalError, Result};

/// Persisted lifecycle of one stream for one trading date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamJournal {
    pub stream: StreamKey,
    pub state: StreamState,
    pub state_entered_at: DateTime<Utc>,
    #[serde(default)]
    pub range: Option<RangeWindow>,
    #[serde(default)]
    pub range_invalidated: bool,
    #[serde(default)]
    pub gap_violation: Option<GapViolation>,
    #[serde(default)]
    pub committed: bool,
    #[serde(default)]
    pub terminal_reason: Option<TerminalReason>,
    #[serde(default)]
    pub order_state: OrderLifecycle,
    #[serde(default)]
    pub long_intent_id: Option<IntentId>,
    #[serde(default)]
    pub short_intent_id: Option<IntentId>,
    #[serde(default)]
    pub active_intent_id: Option<IntentId>,
    #[serde(default)]
    pub entry_detected: bool,
    /// A fail-closed flatten has not been confirmed. The position must not be
    /// managed again, only flattened.
    #[serde(default)]
    pub flatten_pending: bool,
    /// Break-even was touched but the stop modify has not been confirmed.
    #[serde(default)]
    pub break_even_pending: bool,
    #[serde(default)]
    pub late_start: bool,
    #[serde(default)]
    pub hydration_complete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StreamJournal {
    /// Fresh record for a stream created at `now`.
    #[must_use]
    pub fn new(stream: StreamKey, now: DateTime<Utc>) -> Self {
        Self {
            stream,
            state: StreamState::PreHydration,
            state_entered_at: now,
            range: None,
            range_invalidated: false,
            gap_violation: None,
            committed: false,
            terminal_reason: None,
            order_state: OrderLifecycle::NoEntry,
            long_intent_id: None,
            short_intent_id: None,
            active_intent_id: None,
            entry_detected: false,
            flatten_pending: false,
            break_even_pending: false,
            late_start: false,
            hydration_complete: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Storage for [`StreamJournal`] records.
pub trait StreamJournalStore: Send + Sync {
    fn load(&self, stream: &StreamKey) -> Result<Option<StreamJournal>>;

    /// Durably replace the record. Must not return before it is on disk.
    fn save(&self, journal: &StreamJournal) -> Result<()>;

    /// Every record of a trading date.
    fn list(&self, date: NaiveDate) -> Result<Vec<StreamJournal>>;
}

/// File-backed store rooted at `<journal_dir>/streams`.
#[derive(Debug, Clone)]
pub struct FileStreamJournalStore {
    root: PathBuf,
}

impl FileStreamJournalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn day_dir(&self, date: NaiveDate) -> PathBuf {
        self.root.join(date.format("%Y-%m-%d").to_string())
    }

    fn path_for(&self, stream: &StreamKey) -> PathBuf {
        self.day_dir(stream.trading_date)
            .join(format!("{}.json", stream.file_stem()))
    }
}

impl StreamJournalStore for FileStreamJournalStore {
    fn load(&self, stream: &StreamKey) -> Result<Option<StreamJournal>> {
        let path = self.path_for(stream);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(JournalError::Read { path, source }.into()),
        };
        let journal = serde_json::from_str(&contents).map_err(|e| JournalError::Corrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok(Some(journal))
    }

    fn save(&self, journal: &StreamJournal) -> Result<()> {
        let json = serde_json::to_string_pretty(journal)?;
        write_atomic(&self.path_for(&journal.stream), json.as_bytes())?;
        Ok(())
    }

    fn list(&self, date: NaiveDate) -> Result<Vec<StreamJournal>> {
        let dir = self.day_dir(date);
        let read_dir = match fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(JournalError::Read { path: dir, source }.into()),
        };

        let mut journals = Vec::new();
        for item in read_dir {
            let path = item
                .map_err(|source| JournalError::Read {
                    path: dir.clone(),
                    source,
                })?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|c| serde_json::from_str::<StreamJournal>(&c).map_err(|e| e.to_string()));
            match parsed {
                Ok(journal) => journals.push(journal),
                Err(reason) => {
                    warn!(path = %path.display(), reason = %reason, "Skipping unreadable stream journal");
                }
            }
        }
        journals.sort_by(|a, b| a.stream.cmp(&b.stream));
        Ok(journals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Instrument, NoTradeReason};
    use chrono::{NaiveTime, TimeZone};

    fn key(name: &str) -> StreamKey {
        StreamKey::new(
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            name,
            Instrument::from("ES"),
            "S1",
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        )
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStreamJournalStore::new(dir.path());
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let mut journal = StreamJournal::new(key("ES1"), now);
        journal.committed = true;
        journal.state = StreamState::Done;
        journal.terminal_reason = Some(TerminalReason::NoTrade(NoTradeReason::MarketClose));
        store.save(&journal).unwrap();

        assert_eq!(store.load(&key("ES1")).unwrap(), Some(journal));
        assert_eq!(store.load(&key("ES2")).unwrap(), None);
        assert!(dir.path().join("2025-03-10/ES1_ES_S1_0900.json").exists());
    }

    #[test]
    fn list_skips_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStreamJournalStore::new(dir.path());
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        store.save(&StreamJournal::new(key("ES1"), now)).unwrap();
        fs::write(dir.path().join("2025-03-10/broken.json"), "{").unwrap();

        let listed = store.list(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()).unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn older_records_without_new_fields_still_load() {
        let json = r#"{
            "stream": {"trading_date":"2025-03-10","stream":"ES1","instrument":"ES","session":"S1","slot_time":"09:00:00"},
            "state": "ARMED",
            "state_entered_at": "2025-03-10T12:00:00Z",
            "created_at": "2025-03-10T12:00:00Z",
            "updated_at": "2025-03-10T12:00:00Z",
            "future_field": 7
        }"#;
        let journal: StreamJournal = serde_json::from_str(json).unwrap();
        assert_eq!(journal.state, StreamState::Armed);
        assert!(!journal.committed);
    }
}
