//! In-memory stream journal store for tests and dry runs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDate;
use parking_lot::RwLock;

use crate::application::journal::{StreamJournal, StreamJournalStore};
use crate::domain::StreamKey;
use crate::error::{JournalError, Result};

/// Keeps stream records in a map. Writes can be made to fail.
#[derive(Debug, Default)]
pub struct MemoryStreamJournalStore {
    records: RwLock<HashMap<StreamKey, StreamJournal>>,
    failing: AtomicBool,
}

impl MemoryStreamJournalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `save` fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl StreamJournalStore for MemoryStreamJournalStore {
    fn load(&self, stream: &StreamKey) -> Result<Option<StreamJournal>> {
        Ok(self.records.read().get(stream).cloned())
    }

    fn save(&self, journal: &StreamJournal) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(JournalError::Write {
                path: PathBuf::from(format!("memory://{}", journal.stream.file_stem())),
                source: std::io::Error::new(std::io::ErrorKind::Other, "store marked failing"),
            }
            .into());
        }
        self.records
            .write()
            .insert(journal.stream.clone(), journal.clone());
        Ok(())
    }

    fn list(&self, date: NaiveDate) -> Result<Vec<StreamJournal>> {
        let mut records: Vec<_> = self
            .records
            .read()
            .values()
            .filter(|r| r.stream.trading_date == date)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.stream.file_stem().cmp(&b.stream.file_stem()));
        Ok(records)
    }
}
