//! Replay sources: a settable clock and a bar file reader.
//!
//! Bar files are JSON Lines, one bar per line:
//!
//! ```json
//! {"symbol":"MES","timestamp":"2025-03-10T13:31:00Z","open":"100","high":"100.5","low":"99.75","close":"100.25"}
//! ```
//!
//! Symbols are canonicalised through the instrument registry on load, so a
//! file may mix micro and mini symbols of the same family.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info};

use crate::domain::{Bar, BarSource, Instrument, InstrumentRegistry};
use crate::error::SourceError;
use crate::port::{BarProvider, Clock};

/// Clock driven forward by the replay loop.
#[derive(Debug)]
pub struct ReplayClock {
    now: RwLock<DateTime<Utc>>,
}

impl ReplayClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Move the clock to `at`. Never moves backwards.
    pub fn set(&self, at: DateTime<Utc>) {
        let mut now = self.now.write();
        if at > *now {
            *now = at;
        }
    }
}

impl Clock for ReplayClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

#[derive(Debug, Deserialize)]
struct BarLine {
    symbol: String,
    timestamp: DateTime<Utc>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    #[serde(default)]
    volume: Decimal,
}

/// A bar loaded from a replay file, tagged with its canonical instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayRecord {
    pub symbol: String,
    pub instrument: Instrument,
    pub bar: Bar,
}

/// Serves hydration requests from a bar file.
#[derive(Debug)]
pub struct ReplayBarProvider {
    path: PathBuf,
    records: Vec<ReplayRecord>,
}

impl ReplayBarProvider {
    /// Load and validate every line of `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or any line is malformed.
    pub fn open(path: impl AsRef<Path>, registry: &InstrumentRegistry) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let content = fs::read_to_string(&path).map_err(|source| SourceError::Read {
            path: path.clone(),
            source,
        })?;

        let mut records = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let malformed = |reason: String| SourceError::Malformed {
                path: path.clone(),
                line: index + 1,
                reason,
            };
            let raw: BarLine = serde_json::from_str(line).map_err(|e| malformed(e.to_string()))?;
            let bar = Bar::try_new(
                raw.timestamp,
                raw.open,
                raw.high,
                raw.low,
                raw.close,
                raw.volume,
                BarSource::FileReplay,
            )
            .map_err(|e| malformed(e.to_string()))?;
            records.push(ReplayRecord {
                instrument: registry.canonicalize(&raw.symbol),
                symbol: raw.symbol,
                bar,
            });
        }
        records.sort_by_key(|r| r.bar.timestamp);

        info!(path = %path.display(), bars = records.len(), "Replay file loaded");
        Ok(Self { path, records })
    }

    /// Build a provider from records already in memory.
    #[must_use]
    pub fn from_records(mut records: Vec<ReplayRecord>) -> Self {
        records.sort_by_key(|r| r.bar.timestamp);
        Self {
            path: PathBuf::from("<memory>"),
            records,
        }
    }

    /// All records in time order.
    #[must_use]
    pub fn records(&self) -> &[ReplayRecord] {
        &self.records
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl BarProvider for ReplayBarProvider {
    async fn fetch(
        &self,
        instrument: &Instrument,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, SourceError> {
        let mut by_time: BTreeMap<DateTime<Utc>, Bar> = BTreeMap::new();
        for record in self
            .records
            .iter()
            .filter(|r| &r.instrument == instrument)
            .filter(|r| r.bar.timestamp >= from && r.bar.timestamp <= to)
        {
            by_time.entry(record.bar.timestamp).or_insert_with(|| record.bar.clone());
        }
        debug!(instrument = %instrument, %from, %to, bars = by_time.len(), "Replay fetch");
        Ok(by_time.into_values().collect())
    }
}
