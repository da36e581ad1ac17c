//! Append-only execution ledger keyed by intent id and order kind.
//!
//! Every record is written and synced to `execution/<intent_id>.jsonl`
//! before the in-memory cache changes and before the caller learns the
//! write succeeded. On open, each file is replayed into an
//! [`ExecutionJournalEntry`]; a torn trailing line from a crash is skipped.
//!
//! The ledger is the only authority for classifying fills after a restart:
//! broker order ids and intent ids resolve to `(intent, kind)` here, not in
//! any per-stream table.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::fs::append_line;
use crate::domain::{BrokerOrderId, Intent, IntentId, OrderKind, StreamKey};
use crate::error::{JournalError, Result};

/// One ledger line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum JournalRecord {
    IntentRecorded {
        intent: Intent,
        at: DateTime<Utc>,
    },
    Submitted {
        kind: OrderKind,
        broker_order_id: Option<BrokerOrderId>,
        price: Decimal,
        quantity: u32,
        at: DateTime<Utc>,
    },
    Filled {
        kind: OrderKind,
        price: Decimal,
        delta: u32,
        cumulative: u32,
        at: DateTime<Utc>,
    },
    Rejected {
        kind: OrderKind,
        reason: String,
        at: DateTime<Utc>,
    },
    Cancelled {
        kind: OrderKind,
        at: DateTime<Utc>,
    },
    BreakEvenApplied {
        stop_price: Decimal,
        at: DateTime<Utc>,
    },
    Flattened {
        quantity: u32,
        at: DateTime<Utc>,
    },
}

/// Aggregated state of one order kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderRecord {
    pub submissions: u32,
    pub broker_order_id: Option<BrokerOrderId>,
    /// Price and quantity of the latest submission.
    pub price: Option<Decimal>,
    pub quantity: u32,
    pub filled: u32,
    fill_notional: Decimal,
    pub last_fill_at: Option<DateTime<Utc>>,
    pub rejection: Option<String>,
    pub cancelled: bool,
}

impl OrderRecord {
    #[must_use]
    pub const fn is_submitted(&self) -> bool {
        self.submissions > 0
    }

    /// Volume-weighted average fill price.
    #[must_use]
    pub fn average_fill_price(&self) -> Option<Decimal> {
        if self.filled == 0 {
            return None;
        }
        Some(self.fill_notional / Decimal::from(self.filled))
    }

    /// Still resting at the venue as far as the ledger knows.
    #[must_use]
    pub fn is_working(&self) -> bool {
        self.is_submitted()
            && !self.cancelled
            && self.rejection.is_none()
            && self.filled < self.quantity
    }
}

/// Replayed view of one intent's ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionJournalEntry {
    pub intent: Intent,
    pub orders: BTreeMap<OrderKind, OrderRecord>,
    pub break_even_stop: Option<Decimal>,
    pub flattened: u32,
}

impl ExecutionJournalEntry {
    fn new(intent: Intent) -> Self {
        Self {
            intent,
            orders: BTreeMap::new(),
            break_even_stop: None,
            flattened: 0,
        }
    }

    #[must_use]
    pub fn order(&self, kind: OrderKind) -> Option<&OrderRecord> {
        self.orders.get(&kind)
    }

    #[must_use]
    pub fn entry_filled(&self) -> u32 {
        self.order(OrderKind::Entry).map_or(0, |o| o.filled)
    }

    /// Quantity closed by stop, target and flatten.
    #[must_use]
    pub fn exit_filled(&self) -> u32 {
        let stop = self.order(OrderKind::Stop).map_or(0, |o| o.filled);
        let target = self.order(OrderKind::Target).map_or(0, |o| o.filled);
        stop + target + self.flattened
    }

    /// Open quantity implied by the ledger.
    #[must_use]
    pub fn open_quantity(&self) -> u32 {
        self.entry_filled().saturating_sub(self.exit_filled())
    }

    fn apply(&mut self, record: &JournalRecord) {
        match record {
            JournalRecord::IntentRecorded { .. } => {}
            JournalRecord::Submitted {
                kind,
                broker_order_id,
                price,
                quantity,
                ..
            } => {
                let order = self.orders.entry(*kind).or_default();
                order.submissions += 1;
                if broker_order_id.is_some() {
                    order.broker_order_id.clone_from(broker_order_id);
                }
                order.price = Some(*price);
                // Earlier fills stay counted against the resubmitted size.
                order.quantity = order.filled + *quantity;
                order.cancelled = false;
                order.rejection = None;
            }
            JournalRecord::Filled {
                kind,
                price,
                delta,
                at,
                ..
            } => {
                let order = self.orders.entry(*kind).or_default();
                order.filled += delta;
                order.fill_notional += *price * Decimal::from(*delta);
                order.last_fill_at = Some(*at);
            }
            JournalRecord::Rejected { kind, reason, .. } => {
                self.orders.entry(*kind).or_default().rejection = Some(reason.clone());
            }
            JournalRecord::Cancelled { kind, .. } => {
                self.orders.entry(*kind).or_default().cancelled = true;
            }
            JournalRecord::BreakEvenApplied { stop_price, .. } => {
                self.break_even_stop = Some(*stop_price);
                if let Some(stop) = self.orders.get_mut(&OrderKind::Stop) {
                    stop.price = Some(*stop_price);
                }
            }
            JournalRecord::Flattened { quantity, .. } => {
                self.flattened += quantity;
            }
        }
    }
}

fn terminate_line(path: &Path) -> Result<()> {
    let write_err = |source| JournalError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut file = fs::OpenOptions::new().append(true).open(path).map_err(write_err)?;
    file.write_all(b"\n").map_err(write_err)?;
    file.sync_data().map_err(write_err)?;
    Ok(())
}

/// Crash-consistent execution ledger with an in-memory read cache.
#[derive(Debug)]
pub struct ExecutionJournal {
    /// `None` keeps the ledger in memory only.
    dir: Option<PathBuf>,
    entries: DashMap<IntentId, ExecutionJournalEntry>,
    broker_index: DashMap<BrokerOrderId, (IntentId, OrderKind)>,
    stream_index: DashMap<StreamKey, Vec<IntentId>>,
}

impl ExecutionJournal {
    /// Open (or create) the ledger under `dir` and replay every intent file.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| JournalError::Write {
            path: dir.clone(),
            source,
        })?;

        let journal = Self {
            dir: Some(dir.clone()),
            ..Self::in_memory()
        };

        let read_dir = fs::read_dir(&dir).map_err(|source| JournalError::Read {
            path: dir.clone(),
            source,
        })?;
        for item in read_dir {
            let path = item
                .map_err(|source| JournalError::Read {
                    path: dir.clone(),
                    source,
                })?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            journal.load_file(&path)?;
        }

        debug!(dir = %dir.display(), intents = journal.entries.len(), "Execution journal loaded");
        Ok(journal)
    }

    /// Ledger without persistence.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            entries: DashMap::new(),
            broker_index: DashMap::new(),
            stream_index: DashMap::new(),
        }
    }

    fn load_file(&self, path: &Path) -> Result<()> {
        let content = fs::read_to_string(path).map_err(|source| JournalError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut entry: Option<ExecutionJournalEntry> = None;

        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: JournalRecord = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        line = index + 1,
                        error = %e,
                        "Skipping unreadable journal line"
                    );
                    continue;
                }
            };
            match (&mut entry, &record) {
                (None, JournalRecord::IntentRecorded { intent, .. }) => {
                    entry = Some(ExecutionJournalEntry::new(intent.clone()));
                }
                (None, _) => {
                    return Err(JournalError::Corrupt {
                        path: path.to_path_buf(),
                        reason: "first record is not intent_recorded".to_string(),
                    }
                    .into());
                }
                (Some(current), _) => current.apply(&record),
            }
        }

        if !content.is_empty() && !content.ends_with('\n') {
            // Terminate a torn tail so the next record starts on its own line.
            terminate_line(path)?;
        }

        if let Some(entry) = entry {
            self.index(&entry);
            self.entries.insert(entry.intent.id.clone(), entry);
        }
        Ok(())
    }

    fn index(&self, entry: &ExecutionJournalEntry) {
        let id = &entry.intent.id;
        for (kind, order) in &entry.orders {
            if let Some(broker_id) = &order.broker_order_id {
                self.broker_index
                    .insert(broker_id.clone(), (id.clone(), *kind));
            }
        }
        let mut ids = self.stream_index.entry(entry.intent.stream.clone()).or_default();
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    }

    fn path_for(&self, intent_id: &IntentId) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{intent_id}.jsonl")))
    }

    fn persist(&self, intent_id: &IntentId, record: &JournalRecord) -> Result<()> {
        if let Some(path) = self.path_for(intent_id) {
            let line = serde_json::to_string(record)?;
            append_line(&path, &line)?;
        }
        Ok(())
    }

    fn append(&self, intent_id: &IntentId, record: JournalRecord) -> Result<()> {
        if !self.entries.contains_key(intent_id) {
            return Err(JournalError::Corrupt {
                path: self.path_for(intent_id).unwrap_or_default(),
                reason: format!("intent {intent_id} was never recorded"),
            }
            .into());
        }
        self.persist(intent_id, &record)?;
        if let Some(mut entry) = self.entries.get_mut(intent_id) {
            entry.apply(&record);
        }
        Ok(())
    }

    /// Record an intent. Returns `false` when it was already recorded.
    pub fn record_intent(&self, intent: &Intent, at: DateTime<Utc>) -> Result<bool> {
        if self.entries.contains_key(&intent.id) {
            return Ok(false);
        }
        let record = JournalRecord::IntentRecorded {
            intent: intent.clone(),
            at,
        };
        self.persist(&intent.id, &record)?;
        let entry = ExecutionJournalEntry::new(intent.clone());
        self.index(&entry);
        self.entries.insert(intent.id.clone(), entry);
        Ok(true)
    }

    pub fn record_submission(
        &self,
        intent_id: &IntentId,
        kind: OrderKind,
        broker_order_id: Option<BrokerOrderId>,
        price: Decimal,
        quantity: u32,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.append(
            intent_id,
            JournalRecord::Submitted {
                kind,
                broker_order_id: broker_order_id.clone(),
                price,
                quantity,
                at,
            },
        )?;
        if let Some(broker_id) = broker_order_id {
            self.broker_index
                .insert(broker_id, (intent_id.clone(), kind));
        }
        Ok(())
    }

    /// Record an incremental fill and return the new cumulative quantity
    /// for that order kind.
    pub fn record_fill(
        &self,
        intent_id: &IntentId,
        kind: OrderKind,
        price: Decimal,
        delta: u32,
        at: DateTime<Utc>,
    ) -> Result<u32> {
        let previous = self
            .entries
            .get(intent_id)
            .and_then(|e| e.order(kind).map(|o| o.filled))
            .unwrap_or(0);
        let cumulative = previous + delta;
        self.append(
            intent_id,
            JournalRecord::Filled {
                kind,
                price,
                delta,
                cumulative,
                at,
            },
        )?;
        Ok(cumulative)
    }

    pub fn record_rejection(
        &self,
        intent_id: &IntentId,
        kind: OrderKind,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.append(
            intent_id,
            JournalRecord::Rejected {
                kind,
                reason: reason.to_string(),
                at,
            },
        )
    }

    pub fn record_cancel(&self, intent_id: &IntentId, kind: OrderKind, at: DateTime<Utc>) -> Result<()> {
        self.append(intent_id, JournalRecord::Cancelled { kind, at })
    }

    /// Checked-and-set: returns `false` if break-even was already applied.
    pub fn record_break_even(
        &self,
        intent_id: &IntentId,
        stop_price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        if self.is_break_even_applied(intent_id) {
            return Ok(false);
        }
        self.append(intent_id, JournalRecord::BreakEvenApplied { stop_price, at })?;
        Ok(true)
    }

    pub fn record_flatten(&self, intent_id: &IntentId, quantity: u32, at: DateTime<Utc>) -> Result<()> {
        self.append(intent_id, JournalRecord::Flattened { quantity, at })
    }

    /// Whether the entry order of this intent was ever submitted.
    #[must_use]
    pub fn is_submitted(&self, intent_id: &IntentId) -> bool {
        self.is_kind_submitted(intent_id, OrderKind::Entry)
    }

    #[must_use]
    pub fn is_kind_submitted(&self, intent_id: &IntentId, kind: OrderKind) -> bool {
        self.entries
            .get(intent_id)
            .and_then(|e| e.order(kind).map(OrderRecord::is_submitted))
            .unwrap_or(false)
    }

    #[must_use]
    pub fn is_break_even_applied(&self, intent_id: &IntentId) -> bool {
        self.entries
            .get(intent_id)
            .is_some_and(|e| e.break_even_stop.is_some())
    }

    #[must_use]
    pub fn get_entry(&self, intent_id: &IntentId) -> Option<ExecutionJournalEntry> {
        self.entries.get(intent_id).map(|e| e.clone())
    }

    #[must_use]
    pub fn contains(&self, intent_id: &IntentId) -> bool {
        self.entries.contains_key(intent_id)
    }

    /// Resolve a venue order id to the intent and order kind it belongs to.
    #[must_use]
    pub fn locate_broker_order(&self, broker_order_id: &BrokerOrderId) -> Option<(IntentId, OrderKind)> {
        self.broker_index.get(broker_order_id).map(|v| v.clone())
    }

    /// Intents recorded for a stream, in recording order.
    #[must_use]
    pub fn intents_for(&self, stream: &StreamKey) -> Vec<IntentId> {
        self.stream_index
            .get(stream)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    /// Whether any order of any intent of the stream was ever submitted.
    #[must_use]
    pub fn any_submission_for(&self, stream: &StreamKey) -> bool {
        self.intents_for(stream).iter().any(|id| {
            self.entries
                .get(id)
                .is_some_and(|e| e.orders.values().any(OrderRecord::is_submitted))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        BarSource, BreakoutLevels, Direction, EntryOrderType, Instrument, InstrumentSpec,
        IntentParams, RangeWindow, TriggerReason,
    };
    use chrono::{NaiveDate, NaiveTime, TimeZone};
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn intent() -> Intent {
        let stream = StreamKey::new(
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            "ES1",
            Instrument::from("ES"),
            "S1",
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        );
        let range = RangeWindow {
            range_start: Utc.with_ymd_and_hms(2025, 3, 10, 13, 0, 0).unwrap(),
            slot_time: Utc.with_ymd_and_hms(2025, 3, 10, 14, 0, 0).unwrap(),
            range_high: dec!(100),
            range_low: dec!(99),
            freeze_close: dec!(99.5),
            freeze_close_source: BarSource::Live,
            bars_used: 60,
        };
        let spec = InstrumentSpec::try_new("ES", dec!(0.25), dec!(4), dec!(0)).unwrap();
        Intent::derive(IntentParams {
            stream: &stream,
            direction: Direction::Long,
            entry_type: EntryOrderType::StopMarket,
            entry_price: dec!(100.25),
            range: &range,
            levels: BreakoutLevels::from_range(&range, &spec),
            spec: &spec,
            quantity: 2,
            break_even_fraction: dec!(0.65),
            trigger_reason: TriggerReason::BreakoutStop,
        })
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 14, 5, 0).unwrap()
    }

    #[test]
    fn cumulative_fill_is_derived_from_deltas() {
        let journal = ExecutionJournal::in_memory();
        let intent = intent();
        journal.record_intent(&intent, now()).unwrap();
        journal
            .record_submission(&intent.id, OrderKind::Entry, Some("b-1".into()), dec!(100.25), 2, now())
            .unwrap();
        assert_eq!(
            journal.record_fill(&intent.id, OrderKind::Entry, dec!(100.25), 1, now()).unwrap(),
            1
        );
        assert_eq!(
            journal.record_fill(&intent.id, OrderKind::Entry, dec!(100.50), 1, now()).unwrap(),
            2
        );
        let entry = journal.get_entry(&intent.id).unwrap();
        assert_eq!(entry.entry_filled(), 2);
        assert_eq!(
            entry.order(OrderKind::Entry).unwrap().average_fill_price(),
            Some(dec!(100.375))
        );
    }

    #[test]
    fn record_intent_is_idempotent() {
        let journal = ExecutionJournal::in_memory();
        let intent = intent();
        assert!(journal.record_intent(&intent, now()).unwrap());
        assert!(!journal.record_intent(&intent, now()).unwrap());
        assert_eq!(journal.intents_for(&intent.stream), vec![intent.id.clone()]);
    }

    #[test]
    fn break_even_is_checked_and_set() {
        let journal = ExecutionJournal::in_memory();
        let intent = intent();
        journal.record_intent(&intent, now()).unwrap();
        assert!(journal.record_break_even(&intent.id, dec!(100), now()).unwrap());
        assert!(!journal.record_break_even(&intent.id, dec!(100), now()).unwrap());
        assert!(journal.is_break_even_applied(&intent.id));
    }

    #[test]
    fn unknown_intent_is_rejected() {
        let journal = ExecutionJournal::in_memory();
        let err = journal.record_cancel(&IntentId::new("missing"), OrderKind::Entry, now());
        assert!(err.is_err());
    }

    #[test]
    fn reload_restores_entries_and_broker_index() {
        let dir = tempfile::tempdir().unwrap();
        let intent = intent();
        {
            let journal = ExecutionJournal::open(dir.path()).unwrap();
            journal.record_intent(&intent, now()).unwrap();
            journal
                .record_submission(&intent.id, OrderKind::Entry, Some("b-1".into()), dec!(100.25), 2, now())
                .unwrap();
            journal
                .record_submission(&intent.id, OrderKind::Stop, Some("b-2".into()), dec!(99.25), 2, now())
                .unwrap();
        }
        let journal = ExecutionJournal::open(dir.path()).unwrap();
        assert!(journal.is_submitted(&intent.id));
        assert_eq!(
            journal.locate_broker_order(&BrokerOrderId::from("b-2")),
            Some((intent.id.clone(), OrderKind::Stop))
        );
        assert_eq!(journal.intents_for(&intent.stream).len(), 1);
    }

    #[test]
    fn torn_trailing_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let intent = intent();
        {
            let journal = ExecutionJournal::open(dir.path()).unwrap();
            journal.record_intent(&intent, now()).unwrap();
            journal
                .record_submission(&intent.id, OrderKind::Entry, None, dec!(100.25), 2, now())
                .unwrap();
        }
        let path = dir.path().join(format!("{}.jsonl", intent.id));
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"record":"filled","kind":"entry","pri"#).unwrap();

        let journal = ExecutionJournal::open(dir.path()).unwrap();
        let entry = journal.get_entry(&intent.id).unwrap();
        assert!(entry.order(OrderKind::Entry).unwrap().is_submitted());
        assert_eq!(entry.entry_filled(), 0);

        // Records written after the torn tail survive the next reopen.
        journal
            .record_fill(&intent.id, OrderKind::Entry, dec!(100.25), 1, now())
            .unwrap();
        let journal = ExecutionJournal::open(dir.path()).unwrap();
        assert_eq!(journal.get_entry(&intent.id).unwrap().entry_filled(), 1);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let line = r#"{"record":"cancelled","kind":"stop","at":"2025-03-10T14:05:00Z","operator":"x"}"#;
        let record: JournalRecord = serde_json::from_str(line).unwrap();
        assert!(matches!(record, JournalRecord::Cancelled { kind: OrderKind::Stop, .. }));
    }
}
