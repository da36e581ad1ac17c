//! Event routing tables.
//!
//! Bars route by canonical instrument; fills and order updates route by
//! intent id only. The in-memory intent table is a cache: when it misses,
//! the execution journal names the owning stream.

use std::collections::HashMap;

use crate::application::journal::ExecutionJournal;
use crate::domain::{Instrument, IntentId, StreamKey};

/// Intent id to stream slot.
#[derive(Debug, Default)]
pub struct RouteTable {
    by_intent: HashMap<IntentId, usize>,
    by_stream: HashMap<StreamKey, usize>,
    by_instrument: HashMap<Instrument, Vec<usize>>,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stream(&mut self, key: &StreamKey, slot: usize) {
        self.by_stream.insert(key.clone(), slot);
        self.by_instrument
            .entry(key.instrument.clone())
            .or_default()
            .push(slot);
    }

    pub fn add_intent(&mut self, intent_id: IntentId, slot: usize) {
        self.by_intent.insert(intent_id, slot);
    }

    #[must_use]
    pub fn stream_slot(&self, key: &StreamKey) -> Option<usize> {
        self.by_stream.get(key).copied()
    }

    /// Slots of every stream trading `instrument`.
    #[must_use]
    pub fn for_instrument(&self, instrument: &Instrument) -> &[usize] {
        self.by_instrument
            .get(instrument)
            .map_or(&[], Vec::as_slice)
    }

    /// Resolve an intent, falling back to the journal.
    pub fn resolve(&mut self, intent_id: &IntentId, journal: &ExecutionJournal) -> Option<usize> {
        if let Some(slot) = self.by_intent.get(intent_id) {
            return Some(*slot);
        }
        let stream = journal.get_entry(intent_id)?.intent.stream;
        let slot = self.stream_slot(&stream)?;
        self.by_intent.insert(intent_id.clone(), slot);
        Some(slot)
    }

    pub fn clear(&mut self) {
        self.by_intent.clear();
        self.by_stream.clear();
        self.by_instrument.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_stream.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_stream.is_empty()
    }
}
