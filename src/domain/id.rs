//! Domain identifier types with proper encapsulation.

use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Canonical instrument symbol (e.g. `ES`, `NQ`).
///
/// Construct through [`InstrumentRegistry::canonicalize`](super::instrument::InstrumentRegistry::canonicalize)
/// when the input comes from a feed, so that micro/mini aliases collapse to
/// one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Instrument(String);

impl Instrument {
    /// Create an instrument from an already canonical symbol.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    /// Get the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Instrument {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identity of one stream for one trading date.
///
/// A stream is created at most once per trading date; restart recovery
/// rebuilds it from the journals under the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    pub trading_date: NaiveDate,
    pub stream: String,
    pub instrument: Instrument,
    pub session: String,
    pub slot_time: NaiveTime,
}

impl StreamKey {
    pub fn new(
        trading_date: NaiveDate,
        stream: impl Into<String>,
        instrument: Instrument,
        session: impl Into<String>,
        slot_time: NaiveTime,
    ) -> Self {
        Self {
            trading_date,
            stream: stream.into(),
            instrument,
            session: session.into(),
            slot_time,
        }
    }

    /// File-system friendly name, unique within a trading date.
    #[must_use]
    pub fn file_stem(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            sanitize(&self.stream),
            sanitize(self.instrument.as_str()),
            sanitize(&self.session),
            self.slot_time.format("%H%M")
        )
    }
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}@{}",
            self.trading_date,
            self.stream,
            self.instrument,
            self.session,
            self.slot_time.format("%H:%M")
        )
    }
}

/// Deterministic identifier of a trading decision.
///
/// The inner String is private; ids are produced by hashing the decision
/// (see [`Intent`](super::intent::Intent)) or restored from the journal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IntentId(String);

impl IntentId {
    /// Restore an id from persisted text.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order identifier assigned by the venue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrokerOrderId(String);

impl BrokerOrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BrokerOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BrokerOrderId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for BrokerOrderId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
