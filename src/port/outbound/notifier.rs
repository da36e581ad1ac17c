//! Notifier port for operator alerts.
//!
//! This module defines the trait for sending notifications about stream
//! lifecycle events, safety actions and engine health. Delivery is
//! rate-limited upstream by the health monitor; incidents are persisted
//! separately and never dropped.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::domain::{
    Direction, GapViolation, IntentId, OrderKind, RangeWindow, StreamKey, TerminalReason,
};

/// Events that can trigger notifications.
#[derive(Debug, Clone)]
pub enum Event {
    /// Gap tolerance exceeded while building a range.
    RangeInvalidated {
        stream: StreamKey,
        violation: GapViolation,
    },
    /// Range frozen at slot time.
    RangeLocked {
        stream: StreamKey,
        range: RangeWindow,
    },
    /// Entry direction decided.
    EntryTriggered {
        stream: StreamKey,
        intent_id: IntentId,
        direction: Direction,
        price: Decimal,
    },
    /// The admission gate refused an action for a non-benign reason.
    GateDenied {
        stream: StreamKey,
        failed: Vec<&'static str>,
    },
    /// The venue refused an order.
    OrderRejected {
        stream: StreamKey,
        intent_id: IntentId,
        kind: OrderKind,
        reason: String,
    },
    /// Protective orders could not be confirmed; the position was flattened.
    ProtectiveFailure {
        stream: StreamKey,
        intent_id: IntentId,
        flattened: bool,
    },
    /// Stream reached DONE.
    StreamCommitted {
        stream: StreamKey,
        reason: TerminalReason,
    },
    /// Hydration ended before the bar provider answered.
    HydrationIncomplete { stream: StreamKey, bars: usize },
    /// No tick processed for longer than the stall threshold.
    TickStall { silent_secs: i64 },
    /// A timetable line was skipped.
    TimetableInvalid { date: NaiveDate, raw: String, reason: String },
    /// Journal write failed after retries.
    JournalFailure { stream: StreamKey, detail: String },
}

impl Event {
    /// Stable event kind, used as the first half of the rate-limit key.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RangeInvalidated { .. } => "range_invalidated",
            Self::RangeLocked { .. } => "range_locked",
            Self::EntryTriggered { .. } => "entry_triggered",
            Self::GateDenied { .. } => "gate_denied",
            Self::OrderRejected { .. } => "order_rejected",
            Self::ProtectiveFailure { .. } => "protective_failure",
            Self::StreamCommitted { .. } => "stream_committed",
            Self::HydrationIncomplete { .. } => "hydration_incomplete",
            Self::TickStall { .. } => "tick_stall",
            Self::TimetableInvalid { .. } => "timetable_invalid",
            Self::JournalFailure { .. } => "journal_failure",
        }
    }

    /// Second half of the rate-limit key.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::RangeInvalidated { stream, .. }
            | Self::RangeLocked { stream, .. }
            | Self::EntryTriggered { stream, .. }
            | Self::GateDenied { stream, .. }
            | Self::OrderRejected { stream, .. }
            | Self::ProtectiveFailure { stream, .. }
            | Self::StreamCommitted { stream, .. }
            | Self::HydrationIncomplete { stream, .. }
            | Self::JournalFailure { stream, .. } => stream.to_string(),
            Self::TickStall { .. } => "engine".to_string(),
            Self::TimetableInvalid { date, raw, .. } => format!("{date}:{raw}"),
        }
    }
}

/// Trait for notification handlers.
///
/// Implementations must be thread-safe and must return quickly; slow
/// transports should spawn a task.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: Event);
}

/// Registry of notifiers (composite pattern).
///
/// Broadcasts events to all registered notifiers.
pub struct NotifierRegistry {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotifierRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { notifiers: vec![] }
    }

    pub fn register(&mut self, notifier: Box<dyn Notifier>) {
        self.notifiers.push(notifier);
    }

    pub fn notify_all(&self, event: Event) {
        for notifier in &self.notifiers {
            notifier.notify(event.clone());
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

impl Default for NotifierRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A no-op notifier for when alerts are disabled.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: Event) {}
}

/// A logging notifier that logs events via tracing.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: Event) {
        use tracing::{info, warn};
        match event {
            Event::RangeInvalidated { stream, violation } => {
                warn!(stream = %stream, violation = %violation, "Range invalidated");
            }
            Event::RangeLocked { stream, range } => {
                info!(
                    stream = %stream,
                    high = %range.range_high,
                    low = %range.range_low,
                    freeze_close = %range.freeze_close,
                    bars = range.bars_used,
                    "Range locked"
                );
            }
            Event::EntryTriggered {
                stream,
                intent_id,
                direction,
                price,
            } => {
                info!(
                    stream = %stream,
                    intent_id = %intent_id,
                    direction = %direction,
                    price = %price,
                    "Entry triggered"
                );
            }
            Event::GateDenied { stream, failed } => {
                warn!(stream = %stream, failed = ?failed, "Gate denied");
            }
            Event::OrderRejected {
                stream,
                intent_id,
                kind,
                reason,
            } => {
                warn!(
                    stream = %stream,
                    intent_id = %intent_id,
                    kind = %kind,
                    reason = %reason,
                    "Order rejected"
                );
            }
            Event::ProtectiveFailure {
                stream,
                intent_id,
                flattened,
            } => {
                warn!(
                    stream = %stream,
                    intent_id = %intent_id,
                    flattened,
                    "Protective failure"
                );
            }
            Event::StreamCommitted { stream, reason } => {
                info!(stream = %stream, reason = %reason, "Stream committed");
            }
            Event::HydrationIncomplete { stream, bars } => {
                warn!(stream = %stream, bars, "Hydration incomplete");
            }
            Event::TickStall { silent_secs } => {
                warn!(silent_secs, "Tick loop stalled");
            }
            Event::TimetableInvalid { date, raw, reason } => {
                warn!(date = %date, raw = %raw, reason = %reason, "Timetable entry skipped");
            }
            Event::JournalFailure { stream, detail } => {
                warn!(stream = %stream, detail = %detail, "Journal failure");
            }
        }
    }
}
