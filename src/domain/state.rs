//! Stream lifecycle states, order lifecycle and terminal reasons.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Per-stream lifecycle. Transitions are strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamState {
    PreHydration,
    Armed,
    RangeBuilding,
    RangeLocked,
    Done,
}

impl StreamState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreHydration => "PRE_HYDRATION",
            Self::Armed => "ARMED",
            Self::RangeBuilding => "RANGE_BUILDING",
            Self::RangeLocked => "RANGE_LOCKED",
            Self::Done => "DONE",
        }
    }

    /// Whether moving to `next` respects forward-only ordering.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        next > self
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order and position lifecycle inside `RANGE_LOCKED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderLifecycle {
    #[default]
    NoEntry,
    EntrySubmitted,
    EntryFilled,
    ProtectiveSubmitted,
    StopFilled,
    TargetFilled,
    FlattenedFailsafe,
    Committed,
}

impl OrderLifecycle {
    /// A position may be open at the venue.
    #[must_use]
    pub const fn has_position(self) -> bool {
        matches!(self, Self::EntryFilled | Self::ProtectiveSubmitted)
    }
}

/// Why a stream ended without trading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoTradeReason {
    MarketClose,
    RangeInvalidated,
    NoRangeData,
    LateStart,
    Disabled,
    EntryRejected,
}

impl NoTradeReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MarketClose => "market_close",
            Self::RangeInvalidated => "range_invalidated",
            Self::NoRangeData => "no_range_data",
            Self::LateStart => "late_start",
            Self::Disabled => "disabled",
            Self::EntryRejected => "entry_rejected",
        }
    }
}

/// Outcome recorded when a stream commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TerminalReason {
    TargetHit,
    StopHit,
    NoTrade(NoTradeReason),
    ProtectiveFailureFlattened,
    MarketCloseFlattened,
    /// Restart evidence was insufficient to resume safely.
    Suspended(String),
}

impl TerminalReason {
    #[must_use]
    pub const fn is_no_trade(&self) -> bool {
        matches!(self, Self::NoTrade(_))
    }

    /// Reasons that involved a safety action and warrant an incident.
    #[must_use]
    pub const fn is_safety_relevant(&self) -> bool {
        matches!(
            self,
            Self::ProtectiveFailureFlattened
                | Self::Suspended(_)
                | Self::NoTrade(NoTradeReason::NoRangeData)
        )
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TargetHit => f.write_str("target_hit"),
            Self::StopHit => f.write_str("stop_hit"),
            Self::NoTrade(reason) => write!(f, "no_trade:{}", reason.as_str()),
            Self::ProtectiveFailureFlattened => f.write_str("protective_failure_flattened"),
            Self::MarketCloseFlattened => f.write_str("market_close_flattened"),
            Self::Suspended(reason) => write!(f, "suspended:{reason}"),
        }
    }
}
