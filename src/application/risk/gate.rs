//! Admission gate for order-placing actions.
//!
//! [`evaluate`] is a pure function of a [`GateContext`] snapshot: it holds
//! no state and performs no I/O. Every check runs, so a denial always carries
//! the full list of failed checks rather than the first one.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::domain::{BarSource, StreamState};

/// Named admission checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateCheck {
    RealtimeDataOnly,
    ValidTradingDay,
    SessionActive,
    SlotTimeReached,
    StreamEnabled,
    StreamArmedNotCommitted,
    StateIsRangeLocked,
    EntryNotAlreadyDetected,
    BreakoutLevelsComputed,
}

impl GateCheck {
    pub const ALL: [Self; 9] = [
        Self::RealtimeDataOnly,
        Self::ValidTradingDay,
        Self::SessionActive,
        Self::SlotTimeReached,
        Self::StreamEnabled,
        Self::StreamArmedNotCommitted,
        Self::StateIsRangeLocked,
        Self::EntryNotAlreadyDetected,
        Self::BreakoutLevelsComputed,
    ];

    /// Stable name used in logs and alerts.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RealtimeDataOnly => "realtime_data_only",
            Self::ValidTradingDay => "valid_trading_day",
            Self::SessionActive => "session_active",
            Self::SlotTimeReached => "slot_time_reached",
            Self::StreamEnabled => "stream_enabled",
            Self::StreamArmedNotCommitted => "stream_armed_not_committed",
            Self::StateIsRangeLocked => "state_is_range_locked",
            Self::EntryNotAlreadyDetected => "entry_not_already_detected",
            Self::BreakoutLevelsComputed => "breakout_levels_computed",
        }
    }

    /// Failures that describe an expected block rather than a violation.
    #[must_use]
    pub const fn is_benign(self) -> bool {
        matches!(
            self,
            Self::EntryNotAlreadyDetected | Self::StreamArmedNotCommitted
        )
    }
}

impl fmt::Display for GateCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Snapshot of everything the gate looks at.
#[derive(Debug, Clone, Copy)]
pub struct GateContext {
    pub now: DateTime<Utc>,
    /// Source of the data that prompted the decision.
    pub data_source: Option<BarSource>,
    /// Paper run over recorded bars; file replay data stands in for live.
    pub simulated: bool,
    pub is_trading_day: bool,
    pub slot_time: DateTime<Utc>,
    pub market_close: DateTime<Utc>,
    pub enabled: bool,
    pub state: StreamState,
    pub committed: bool,
    pub entry_detected: bool,
    pub breakout_levels_computed: bool,
}

/// Result of [`evaluate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    pub allowed: bool,
    pub failed: Vec<GateCheck>,
}

impl GateDecision {
    /// Names of the failed checks.
    #[must_use]
    pub fn failed_names(&self) -> Vec<&'static str> {
        self.failed.iter().map(|c| c.name()).collect()
    }

    /// Denied, and only for expected reasons.
    #[must_use]
    pub fn is_benign_denial(&self) -> bool {
        !self.allowed && self.failed.iter().all(|c| c.is_benign())
    }
}

/// Evaluate every check against `ctx`.
#[must_use]
pub fn evaluate(ctx: &GateContext) -> GateDecision {
    let failed: Vec<GateCheck> = GateCheck::ALL
        .into_iter()
        .filter(|check| !passes(*check, ctx))
        .collect();
    GateDecision {
        allowed: failed.is_empty(),
        failed,
    }
}

fn passes(check: GateCheck, ctx: &GateContext) -> bool {
    match check {
        GateCheck::RealtimeDataOnly => ctx.data_source.is_some_and(|source| {
            source.is_live() || (ctx.simulated && source == BarSource::FileReplay)
        }),
        GateCheck::ValidTradingDay => ctx.is_trading_day,
        GateCheck::SessionActive => ctx.now < ctx.market_close,
        GateCheck::SlotTimeReached => ctx.now >= ctx.slot_time,
        GateCheck::StreamEnabled => ctx.enabled,
        GateCheck::StreamArmedNotCommitted => !ctx.committed && ctx.state != StreamState::Done,
        GateCheck::StateIsRangeLocked => ctx.state == StreamState::RangeLocked,
        GateCheck::EntryNotAlreadyDetected => !ctx.entry_detected,
        GateCheck::BreakoutLevelsComputed => ctx.breakout_levels_computed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx() -> GateContext {
        GateContext {
            now: Utc.with_ymd_and_hms(2025, 3, 10, 14, 1, 0).unwrap(),
            data_source: Some(BarSource::Live),
            simulated: false,
            is_trading_day: true,
            slot_time: Utc.with_ymd_and_hms(2025, 3, 10, 14, 0, 0).unwrap(),
            market_close: Utc.with_ymd_and_hms(2025, 3, 10, 21, 0, 0).unwrap(),
            enabled: true,
            state: StreamState::RangeLocked,
            committed: false,
            entry_detected: false,
            breakout_levels_computed: true,
        }
    }

    #[test]
    fn all_checks_pass_for_locked_live_stream() {
        let decision = evaluate(&ctx());
        assert!(decision.allowed);
        assert!(decision.failed.is_empty());
    }

    #[test]
    fn historical_data_is_refused() {
        let decision = evaluate(&GateContext {
            data_source: Some(BarSource::RequestedHistorical),
            ..ctx()
        });
        assert!(!decision.allowed);
        assert_eq!(decision.failed_names(), vec!["realtime_data_only"]);
        assert!(!decision.is_benign_denial());
    }

    #[test]
    fn file_replay_passes_only_in_a_simulated_run() {
        let live_run = evaluate(&GateContext {
            data_source: Some(BarSource::FileReplay),
            ..ctx()
        });
        assert_eq!(live_run.failed, vec![GateCheck::RealtimeDataOnly]);

        let simulated = GateContext {
            simulated: true,
            ..ctx()
        };
        assert!(evaluate(&GateContext {
            data_source: Some(BarSource::FileReplay),
            ..simulated
        })
        .allowed);
        assert_eq!(
            evaluate(&GateContext {
                data_source: Some(BarSource::RequestedHistorical),
                ..simulated
            })
            .failed,
            vec![GateCheck::RealtimeDataOnly]
        );
    }

    #[test]
    fn denial_lists_every_failed_check() {
        let decision = evaluate(&GateContext {
            now: Utc.with_ymd_and_hms(2025, 3, 10, 13, 0, 0).unwrap(),
            state: StreamState::RangeBuilding,
            breakout_levels_computed: false,
            ..ctx()
        });
        assert_eq!(
            decision.failed,
            vec![
                GateCheck::SlotTimeReached,
                GateCheck::StateIsRangeLocked,
                GateCheck::BreakoutLevelsComputed
            ]
        );
    }

    #[test]
    fn already_detected_entry_is_benign() {
        let decision = evaluate(&GateContext {
            entry_detected: true,
            ..ctx()
        });
        assert!(decision.is_benign_denial());
    }

    #[test]
    fn after_market_close_session_is_inactive() {
        let decision = evaluate(&GateContext {
            now: Utc.with_ymd_and_hms(2025, 3, 10, 21, 0, 0).unwrap(),
            ..ctx()
        });
        assert_eq!(decision.failed, vec![GateCheck::SessionActive]);
    }
}
