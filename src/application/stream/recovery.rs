//! Restart recovery.
//!
//! A restored stream trusts its persisted record for state and range and the
//! execution ledger for everything order related. A locked range is never
//! recomputed; a locked stream without a range is rebuilt only when no order
//! was ever submitted and hydration covers the whole window without gaps.
//! A locked stream that never placed an order and should not trade (range
//! invalidated, stream disabled) commits its no-trade outcome here. A stream
//! restored with a fail-closed flatten outstanding goes straight back to
//! flattening.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use super::{StreamConfig, StreamDeps, StreamMachine, StreamSettings};
use crate::application::health::IncidentKind;
use crate::application::journal::StreamJournal;
use crate::domain::{
    BreakoutLevels, NoTradeReason, OrderKind, OrderLifecycle, StreamState, TerminalReason,
};
use crate::error::Result;
use crate::port::Event;

impl StreamMachine {
    /// Rebuild a machine from its persisted record.
    pub async fn restore(
        config: StreamConfig,
        settings: Arc<StreamSettings>,
        deps: StreamDeps,
        record: StreamJournal,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let mut machine = Self::from_record(config, settings, deps, record, now);
        if machine.record.committed {
            machine.awaiting_hydration = false;
            info!(
                stream = %machine.config.key,
                reason = ?machine.record.terminal_reason,
                "Restored committed stream"
            );
            return Ok(machine);
        }

        machine.load_intents();
        match machine.record.state {
            StreamState::PreHydration | StreamState::Armed | StreamState::RangeBuilding => {
                info!(
                    stream = %machine.config.key,
                    state = %machine.record.state.as_str(),
                    "Resuming stream; re-hydrating"
                );
            }
            StreamState::RangeLocked => {
                if let Some(range) = machine.record.range.clone() {
                    machine.awaiting_hydration = false;
                    if let Some(reason) = machine.unplaced_no_trade() {
                        warn!(
                            stream = %machine.config.key,
                            reason = ?reason,
                            "Locked stream restored before its no-trade commit"
                        );
                        machine.commit(TerminalReason::NoTrade(reason), now).await?;
                        return Ok(machine);
                    }
                    machine.levels = Some(BreakoutLevels::from_range(&range, &machine.config.spec));
                    if machine.long_intent.is_none() && machine.short_intent.is_none() {
                        // Intent ids are deterministic, so re-planning yields the same ids.
                        machine.plan_entries(&range, now)?;
                    }
                    machine.reconcile_orders(now).await?;
                } else {
                    warn!(
                        stream = %machine.config.key,
                        "Locked stream has no persisted range; awaiting hydration evidence"
                    );
                    machine.rebuild_pending = true;
                }
            }
            StreamState::Done => {
                machine.awaiting_hydration = false;
                machine
                    .suspend("record in DONE without a commit", now)
                    .await?;
            }
        }
        Ok(machine)
    }

    /// No-trade outcome owed by a locked stream that never submitted an order.
    fn unplaced_no_trade(&self) -> Option<NoTradeReason> {
        if self.deps.journal.any_submission_for(&self.config.key) {
            return None;
        }
        if self.record.range_invalidated {
            Some(NoTradeReason::RangeInvalidated)
        } else if !self.config.enabled {
            Some(NoTradeReason::Disabled)
        } else {
            None
        }
    }

    fn load_intents(&mut self) {
        let journal = &self.deps.journal;
        self.long_intent = self
            .record
            .long_intent_id
            .as_ref()
            .and_then(|id| journal.get_entry(id))
            .map(|entry| entry.intent);
        self.short_intent = self
            .record
            .short_intent_id
            .as_ref()
            .and_then(|id| journal.get_entry(id))
            .map(|entry| entry.intent);
    }

    /// Rebuild the order lifecycle from the execution ledger.
    async fn reconcile_orders(&mut self, now: DateTime<Utc>) -> Result<()> {
        let intents = self.planned_intents();
        let filled = intents.iter().find_map(|intent| {
            self.deps
                .journal
                .get_entry(&intent.id)
                .filter(|entry| entry.entry_filled() > 0)
        });

        if let Some(entry) = filled {
            let intent_id = entry.intent.id.clone();
            if self.record.active_intent_id.as_ref() != Some(&intent_id) {
                warn!(
                    stream = %self.config.key,
                    intent_id = %intent_id,
                    "Ledger shows a filled entry the record did not know about"
                );
            }
            self.record.entry_detected = true;
            self.record.active_intent_id = Some(intent_id.clone());

            if entry.exit_filled() >= entry.entry_filled() {
                let reason = if entry.order(OrderKind::Target).is_some_and(|o| o.filled > 0) {
                    TerminalReason::TargetHit
                } else if entry.order(OrderKind::Stop).is_some_and(|o| o.filled > 0) {
                    TerminalReason::StopHit
                } else if now >= self.config.market_close {
                    TerminalReason::MarketCloseFlattened
                } else {
                    TerminalReason::ProtectiveFailureFlattened
                };
                info!(stream = %self.config.key, reason = %reason, "Position closed before restart");
                return self.commit(reason, now).await;
            }

            if self.record.flatten_pending {
                warn!(
                    stream = %self.config.key,
                    intent_id = %intent_id,
                    open = entry.open_quantity(),
                    "Restored with a fail-closed flatten outstanding"
                );
                return self.fail_closed("flatten pending at restart", now).await;
            }

            self.record.order_state = OrderLifecycle::EntryFilled;
            self.persist(now)?;
            info!(
                stream = %self.config.key,
                intent_id = %intent_id,
                open = entry.open_quantity(),
                "Restored open position; checking protectives"
            );
            return self.ensure_protectives(now).await;
        }

        let submitted = intents
            .iter()
            .any(|intent| self.deps.journal.is_submitted(&intent.id));
        self.record.order_state = if submitted {
            OrderLifecycle::EntrySubmitted
        } else {
            OrderLifecycle::NoEntry
        };
        self.persist(now)?;
        info!(
            stream = %self.config.key,
            order_state = ?self.record.order_state,
            "Restored locked stream"
        );
        if submitted {
            self.check_entries_exhausted(now).await?;
        }
        Ok(())
    }

    /// Second half of a rangeless restore, run once hydration arrives.
    pub(super) async fn finish_rebuild(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.rebuild_pending = false;
        if self.deps.journal.any_submission_for(&self.config.key) {
            return self
                .suspend("orders were submitted before the range was persisted", now)
                .await;
        }
        if !self.buffer.covers_window(&self.settings.gap_policy) {
            return self
                .suspend("hydrated bars do not cover the range window", now)
                .await;
        }
        let Some(range) = self.buffer.compute() else {
            return self.suspend("no bars available to rebuild the range", now).await;
        };

        info!(
            stream = %self.config.key,
            high = %range.range_high,
            low = %range.range_low,
            bars = range.bars_used,
            "Range rebuilt from hydration"
        );
        self.record.range = Some(range.clone());
        self.persist(now)?;
        self.deps.health.alert(Event::RangeLocked {
            stream: self.config.key.clone(),
            range: range.clone(),
        });
        if !self.config.enabled {
            return self
                .commit(TerminalReason::NoTrade(NoTradeReason::Disabled), now)
                .await;
        }
        self.plan_entries(&range, now)?;
        self.place_entries(now).await
    }

    async fn suspend(&mut self, reason: &str, now: DateTime<Utc>) -> Result<()> {
        error!(stream = %self.config.key, reason, "Suspending stream after restart");
        self.deps.health.record_incident(
            IncidentKind::RestartSuspended,
            Some(&self.config.key),
            reason,
            now,
        )?;
        self.commit(TerminalReason::Suspended(reason.to_string()), now)
            .await
    }
}
