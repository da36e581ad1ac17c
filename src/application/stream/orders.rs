//! Order handling for a locked stream: entries, protectives, break-even,
//! exits, market close and commit.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::StreamMachine;
use crate::application::health::IncidentKind;
use crate::application::journal::OrderRecord;
use crate::application::retry::RetryPolicy;
use crate::domain::{
    Bar, BreakoutLevels, BrokerOrderId, Direction, EntryOrderType, Intent, IntentId,
    IntentParams, NoTradeReason, OrderKind, OrderLifecycle, RangeWindow, StreamState,
    TerminalReason, TriggerReason,
};
use crate::error::{AdapterError, Result};
use crate::port::{
    CancelResult, Event, FillReport, FlattenResult, OcoGroup, OrderResult, OrderStatus,
    OrderUpdate,
};

/// Final outcome of a submit or modify after retries.
#[derive(Debug)]
enum Submission {
    Accepted(BrokerOrderId),
    AlreadyFilled,
    Rejected(String),
    Exhausted(String),
}

impl StreamMachine {
    /// Derive the entry intents for a freshly locked range and record them.
    pub(super) fn plan_entries(&mut self, range: &RangeWindow, now: DateTime<Utc>) -> Result<()> {
        let levels = BreakoutLevels::from_range(range, &self.config.spec);
        self.levels = Some(levels);

        let (long, short) = match levels.crossed_at_lock(range.freeze_close) {
            Some(direction) => {
                let intent = self.derive_intent(
                    range,
                    levels,
                    direction,
                    EntryOrderType::Limit,
                    TriggerReason::ImmediateAtLock,
                );
                info!(
                    stream = %self.config.key,
                    direction = %direction,
                    freeze_close = %range.freeze_close,
                    "Freeze close already through breakout level; immediate entry"
                );
                match direction {
                    Direction::Long => (Some(intent), None),
                    Direction::Short => (None, Some(intent)),
                }
            }
            None => (
                Some(self.derive_intent(
                    range,
                    levels,
                    Direction::Long,
                    EntryOrderType::StopMarket,
                    TriggerReason::BreakoutStop,
                )),
                Some(self.derive_intent(
                    range,
                    levels,
                    Direction::Short,
                    EntryOrderType::StopMarket,
                    TriggerReason::BreakoutStop,
                )),
            ),
        };

        for intent in [&long, &short].into_iter().flatten() {
            self.deps.journal.record_intent(intent, now)?;
        }
        self.record.long_intent_id = long.as_ref().map(|i| i.id.clone());
        self.record.short_intent_id = short.as_ref().map(|i| i.id.clone());
        self.long_intent = long;
        self.short_intent = short;
        info!(
            stream = %self.config.key,
            long_level = %levels.long,
            short_level = %levels.short,
            "Breakout levels computed"
        );
        self.persist(now)
    }

    fn derive_intent(
        &self,
        range: &RangeWindow,
        levels: BreakoutLevels,
        direction: Direction,
        entry_type: EntryOrderType,
        trigger_reason: TriggerReason,
    ) -> Intent {
        let entry_price = match entry_type {
            EntryOrderType::Limit => range.freeze_close,
            EntryOrderType::StopMarket => levels.level(direction),
        };
        Intent::derive(IntentParams {
            stream: &self.config.key,
            direction,
            entry_type,
            entry_price,
            range,
            levels,
            spec: &self.config.spec,
            quantity: self.settings.quantity,
            break_even_fraction: self.settings.break_even_fraction,
            trigger_reason,
        })
    }

    fn intent_for(&self, direction: Direction) -> Option<&Intent> {
        match direction {
            Direction::Long => self.long_intent.as_ref(),
            Direction::Short => self.short_intent.as_ref(),
        }
    }

    pub(super) fn planned_intents(&self) -> Vec<Intent> {
        [&self.long_intent, &self.short_intent]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }

    fn is_immediate(&self) -> bool {
        self.planned_intents()
            .iter()
            .any(|i| i.trigger_reason == TriggerReason::ImmediateAtLock)
    }

    fn order_of(&self, intent_id: &IntentId, kind: OrderKind) -> Option<OrderRecord> {
        self.deps
            .journal
            .get_entry(intent_id)
            .and_then(|entry| entry.order(kind).cloned())
    }

    fn open_quantity(&self, intent_id: &IntentId) -> u32 {
        self.deps
            .journal
            .get_entry(intent_id)
            .map_or(0, |entry| entry.open_quantity())
    }

    /// Submit the planned entries once the gate admits them.
    pub(super) async fn place_entries(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.record.committed || self.record.order_state != OrderLifecycle::NoEntry {
            return Ok(());
        }
        if !self.admit("submit_entry", now).allowed {
            return Ok(());
        }

        let intents = self.planned_intents();
        let adapter = Arc::clone(&self.deps.adapter);
        let mut live = 0usize;
        for intent in &intents {
            self.deps.journal.record_intent(intent, now)?;
            if self.deps.journal.is_submitted(&intent.id) {
                debug!(intent_id = %intent.id, "Entry already submitted");
                live += 1;
                continue;
            }
            let outcome = self
                .submit_with_retry(self.settings.entry_retry, "submit_entry", &intent.id, || {
                    adapter.submit_entry(intent)
                })
                .await;
            match outcome {
                Submission::Accepted(broker_order_id) => {
                    info!(
                        stream = %self.config.key,
                        intent_id = %intent.id,
                        direction = %intent.direction,
                        price = %intent.entry_price,
                        broker_order_id = %broker_order_id,
                        "Entry submitted"
                    );
                    self.deps.journal.record_submission(
                        &intent.id,
                        OrderKind::Entry,
                        Some(broker_order_id),
                        intent.entry_price,
                        intent.quantity,
                        now,
                    )?;
                    live += 1;
                }
                Submission::AlreadyFilled => {
                    self.deps.journal.record_submission(
                        &intent.id,
                        OrderKind::Entry,
                        None,
                        intent.entry_price,
                        intent.quantity,
                        now,
                    )?;
                    live += 1;
                }
                Submission::Rejected(reason) | Submission::Exhausted(reason) => {
                    self.reject(&intent.id, OrderKind::Entry, &reason, now)?;
                }
            }
        }

        if live == 0 {
            return self
                .commit(TerminalReason::NoTrade(NoTradeReason::EntryRejected), now)
                .await;
        }
        self.record.order_state = OrderLifecycle::EntrySubmitted;
        if self.is_immediate() {
            if let Some(intent) = intents.first() {
                self.record.entry_detected = true;
                self.record.active_intent_id = Some(intent.id.clone());
                self.deps.health.alert(Event::EntryTriggered {
                    stream: self.config.key.clone(),
                    intent_id: intent.id.clone(),
                    direction: intent.direction,
                    price: intent.entry_price,
                });
            }
        }
        self.persist(now)
    }

    fn reject(&self, intent_id: &IntentId, kind: OrderKind, reason: &str, now: DateTime<Utc>) -> Result<()> {
        warn!(
            stream = %self.config.key,
            intent_id = %intent_id,
            kind = %kind,
            reason,
            "Order rejected"
        );
        self.deps.journal.record_rejection(intent_id, kind, reason, now)?;
        self.deps.health.alert(Event::OrderRejected {
            stream: self.config.key.clone(),
            intent_id: intent_id.clone(),
            kind,
            reason: reason.to_string(),
        });
        Ok(())
    }

    pub(super) async fn on_locked_bar(&mut self, bar: &Bar, now: DateTime<Utc>) -> Result<()> {
        if now >= self.config.market_close {
            return self.on_market_close(now).await;
        }
        if self.record.flatten_pending {
            return self.fail_closed("flatten retry", now).await;
        }
        if self.record.order_state == OrderLifecycle::NoEntry {
            self.place_entries(now).await?;
            if self.record.committed {
                return Ok(());
            }
        }
        if !self.record.entry_detected && self.record.order_state == OrderLifecycle::EntrySubmitted {
            self.detect_breakout(bar, now).await?;
        }
        if self.record.order_state == OrderLifecycle::ProtectiveSubmitted {
            self.check_break_even(bar, now).await?;
        }
        Ok(())
    }

    pub(super) async fn on_locked_tick(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.rebuild_pending {
            return Ok(());
        }
        if now >= self.config.market_close {
            return self.on_market_close(now).await;
        }
        if self.record.flatten_pending {
            return self.fail_closed("flatten retry", now).await;
        }
        Ok(())
    }

    fn entry_live(&self, direction: Direction) -> bool {
        self.intent_for(direction).is_some_and(|intent| {
            self.order_of(&intent.id, OrderKind::Entry)
                .is_some_and(|o| o.is_working() || o.filled > 0)
        })
    }

    async fn detect_breakout(&mut self, bar: &Bar, now: DateTime<Utc>) -> Result<()> {
        let Some(levels) = self.levels else {
            return Ok(());
        };
        let long_hit = self.entry_live(Direction::Long) && bar.high >= levels.long;
        let short_hit = self.entry_live(Direction::Short) && bar.low <= levels.short;
        let direction = match (long_hit, short_hit) {
            (true, true) => {
                // Both levels inside one bar: the side nearer the open broke first.
                if levels.long - bar.open <= bar.open - levels.short {
                    Direction::Long
                } else {
                    Direction::Short
                }
            }
            (true, false) => Direction::Long,
            (false, true) => Direction::Short,
            (false, false) => return Ok(()),
        };
        self.mark_entry_detected(direction, now).await
    }

    async fn mark_entry_detected(&mut self, direction: Direction, now: DateTime<Utc>) -> Result<()> {
        let Some(intent) = self.intent_for(direction).cloned() else {
            return Ok(());
        };
        self.record.entry_detected = true;
        self.record.active_intent_id = Some(intent.id.clone());
        self.persist(now)?;
        info!(
            stream = %self.config.key,
            intent_id = %intent.id,
            direction = %direction,
            level = %intent.breakout_level,
            "Breakout detected"
        );
        self.deps.health.alert(Event::EntryTriggered {
            stream: self.config.key.clone(),
            intent_id: intent.id.clone(),
            direction,
            price: intent.entry_price,
        });
        self.cancel_opposite_entry(direction, now).await
    }

    async fn cancel_opposite_entry(&mut self, direction: Direction, now: DateTime<Utc>) -> Result<()> {
        let Some(opposite) = self.intent_for(direction.opposite()).map(|i| i.id.clone()) else {
            return Ok(());
        };
        self.cancel_order(&opposite, OrderKind::Entry, now).await
    }

    /// Cancel one order if the ledger shows it working.
    async fn cancel_order(&self, intent_id: &IntentId, kind: OrderKind, now: DateTime<Utc>) -> Result<()> {
        if !self.order_of(intent_id, kind).is_some_and(|o| o.is_working()) {
            return Ok(());
        }
        let adapter = Arc::clone(&self.deps.adapter);
        match self.bounded("cancel", adapter.cancel(intent_id, kind)).await {
            Ok(CancelResult::Cancelled | CancelResult::NotFound) => {
                self.deps.journal.record_cancel(intent_id, kind, now)?;
                info!(stream = %self.config.key, intent_id = %intent_id, kind = %kind, "Order cancelled");
            }
            Ok(CancelResult::AlreadyFilled) => {
                info!(
                    stream = %self.config.key,
                    intent_id = %intent_id,
                    kind = %kind,
                    "Cancel raced a fill; awaiting fill report"
                );
            }
            Err(e) => {
                warn!(
                    stream = %self.config.key,
                    intent_id = %intent_id,
                    kind = %kind,
                    error = %e,
                    "Cancel failed"
                );
            }
        }
        Ok(())
    }

    /// Incremental fill for one of this stream's orders.
    pub async fn on_fill(&mut self, fill: &FillReport, now: DateTime<Utc>) -> Result<()> {
        if self.record.committed {
            warn!(
                stream = %self.config.key,
                intent_id = %fill.intent_id,
                kind = %fill.kind,
                delta = fill.delta,
                "Fill after commit"
            );
            self.deps.health.record_incident(
                IncidentKind::UnexpectedFill,
                Some(&self.config.key),
                format!("{} fill of {} after commit", fill.kind, fill.delta),
                now,
            )?;
            return Ok(());
        }

        // The ledger decides what the order was, not the report.
        let kind = fill
            .broker_order_id
            .as_ref()
            .and_then(|b| self.deps.journal.locate_broker_order(b))
            .filter(|(intent_id, _)| *intent_id == fill.intent_id)
            .map_or(fill.kind, |(_, kind)| kind);

        let cumulative = self.deps.journal.record_fill(
            &fill.intent_id,
            kind,
            fill.price,
            fill.delta,
            now,
        )?;
        info!(
            stream = %self.config.key,
            intent_id = %fill.intent_id,
            kind = %kind,
            price = %fill.price,
            delta = fill.delta,
            cumulative,
            "Fill recorded"
        );

        match kind {
            OrderKind::Entry => self.on_entry_fill(&fill.intent_id, now).await,
            OrderKind::Stop | OrderKind::Target => self.on_exit_fill(&fill.intent_id, kind, now).await,
        }
    }

    async fn on_entry_fill(&mut self, intent_id: &IntentId, now: DateTime<Utc>) -> Result<()> {
        let Some(direction) = self
            .deps
            .journal
            .get_entry(intent_id)
            .map(|e| e.intent.direction)
        else {
            return Ok(());
        };

        if !self.record.entry_detected {
            self.mark_entry_detected(direction, now).await?;
        } else if self.record.active_intent_id.as_ref() != Some(intent_id) {
            error!(
                stream = %self.config.key,
                intent_id = %intent_id,
                "Opposite entry filled after detection; flattening it"
            );
            self.deps.health.record_incident(
                IncidentKind::UnexpectedFill,
                Some(&self.config.key),
                format!("opposite entry {intent_id} filled"),
                now,
            )?;
            if !self.flatten_with_retry(intent_id, now).await? {
                self.deps.health.record_incident(
                    IncidentKind::FlattenFailed,
                    Some(&self.config.key),
                    format!("could not flatten opposite entry {intent_id}"),
                    now,
                )?;
            }
            return Ok(());
        }

        if matches!(
            self.record.order_state,
            OrderLifecycle::NoEntry | OrderLifecycle::EntrySubmitted
        ) {
            self.record.order_state = OrderLifecycle::EntryFilled;
            self.persist(now)?;
        }
        self.ensure_protectives(now).await
    }

    /// Make the protective pair match the open quantity. Fails closed.
    pub(super) async fn ensure_protectives(&mut self, now: DateTime<Utc>) -> Result<()> {
        let Some(intent_id) = self.record.active_intent_id.clone() else {
            return Ok(());
        };
        let Some(entry) = self.deps.journal.get_entry(&intent_id) else {
            return Ok(());
        };
        let open = entry.open_quantity();
        if open == 0 {
            return Ok(());
        }

        let stop_price = entry.break_even_stop.unwrap_or(entry.intent.stop_price);
        let oco = OcoGroup::for_intent(&intent_id);
        let adapter = Arc::clone(&self.deps.adapter);
        let intent = entry.intent.clone();
        let mut failure = None;

        for (kind, price) in [
            (OrderKind::Stop, stop_price),
            (OrderKind::Target, intent.target_price),
        ] {
            let sized = entry.order(kind).is_some_and(|o| {
                o.is_working() && o.quantity.saturating_sub(o.filled) == open
            });
            if sized {
                continue;
            }
            let outcome = self
                .submit_with_retry(
                    self.settings.protective_retry,
                    "submit_protective",
                    &intent_id,
                    || adapter.submit_protective(&intent, kind, price, open, &oco),
                )
                .await;
            match outcome {
                Submission::Accepted(broker_order_id) => {
                    info!(
                        stream = %self.config.key,
                        intent_id = %intent_id,
                        kind = %kind,
                        price = %price,
                        quantity = open,
                        oco = %oco,
                        "Protective submitted"
                    );
                    self.deps.journal.record_submission(
                        &intent_id,
                        kind,
                        Some(broker_order_id),
                        price,
                        open,
                        now,
                    )?;
                }
                Submission::AlreadyFilled => {
                    self.deps
                        .journal
                        .record_submission(&intent_id, kind, None, price, open, now)?;
                }
                Submission::Rejected(reason) | Submission::Exhausted(reason) => {
                    failure = Some((kind, reason));
                    break;
                }
            }
        }

        if let Some((kind, reason)) = failure {
            self.reject(&intent_id, kind, &reason, now)?;
            return self.fail_closed(&reason, now).await;
        }
        if matches!(
            self.record.order_state,
            OrderLifecycle::EntrySubmitted | OrderLifecycle::EntryFilled
        ) {
            self.record.order_state = OrderLifecycle::ProtectiveSubmitted;
            self.persist(now)?;
        }
        Ok(())
    }

    /// Flatten the active position and stand the stream down.
    pub(super) async fn fail_closed(&mut self, reason: &str, now: DateTime<Utc>) -> Result<()> {
        let Some(intent_id) = self.record.active_intent_id.clone() else {
            return Ok(());
        };
        error!(
            stream = %self.config.key,
            intent_id = %intent_id,
            reason,
            "Protective orders unconfirmed; flattening"
        );
        if !self.record.flatten_pending {
            self.record.flatten_pending = true;
            self.persist(now)?;
        }
        if !self.flatten_with_retry(&intent_id, now).await? {
            self.deps.health.record_incident(
                IncidentKind::FlattenFailed,
                Some(&self.config.key),
                format!("flatten after protective failure did not complete: {reason}"),
                now,
            )?;
            self.deps.health.alert(Event::ProtectiveFailure {
                stream: self.config.key.clone(),
                intent_id,
                flattened: false,
            });
            return Ok(());
        }
        self.record.flatten_pending = false;
        self.deps.health.record_incident(
            IncidentKind::ProtectiveFailure,
            Some(&self.config.key),
            format!("position flattened: {reason}"),
            now,
        )?;
        self.deps.health.alert(Event::ProtectiveFailure {
            stream: self.config.key.clone(),
            intent_id,
            flattened: true,
        });
        self.record.order_state = OrderLifecycle::FlattenedFailsafe;
        self.persist(now)?;
        self.commit(TerminalReason::ProtectiveFailureFlattened, now)
            .await
    }

    /// Flatten one intent's position. Returns whether it is known flat.
    async fn flatten_with_retry(&self, intent_id: &IntentId, now: DateTime<Utc>) -> Result<bool> {
        let policy = self.settings.protective_retry;
        let adapter = Arc::clone(&self.deps.adapter);
        let instrument = self.config.instrument().clone();
        let mut last = String::new();
        for attempt in 0..policy.max_attempts {
            match self
                .bounded("flatten", adapter.flatten(&instrument, intent_id))
                .await
            {
                Ok(result @ (FlattenResult::Flattened { .. } | FlattenResult::AlreadyFlat)) => {
                    let open = self.open_quantity(intent_id);
                    if open > 0 {
                        self.deps.journal.record_flatten(intent_id, open, now)?;
                    }
                    info!(
                        stream = %self.config.key,
                        intent_id = %intent_id,
                        result = ?result,
                        closed = open,
                        "Position flat"
                    );
                    return Ok(true);
                }
                Ok(FlattenResult::Failed { reason }) => last = reason,
                Err(e) => last = e.to_string(),
            }
            warn!(
                stream = %self.config.key,
                intent_id = %intent_id,
                attempt = attempt + 1,
                reason = %last,
                "Flatten attempt failed"
            );
            if attempt + 1 < policy.max_attempts {
                policy.pause(attempt).await;
            }
        }
        error!(stream = %self.config.key, intent_id = %intent_id, reason = %last, "Flatten failed");
        Ok(false)
    }

    async fn on_exit_fill(&mut self, intent_id: &IntentId, kind: OrderKind, now: DateTime<Utc>) -> Result<()> {
        let Some(entry) = self.deps.journal.get_entry(intent_id) else {
            return Ok(());
        };
        self.cancel_opposite_entry(entry.intent.direction, now).await?;

        if entry.entry_filled() == 0 || entry.exit_filled() < entry.entry_filled() {
            // Partial exit: shrink the sibling to what is still open.
            return self.ensure_protectives(now).await;
        }

        let sibling = match kind {
            OrderKind::Stop => OrderKind::Target,
            _ => OrderKind::Stop,
        };
        self.cancel_order(intent_id, sibling, now).await?;
        self.cancel_order(intent_id, OrderKind::Entry, now).await?;
        let (lifecycle, reason) = match kind {
            OrderKind::Stop => (OrderLifecycle::StopFilled, TerminalReason::StopHit),
            _ => (OrderLifecycle::TargetFilled, TerminalReason::TargetHit),
        };
        self.record.order_state = lifecycle;
        self.persist(now)?;
        self.commit(reason, now).await
    }

    async fn check_break_even(&mut self, bar: &Bar, now: DateTime<Utc>) -> Result<()> {
        let Some(intent_id) = self.record.active_intent_id.clone() else {
            return Ok(());
        };
        let Some(entry) = self.deps.journal.get_entry(&intent_id) else {
            return Ok(());
        };
        if entry.break_even_stop.is_some() {
            return Ok(());
        }
        let Some(fill_price) = entry
            .order(OrderKind::Entry)
            .and_then(OrderRecord::average_fill_price)
        else {
            return Ok(());
        };
        let intent = &entry.intent;
        let trigger =
            intent.break_even_trigger_for_fill(fill_price, self.settings.break_even_fraction);
        let touched = match intent.direction {
            Direction::Long => bar.high >= trigger,
            Direction::Short => bar.low <= trigger,
        };
        if !touched && !self.record.break_even_pending {
            return Ok(());
        }
        if !self.record.break_even_pending {
            self.record.break_even_pending = true;
            self.persist(now)?;
        }

        let new_stop = intent.break_even_stop_price;
        let adapter = Arc::clone(&self.deps.adapter);
        let outcome = self
            .submit_with_retry(self.settings.protective_retry, "modify_stop", &intent_id, || {
                adapter.modify_stop(&intent_id, new_stop)
            })
            .await;
        match outcome {
            Submission::Accepted(_) => {
                if self.deps.journal.record_break_even(&intent_id, new_stop, now)? {
                    info!(
                        stream = %self.config.key,
                        intent_id = %intent_id,
                        trigger = %trigger,
                        stop = %new_stop,
                        "Stop moved to break-even"
                    );
                }
                self.record.break_even_pending = false;
                self.persist(now)?;
            }
            Submission::AlreadyFilled => {
                info!(stream = %self.config.key, intent_id = %intent_id, "Stop already filled; break-even skipped");
                self.record.break_even_pending = false;
                self.persist(now)?;
            }
            Submission::Rejected(reason) | Submission::Exhausted(reason) => {
                warn!(
                    stream = %self.config.key,
                    intent_id = %intent_id,
                    reason = %reason,
                    "Break-even modify failed; retrying next bar"
                );
            }
        }
        Ok(())
    }

    async fn on_market_close(&mut self, now: DateTime<Utc>) -> Result<()> {
        let active = self.record.active_intent_id.clone();
        let open = active.as_ref().map_or(0, |id| self.open_quantity(id));
        let Some(intent_id) = active.filter(|_| open > 0) else {
            info!(stream = %self.config.key, "Market close without a position");
            return self
                .commit(TerminalReason::NoTrade(NoTradeReason::MarketClose), now)
                .await;
        };

        info!(stream = %self.config.key, intent_id = %intent_id, open, "Market close; flattening");
        if !self.flatten_with_retry(&intent_id, now).await? {
            self.deps.health.record_incident(
                IncidentKind::FlattenFailed,
                Some(&self.config.key),
                "flatten at market close did not complete",
                now,
            )?;
            return Ok(());
        }
        self.commit(TerminalReason::MarketCloseFlattened, now).await
    }

    /// Order status change reported by the venue.
    pub async fn on_order_update(&mut self, update: &OrderUpdate, now: DateTime<Utc>) -> Result<()> {
        if self.record.committed {
            debug!(stream = %self.config.key, intent_id = %update.intent_id, "Order update ignored: stream committed");
            return Ok(());
        }
        match &update.status {
            OrderStatus::Working => {
                debug!(stream = %self.config.key, intent_id = %update.intent_id, kind = %update.kind, "Order working");
                return Ok(());
            }
            OrderStatus::Cancelled => {
                if self
                    .order_of(&update.intent_id, update.kind)
                    .is_some_and(|o| !o.cancelled)
                {
                    self.deps
                        .journal
                        .record_cancel(&update.intent_id, update.kind, now)?;
                }
            }
            OrderStatus::Rejected { reason } => {
                self.reject(&update.intent_id, update.kind, reason, now)?;
            }
        }

        let active = self.record.active_intent_id.as_ref() == Some(&update.intent_id);
        if update.kind.is_protective() && active && self.open_quantity(&update.intent_id) > 0 {
            warn!(
                stream = %self.config.key,
                intent_id = %update.intent_id,
                kind = %update.kind,
                "Protective order no longer working; resubmitting"
            );
            return self.ensure_protectives(now).await;
        }
        if update.kind == OrderKind::Entry {
            return self.check_entries_exhausted(now).await;
        }
        Ok(())
    }

    /// Commit when no entry is working and nothing ever filled.
    pub(super) async fn check_entries_exhausted(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.record.order_state != OrderLifecycle::EntrySubmitted {
            return Ok(());
        }
        let any_live = self.planned_intents().iter().any(|intent| {
            self.order_of(&intent.id, OrderKind::Entry)
                .is_some_and(|o| o.is_working() || o.filled > 0)
        });
        if any_live {
            return Ok(());
        }
        self.commit(TerminalReason::NoTrade(NoTradeReason::EntryRejected), now)
            .await
    }

    /// Enter DONE, persist, then cancel every outstanding order.
    pub(super) async fn commit(&mut self, reason: TerminalReason, now: DateTime<Utc>) -> Result<()> {
        if self.record.committed {
            return Ok(());
        }
        let previous = self.record.state;
        self.record.committed = true;
        self.record.terminal_reason = Some(reason.clone());
        self.record.state = StreamState::Done;
        self.record.state_entered_at = now;
        self.record.order_state = OrderLifecycle::Committed;
        self.persist(now)?;
        info!(
            stream = %self.config.key,
            from = %previous.as_str(),
            reason = %reason,
            "Stream committed"
        );

        self.cancel_outstanding(now).await;
        self.deps.health.alert(Event::StreamCommitted {
            stream: self.config.key.clone(),
            reason,
        });
        Ok(())
    }

    async fn cancel_outstanding(&self, now: DateTime<Utc>) {
        let mut ids = self.deps.journal.intents_for(&self.config.key);
        for id in self.intent_ids() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        for id in &ids {
            for kind in [OrderKind::Entry, OrderKind::Stop, OrderKind::Target] {
                if let Err(e) = self.cancel_order(id, kind, now).await {
                    error!(
                        stream = %self.config.key,
                        intent_id = %id,
                        kind = %kind,
                        error = %e,
                        "Failed to journal cancel at commit"
                    );
                }
            }
        }
    }

    async fn submit_with_retry<F, Fut>(
        &self,
        policy: RetryPolicy,
        operation: &'static str,
        intent_id: &IntentId,
        mut call: F,
    ) -> Submission
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<OrderResult, AdapterError>>,
    {
        let mut last = String::new();
        for attempt in 0..policy.max_attempts {
            match self.bounded(operation, call()).await {
                Ok(OrderResult::Accepted { broker_order_id }) => {
                    return Submission::Accepted(broker_order_id)
                }
                Ok(OrderResult::AlreadyFilled) => return Submission::AlreadyFilled,
                Ok(OrderResult::Rejected { reason }) => return Submission::Rejected(reason),
                Ok(OrderResult::Transient { reason }) => last = reason,
                Err(e) => last = e.to_string(),
            }
            warn!(
                stream = %self.config.key,
                intent_id = %intent_id,
                operation,
                attempt = attempt + 1,
                max_attempts = policy.max_attempts,
                reason = %last,
                "Adapter call failed"
            );
            if attempt + 1 < policy.max_attempts {
                policy.pause(attempt).await;
            }
        }
        Submission::Exhausted(format!("{operation} failed after {} attempts: {last}", policy.max_attempts))
    }

    async fn bounded<T, Fut>(&self, operation: &'static str, call: Fut) -> std::result::Result<T, AdapterError>
    where
        Fut: Future<Output = std::result::Result<T, AdapterError>>,
    {
        let limit = self.settings.call_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout {
                operation,
                timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}
