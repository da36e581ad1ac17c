//! Per-stream state machine.
//!
//! ```text
//! PRE_HYDRATION → ARMED → RANGE_BUILDING → RANGE_LOCKED → DONE
//! ```
//!
//! A [`StreamMachine`] owns one stream for one trading date. States only move
//! forward. Every transition is saved through the [`StreamJournalStore`]
//! before the handler returns, and every order action is written to the
//! [`ExecutionJournal`] before the machine acts on it. Once committed the
//! machine ignores all further events.
//!
//! Order placement lives in `orders`, restart recovery in `recovery`.

mod orders;
mod recovery;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info, warn};

use super::health::{HealthMonitor, IncidentKind};
use super::journal::{ExecutionJournal, StreamJournal, StreamJournalStore};
use super::retry::RetryPolicy;
use super::risk::{evaluate, GateContext, GateDecision};
use crate::domain::{
    Bar, BarSource, BreakoutLevels, GapPolicy, GapStats, InsertOutcome, Instrument,
    InstrumentSpec, Intent, IntentId, NoTradeReason, RangeBuffer, RangeWindow, StreamKey,
    StreamState, TerminalReason,
};
use crate::error::Result;
use crate::port::{Event, ExecutionAdapter};

/// Static description of one stream for one trading date.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub key: StreamKey,
    pub spec: InstrumentSpec,
    pub enabled: bool,
    pub is_trading_day: bool,
    pub range_start: DateTime<Utc>,
    pub slot_time: DateTime<Utc>,
    pub market_close: DateTime<Utc>,
}

impl StreamConfig {
    #[must_use]
    pub fn instrument(&self) -> &Instrument {
        &self.key.instrument
    }
}

/// Engine-wide knobs shared by every stream.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub gap_policy: GapPolicy,
    pub hydration_timeout: Duration,
    pub lock_grace: Duration,
    pub quantity: u32,
    pub break_even_fraction: Decimal,
    pub entry_retry: RetryPolicy,
    pub protective_retry: RetryPolicy,
    /// Upper bound on a single adapter call.
    pub call_timeout: StdDuration,
    /// Paper run over recorded bars. File replay bars pass the realtime check.
    pub simulated: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            gap_policy: GapPolicy::default(),
            hydration_timeout: Duration::seconds(30),
            lock_grace: Duration::seconds(5),
            quantity: 1,
            break_even_fraction: dec!(0.65),
            entry_retry: RetryPolicy::default(),
            protective_retry: RetryPolicy::default(),
            call_timeout: StdDuration::from_secs(5),
            simulated: false,
        }
    }
}

/// Shared collaborators of every machine.
#[derive(Clone)]
pub struct StreamDeps {
    pub adapter: Arc<dyn ExecutionAdapter>,
    pub journal: Arc<ExecutionJournal>,
    pub store: Arc<dyn StreamJournalStore>,
    pub health: Arc<HealthMonitor>,
}

/// Lifecycle of one stream.
pub struct StreamMachine {
    config: StreamConfig,
    settings: Arc<StreamSettings>,
    deps: StreamDeps,
    record: StreamJournal,
    buffer: RangeBuffer,
    levels: Option<BreakoutLevels>,
    long_intent: Option<Intent>,
    short_intent: Option<Intent>,
    /// Source of the most recent bar seen, consulted by the gate.
    latest_source: Option<BarSource>,
    /// Newest close seen so far, including bars after slot time.
    last_close: Option<(DateTime<Utc>, Decimal, BarSource)>,
    awaiting_hydration: bool,
    hydration_deadline: DateTime<Utc>,
    post_slot_bar_seen: bool,
    last_gap_stats: GapStats,
    /// Restored in RANGE_LOCKED without a persisted range.
    rebuild_pending: bool,
}

impl StreamMachine {
    /// Create a fresh stream at `now` and persist its first record.
    pub fn create(
        config: StreamConfig,
        settings: Arc<StreamSettings>,
        deps: StreamDeps,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let mut record = StreamJournal::new(config.key.clone(), now);
        record.late_start = now > config.slot_time;
        let mut machine = Self::from_record(config, settings, deps, record, now);
        if machine.record.late_start {
            warn!(
                stream = %machine.config.key,
                slot_time = %machine.config.slot_time,
                "Stream created after slot time; it will not trade"
            );
        }
        machine.persist(now)?;
        info!(
            stream = %machine.config.key,
            enabled = machine.config.enabled,
            simulated = machine.settings.simulated,
            "Stream created"
        );
        Ok(machine)
    }

    fn from_record(
        config: StreamConfig,
        settings: Arc<StreamSettings>,
        deps: StreamDeps,
        record: StreamJournal,
        now: DateTime<Utc>,
    ) -> Self {
        let buffer = RangeBuffer::new(config.range_start, config.slot_time);
        let hydration_deadline = now + settings.hydration_timeout;
        Self {
            config,
            settings,
            deps,
            record,
            buffer,
            levels: None,
            long_intent: None,
            short_intent: None,
            latest_source: None,
            last_close: None,
            awaiting_hydration: true,
            hydration_deadline,
            post_slot_bar_seen: false,
            last_gap_stats: GapStats::default(),
            rebuild_pending: false,
        }
    }

    #[must_use]
    pub fn key(&self) -> &StreamKey {
        &self.config.key
    }

    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> StreamState {
        self.record.state
    }

    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.record.committed
    }

    /// Persisted view of this stream.
    #[must_use]
    pub fn record(&self) -> &StreamJournal {
        &self.record
    }

    #[must_use]
    pub fn range(&self) -> Option<&RangeWindow> {
        self.record.range.as_ref()
    }

    #[must_use]
    pub fn levels(&self) -> Option<BreakoutLevels> {
        self.levels
    }

    /// Incremental high/low of the range buffer.
    #[must_use]
    pub fn buffer_extremes(&self) -> (Option<Decimal>, Option<Decimal>) {
        (self.buffer.high(), self.buffer.low())
    }

    /// Intents this stream owns, for fill routing.
    #[must_use]
    pub fn intent_ids(&self) -> Vec<IntentId> {
        [&self.long_intent, &self.short_intent]
            .into_iter()
            .flatten()
            .map(|intent| intent.id.clone())
            .collect()
    }

    /// Window the engine should request from the bar provider, if any.
    #[must_use]
    pub fn hydration_window(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        if !self.awaiting_hydration || self.record.committed {
            return None;
        }
        let to = now.min(self.config.slot_time);
        Some((self.config.range_start, to.max(self.config.range_start)))
    }

    /// Deliver the hydration batch. `complete` is false when the provider
    /// failed or timed out and `bars` is whatever was available.
    pub async fn hydrate(&mut self, bars: Vec<Bar>, complete: bool, now: DateTime<Utc>) -> Result<()> {
        if self.record.committed || !self.awaiting_hydration {
            return Ok(());
        }
        let offered = bars.len();
        let mut accepted = 0usize;
        for bar in bars {
            if bar.timestamp > now {
                continue;
            }
            self.latest_source = Some(bar.source);
            self.note_close(&bar);
            if matches!(
                self.buffer.insert(bar),
                InsertOutcome::Inserted | InsertOutcome::Replaced
            ) {
                accepted += 1;
            }
        }
        self.awaiting_hydration = false;
        self.record.hydration_complete = complete;
        info!(
            stream = %self.config.key,
            offered,
            accepted,
            complete,
            "Hydration delivered"
        );
        if !complete {
            self.deps.health.alert(Event::HydrationIncomplete {
                stream: self.config.key.clone(),
                bars: self.buffer.len(),
            });
        }

        if self.rebuild_pending {
            return self.finish_rebuild(now).await;
        }
        if self.record.state == StreamState::PreHydration {
            self.transition(StreamState::Armed, now)?;
        } else {
            self.persist(now)?;
        }
        if self.record.state == StreamState::RangeBuilding {
            self.check_gaps(now)?;
        }
        self.advance(now).await
    }

    /// Clock tick: drives time-based transitions.
    pub async fn on_tick(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.record.committed {
            return Ok(());
        }
        if self.awaiting_hydration && now >= self.hydration_deadline {
            warn!(stream = %self.config.key, "Hydration timed out; proceeding with buffered bars");
            self.hydrate(Vec::new(), false, now).await?;
            if self.record.committed {
                return Ok(());
            }
        }
        self.advance(now).await?;
        if self.record.state == StreamState::RangeLocked && !self.record.committed {
            self.on_locked_tick(now).await?;
        }
        Ok(())
    }

    /// Closed bar for this stream's instrument.
    pub async fn on_bar(&mut self, bar: &Bar, now: DateTime<Utc>) -> Result<()> {
        if self.record.committed {
            debug!(stream = %self.config.key, bar = %bar.timestamp, "Bar ignored: stream committed");
            return Ok(());
        }
        self.latest_source = Some(bar.source);
        if bar.timestamp <= now {
            self.note_close(bar);
        }
        if bar.timestamp > self.config.slot_time {
            self.post_slot_bar_seen = true;
        }

        match self.record.state {
            StreamState::PreHydration | StreamState::Armed | StreamState::RangeBuilding => {
                let outcome = self.buffer.insert(bar.clone());
                if self.record.state == StreamState::RangeBuilding
                    && matches!(outcome, InsertOutcome::Inserted | InsertOutcome::Replaced)
                {
                    self.check_gaps(now)?;
                }
                self.advance(now).await?;
                if self.record.state == StreamState::RangeLocked && !self.record.committed {
                    self.on_locked_bar(bar, now).await?;
                }
            }
            StreamState::RangeLocked => {
                if self.rebuild_pending {
                    return Ok(());
                }
                self.on_locked_bar(bar, now).await?;
            }
            StreamState::Done => {}
        }
        Ok(())
    }

    fn note_close(&mut self, bar: &Bar) {
        let newer = self.last_close.map_or(true, |(ts, _, source)| {
            bar.timestamp > ts || (bar.timestamp == ts && bar.source > source)
        });
        if newer {
            self.last_close = Some((bar.timestamp, bar.close, bar.source));
        }
    }

    /// Move through the time-driven states as far as `now` allows.
    async fn advance(&mut self, now: DateTime<Utc>) -> Result<()> {
        loop {
            if self.record.committed {
                return Ok(());
            }
            match self.record.state {
                StreamState::PreHydration => return Ok(()),
                StreamState::Armed => {
                    if self.awaiting_hydration {
                        return Ok(());
                    }
                    if self.record.late_start {
                        return self.commit_late_start(now).await;
                    }
                    if now < self.config.range_start {
                        return Ok(());
                    }
                    self.transition(StreamState::RangeBuilding, now)?;
                    self.check_gaps(now)?;
                }
                StreamState::RangeBuilding => {
                    let grace_elapsed = now >= self.config.slot_time + self.settings.lock_grace;
                    if !(grace_elapsed || self.post_slot_bar_seen) || self.awaiting_hydration {
                        return Ok(());
                    }
                    return self.lock(now).await;
                }
                StreamState::RangeLocked | StreamState::Done => return Ok(()),
            }
        }
    }

    /// Re-evaluate gap tolerance after the buffer changed.
    fn check_gaps(&mut self, now: DateTime<Utc>) -> Result<()> {
        let stats = self.buffer.gap_stats(&self.settings.gap_policy);
        self.apply_gap_stats(stats, now)
    }

    fn apply_gap_stats(&mut self, stats: GapStats, now: DateTime<Utc>) -> Result<()> {
        if stats.cumulative > self.last_gap_stats.cumulative {
            warn!(
                stream = %self.config.key,
                largest_secs = stats.largest.num_seconds(),
                cumulative_secs = stats.cumulative.num_seconds(),
                recent_secs = stats.recent.num_seconds(),
                "Gap in range window"
            );
        }
        self.last_gap_stats = stats;
        if self.record.range_invalidated {
            return Ok(());
        }
        let Some(violation) = self.settings.gap_policy.check(&stats) else {
            return Ok(());
        };
        warn!(stream = %self.config.key, violation = %violation, "Range invalidated by gap");
        self.record.range_invalidated = true;
        self.record.gap_violation = Some(violation);
        self.persist(now)?;
        self.deps.health.alert(Event::RangeInvalidated {
            stream: self.config.key.clone(),
            violation,
        });
        Ok(())
    }

    /// Freeze the range and decide the entry path.
    async fn lock(&mut self, now: DateTime<Utc>) -> Result<()> {
        let Some(range) = self.verified_range(now)? else {
            self.deps.health.record_incident(
                IncidentKind::NoRangeData,
                Some(&self.config.key),
                "no bars inside the range window at lock",
                now,
            )?;
            self.transition(StreamState::RangeLocked, now)?;
            return self
                .commit(TerminalReason::NoTrade(NoTradeReason::NoRangeData), now)
                .await;
        };

        let edges = self.buffer.gap_stats_with_edges(&self.settings.gap_policy);
        self.apply_gap_stats(edges, now)?;
        let range = self.with_lock_close(range);

        self.record.range = Some(range.clone());
        self.transition(StreamState::RangeLocked, now)?;
        self.deps.health.alert(Event::RangeLocked {
            stream: self.config.key.clone(),
            range: range.clone(),
        });

        if self.record.range_invalidated {
            return self
                .commit(TerminalReason::NoTrade(NoTradeReason::RangeInvalidated), now)
                .await;
        }
        if !self.config.enabled {
            return self
                .commit(TerminalReason::NoTrade(NoTradeReason::Disabled), now)
                .await;
        }
        self.plan_entries(&range, now)?;
        self.place_entries(now).await
    }

    /// Batch range, compared against the incremental extremes.
    fn verified_range(&self, now: DateTime<Utc>) -> Result<Option<RangeWindow>> {
        let Some(batch) = self.buffer.compute() else {
            return Ok(None);
        };
        let (high, low) = self.buffer_extremes();
        if high != Some(batch.range_high) || low != Some(batch.range_low) {
            warn!(
                stream = %self.config.key,
                incremental_high = ?high,
                incremental_low = ?low,
                batch_high = %batch.range_high,
                batch_low = %batch.range_low,
                "Incremental range differs from batch; using batch"
            );
            self.deps.health.record_incident(
                IncidentKind::RangeMismatch,
                Some(&self.config.key),
                format!(
                    "incremental {high:?}/{low:?} vs batch {}/{}",
                    batch.range_high, batch.range_low
                ),
                now,
            )?;
        }
        Ok(Some(batch))
    }

    /// The freeze close is the last close known at the instant of lock,
    /// which may come from a bar past slot time.
    fn with_lock_close(&self, mut range: RangeWindow) -> RangeWindow {
        let last_in_window = self.buffer.bars().last().map(|b| b.timestamp);
        if let Some((ts, close, source)) = self.last_close {
            if last_in_window.map_or(true, |last| ts > last) {
                range.freeze_close = close;
                range.freeze_close_source = source;
            }
        }
        range
    }

    async fn commit_late_start(&mut self, now: DateTime<Utc>) -> Result<()> {
        if let Some(range) = self.buffer.compute() {
            info!(
                stream = %self.config.key,
                high = %range.range_high,
                low = %range.range_low,
                "Late start range recorded for audit"
            );
            self.record.range = Some(range);
        }
        self.commit(TerminalReason::NoTrade(NoTradeReason::LateStart), now)
            .await
    }

    fn gate_context(&self, now: DateTime<Utc>) -> GateContext {
        GateContext {
            now,
            data_source: self.latest_source,
            simulated: self.settings.simulated,
            is_trading_day: self.config.is_trading_day,
            slot_time: self.config.slot_time,
            market_close: self.config.market_close,
            enabled: self.config.enabled,
            state: self.record.state,
            committed: self.record.committed,
            entry_detected: self.record.entry_detected,
            breakout_levels_computed: self.levels.is_some(),
        }
    }

    /// Consult the gate, logging and alerting on denial.
    fn admit(&self, action: &'static str, now: DateTime<Utc>) -> GateDecision {
        let decision = evaluate(&self.gate_context(now));
        if decision.allowed {
            return decision;
        }
        let failed = decision.failed_names();
        let simulated = self.settings.simulated;
        if decision.is_benign_denial() {
            debug!(stream = %self.config.key, action, simulated, failed = ?failed, "Gate denied");
        } else {
            warn!(stream = %self.config.key, action, simulated, failed = ?failed, "Gate denied");
            self.deps.health.alert(Event::GateDenied {
                stream: self.config.key.clone(),
                failed,
            });
        }
        decision
    }

    fn transition(&mut self, next: StreamState, now: DateTime<Utc>) -> Result<()> {
        let previous = self.record.state;
        if !previous.can_advance_to(next) {
            warn!(
                stream = %self.config.key,
                from = %previous.as_str(),
                to = %next.as_str(),
                "Refusing backward state transition"
            );
            return Ok(());
        }
        if next == StreamState::Armed && !self.record.hydration_complete {
            warn!(stream = %self.config.key, bars = self.buffer.len(), "Armed without complete hydration");
        }
        self.record.state = next;
        self.record.state_entered_at = now;
        self.persist(now)?;
        info!(
            stream = %self.config.key,
            from = %previous.as_str(),
            to = %next.as_str(),
            "Stream state changed"
        );
        Ok(())
    }

    fn persist(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.record.updated_at = now;
        if let Err(e) = self.deps.store.save(&self.record) {
            self.deps.health.alert(Event::JournalFailure {
                stream: self.config.key.clone(),
                detail: e.to_string(),
            });
            return Err(e);
        }
        Ok(())
    }
}
