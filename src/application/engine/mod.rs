//! Engine: owns the streams of the current trading date and dispatches
//! ticks, bars and execution events to them.
//!
//! Each stream sits behind its own `tokio::sync::Mutex`, so one stream only
//! ever has one active handler while different streams run concurrently.

mod rollover;
mod routing;

pub use rollover::{DayTransition, SessionSchedule};
pub use routing::RouteTable;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use futures_util::future::join_all;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::health::IncidentKind;
use super::journal::StreamJournal;
use super::stream::{StreamConfig, StreamDeps, StreamMachine, StreamSettings};
use crate::domain::{Bar, InstrumentRegistry, IntentId, StreamKey, TimeService};
use crate::error::{Error, Result, SourceError};
use crate::port::{
    BarProvider, Clock, Event, ExecutionEvent, TimetableEntry, TimetableRow, TimetableSource,
};

/// Engine timing knobs.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub tick_interval: Duration,
    pub stall_threshold: Duration,
    /// Bound on one bar-provider request.
    pub hydration_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            stall_threshold: Duration::from_secs(30),
            hydration_timeout: Duration::from_secs(10),
        }
    }
}

/// Everything the engine is built from.
pub struct EngineParts {
    pub time: TimeService,
    pub schedule: SessionSchedule,
    pub registry: Arc<InstrumentRegistry>,
    pub timetable: Arc<dyn TimetableSource>,
    pub bars: Arc<dyn BarProvider>,
    pub clock: Arc<dyn Clock>,
    pub settings: Arc<StreamSettings>,
    pub deps: StreamDeps,
    pub options: EngineOptions,
}

/// A closed bar as delivered by a feed, before symbol canonicalisation.
#[derive(Debug, Clone)]
pub struct BarEvent {
    pub symbol: String,
    pub bar: Bar,
}

/// Inputs accepted by [`Engine::run`].
#[derive(Debug, Clone)]
pub enum EngineInput {
    Bar(BarEvent),
    Execution(ExecutionEvent),
}

struct StreamSlot {
    key: StreamKey,
    machine: Arc<Mutex<StreamMachine>>,
}

/// Dispatcher for one process.
pub struct Engine {
    time: TimeService,
    schedule: SessionSchedule,
    registry: Arc<InstrumentRegistry>,
    timetable: Arc<dyn TimetableSource>,
    bars: Arc<dyn BarProvider>,
    clock: Arc<dyn Clock>,
    settings: Arc<StreamSettings>,
    deps: StreamDeps,
    options: EngineOptions,
    trading_date: Option<NaiveDate>,
    streams: Vec<StreamSlot>,
    routes: RouteTable,
}

impl Engine {
    #[must_use]
    pub fn new(parts: EngineParts) -> Self {
        Self {
            time: parts.time,
            schedule: parts.schedule,
            registry: parts.registry,
            timetable: parts.timetable,
            bars: parts.bars,
            clock: parts.clock,
            settings: parts.settings,
            deps: parts.deps,
            options: parts.options,
            trading_date: None,
            streams: Vec::new(),
            routes: RouteTable::new(),
        }
    }

    #[must_use]
    pub const fn trading_date(&self) -> Option<NaiveDate> {
        self.trading_date
    }

    #[must_use]
    pub fn stream_keys(&self) -> Vec<StreamKey> {
        self.streams.iter().map(|s| s.key.clone()).collect()
    }

    /// Handle to one stream's machine.
    #[must_use]
    pub fn stream(&self, key: &StreamKey) -> Option<Arc<Mutex<StreamMachine>>> {
        self.routes
            .stream_slot(key)
            .and_then(|slot| self.streams.get(slot))
            .map(|s| Arc::clone(&s.machine))
    }

    /// Current records of every stream.
    pub async fn snapshot(&self) -> Vec<StreamJournal> {
        let mut records = Vec::with_capacity(self.streams.len());
        for slot in &self.streams {
            records.push(slot.machine.lock().await.record().clone());
        }
        records
    }

    /// Apply a day transition if the clock moved onto a new trading date.
    pub async fn sync_day(&mut self) -> Result<Option<DayTransition>> {
        let now = self.clock.now();
        let observed = self.time.trading_date(now);
        let Some(transition) = DayTransition::detect(self.trading_date, observed) else {
            return Ok(None);
        };
        info!(transition = %transition, "Trading day transition");

        if let DayTransition::Rollover { previous, .. } = transition {
            info!(date = %previous, streams = self.streams.len(), "Dropping previous day's streams");
            self.streams.clear();
            self.routes.clear();
        }
        self.trading_date = Some(transition.date());
        self.load_streams(transition.date(), now).await?;
        self.hydrate_pending(now).await;
        Ok(Some(transition))
    }

    async fn load_streams(&mut self, date: NaiveDate, now: DateTime<Utc>) -> Result<()> {
        let rows = self.timetable.load(date).await?;
        let is_trading_day = self.time.is_trading_day(date);
        let market_close = self.time.session_instant(date, self.schedule.market_close());

        for row in rows {
            let entry = match row {
                TimetableRow::Valid(entry) => entry,
                TimetableRow::Invalid { raw, reason } => {
                    self.skip_row(date, raw, reason);
                    continue;
                }
            };
            let config = match self.stream_config(date, &entry, is_trading_day, market_close) {
                Ok(config) => config,
                Err(reason) => {
                    self.skip_row(date, format!("{entry:?}"), reason);
                    continue;
                }
            };
            if self.routes.stream_slot(&config.key).is_some() {
                self.skip_row(date, config.key.to_string(), "duplicate stream".to_string());
                continue;
            }
            let key = config.key.clone();
            let machine = match self.deps.store.load(&key)? {
                Some(record) => {
                    StreamMachine::restore(
                        config,
                        Arc::clone(&self.settings),
                        self.deps.clone(),
                        record,
                        now,
                    )
                    .await?
                }
                None => StreamMachine::create(
                    config,
                    Arc::clone(&self.settings),
                    self.deps.clone(),
                    now,
                )?,
            };
            let slot = self.streams.len();
            self.routes.add_stream(&key, slot);
            for intent_id in machine.intent_ids() {
                self.routes.add_intent(intent_id, slot);
            }
            self.streams.push(StreamSlot {
                key,
                machine: Arc::new(Mutex::new(machine)),
            });
        }
        info!(date = %date, streams = self.streams.len(), "Streams loaded");
        Ok(())
    }

    fn stream_config(
        &self,
        date: NaiveDate,
        entry: &TimetableEntry,
        is_trading_day: bool,
        market_close: DateTime<Utc>,
    ) -> std::result::Result<StreamConfig, String> {
        let instrument = self.registry.canonicalize(&entry.instrument);
        let spec = self
            .registry
            .spec(&instrument)
            .cloned()
            .ok_or_else(|| format!("unknown instrument {}", entry.instrument))?;
        let range_start = self
            .schedule
            .range_start(&entry.session)
            .ok_or_else(|| format!("unknown session {}", entry.session))?;
        let range_start = self.time.session_instant(date, range_start);
        let slot_time = self.time.session_instant(date, entry.slot_time);
        if slot_time <= range_start {
            return Err(format!(
                "slot time {} is not after the session range start",
                entry.slot_time
            ));
        }
        let key = StreamKey::new(
            date,
            entry.stream.clone(),
            instrument,
            entry.session.clone(),
            entry.slot_time,
        );
        Ok(StreamConfig {
            key,
            spec,
            enabled: entry.enabled,
            is_trading_day,
            range_start,
            slot_time,
            market_close,
        })
    }

    fn skip_row(&self, date: NaiveDate, raw: String, reason: String) {
        warn!(date = %date, raw = %raw, reason = %reason, "Skipping timetable entry");
        self.deps.health.alert(Event::TimetableInvalid { date, raw, reason });
    }

    /// Request hydration for every stream still waiting on it.
    async fn hydrate_pending(&self, now: DateTime<Utc>) {
        let timeout = self.options.hydration_timeout;
        let tasks = self.streams.iter().map(|slot| {
            let machine = Arc::clone(&slot.machine);
            let bars = Arc::clone(&self.bars);
            let key = slot.key.clone();
            async move {
                let window = machine.lock().await.hydration_window(now);
                let Some((from, to)) = window else {
                    return (key, Ok(()));
                };
                let fetched = tokio::time::timeout(timeout, bars.fetch(&key.instrument, from, to)).await;
                let (bars, complete) = match fetched {
                    Ok(Ok(bars)) => (bars, true),
                    Ok(Err(e)) => {
                        warn!(stream = %key, error = %e, "Hydration request failed");
                        (Vec::new(), false)
                    }
                    Err(_) => {
                        let e = SourceError::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
                        warn!(stream = %key, error = %e, "Hydration request timed out");
                        (Vec::new(), false)
                    }
                };
                let result = machine.lock().await.hydrate(bars, complete, now).await;
                (key, result)
            }
        });
        for (key, result) in join_all(tasks).await {
            if let Err(e) = result {
                self.report_failure(&key, &e, now);
            }
        }
    }

    /// Advance every stream to the clock's current time.
    pub async fn on_tick(&mut self) -> Result<()> {
        self.sync_day().await?;
        let now = self.clock.now();
        self.deps.health.record_tick(now);
        self.hydrate_pending(now).await;

        let tasks = self.streams.iter().enumerate().map(|(slot, s)| {
            let machine = Arc::clone(&s.machine);
            async move {
                let mut machine = machine.lock().await;
                let result = machine.on_tick(now).await;
                (slot, machine.key().clone(), machine.intent_ids(), result)
            }
        });
        for (slot, key, intents, result) in join_all(tasks).await {
            self.absorb(slot, &key, intents, result, now);
        }
        Ok(())
    }

    /// Route a closed bar to every stream on its instrument.
    pub async fn on_bar(&mut self, event: BarEvent) -> Result<()> {
        if let Err(e) = event.bar.validate() {
            warn!(symbol = %event.symbol, error = %e, "Dropping invalid bar");
            return Ok(());
        }
        let now = self.clock.now();
        let instrument = self.registry.canonicalize(&event.symbol);
        let slots = self.routes.for_instrument(&instrument).to_vec();
        if slots.is_empty() {
            debug!(symbol = %event.symbol, instrument = %instrument, "No stream for bar");
            return Ok(());
        }

        let bar = Arc::new(event.bar);
        let tasks = slots.into_iter().filter_map(|slot| {
            let machine = Arc::clone(&self.streams.get(slot)?.machine);
            let bar = Arc::clone(&bar);
            Some(async move {
                let mut machine = machine.lock().await;
                let result = machine.on_bar(&bar, now).await;
                (slot, machine.key().clone(), machine.intent_ids(), result)
            })
        });
        for (slot, key, intents, result) in join_all(tasks).await {
            self.absorb(slot, &key, intents, result, now);
        }
        Ok(())
    }

    /// Route a fill or order update by intent id.
    pub async fn on_execution(&mut self, event: ExecutionEvent) -> Result<()> {
        let now = self.clock.now();
        let Some(slot) = self.routes.resolve(event.intent_id(), &self.deps.journal) else {
            warn!(intent_id = %event.intent_id(), "Execution event for unknown intent");
            return Ok(());
        };
        let Some(machine) = self.streams.get(slot).map(|s| Arc::clone(&s.machine)) else {
            return Ok(());
        };
        let mut machine = machine.lock().await;
        let result = match &event {
            ExecutionEvent::Fill(fill) => machine.on_fill(fill, now).await,
            ExecutionEvent::Update(update) => machine.on_order_update(update, now).await,
        };
        let key = machine.key().clone();
        let intents = machine.intent_ids();
        drop(machine);
        self.absorb(slot, &key, intents, result, now);
        Ok(())
    }

    pub async fn dispatch(&mut self, input: EngineInput) -> Result<()> {
        match input {
            EngineInput::Bar(event) => self.on_bar(event).await,
            EngineInput::Execution(event) => self.on_execution(event).await,
        }
    }

    fn absorb(
        &mut self,
        slot: usize,
        key: &StreamKey,
        intents: Vec<IntentId>,
        result: Result<()>,
        now: DateTime<Utc>,
    ) {
        for intent_id in intents {
            self.routes.add_intent(intent_id, slot);
        }
        if let Err(e) = result {
            self.report_failure(key, &e, now);
        }
    }

    fn report_failure(&self, key: &StreamKey, e: &Error, now: DateTime<Utc>) {
        error!(stream = %key, error = %e, "Stream handler failed");
        if matches!(e, Error::Journal(_)) {
            if let Err(incident_err) = self.deps.health.record_incident(
                IncidentKind::JournalFailure,
                Some(key),
                e.to_string(),
                now,
            ) {
                error!(stream = %key, error = %incident_err, "Failed to record incident");
            }
        }
    }

    /// Main loop: ticks on an interval, inputs as they arrive, until
    /// `shutdown` turns true or the input channel closes.
    pub async fn run(
        &mut self,
        mut inputs: mpsc::Receiver<EngineInput>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let watchdog = self
            .deps
            .health
            .spawn_watchdog(self.options.stall_threshold, shutdown.clone());

        let mut interval = tokio::time::interval(self.options.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(tick_ms = self.options.tick_interval.as_millis(), "Engine running");
        loop {
            tokio::select! {
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received");
                        break;
                    }
                }
                _ = interval.tick() => {
                    if let Err(e) = self.on_tick().await {
                        error!(error = %e, "Tick failed");
                    }
                }
                input = inputs.recv() => {
                    let Some(input) = input else {
                        info!("Input channel closed");
                        if let Err(e) = self.on_tick().await {
                            error!(error = %e, "Final tick failed");
                        }
                        break;
                    };
                    if let Err(e) = self.dispatch(input).await {
                        error!(error = %e, "Input handling failed");
                    }
                }
            }
        }

        watchdog.abort();
        info!("Engine stopped");
        Ok(())
    }
}
