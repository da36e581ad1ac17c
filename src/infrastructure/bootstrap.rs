//! Composition root: wires config into an engine plus its replay driver.

use std::sync::Arc;

use chrono::Duration;
use tokio::sync::watch;
use tracing::info;

use crate::adapter::inbound::ReplayDriver;
use crate::adapter::outbound::{
    FileTimetable, PaperAdapter, ReplayBarProvider, ReplayClock, SerializedAdapter,
};
use crate::application::{
    Engine, EngineParts, ExecutionJournal, FileStreamJournalStore, HealthMonitor, StreamDeps,
    StreamSettings,
};
use crate::error::{ConfigError, Result};
use crate::infrastructure::config::settings::Config;
use crate::port::{ExecutionAdapter, LogNotifier, NotifierRegistry};

/// Build notifier registry from configuration.
pub(crate) fn build_notifier_registry(config: &Config) -> NotifierRegistry {
    let mut registry = NotifierRegistry::new();
    if config.alerts.log {
        registry.register(Box::new(LogNotifier));
    }
    registry
}

/// Everything a replay run needs.
pub struct ReplayRuntime {
    pub engine: Engine,
    pub driver: ReplayDriver,
    pub health: Arc<HealthMonitor>,
    pub paper: Arc<PaperAdapter>,
}

/// Build the engine, paper venue and driver for a replay run.
///
/// Journals live under `engine.journal_dir`, so a second run over the same
/// directory resumes from what the first one persisted.
#[allow(clippy::result_large_err)]
pub fn build_replay(config: &Config, shutdown: watch::Receiver<bool>) -> Result<ReplayRuntime> {
    let bars_path = config
        .replay
        .bars
        .as_ref()
        .ok_or(ConfigError::MissingField { field: "replay.bars" })?;
    let timetable_path = config
        .replay
        .timetable
        .as_ref()
        .ok_or(ConfigError::MissingField { field: "replay.timetable" })?;

    let time = config.time_service()?;
    let schedule = config.schedule()?;
    let registry = Arc::new(config.registry()?);

    let bars = Arc::new(ReplayBarProvider::open(bars_path, &registry)?);
    let Some(first) = bars.records().first() else {
        return Err(ConfigError::InvalidValue {
            field: "replay.bars",
            reason: "file holds no bars".to_string(),
        }
        .into());
    };
    let start = first.bar.timestamp;
    let last = bars.records().last().map_or(start, |r| r.bar.timestamp);
    let close = time.session_instant(time.trading_date(last), schedule.market_close());
    let finish = close.max(last) + Duration::seconds(1);

    let journal_dir = &config.engine.journal_dir;
    let journal = Arc::new(ExecutionJournal::open(journal_dir.join("execution"))?);
    let store = Arc::new(FileStreamJournalStore::new(journal_dir.join("streams")));
    let health = Arc::new(HealthMonitor::new(
        Arc::new(build_notifier_registry(config)),
        config.alert_quota(),
        Some(journal_dir.join("incidents.jsonl")),
    ));

    let paper = match config.replay.max_fill_per_bar {
        Some(max) => PaperAdapter::new().with_max_fill_per_bar(max),
        None => PaperAdapter::new(),
    };
    let paper = Arc::new(paper);
    let venue: Arc<dyn ExecutionAdapter> = Arc::clone(&paper) as Arc<dyn ExecutionAdapter>;
    let adapter: Arc<dyn ExecutionAdapter> = Arc::new(SerializedAdapter::new(venue));

    let clock = Arc::new(ReplayClock::new(start));
    let engine = Engine::new(EngineParts {
        time,
        schedule,
        registry,
        timetable: Arc::new(FileTimetable::new(timetable_path)),
        bars: Arc::clone(&bars) as _,
        clock: Arc::clone(&clock) as _,
        settings: Arc::new(StreamSettings {
            simulated: true,
            ..config.stream_settings()
        }),
        deps: StreamDeps {
            adapter,
            journal,
            store,
            health: Arc::clone(&health),
        },
        options: config.engine_options(),
    });

    info!(
        bars = bars.records().len(),
        journal_dir = %journal_dir.display(),
        start = %start,
        finish = %finish,
        "Replay runtime built"
    );

    let driver = ReplayDriver::new(clock, Arc::clone(&paper), bars)
        .finish_at(finish)
        .with_shutdown(shutdown);

    Ok(ReplayRuntime {
        engine,
        driver,
        health,
        paper,
    })
}
