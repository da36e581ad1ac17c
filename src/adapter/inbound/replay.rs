//! Replay driver: pushes a bar file through the engine against the paper
//! venue, one bar at a time, with the clock pinned to each bar's close.
//!
//! Per bar the paper venue is offered the bar first, so only orders that were
//! resting before the bar can fill on it; the resulting fills and updates are
//! dispatched before the engine itself sees the bar.
//!
//! Bars keep their `FileReplay` source. Streams only act on them when built
//! with `StreamSettings::simulated`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::adapter::outbound::{PaperAdapter, ReplayBarProvider, ReplayClock};
use crate::application::{BarEvent, Engine, StreamJournal};
use crate::error::Result;
use crate::port::ExecutionEvent;

/// Totals reported once a replay finishes.
#[derive(Debug, Clone)]
pub struct ReplaySummary {
    pub bars: usize,
    pub fills: usize,
    pub updates: usize,
    /// Stopped early by a shutdown signal.
    pub interrupted: bool,
    pub streams: Vec<StreamJournal>,
}

pub struct ReplayDriver {
    clock: Arc<ReplayClock>,
    paper: Arc<PaperAdapter>,
    bars: Arc<ReplayBarProvider>,
    finish_at: Option<DateTime<Utc>>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl ReplayDriver {
    pub fn new(clock: Arc<ReplayClock>, paper: Arc<PaperAdapter>, bars: Arc<ReplayBarProvider>) -> Self {
        Self {
            clock,
            paper,
            bars,
            finish_at: None,
            shutdown: None,
        }
    }

    /// Stop between bars once `shutdown` turns true. Journals stay as they
    /// are so a later run resumes from them.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn stopped(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Run one last tick at `at` after the file is exhausted, typically just
    /// past market close.
    #[must_use]
    pub fn finish_at(mut self, at: DateTime<Utc>) -> Self {
        self.finish_at = Some(at);
        self
    }

    pub async fn run(&self, engine: &mut Engine) -> Result<ReplaySummary> {
        let mut summary = ReplaySummary {
            bars: 0,
            fills: 0,
            updates: 0,
            interrupted: false,
            streams: Vec::new(),
        };

        // Streams are created at the clock's starting instant.
        engine.on_tick().await?;

        for record in self.bars.records() {
            if self.stopped() {
                warn!(replayed = summary.bars, "Replay interrupted");
                summary.interrupted = true;
                break;
            }
            self.clock.set(record.bar.timestamp);
            engine.on_tick().await?;

            for event in self.paper.on_bar(&record.instrument, &record.bar) {
                match &event {
                    ExecutionEvent::Fill(_) => summary.fills += 1,
                    ExecutionEvent::Update(_) => summary.updates += 1,
                }
                engine.on_execution(event).await?;
            }

            engine
                .on_bar(BarEvent {
                    symbol: record.symbol.clone(),
                    bar: record.bar.clone(),
                })
                .await?;
            summary.bars += 1;
            debug!(symbol = %record.symbol, at = %record.bar.timestamp, "Replayed bar");
        }

        if let Some(at) = self.finish_at.filter(|_| !summary.interrupted) {
            self.clock.set(at);
            engine.on_tick().await?;
        }

        summary.streams = engine.snapshot().await;
        info!(
            bars = summary.bars,
            fills = summary.fills,
            streams = summary.streams.len(),
            "Replay finished"
        );
        Ok(summary)
    }
}
