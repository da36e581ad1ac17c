//! Long-lived notification and health component.
//!
//! One [`HealthMonitor`] is constructed at startup and shared as an `Arc`
//! by every engine. It owns:
//!
//! - the alert rate limiter, keyed by `(event kind, key)`;
//! - the incident log (`incidents.jsonl`), which is never rate limited;
//! - the tick heartbeat consulted by the stall watchdog.
//!
//! Rate limiting applies to telemetry only. Callers perform safety actions
//! (flatten, commit, journaling) before or regardless of alert delivery.

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::journal::append_line;
use crate::domain::StreamKey;
use crate::error::Result;
use crate::port::{Event, NotifierRegistry};

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Category of a persisted incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    NoRangeData,
    ProtectiveFailure,
    FlattenFailed,
    RestartSuspended,
    JournalFailure,
    RangeMismatch,
    /// A fill arrived for an order the stream no longer expected.
    UnexpectedFill,
}

/// Safety-relevant occurrence, appended to `incidents.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub kind: IncidentKind,
    #[serde(default)]
    pub stream: Option<StreamKey>,
    pub detail: String,
}

/// Alert quota per `(kind, key)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertQuota {
    pub per_minute: u32,
    pub burst: u32,
}

impl Default for AlertQuota {
    fn default() -> Self {
        Self {
            per_minute: 6,
            burst: 3,
        }
    }
}

impl AlertQuota {
    fn to_quota(self) -> Quota {
        let per_minute = NonZeroU32::new(self.per_minute.max(1)).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(self.burst.max(1)).unwrap_or(NonZeroU32::MIN);
        Quota::per_minute(per_minute).allow_burst(burst)
    }
}

/// Alerts, incidents and tick heartbeat.
pub struct HealthMonitor {
    notifiers: Arc<NotifierRegistry>,
    limiter: KeyedLimiter,
    incidents_path: Option<PathBuf>,
    incidents: Mutex<Vec<Incident>>,
    heartbeat: Mutex<Option<(Instant, DateTime<Utc>)>>,
    delivered: AtomicU64,
    suppressed: AtomicU64,
}

impl HealthMonitor {
    /// `incidents_path` of `None` keeps incidents in memory only.
    #[must_use]
    pub fn new(
        notifiers: Arc<NotifierRegistry>,
        quota: AlertQuota,
        incidents_path: Option<PathBuf>,
    ) -> Self {
        Self {
            notifiers,
            limiter: RateLimiter::keyed(quota.to_quota()),
            incidents_path,
            incidents: Mutex::new(Vec::new()),
            heartbeat: Mutex::new(None),
            delivered: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Deliver an alert unless its `(kind, key)` is over quota.
    ///
    /// Returns whether the alert was delivered.
    pub fn alert(&self, event: Event) -> bool {
        let key = format!("{}:{}", event.kind(), event.key());
        if self.limiter.check_key(&key).is_err() {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Alert suppressed by rate limit");
            return false;
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
        self.notifiers.notify_all(event);
        true
    }

    /// Persist an incident. Never rate limited.
    pub fn record_incident(
        &self,
        kind: IncidentKind,
        stream: Option<&StreamKey>,
        detail: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<Incident> {
        let incident = Incident {
            id: Uuid::new_v4(),
            at,
            kind,
            stream: stream.cloned(),
            detail: detail.into(),
        };
        error!(
            incident_id = %incident.id,
            kind = ?incident.kind,
            stream = ?incident.stream.as_ref().map(ToString::to_string),
            detail = %incident.detail,
            "Incident recorded"
        );
        if let Some(path) = &self.incidents_path {
            let line = serde_json::to_string(&incident)?;
            append_line(path, &line)?;
        }
        self.incidents.lock().push(incident.clone());
        Ok(incident)
    }

    /// Incidents recorded by this process.
    #[must_use]
    pub fn incidents(&self) -> Vec<Incident> {
        self.incidents.lock().clone()
    }

    /// Record that the tick loop processed a tick at engine time `now`.
    pub fn record_tick(&self, now: DateTime<Utc>) {
        *self.heartbeat.lock() = Some((Instant::now(), now));
    }

    /// Engine time of the last processed tick.
    #[must_use]
    pub fn last_tick(&self) -> Option<DateTime<Utc>> {
        self.heartbeat.lock().map(|(_, at)| at)
    }

    /// Time since the last heartbeat when it exceeds `threshold`.
    ///
    /// Alerts (rate limited) when a stall is detected. No heartbeat yet is
    /// not a stall.
    pub fn check_stall(&self, threshold: Duration) -> Option<Duration> {
        let (last, _) = (*self.heartbeat.lock())?;
        let silent = last.elapsed();
        if silent <= threshold {
            return None;
        }
        let silent_secs = i64::try_from(silent.as_secs()).unwrap_or(i64::MAX);
        self.alert(Event::TickStall { silent_secs });
        Some(silent)
    }

    #[must_use]
    pub fn alerts_delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn alerts_suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    /// Spawn the stall watchdog. Stops when `shutdown` turns true.
    pub fn spawn_watchdog(
        self: &Arc<Self>,
        threshold: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        let poll = (threshold / 2).max(Duration::from_millis(100));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    result = shutdown.changed() => {
                        if result.is_err() || *shutdown.borrow() {
                            info!("Tick watchdog stopping");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        monitor.check_stall(threshold);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::Notifier;
    use chrono::TimeZone;

    struct Counting(Arc<AtomicU64>);

    impl Notifier for Counting {
        fn notify(&self, _event: Event) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn monitor(counter: &Arc<AtomicU64>, path: Option<PathBuf>) -> HealthMonitor {
        let mut registry = NotifierRegistry::new();
        registry.register(Box::new(Counting(Arc::clone(counter))));
        HealthMonitor::new(
            Arc::new(registry),
            AlertQuota {
                per_minute: 1,
                burst: 2,
            },
            path,
        )
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 14, 0, 0).unwrap()
    }

    #[test]
    fn alerts_are_rate_limited_per_key() {
        let counter = Arc::new(AtomicU64::new(0));
        let monitor = monitor(&counter, None);
        for _ in 0..5 {
            monitor.alert(Event::TickStall { silent_secs: 10 });
        }
        assert_eq!(counter.load(Ordering::Relaxed), 2);
        assert_eq!(monitor.alerts_suppressed(), 3);

        // A different kind has its own budget.
        assert!(monitor.alert(Event::TimetableInvalid {
            date: at().date_naive(),
            raw: "x".into(),
            reason: "bad".into(),
        }));
    }

    #[test]
    fn incidents_are_never_rate_limited() {
        let counter = Arc::new(AtomicU64::new(0));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("incidents.jsonl");
        let monitor = monitor(&counter, Some(path.clone()));
        for i in 0..10 {
            monitor
                .record_incident(IncidentKind::NoRangeData, None, format!("n{i}"), at())
                .unwrap();
        }
        assert_eq!(monitor.incidents().len(), 10);
        let lines = std::fs::read_to_string(&path).unwrap();
        assert_eq!(lines.lines().count(), 10);
        let first: Incident = serde_json::from_str(lines.lines().next().unwrap()).unwrap();
        assert_eq!(first.kind, IncidentKind::NoRangeData);
    }

    #[tokio::test(start_paused = true)]
    async fn stall_is_detected_after_threshold() {
        let counter = Arc::new(AtomicU64::new(0));
        let monitor = monitor(&counter, None);
        assert_eq!(monitor.check_stall(Duration::from_secs(5)), None);

        monitor.record_tick(at());
        assert_eq!(monitor.check_stall(Duration::from_secs(5)), None);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(monitor.check_stall(Duration::from_secs(5)).is_some());
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert_eq!(monitor.last_tick(), Some(at()));
    }
}
