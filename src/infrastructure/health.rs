//! Startup health checks behind `rangelock check`.
//!
//! Critical findings stop the run; the rest are reported as warnings.

use std::path::Path;

use rust_decimal::Decimal;

use super::config::Config;
use crate::domain::parse_local_time;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy(String),
}

#[derive(Debug, Clone)]
pub struct HealthCheck {
    name: &'static str,
    critical: bool,
    status: HealthStatus,
}

impl HealthCheck {
    fn new(name: &'static str, critical: bool, problem: Option<String>) -> Self {
        Self {
            name,
            critical,
            status: problem.map_or(HealthStatus::Healthy, HealthStatus::Unhealthy),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn critical(&self) -> bool {
        self.critical
    }

    pub fn status(&self) -> &HealthStatus {
        &self.status
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthStatus::Healthy)
    }
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    checks: Vec<HealthCheck>,
}

impl HealthReport {
    pub fn checks(&self) -> &[HealthCheck] {
        &self.checks
    }

    /// True when every critical check passed.
    pub fn is_healthy(&self) -> bool {
        self.checks
            .iter()
            .filter(|check| check.critical())
            .all(HealthCheck::is_healthy)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &HealthCheck> {
        self.checks
            .iter()
            .filter(|check| !check.critical() && !check.is_healthy())
    }
}

fn file_problem(label: &str, path: Option<&Path>) -> Option<String> {
    match path {
        None => Some(format!("no {label} file configured")),
        Some(path) if !path.is_file() => Some(format!("{} does not exist", path.display())),
        Some(_) => None,
    }
}

fn journal_problem(dir: &Path) -> Option<String> {
    if let Err(e) = std::fs::create_dir_all(dir) {
        return Some(format!("cannot create {}: {e}", dir.display()));
    }
    match std::fs::metadata(dir) {
        Ok(meta) if meta.permissions().readonly() => {
            Some(format!("{} is read-only", dir.display()))
        }
        Ok(_) => None,
        Err(e) => Some(format!("cannot stat {}: {e}", dir.display())),
    }
}

pub fn health_check(config: &Config) -> HealthReport {
    let mut checks = Vec::new();

    checks.push(HealthCheck::new(
        "journal_dir",
        true,
        journal_problem(&config.engine.journal_dir),
    ));
    checks.push(HealthCheck::new(
        "replay_bars",
        true,
        file_problem("bars", config.replay.bars.as_deref()),
    ));
    checks.push(HealthCheck::new(
        "timetable",
        true,
        file_problem("timetable", config.replay.timetable.as_deref()),
    ));
    checks.push(HealthCheck::new(
        "calendar",
        true,
        config.time_service().err().map(|e| e.to_string()),
    ));

    let late_sessions: Vec<_> = match parse_local_time(&config.engine.market_close) {
        Ok(close) => config
            .sessions
            .iter()
            .filter(|s| parse_local_time(&s.range_start).map_or(true, |start| start >= close))
            .map(|s| s.name.clone())
            .collect(),
        Err(_) => Vec::new(),
    };
    checks.push(HealthCheck::new(
        "sessions",
        false,
        (!late_sessions.is_empty())
            .then(|| format!("sessions start at or after market close: {}", late_sessions.join(", "))),
    ));

    let uncapped: Vec<_> = config
        .instruments
        .iter()
        .filter(|i| i.max_stop_points <= Decimal::ZERO)
        .map(|i| i.symbol.clone())
        .collect();
    checks.push(HealthCheck::new(
        "stop_caps",
        false,
        (!uncapped.is_empty())
            .then(|| format!("stop distance uncapped for: {}", uncapped.join(", "))),
    ));

    checks.push(HealthCheck::new(
        "alerts",
        false,
        (!config.alerts.log).then(|| "alerts are not delivered anywhere".to_string()),
    ));

    HealthReport { checks }
}
