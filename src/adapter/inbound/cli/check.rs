//! Handler for the `check` command.

use std::path::Path;

use crate::error::Result;
use crate::infrastructure::config::Config;
use crate::infrastructure::health::{health_check, HealthStatus};

/// Validate the config and print health findings. Returns whether every
/// critical check passed.
pub fn execute(config_path: &Path, json: bool) -> Result<bool> {
    let config = Config::load(config_path)?;
    let report = health_check(&config);

    if json {
        let checks: Vec<_> = report
            .checks()
            .iter()
            .map(|check| {
                let detail = match check.status() {
                    HealthStatus::Healthy => None,
                    HealthStatus::Unhealthy(reason) => Some(reason.clone()),
                };
                serde_json::json!({
                    "name": check.name(),
                    "critical": check.critical(),
                    "healthy": check.is_healthy(),
                    "detail": detail,
                })
            })
            .collect();
        let payload = serde_json::json!({
            "command": "check",
            "healthy": report.is_healthy(),
            "checks": checks,
        });
        println!("{payload}");
        return Ok(report.is_healthy());
    }

    for check in report.checks() {
        let mark = match (check.is_healthy(), check.critical()) {
            (true, _) => "ok",
            (false, true) => "FAIL",
            (false, false) => "warn",
        };
        match check.status() {
            HealthStatus::Healthy => println!("{mark:>4}  {}", check.name()),
            HealthStatus::Unhealthy(reason) => println!("{mark:>4}  {}: {reason}", check.name()),
        }
    }
    Ok(report.is_healthy())
}
