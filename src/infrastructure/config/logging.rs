//! `[logging]` section and tracing subscriber setup.

use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

/// Logging configuration. `RUST_LOG` overrides `level` when set.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty`, `compact` or `json`. Replay runs usually want `json` so
    /// stream transitions can be grepped by `stream` field.
    pub format: String,
    /// Print the emitting module next to each line.
    pub targets: bool,
}

impl LoggingConfig {
    /// Install the global subscriber. One installed earlier (a test harness,
    /// say) is kept.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        let builder = fmt().with_env_filter(filter).with_target(self.targets);

        let installed = match self.format.as_str() {
            "json" => builder.json().with_current_span(false).try_init(),
            "compact" => builder.compact().try_init(),
            _ => builder.try_init(),
        };
        if installed.is_err() {
            tracing::debug!("Tracing subscriber already installed");
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
            targets: false,
        }
    }
}
