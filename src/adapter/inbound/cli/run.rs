//! Handler for the `run` command.

use std::path::Path;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::Result;
use crate::infrastructure::bootstrap::build_replay;
use crate::infrastructure::config::Config;

/// Execute the run command. Ctrl-C stops the replay between bars.
pub async fn execute(config_path: &Path, json: bool) -> Result<()> {
    let config = Config::load(config_path)?;
    config.init_logging();
    info!(config = %config_path.display(), "rangelock starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut runtime = build_replay(&config, shutdown_rx)?;
    let summary = runtime.driver.run(&mut runtime.engine).await?;

    if json {
        let streams: Vec<_> = summary
            .streams
            .iter()
            .map(|s| {
                serde_json::json!({
                    "stream": s.stream.to_string(),
                    "state": s.state.to_string(),
                    "terminal_reason": s.terminal_reason.as_ref().map(ToString::to_string),
                })
            })
            .collect();
        let payload = serde_json::json!({
            "command": "run",
            "bars": summary.bars,
            "fills": summary.fills,
            "interrupted": summary.interrupted,
            "incidents": runtime.health.incidents().len(),
            "streams": streams,
        });
        println!("{payload}");
    } else {
        println!(
            "replayed {} bars, {} fills, {} incidents{}",
            summary.bars,
            summary.fills,
            runtime.health.incidents().len(),
            if summary.interrupted { " (interrupted)" } else { "" }
        );
        for stream in &summary.streams {
            let reason = stream
                .terminal_reason
                .as_ref()
                .map_or_else(|| "-".to_string(), ToString::to_string);
            println!("  {:<40} {:<14} {}", stream.stream.to_string(), stream.state.to_string(), reason);
        }
    }

    info!("rangelock stopped");
    Ok(())
}
