//! Handler for the `status` command.

use std::path::Path;

use chrono::NaiveDate;

use crate::application::{FileStreamJournalStore, StreamJournalStore};
use crate::error::Result;
use crate::infrastructure::config::Config;

/// Print every persisted stream record for `date`.
pub fn execute(config_path: &Path, date: NaiveDate, json: bool) -> Result<()> {
    let config = Config::load(config_path)?;
    let store = FileStreamJournalStore::new(config.engine.journal_dir.join("streams"));
    let records = store.list(date)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("no streams recorded for {date}");
        return Ok(());
    }
    for record in records {
        let range = record.range.as_ref().map_or_else(
            || "-".to_string(),
            |r| format!("{}..{} close {}", r.range_low, r.range_high, r.freeze_close),
        );
        let reason = record
            .terminal_reason
            .as_ref()
            .map_or_else(|| "-".to_string(), ToString::to_string);
        println!(
            "{:<40} {:<14} {:<30} {}",
            record.stream.to_string(),
            record.state.to_string(),
            range,
            reason
        );
    }
    Ok(())
}
