//! Inbound adapters (driving side): the CLI and the replay driver.

pub mod cli;
pub mod replay;

pub use replay::{ReplayDriver, ReplaySummary};
