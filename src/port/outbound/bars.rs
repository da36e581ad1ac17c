//! Historical bar source used for hydration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Bar, Instrument};
use crate::error::SourceError;

/// Yields bars for one canonical instrument.
#[async_trait]
pub trait BarProvider: Send + Sync {
    /// Bars with `from <= timestamp <= to`, ascending and deduplicated by
    /// timestamp.
    async fn fetch(
        &self,
        instrument: &Instrument,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, SourceError>;
}
