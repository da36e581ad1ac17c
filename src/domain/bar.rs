//! OHLCV bars and feed-source precedence.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Where a bar came from.
///
/// Ordering follows precedence: `FileReplay < RequestedHistorical < Live`.
/// When the same timestamp arrives from several feeds the highest precedence
/// wins outright; equal precedence keeps the first bar seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarSource {
    FileReplay,
    RequestedHistorical,
    Live,
}

impl BarSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FileReplay => "file_replay",
            Self::RequestedHistorical => "requested_historical",
            Self::Live => "live",
        }
    }

    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Live)
    }
}

/// A single OHLCV bar. `timestamp` is the bar close time in UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(default)]
    pub volume: Decimal,
    pub source: BarSource,
}

impl Bar {
    /// Create a bar, validating that high/low bracket open and close.
    pub fn try_new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
        source: BarSource,
    ) -> Result<Self, DomainError> {
        let bar = Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            source,
        };
        bar.validate()?;
        Ok(bar)
    }

    /// Check OHLC consistency.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.high < self.low {
            return Err(DomainError::InvalidBar {
                timestamp: self.timestamp,
                reason: "high below low",
            });
        }
        if self.open > self.high || self.open < self.low {
            return Err(DomainError::InvalidBar {
                timestamp: self.timestamp,
                reason: "open outside high/low",
            });
        }
        if self.close > self.high || self.close < self.low {
            return Err(DomainError::InvalidBar {
                timestamp: self.timestamp,
                reason: "close outside high/low",
            });
        }
        if self.volume.is_sign_negative() && !self.volume.is_zero() {
            return Err(DomainError::InvalidBar {
                timestamp: self.timestamp,
                reason: "negative volume",
            });
        }
        Ok(())
    }

    /// Whether `self` should replace `existing` at the same timestamp.
    #[must_use]
    pub fn supersedes(&self, existing: &Bar) -> bool {
        self.source > existing.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn bar(source: BarSource) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2025, 3, 10, 13, 0, 0).unwrap(),
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100.5),
            volume: dec!(10),
            source,
        }
    }

    #[test]
    fn live_supersedes_historical_and_replay() {
        assert!(bar(BarSource::Live).supersedes(&bar(BarSource::RequestedHistorical)));
        assert!(bar(BarSource::RequestedHistorical).supersedes(&bar(BarSource::FileReplay)));
        assert!(!bar(BarSource::FileReplay).supersedes(&bar(BarSource::Live)));
    }

    #[test]
    fn equal_precedence_does_not_supersede() {
        assert!(!bar(BarSource::Live).supersedes(&bar(BarSource::Live)));
    }

    #[test]
    fn try_new_rejects_inverted_range() {
        let result = Bar::try_new(
            Utc.with_ymd_and_hms(2025, 3, 10, 13, 0, 0).unwrap(),
            dec!(100),
            dec!(99),
            dec!(101),
            dec!(100),
            dec!(1),
            BarSource::Live,
        );
        assert!(matches!(result, Err(DomainError::InvalidBar { .. })));
    }
}
