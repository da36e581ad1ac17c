//! Domain validation errors for core domain types.
//!
//! These errors are returned by `try_new` constructors and other methods
//! that validate domain rules.
//!
//! # Examples
//!
//! ```
//! use rangelock::domain::error::DomainError;
//! use rangelock::domain::instrument::InstrumentSpec;
//! use rust_decimal_macros::dec;
//!
//! let result = InstrumentSpec::try_new("ES", dec!(0), dec!(4), dec!(12));
//! assert!(matches!(result, Err(DomainError::NonPositiveTickSize { .. })));
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors that occur when domain invariants are violated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// Tick size must be strictly positive.
    #[error("tick size must be positive, got {tick_size}")]
    NonPositiveTickSize {
        /// The invalid tick size.
        tick_size: Decimal,
    },

    /// Target distance must be strictly positive.
    #[error("target points must be positive, got {points}")]
    NonPositiveTarget {
        /// The invalid distance.
        points: Decimal,
    },

    /// A bar's OHLC values are internally inconsistent.
    #[error("invalid bar at {timestamp}: {reason}")]
    InvalidBar {
        /// Bar timestamp.
        timestamp: DateTime<Utc>,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// Range window start must precede the slot time.
    #[error("range start {start} is not before slot time {slot}")]
    InvalidWindow {
        /// Range start.
        start: DateTime<Utc>,
        /// Slot time.
        slot: DateTime<Utc>,
    },

    /// Timezone name could not be resolved.
    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),

    /// A local wall-clock string could not be parsed.
    #[error("invalid local time '{value}': expected HH:MM")]
    InvalidLocalTime {
        /// The offending value.
        value: String,
    },
}
