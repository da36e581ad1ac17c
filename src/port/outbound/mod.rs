//! Outbound ports (driven side): interfaces implemented by outbound adapters.
//!
//! These contracts describe the engine's external dependencies: order
//! routing, historical bars, the daily timetable, notifications and time.

pub mod bars;
pub mod clock;
pub mod execution;
pub mod notifier;
pub mod timetable;
