//! Rangelock - intraday range-breakout execution engine.
//!
//! Each configured stream watches one instrument for one trading date: it
//! builds the high/low range between a session start and a slot time, locks
//! it, places breakout entries on both sides, protects the filled side with a
//! stop and target, and stands down for the day once the trade resolves.
//!
//! # Architecture
//!
//! - **`domain`** - Time, bars, ranges, intents and lifecycle states. No I/O.
//! - **`port`** - Traits the application talks through: execution venue,
//!   bar provider, timetable, notifier, clock.
//! - **`application`** - Stream state machine, risk gate, journals, health
//!   monitor and the engine that dispatches ticks, bars and fills.
//! - **`adapter`** - Paper venue, replay sources, file timetable and the CLI.
//! - **`infrastructure`** - Configuration, logging, health checks, wiring.
//!
//! # Features
//!
//! - `testkit` - Scripted adapters and builders for integration tests.
//!
//! # Example
//!
//! ```no_run
//! use rangelock::infrastructure::config::Config;
//!
//! let config = Config::load("config.toml").unwrap();
//! let registry = config.registry().unwrap();
//! assert!(!registry.is_empty());
//! ```

pub mod adapter;
pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod port;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
