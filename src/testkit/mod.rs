//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests).
//!
//! # Modules
//!
//! - [`adapter`] - `ScriptedAdapter`, an
//!   [`ExecutionAdapter`](crate::port::ExecutionAdapter) with queued results
//!   and a call log.
//! - [`domain`] - Builders for instruments, stream configs, bars and settings.
//! - [`sources`] - Static bar provider and timetable for engine tests.
//! - [`stream`] - `Fixture`: in-memory or on-disk collaborators for machines.
//!
//! Every instant is on 2025-03-10 (a Monday) in UTC. The canonical stream
//! builds its range from 13:00 to 14:00 and the session closes at 20:00.

pub mod adapter;
pub mod domain;
pub mod sources;
pub mod stream;
