//! Application services (use cases).
//!
//! These services orchestrate domain logic and coordinate adapters
//! to implement the engine's use cases: per-stream lifecycles, the
//! execution ledger, admission checks and operator health.

pub mod engine;
pub mod health;
pub mod journal;
pub mod retry;
pub mod risk;
pub mod stream;

pub use engine::{
    BarEvent, DayTransition, Engine, EngineInput, EngineOptions, EngineParts, SessionSchedule,
};
pub use health::{AlertQuota, HealthMonitor, Incident, IncidentKind};
pub use journal::{
    ExecutionJournal, ExecutionJournalEntry, FileStreamJournalStore, StreamJournal,
    StreamJournalStore,
};
pub use retry::{Backoff, RetryPolicy};
pub use risk::{evaluate, GateCheck, GateContext, GateDecision};
pub use stream::{StreamConfig, StreamDeps, StreamMachine, StreamSettings};
