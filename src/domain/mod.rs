//! Exchange-agnostic domain logic: time, bars, ranges, intents and states.

pub mod bar;
pub mod error;
pub mod id;
pub mod instrument;
pub mod intent;
pub mod range;
pub mod state;
pub mod time;

pub use bar::{Bar, BarSource};
pub use error::DomainError;
pub use id::{BrokerOrderId, Instrument, IntentId, StreamKey};
pub use instrument::{round_to_tick, InstrumentRegistry, InstrumentSpec};
pub use intent::{
    BreakoutLevels, Direction, EntryOrderType, Intent, IntentParams, OrderKind, TriggerReason,
};
pub use range::{
    GapPolicy, GapStats, GapViolation, InsertOutcome, RangeBuffer, RangeComputer, RangeWindow,
};
pub use state::{NoTradeReason, OrderLifecycle, StreamState, TerminalReason};
pub use time::{parse_local_time, TimeService};
