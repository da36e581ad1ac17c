//! Trait definitions (hexagonal ports). Depend only on domain.
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │      Application        │
//!     ┌──────────────┤  Domain + Port          ├──────────────┐
//!     │              └─────────────────────────┘              │
//!     ▼                         ▼                             ▼
//! ┌──────────┐          ┌──────────────┐              ┌───────────┐
//! │Execution │          │ Bars /       │              │ Notifier  │
//! │ Adapter  │          │ Timetable    │              │  Adapter  │
//! └──────────┘          └──────────────┘              └───────────┘
//! ```
//!
//! # Available Ports
//!
//! - [`ExecutionAdapter`] - Order submission, cancellation and flattening
//! - [`BarProvider`] - Historical bars for hydration
//! - [`TimetableSource`] - Per-day stream configuration
//! - [`Notifier`] - Operator alerts
//! - [`Clock`] - Time source

pub mod outbound;

pub use outbound::bars::BarProvider;
pub use outbound::clock::{Clock, SystemClock};
pub use outbound::execution::{
    CancelResult, ExecutionAdapter, ExecutionEvent, FillReport, FlattenResult, OcoGroup,
    OrderResult, OrderStatus, OrderUpdate,
};
pub use outbound::notifier::{Event, LogNotifier, Notifier, NotifierRegistry, NullNotifier};
pub use outbound::timetable::{TimetableEntry, TimetableRow, TimetableSource};
