//! Outbound adapters (driven side).

pub mod memory;
pub mod paper;
pub mod replay;
pub mod serialized;
pub mod timetable;

pub use memory::MemoryStreamJournalStore;
pub use paper::PaperAdapter;
pub use replay::{ReplayBarProvider, ReplayClock, ReplayRecord};
pub use serialized::SerializedAdapter;
pub use timetable::FileTimetable;
