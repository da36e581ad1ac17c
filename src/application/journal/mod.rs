//! Persistent journals: the execution ledger and per-stream lifecycle records.

pub mod execution;
mod fs;
pub mod stream;

pub use execution::{ExecutionJournal, ExecutionJournalEntry, JournalRecord, OrderRecord};
pub use fs::WRITE_ATTEMPTS;
pub use stream::{FileStreamJournalStore, StreamJournal, StreamJournalStore};

pub(crate) use fs::append_line;
