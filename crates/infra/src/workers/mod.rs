//! Background workers that feed the revenue synchronizer.

pub mod dead_letter;
pub mod sync_worker;

pub use dead_letter::{DeadLetterEntry, DeadLetterError, DeadLetterQueue, RedriveReport};
pub use sync_worker::{SyncWorker, WorkerHandle, WorkerStats};
