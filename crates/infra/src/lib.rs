//! Infrastructure layer: revenue persistence, the sync orchestrator and the
//! workers that feed it.

pub mod backfill;
pub mod config;
pub mod revenue_store;
pub mod revenue_sync;
pub mod workers;


pub use backfill::{Backfill, BackfillReport};
pub use config::{ConfigError, FailurePolicy, SyncConfig};
pub use revenue_store::{InMemoryRevenueRepository, PostgresRevenueRepository, RepositoryError, RevenueRepository};
pub use revenue_sync::{MoveStep, PeriodResult, RevenueSynchronizer, SyncError, SyncOutcome};
