//! Persistence boundary for monthly revenue records.
//!
//! One row per period. Every write is a single atomic operation guarded by the
//! row version, so callers never observe a half-applied bucket mutation.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryRevenueRepository;
#[cfg(test)]
pub use in_memory::InjectedFault;
pub use postgres::PostgresRevenueRepository;
pub use r#trait::{RepositoryError, RevenueRepository};
