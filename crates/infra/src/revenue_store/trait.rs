use std::sync::Arc;

use thiserror::Error;

use revsync_core::{ExpectedVersion, RecordId};
use revsync_revenue::{PeriodKey, RevenuePatch, RevenueRecord};

/// Revenue repository operation error.
///
/// - **NotFound**: `update` targeted an id with no row
/// - **Conflict**: duplicate period on `create`, or a stale `expected_version`
/// - **Unexpected**: storage or transport failure; not retried by the engine
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("revenue record not found: {0}")]
    NotFound(String),

    #[error("revenue record conflict: {0}")]
    Conflict(String),

    #[error("unexpected repository failure: {0}")]
    Unexpected(String),
}

/// Storage for [`RevenueRecord`]s.
///
/// Implementations must:
/// - keep at most one record per period
/// - start every record at version 1 and bump the version on each write
/// - apply `update` only when `expected_version` matches the stored version
/// - write totals and applied revisions together, atomically
pub trait RevenueRepository: Send + Sync {
    fn find_by_period(&self, period: PeriodKey) -> Result<Option<RevenueRecord>, RepositoryError>;

    fn find_by_id(&self, id: RecordId) -> Result<Option<RevenueRecord>, RepositoryError>;

    /// Insert a new record. Fails with `Conflict` when the period already has one.
    fn create(&self, period: PeriodKey, patch: RevenuePatch) -> Result<RevenueRecord, RepositoryError>;

    fn update(
        &self,
        id: RecordId,
        patch: RevenuePatch,
        expected_version: ExpectedVersion,
    ) -> Result<RevenueRecord, RepositoryError>;

    /// Insert or unconditionally overwrite the record for `period`.
    fn upsert_by_period(&self, period: PeriodKey, patch: RevenuePatch) -> Result<RevenueRecord, RepositoryError>;

    /// Records with `from <= period <= to`, ascending by period.
    fn list_by_date_range(&self, from: PeriodKey, to: PeriodKey) -> Result<Vec<RevenueRecord>, RepositoryError>;
}

impl<R> RevenueRepository for Arc<R>
where
    R: RevenueRepository + ?Sized,
{
    fn find_by_period(&self, period: PeriodKey) -> Result<Option<RevenueRecord>, RepositoryError> {
        (**self).find_by_period(period)
    }

    fn find_by_id(&self, id: RecordId) -> Result<Option<RevenueRecord>, RepositoryError> {
        (**self).find_by_id(id)
    }

    fn create(&self, period: PeriodKey, patch: RevenuePatch) -> Result<RevenueRecord, RepositoryError> {
        (**self).create(period, patch)
    }

    fn update(
        &self,
        id: RecordId,
        patch: RevenuePatch,
        expected_version: ExpectedVersion,
    ) -> Result<RevenueRecord, RepositoryError> {
        (**self).update(id, patch, expected_version)
    }

    fn upsert_by_period(&self, period: PeriodKey, patch: RevenuePatch) -> Result<RevenueRecord, RepositoryError> {
        (**self).upsert_by_period(period, patch)
    }

    fn list_by_date_range(&self, from: PeriodKey, to: PeriodKey) -> Result<Vec<RevenueRecord>, RepositoryError> {
        (**self).list_by_date_range(from, to)
    }
}
