//! Optimistic concurrency tokens for versioned records.

use crate::error::{DomainError, DomainResult};

/// Version expectation attached to a conditional write.
///
/// Every persisted record carries a row version that is bumped on each write.
/// Writers read the record, compute the new state and then write with
/// `Exact(read_version)`; a mismatch means another writer got there first.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip the version check (unconditional overwrite).
    Any,
    /// Require the stored record to be at exactly this version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}
