//! Monthly revenue ledger domain.
//!
//! Everything in this crate is pure: period derivation, bucket and aggregate
//! arithmetic, change classification and full-ledger recomputation. Loading
//! and persisting records is the infra layer's job.

pub mod aggregate;
pub mod buckets;
pub mod classifier;
pub mod ledger;
pub mod period;
pub mod record;

pub use aggregate::PeriodAggregate;
pub use buckets::{Adjusted, Bucket, BucketMove, BucketTotals, apply_delta_to_bucket, move_between_buckets};
pub use classifier::{Anomaly, MutationOp, MutationOutcome, PeriodMutation, Transition, classify};
pub use ledger::{ComputedPeriod, DriftReport, compute_period_totals, diff_ledgers};
pub use period::{PeriodKey, derive_period};
pub use record::{CalculationSource, RevenuePatch, RevenueRecord, RevenueTotals};
