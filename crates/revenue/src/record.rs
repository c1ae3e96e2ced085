use core::str::FromStr;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use revsync_core::{DomainError, DomainResult, Entity, RecordId};
use revsync_invoicing::InvoiceId;

use crate::aggregate::PeriodAggregate;
use crate::buckets::BucketTotals;
use crate::period::PeriodKey;

/// Monetary totals of one period, in minor units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueTotals {
    pub total_amount: i64,
    pub total_paid_amount: i64,
    pub total_pending_amount: i64,
    pub invoice_count: i64,
}

impl RevenueTotals {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn new(total_paid_amount: i64, total_pending_amount: i64, invoice_count: i64) -> Self {
        Self {
            total_amount: total_paid_amount + total_pending_amount,
            total_paid_amount,
            total_pending_amount,
            invoice_count,
        }
    }

    pub fn buckets(&self) -> BucketTotals {
        BucketTotals::new(self.total_paid_amount, self.total_pending_amount)
    }

    pub fn aggregate(&self) -> PeriodAggregate {
        PeriodAggregate::new(self.invoice_count, self.total_amount)
    }

    pub fn from_parts(buckets: BucketTotals, aggregate: PeriodAggregate) -> Self {
        Self {
            total_amount: aggregate.total_amount,
            total_paid_amount: buckets.paid,
            total_pending_amount: buckets.pending,
            invoice_count: aggregate.invoice_count,
        }
    }

    pub fn check_invariants(&self) -> DomainResult<()> {
        if self.total_amount < 0
            || self.total_paid_amount < 0
            || self.total_pending_amount < 0
            || self.invoice_count < 0
        {
            return Err(DomainError::invariant(format!(
                "revenue totals must be non-negative: {self:?}"
            )));
        }
        if self.total_amount != self.total_paid_amount + self.total_pending_amount {
            return Err(DomainError::invariant(format!(
                "total {} does not equal paid {} + pending {}",
                self.total_amount, self.total_paid_amount, self.total_pending_amount
            )));
        }
        Ok(())
    }
}

/// How a record's current totals were produced. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationSource {
    InvoiceEvent,
    Template,
    Backfill,
}

impl CalculationSource {
    pub fn as_str(self) -> &'static str {
        match self {
            CalculationSource::InvoiceEvent => "invoice_event",
            CalculationSource::Template => "template",
            CalculationSource::Backfill => "backfill",
        }
    }
}

impl core::fmt::Display for CalculationSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalculationSource {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invoice_event" => Ok(CalculationSource::InvoiceEvent),
            "template" => Ok(CalculationSource::Template),
            "backfill" => Ok(CalculationSource::Backfill),
            other => Err(DomainError::validation(format!(
                "unknown calculation source '{other}'"
            ))),
        }
    }
}

/// Everything a write replaces on a record.
///
/// Totals and applied revisions always travel together so that a single
/// conditional write keeps them consistent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenuePatch {
    pub totals: RevenueTotals,
    pub calculation_source: CalculationSource,
    #[serde(default)]
    pub applied_revisions: BTreeMap<InvoiceId, u64>,
}

impl RevenuePatch {
    pub fn new(totals: RevenueTotals, calculation_source: CalculationSource) -> Self {
        Self {
            totals,
            calculation_source,
            applied_revisions: BTreeMap::new(),
        }
    }

    pub fn with_revisions(mut self, applied_revisions: BTreeMap<InvoiceId, u64>) -> Self {
        self.applied_revisions = applied_revisions;
        self
    }
}

/// Persisted revenue row: one per calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueRecord {
    pub id: RecordId,
    pub period: PeriodKey,
    #[serde(flatten)]
    pub totals: RevenueTotals,
    pub calculation_source: CalculationSource,
    /// Last applied invoice revision per invoice, for this period only.
    #[serde(default)]
    pub applied_revisions: BTreeMap<InvoiceId, u64>,
    /// Row version; 1 after insert, bumped by every write.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RevenueRecord {
    pub fn new(period: PeriodKey, patch: RevenuePatch, now: DateTime<Utc>) -> Self {
        Self {
            id: RecordId::new(),
            period,
            totals: patch.totals,
            calculation_source: patch.calculation_source,
            applied_revisions: patch.applied_revisions,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the mutable fields and bump the row version.
    pub fn apply_patch(&mut self, patch: RevenuePatch, now: DateTime<Utc>) {
        self.totals = patch.totals;
        self.calculation_source = patch.calculation_source;
        self.applied_revisions = patch.applied_revisions;
        self.version += 1;
        self.updated_at = now;
    }

    pub fn applied_revision(&self, invoice: &InvoiceId) -> Option<u64> {
        self.applied_revisions.get(invoice).copied()
    }

    /// True when `revision` for `invoice` is not newer than what this period
    /// already reflects.
    pub fn has_applied(&self, invoice: &InvoiceId, revision: u64) -> bool {
        self.applied_revision(invoice)
            .is_some_and(|applied| applied >= revision)
    }
}

impl Entity for RevenueRecord {
    type Id = RecordId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revsync_core::AggregateId;

    fn march() -> PeriodKey {
        PeriodKey::parse_month("2024-03").unwrap()
    }

    #[test]
    fn new_records_start_at_version_one() {
        let now = Utc::now();
        let record = RevenueRecord::new(
            march(),
            RevenuePatch::new(RevenueTotals::new(200, 0, 1), CalculationSource::InvoiceEvent),
            now,
        );
        assert_eq!(record.version, 1);
        assert_eq!(record.created_at, record.updated_at);
        assert!(record.totals.check_invariants().is_ok());
    }

    #[test]
    fn patch_bumps_version_and_replaces_revisions() {
        let now = Utc::now();
        let invoice = InvoiceId::new(AggregateId::new());
        let mut record = RevenueRecord::new(
            march(),
            RevenuePatch::new(RevenueTotals::zero(), CalculationSource::Template),
            now,
        );

        let mut revisions = BTreeMap::new();
        revisions.insert(invoice, 4);
        record.apply_patch(
            RevenuePatch::new(RevenueTotals::new(0, 75, 1), CalculationSource::InvoiceEvent)
                .with_revisions(revisions),
            now,
        );

        assert_eq!(record.version, 2);
        assert!(record.has_applied(&invoice, 4));
        assert!(record.has_applied(&invoice, 3));
        assert!(!record.has_applied(&invoice, 5));
    }

    #[test]
    fn invariant_check_catches_mismatch_and_negatives() {
        let mut totals = RevenueTotals::new(10, 5, 2);
        totals.total_amount = 16;
        assert!(matches!(
            totals.check_invariants(),
            Err(DomainError::InvariantViolation(_))
        ));

        let negative = RevenueTotals {
            total_amount: -1,
            total_paid_amount: -1,
            total_pending_amount: 0,
            invoice_count: 0,
        };
        assert!(negative.check_invariants().is_err());
    }

    #[test]
    fn calculation_source_round_trips_through_str() {
        for source in [
            CalculationSource::InvoiceEvent,
            CalculationSource::Template,
            CalculationSource::Backfill,
        ] {
            assert_eq!(source.as_str().parse::<CalculationSource>().unwrap(), source);
        }
    }
}
