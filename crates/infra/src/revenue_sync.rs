//! Invoice change → revenue ledger synchronization.
//!
//! ```text
//! InvoiceChange
//!   ↓
//! 1. Validate shape (ids, amounts)
//!   ↓
//! 2. Classify (period derivation happens here)
//!   ↓
//! 3. For each period mutation:
//!      load record → skip if revision already applied → compute → conditional write
//!      (on Conflict: reload and retry, bounded)
//! ```
//!
//! Errors are returned, never swallowed. What to do with a failed event is
//! the caller's decision (see `FailurePolicy`).

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use revsync_core::{DomainError, ExpectedVersion};
use revsync_events::Event;
use revsync_invoicing::{InvoiceChange, InvoiceId};
use revsync_revenue::{
    Anomaly, CalculationSource, PeriodKey, PeriodMutation, RevenuePatch, RevenueRecord,
    RevenueTotals, Transition, classify,
};

use crate::config::SyncConfig;
use crate::revenue_store::{RepositoryError, RevenueRepository};

/// Which half of a period move failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStep {
    RemoveFromSource,
    AddToTarget,
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed date, bad event shape or negative amount. Nothing was written.
    #[error("invalid invoice change: {0}")]
    Validation(String),

    /// Write conflict that persisted through every retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A removal or adjustment targeted a period with no record.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unexpected failure: {0}")]
    Unexpected(String),

    /// The source period was already debited but the target period was not
    /// credited. Re-delivering the same event completes the move.
    #[error("period move of invoice {invoice_id} from {from} to {to} failed at {step:?}: {source}")]
    PartialPeriodMove {
        invoice_id: InvoiceId,
        from: PeriodKey,
        to: PeriodKey,
        step: MoveStep,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    pub fn is_validation(&self) -> bool {
        matches!(self, SyncError::Validation(_))
    }
}

impl From<DomainError> for SyncError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg)
            | DomainError::InvalidDate(msg)
            | DomainError::InvalidEventShape(msg)
            | DomainError::InvalidId(msg) => SyncError::Validation(msg),
            DomainError::Conflict(msg) => SyncError::Conflict(msg),
            DomainError::InvariantViolation(msg) => SyncError::Unexpected(msg),
        }
    }
}

impl From<RepositoryError> for SyncError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound(msg) => SyncError::NotFound(msg),
            RepositoryError::Conflict(msg) => SyncError::Conflict(msg),
            RepositoryError::Unexpected(msg) => SyncError::Unexpected(msg),
        }
    }
}

/// What happened to one period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeriodResult {
    Applied {
        record: RevenueRecord,
        anomalies: Vec<Anomaly>,
    },
    /// The period already reflects this (or a newer) revision of the invoice.
    Skipped {
        period: PeriodKey,
        applied_revision: u64,
    },
}

impl PeriodResult {
    pub fn period(&self) -> PeriodKey {
        match self {
            PeriodResult::Applied { record, .. } => record.period,
            PeriodResult::Skipped { period, .. } => *period,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub invoice_id: InvoiceId,
    pub transition: Transition,
    pub periods: Vec<PeriodResult>,
}

impl SyncOutcome {
    pub fn is_noop(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn applied(&self) -> impl Iterator<Item = &RevenueRecord> {
        self.periods.iter().filter_map(|p| match p {
            PeriodResult::Applied { record, .. } => Some(record),
            PeriodResult::Skipped { .. } => None,
        })
    }

    pub fn skipped_count(&self) -> usize {
        self.periods
            .iter()
            .filter(|p| matches!(p, PeriodResult::Skipped { .. }))
            .count()
    }
}

/// Keeps revenue records in step with invoice changes.
///
/// Construct once and share via `Arc`; it holds no mutable state of its own.
#[derive(Debug)]
pub struct RevenueSynchronizer<R> {
    repo: R,
    config: SyncConfig,
}

impl<R> RevenueSynchronizer<R> {
    pub fn new(repo: R, config: SyncConfig) -> Self {
        Self { repo, config }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}

impl<R> RevenueSynchronizer<R>
where
    R: RevenueRepository,
{
    #[instrument(
        skip_all,
        fields(
            event_type = change.event_type(),
            invoice_id = ?change.invoice_id(),
            revision = ?change.revision
        )
    )]
    pub fn process_invoice_change(&self, change: &InvoiceChange) -> Result<SyncOutcome, SyncError> {
        change.validate().inspect_err(|err| {
            warn!(error = %err, "rejecting malformed invoice change");
        })?;
        let invoice_id = change
            .invoice_id()
            .ok_or_else(|| SyncError::Validation("change has no invoice id".to_string()))?;

        let transition = classify(change.previous.as_ref(), change.current.as_ref())
            .inspect_err(|err| warn!(error = %err, "rejecting unclassifiable invoice change"))?;

        let mutations = transition.mutations();
        if mutations.is_empty() {
            debug!(transition = transition.name(), "no revenue impact");
        }

        let mut periods = Vec::with_capacity(mutations.len());
        for (step, mutation) in mutations.iter().enumerate() {
            match self.apply_with_retry(invoice_id, change.revision, mutation) {
                Ok(result) => periods.push(result),
                Err(err) => return Err(self.escalate(invoice_id, &transition, step, err)),
            }
        }

        Ok(SyncOutcome {
            invoice_id,
            transition,
            periods,
        })
    }

    pub fn find_by_period(&self, period: PeriodKey) -> Result<Option<RevenueRecord>, SyncError> {
        Ok(self.repo.find_by_period(period)?)
    }

    pub fn list_by_date_range(&self, from: PeriodKey, to: PeriodKey) -> Result<Vec<RevenueRecord>, SyncError> {
        Ok(self.repo.list_by_date_range(from, to)?)
    }

    /// Wrap a failure of the second step of a period move.
    fn escalate(&self, invoice_id: InvoiceId, transition: &Transition, step: usize, err: SyncError) -> SyncError {
        match (transition, step) {
            (
                Transition::PeriodMove {
                    from_period,
                    to_period,
                    ..
                },
                1,
            ) => {
                error!(
                    invoice_id = %invoice_id,
                    from = %from_period,
                    to = %to_period,
                    error = %err,
                    "period move half-applied; source debited, target not credited"
                );
                SyncError::PartialPeriodMove {
                    invoice_id,
                    from: *from_period,
                    to: *to_period,
                    step: MoveStep::AddToTarget,
                    source: Box::new(err),
                }
            }
            _ => err,
        }
    }

    fn apply_with_retry(
        &self,
        invoice_id: InvoiceId,
        revision: Option<u64>,
        mutation: &PeriodMutation,
    ) -> Result<PeriodResult, SyncError> {
        let mut attempt: u32 = 0;
        loop {
            match self.apply_once(invoice_id, revision, mutation) {
                Err(SyncError::Conflict(msg)) if attempt < self.config.max_conflict_retries => {
                    attempt += 1;
                    warn!(
                        period = %mutation.period,
                        attempt,
                        conflict = %msg,
                        "write conflict; reloading and retrying"
                    );
                }
                Err(SyncError::Conflict(msg)) => {
                    warn!(period = %mutation.period, attempts = attempt + 1, "giving up after repeated conflicts");
                    return Err(SyncError::Conflict(msg));
                }
                other => return other,
            }
        }
    }

    fn apply_once(
        &self,
        invoice_id: InvoiceId,
        revision: Option<u64>,
        mutation: &PeriodMutation,
    ) -> Result<PeriodResult, SyncError> {
        let period = mutation.period;

        let Some(record) = self.repo.find_by_period(period)? else {
            if !mutation.op.creates_record() {
                error!(
                    period = %period,
                    invoice_id = %invoice_id,
                    op = ?mutation.op,
                    "no revenue record for a period that should already count this invoice"
                );
                return Err(SyncError::NotFound(format!("no revenue record for period {period}")));
            }

            let outcome = mutation.apply(&RevenueTotals::zero());
            log_anomalies(period, invoice_id, &outcome.anomalies);

            let mut revisions = BTreeMap::new();
            if let Some(r) = revision {
                revisions.insert(invoice_id, r);
            }
            let record = self.repo.create(
                period,
                RevenuePatch::new(outcome.totals, CalculationSource::InvoiceEvent).with_revisions(revisions),
            )?;

            debug!(period = %period, version = record.version, totals = ?record.totals, "revenue record created");
            return Ok(PeriodResult::Applied {
                record,
                anomalies: outcome.anomalies,
            });
        };

        if let Some(r) = revision {
            if record.has_applied(&invoice_id, r) {
                let applied_revision = record.applied_revision(&invoice_id).unwrap_or(r);
                warn!(
                    period = %period,
                    invoice_id = %invoice_id,
                    incoming = r,
                    applied = applied_revision,
                    "skipping duplicate or stale invoice change"
                );
                return Ok(PeriodResult::Skipped {
                    period,
                    applied_revision,
                });
            }
        }

        let outcome = mutation.apply(&record.totals);
        log_anomalies(period, invoice_id, &outcome.anomalies);

        let mut revisions = record.applied_revisions.clone();
        if let Some(r) = revision {
            revisions.insert(invoice_id, r);
        }
        let updated = self.repo.update(
            record.id,
            RevenuePatch::new(outcome.totals, CalculationSource::InvoiceEvent).with_revisions(revisions),
            ExpectedVersion::Exact(record.version),
        )?;

        debug!(period = %period, version = updated.version, totals = ?updated.totals, "revenue record updated");
        Ok(PeriodResult::Applied {
            record: updated,
            anomalies: outcome.anomalies,
        })
    }
}

fn log_anomalies(period: PeriodKey, invoice_id: InvoiceId, anomalies: &[Anomaly]) {
    for anomaly in anomalies {
        warn!(period = %period, invoice_id = %invoice_id, ?anomaly, "revenue totals clamped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use revsync_core::AggregateId;
    use revsync_invoicing::{InvoiceSnapshot, InvoiceStatus};

    use crate::revenue_store::{InMemoryRevenueRepository, InjectedFault};

    fn sync() -> RevenueSynchronizer<Arc<InMemoryRevenueRepository>> {
        RevenueSynchronizer::new(Arc::new(InMemoryRevenueRepository::new()), SyncConfig::default())
    }

    fn invoice() -> InvoiceId {
        InvoiceId::new(AggregateId::new())
    }

    fn snap(id: InvoiceId, amount: i64, status: InvoiceStatus, date: &str) -> InvoiceSnapshot {
        InvoiceSnapshot::new(id, amount, status, date)
    }

    fn month(raw: &str) -> PeriodKey {
        PeriodKey::parse_month(raw).unwrap()
    }

    fn totals_of(s: &RevenueSynchronizer<Arc<InMemoryRevenueRepository>>, m: &str) -> RevenueTotals {
        s.find_by_period(month(m)).unwrap().unwrap().totals
    }

    #[test]
    fn march_lifecycle_matches_expected_totals() {
        let s = sync();
        let id = invoice();
        let v1 = snap(id, 200, InvoiceStatus::Paid, "2024-03-10");
        let v2 = snap(id, 350, InvoiceStatus::Paid, "2024-03-10");
        let v3 = snap(id, 350, InvoiceStatus::Pending, "2024-03-10");

        s.process_invoice_change(&InvoiceChange::created(v1.clone())).unwrap();
        assert_eq!(totals_of(&s, "2024-03"), RevenueTotals::new(200, 0, 1));

        s.process_invoice_change(&InvoiceChange::updated(v1, v2.clone())).unwrap();
        assert_eq!(totals_of(&s, "2024-03"), RevenueTotals::new(350, 0, 1));

        s.process_invoice_change(&InvoiceChange::updated(v2, v3.clone())).unwrap();
        assert_eq!(totals_of(&s, "2024-03"), RevenueTotals::new(0, 350, 1));

        s.process_invoice_change(&InvoiceChange::deleted(v3)).unwrap();
        assert_eq!(totals_of(&s, "2024-03"), RevenueTotals::zero());
    }

    #[test]
    fn over_removal_is_clamped_and_flagged_not_rejected() {
        let s = sync();
        let id = invoice();
        s.process_invoice_change(&InvoiceChange::created(snap(id, 100, InvoiceStatus::Paid, "2024-03-10")))
            .unwrap();

        // The previous snapshot claims more than the period ever counted.
        let outcome = s
            .process_invoice_change(&InvoiceChange::deleted(snap(id, 150, InvoiceStatus::Paid, "2024-03-10")))
            .unwrap();

        match outcome.periods.as_slice() {
            [PeriodResult::Applied { record, anomalies }] => {
                assert!(anomalies.contains(&Anomaly::BucketClamped));
                assert_eq!(record.totals, RevenueTotals::zero());
                assert!(record.totals.check_invariants().is_ok());
            }
            other => panic!("expected one applied period, got {other:?}"),
        }
    }

    #[test]
    fn period_move_debits_source_and_credits_target() {
        let s = sync();
        let id = invoice();
        let march = snap(id, 75, InvoiceStatus::Pending, "2024-03-20");
        let april = snap(id, 75, InvoiceStatus::Pending, "2024-04-02");

        s.process_invoice_change(&InvoiceChange::created(march.clone())).unwrap();
        let outcome = s
            .process_invoice_change(&InvoiceChange::updated(march, april))
            .unwrap();

        assert_eq!(outcome.transition.name(), "period_move");
        assert_eq!(outcome.applied().count(), 2);
        assert_eq!(totals_of(&s, "2024-03"), RevenueTotals::zero());
        assert_eq!(totals_of(&s, "2024-04"), RevenueTotals::new(0, 75, 1));
    }

    #[test]
    fn versioned_duplicate_is_counted_once() {
        let s = sync();
        let change = InvoiceChange::created(snap(invoice(), 100, InvoiceStatus::Pending, "2024-03-01"))
            .with_revision(1);

        s.process_invoice_change(&change).unwrap();
        let replay = s.process_invoice_change(&change).unwrap();

        assert_eq!(replay.skipped_count(), 1);
        assert_eq!(totals_of(&s, "2024-03"), RevenueTotals::new(0, 100, 1));
    }

    #[test]
    fn stale_revision_is_skipped() {
        let s = sync();
        let id = invoice();
        let v1 = snap(id, 100, InvoiceStatus::Paid, "2024-03-01");
        let v2 = snap(id, 180, InvoiceStatus::Paid, "2024-03-01");

        s.process_invoice_change(&InvoiceChange::created(v1.clone()).with_revision(1))
            .unwrap();
        s.process_invoice_change(&InvoiceChange::updated(v1.clone(), v2).with_revision(3))
            .unwrap();
        let late = s
            .process_invoice_change(&InvoiceChange::updated(v1.clone(), v1).with_revision(2))
            .unwrap();

        assert_eq!(late.skipped_count(), 1);
        assert_eq!(totals_of(&s, "2024-03"), RevenueTotals::new(180, 0, 1));
    }

    #[test]
    fn create_then_delete_restores_previous_totals() {
        let s = sync();
        s.process_invoice_change(&InvoiceChange::created(snap(
            invoice(),
            40,
            InvoiceStatus::Paid,
            "2024-03-03",
        )))
        .unwrap();
        let before = totals_of(&s, "2024-03");

        let extra = snap(invoice(), 100, InvoiceStatus::Pending, "2024-03-09");
        s.process_invoice_change(&InvoiceChange::created(extra.clone())).unwrap();
        s.process_invoice_change(&InvoiceChange::deleted(extra)).unwrap();

        assert_eq!(totals_of(&s, "2024-03"), before);
    }

    #[test]
    fn malformed_changes_write_nothing() {
        let s = sync();

        let err = s
            .process_invoice_change(&InvoiceChange::created(snap(
                invoice(),
                10,
                InvoiceStatus::Paid,
                "March 3rd",
            )))
            .unwrap_err();
        assert!(err.is_validation());

        let err = s.process_invoice_change(&InvoiceChange::new(None, None)).unwrap_err();
        assert!(err.is_validation());

        assert_eq!(s.repository().write_count(), 0);
    }

    #[test]
    fn removal_from_missing_period_is_not_found() {
        let s = sync();
        let err = s
            .process_invoice_change(&InvoiceChange::deleted(snap(
                invoice(),
                10,
                InvoiceStatus::Paid,
                "2024-03-03",
            )))
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[test]
    fn single_conflict_is_retried_away() {
        let s = sync();
        let id = invoice();
        let v1 = snap(id, 100, InvoiceStatus::Paid, "2024-03-01");
        let v2 = snap(id, 150, InvoiceStatus::Paid, "2024-03-01");
        s.process_invoice_change(&InvoiceChange::created(v1.clone())).unwrap();

        s.repository().inject_fault(InjectedFault::Conflict);
        s.process_invoice_change(&InvoiceChange::updated(v1, v2)).unwrap();

        assert_eq!(totals_of(&s, "2024-03"), RevenueTotals::new(150, 0, 1));
    }

    #[test]
    fn conflicts_beyond_the_retry_budget_surface() {
        let s = sync();
        let id = invoice();
        let v1 = snap(id, 100, InvoiceStatus::Paid, "2024-03-01");
        let v2 = snap(id, 150, InvoiceStatus::Paid, "2024-03-01");
        s.process_invoice_change(&InvoiceChange::created(v1.clone())).unwrap();

        s.repository().inject_fault(InjectedFault::Conflict);
        s.repository().inject_fault(InjectedFault::Conflict);
        let err = s.process_invoice_change(&InvoiceChange::updated(v1, v2)).unwrap_err();

        assert!(matches!(err, SyncError::Conflict(_)));
        assert_eq!(totals_of(&s, "2024-03"), RevenueTotals::new(100, 0, 1));
    }

    #[test]
    fn storage_failures_are_not_retried() {
        let s = sync();
        s.repository().inject_fault(InjectedFault::Unexpected);
        let err = s
            .process_invoice_change(&InvoiceChange::created(snap(
                invoice(),
                10,
                InvoiceStatus::Paid,
                "2024-03-03",
            )))
            .unwrap_err();
        assert!(matches!(err, SyncError::Unexpected(_)));
        assert!(s.find_by_period(month("2024-03")).unwrap().is_none());
    }

    #[test]
    fn half_applied_period_move_is_completed_by_redelivery() {
        let s = sync();
        let id = invoice();
        let march = snap(id, 75, InvoiceStatus::Pending, "2024-03-20");
        let april = snap(id, 75, InvoiceStatus::Pending, "2024-04-02");
        s.process_invoice_change(&InvoiceChange::created(march.clone()).with_revision(1))
            .unwrap();

        let mv = InvoiceChange::updated(march, april).with_revision(2);
        s.repository().pass_next_write();
        s.repository().inject_fault(InjectedFault::Unexpected);

        let err = s.process_invoice_change(&mv).unwrap_err();
        match &err {
            SyncError::PartialPeriodMove { from, to, step, .. } => {
                assert_eq!(*from, month("2024-03"));
                assert_eq!(*to, month("2024-04"));
                assert_eq!(*step, MoveStep::AddToTarget);
            }
            other => panic!("expected PartialPeriodMove, got {other:?}"),
        }
        assert_eq!(totals_of(&s, "2024-03"), RevenueTotals::zero());
        assert!(s.find_by_period(month("2024-04")).unwrap().is_none());

        let outcome = s.process_invoice_change(&mv).unwrap();
        assert_eq!(outcome.skipped_count(), 1);
        assert_eq!(totals_of(&s, "2024-03"), RevenueTotals::zero());
        assert_eq!(totals_of(&s, "2024-04"), RevenueTotals::new(0, 75, 1));
    }
}
