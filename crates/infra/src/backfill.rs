//! Ledger rebuild and drift detection over a range of periods.
//!
//! Both operations recompute the expected ledger from the current state of
//! every invoice (`compute_period_totals`) and compare or overwrite the
//! stored records in `[from, to]`. Periods outside the range are untouched.

use std::collections::BTreeMap;

use tracing::{info, instrument, warn};

use revsync_invoicing::{InvoiceId, InvoiceSnapshot};
use revsync_revenue::{
    CalculationSource, ComputedPeriod, DriftReport, PeriodKey, RevenuePatch, RevenueRecord, RevenueTotals,
    compute_period_totals, diff_ledgers,
};

use crate::revenue_store::RevenueRepository;
use crate::revenue_sync::SyncError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Periods written from recomputed totals.
    pub periods_written: usize,
    /// Stored periods with no eligible invoices left, reset to zero.
    pub periods_zeroed: usize,
}

#[derive(Debug)]
pub struct Backfill<R> {
    repo: R,
}

impl<R> Backfill<R>
where
    R: RevenueRepository,
{
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Overwrite every record in `[from, to]` with totals recomputed from
    /// `snapshots`.
    ///
    /// `revisions` holds the current revision of each invoice. Every period
    /// the rebuild writes gets all of them, merged with the revisions already
    /// stored there (highest wins). An invoice that left a period, or was
    /// deleted, therefore still has its revision recorded in the old period,
    /// and older redeliveries are skipped once incremental sync resumes.
    #[instrument(skip(self, snapshots, revisions), fields(from = %from, to = %to, invoices = snapshots.len()))]
    pub fn rebuild(
        &self,
        from: PeriodKey,
        to: PeriodKey,
        snapshots: &[InvoiceSnapshot],
        revisions: &BTreeMap<InvoiceId, u64>,
    ) -> Result<BackfillReport, SyncError> {
        let computed = computed_in_range(snapshots, from, to)?;
        let stored: BTreeMap<PeriodKey, RevenueRecord> = self
            .repo
            .list_by_date_range(from, to)?
            .into_iter()
            .map(|r| (r.period, r))
            .collect();

        let mut report = BackfillReport::default();

        for (period, entry) in &computed {
            let applied = merge_revisions(stored.get(period), revisions);
            self.repo.upsert_by_period(
                *period,
                RevenuePatch::new(entry.totals, CalculationSource::Backfill).with_revisions(applied),
            )?;
            report.periods_written += 1;
        }

        for (period, record) in stored.iter().filter(|(p, _)| !computed.contains_key(p)) {
            let applied = merge_revisions(Some(record), revisions);
            self.repo.upsert_by_period(
                *period,
                RevenuePatch::new(RevenueTotals::zero(), CalculationSource::Backfill).with_revisions(applied),
            )?;
            report.periods_zeroed += 1;
        }

        info!(
            written = report.periods_written,
            zeroed = report.periods_zeroed,
            "revenue ledger rebuilt"
        );
        Ok(report)
    }

    /// Periods in `[from, to]` whose stored totals differ from the recomputed ones.
    #[instrument(skip(self, snapshots), fields(from = %from, to = %to))]
    pub fn detect_drift(
        &self,
        from: PeriodKey,
        to: PeriodKey,
        snapshots: &[InvoiceSnapshot],
    ) -> Result<Vec<DriftReport>, SyncError> {
        let computed = computed_in_range(snapshots, from, to)?;
        let stored: BTreeMap<PeriodKey, RevenueTotals> = self
            .repo
            .list_by_date_range(from, to)?
            .into_iter()
            .map(|r| (r.period, r.totals))
            .collect();

        let drift = diff_ledgers(&stored, &computed);
        for d in &drift {
            warn!(
                period = %d.period,
                stored = ?d.stored,
                expected = ?d.expected,
                delta = d.total_delta(),
                "revenue drift detected"
            );
        }
        Ok(drift)
    }
}

fn merge_revisions(
    stored: Option<&RevenueRecord>,
    revisions: &BTreeMap<InvoiceId, u64>,
) -> BTreeMap<InvoiceId, u64> {
    let mut merged = stored.map(|r| r.applied_revisions.clone()).unwrap_or_default();
    for (id, rev) in revisions {
        let slot = merged.entry(*id).or_insert(*rev);
        *slot = (*slot).max(*rev);
    }
    merged
}

fn computed_in_range(
    snapshots: &[InvoiceSnapshot],
    from: PeriodKey,
    to: PeriodKey,
) -> Result<BTreeMap<PeriodKey, ComputedPeriod>, SyncError> {
    let mut computed = compute_period_totals(snapshots)?;
    computed.retain(|period, _| *period >= from && *period <= to);
    Ok(computed)
}
