//! Change classification.
//!
//! `classify` turns a `(previous, current)` snapshot pair into one of a fixed
//! set of transitions. A transition then expands into at most two
//! [`PeriodMutation`]s, each of which touches exactly one period record.

use revsync_core::{DomainError, DomainResult};
use revsync_invoicing::InvoiceSnapshot;

use crate::buckets::{Bucket, BucketMove, apply_delta_to_bucket, move_between_buckets};
use crate::period::{PeriodKey, derive_period};
use crate::record::RevenueTotals;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// New eligible invoice.
    Create {
        period: PeriodKey,
        bucket: Bucket,
        amount: i64,
    },
    /// Eligible invoice removed.
    Delete {
        period: PeriodKey,
        bucket: Bucket,
        amount: i64,
    },
    IneligibleToEligible {
        period: PeriodKey,
        bucket: Bucket,
        amount: i64,
    },
    EligibleToIneligible {
        period: PeriodKey,
        bucket: Bucket,
        amount: i64,
    },
    /// Same period, same bucket, different amount.
    AmountChange {
        period: PeriodKey,
        bucket: Bucket,
        previous_amount: i64,
        current_amount: i64,
    },
    /// Same period, paid <-> pending.
    BucketMove { period: PeriodKey, mv: BucketMove },
    /// Eligible on both sides but the period changed.
    PeriodMove {
        from_period: PeriodKey,
        from_bucket: Bucket,
        previous_amount: i64,
        to_period: PeriodKey,
        to_bucket: Bucket,
        current_amount: i64,
    },
    NoOp,
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Create { .. } => "create",
            Transition::Delete { .. } => "delete",
            Transition::IneligibleToEligible { .. } => "ineligible_to_eligible",
            Transition::EligibleToIneligible { .. } => "eligible_to_ineligible",
            Transition::AmountChange { .. } => "amount_change",
            Transition::BucketMove { .. } => "bucket_move",
            Transition::PeriodMove { .. } => "period_move",
            Transition::NoOp => "noop",
        }
    }

    /// Per-period mutations, in the order they must be applied.
    ///
    /// `PeriodMove` yields the removal from the old period first.
    pub fn mutations(&self) -> Vec<PeriodMutation> {
        match *self {
            Transition::Create { period, bucket, amount }
            | Transition::IneligibleToEligible { period, bucket, amount } => {
                vec![PeriodMutation::new(period, MutationOp::Add { bucket, amount })]
            }
            Transition::Delete { period, bucket, amount }
            | Transition::EligibleToIneligible { period, bucket, amount } => {
                vec![PeriodMutation::new(period, MutationOp::Remove { bucket, amount })]
            }
            Transition::AmountChange {
                period,
                bucket,
                previous_amount,
                current_amount,
            } => vec![PeriodMutation::new(
                period,
                MutationOp::Adjust {
                    bucket,
                    previous_amount,
                    current_amount,
                },
            )],
            Transition::BucketMove { period, mv } => {
                vec![PeriodMutation::new(period, MutationOp::Move(mv))]
            }
            Transition::PeriodMove {
                from_period,
                from_bucket,
                previous_amount,
                to_period,
                to_bucket,
                current_amount,
            } => vec![
                PeriodMutation::new(
                    from_period,
                    MutationOp::Remove {
                        bucket: from_bucket,
                        amount: previous_amount,
                    },
                ),
                PeriodMutation::new(
                    to_period,
                    MutationOp::Add {
                        bucket: to_bucket,
                        amount: current_amount,
                    },
                ),
            ],
            Transition::NoOp => Vec::new(),
        }
    }
}

/// Eligible side of a snapshot: its bucket, period and amount.
struct Contribution {
    bucket: Bucket,
    period: PeriodKey,
    amount: i64,
}

/// Dates are only parsed for eligible snapshots; an ineligible snapshot never
/// touches a period, so its date is irrelevant.
fn contribution(snapshot: Option<&InvoiceSnapshot>) -> DomainResult<Option<Contribution>> {
    let Some(snapshot) = snapshot else {
        return Ok(None);
    };
    snapshot.validate()?;
    let Some(bucket) = Bucket::for_status(snapshot.status) else {
        return Ok(None);
    };
    Ok(Some(Contribution {
        bucket,
        period: derive_period(&snapshot.date)?,
        amount: snapshot.amount,
    }))
}

pub fn classify(
    previous: Option<&InvoiceSnapshot>,
    current: Option<&InvoiceSnapshot>,
) -> DomainResult<Transition> {
    match (previous, current) {
        (None, None) => {
            return Err(DomainError::invalid_event_shape(
                "change carries neither a previous nor a current snapshot",
            ));
        }
        (Some(prev), Some(cur)) if prev.id != cur.id => {
            return Err(DomainError::invalid_event_shape(format!(
                "previous snapshot is for invoice {} but current is for {}",
                prev.id, cur.id
            )));
        }
        _ => {}
    }

    let before = contribution(previous)?;
    let after = contribution(current)?;

    let transition = match (before, after) {
        (None, None) => Transition::NoOp,

        (None, Some(c)) => {
            if previous.is_none() {
                Transition::Create {
                    period: c.period,
                    bucket: c.bucket,
                    amount: c.amount,
                }
            } else {
                Transition::IneligibleToEligible {
                    period: c.period,
                    bucket: c.bucket,
                    amount: c.amount,
                }
            }
        }

        (Some(p), None) => {
            if current.is_none() {
                Transition::Delete {
                    period: p.period,
                    bucket: p.bucket,
                    amount: p.amount,
                }
            } else {
                Transition::EligibleToIneligible {
                    period: p.period,
                    bucket: p.bucket,
                    amount: p.amount,
                }
            }
        }

        (Some(p), Some(c)) if p.period != c.period => Transition::PeriodMove {
            from_period: p.period,
            from_bucket: p.bucket,
            previous_amount: p.amount,
            to_period: c.period,
            to_bucket: c.bucket,
            current_amount: c.amount,
        },

        (Some(p), Some(c)) if p.bucket != c.bucket => Transition::BucketMove {
            period: c.period,
            mv: BucketMove {
                from: p.bucket,
                to: c.bucket,
                previous_amount: p.amount,
                current_amount: c.amount,
            },
        },

        (Some(p), Some(c)) => Transition::AmountChange {
            period: c.period,
            bucket: c.bucket,
            previous_amount: p.amount,
            current_amount: c.amount,
        },
    };

    Ok(transition)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOp {
    Add {
        bucket: Bucket,
        amount: i64,
    },
    Remove {
        bucket: Bucket,
        amount: i64,
    },
    Adjust {
        bucket: Bucket,
        previous_amount: i64,
        current_amount: i64,
    },
    Move(BucketMove),
}

impl MutationOp {
    /// Whether the mutation can start from an empty period.
    ///
    /// Only additions may create a record; every other op assumes the
    /// invoice is already counted somewhere in the period.
    pub fn creates_record(&self) -> bool {
        matches!(self, MutationOp::Add { .. })
    }
}

/// Something odd observed while applying a mutation. Never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    /// A bucket would have gone negative and was floored at zero.
    BucketClamped,
    /// Invoice count or aggregate total would have gone negative.
    AggregateClamped,
    /// Aggregate total and bucket sum disagreed; the bucket sum was kept.
    TotalMismatch { aggregate_total: i64, bucket_sum: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutcome {
    pub totals: RevenueTotals,
    pub anomalies: Vec<Anomaly>,
}

impl MutationOutcome {
    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }
}

/// One atomic change to a single period's totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodMutation {
    pub period: PeriodKey,
    pub op: MutationOp,
}

impl PeriodMutation {
    pub fn new(period: PeriodKey, op: MutationOp) -> Self {
        Self { period, op }
    }

    pub fn apply(&self, current: &RevenueTotals) -> MutationOutcome {
        let buckets = current.buckets();
        let aggregate = current.aggregate();

        let (buckets, aggregate) = match self.op {
            MutationOp::Add { bucket, amount } => (
                apply_delta_to_bucket(buckets, bucket, amount),
                aggregate.after_add(amount),
            ),
            MutationOp::Remove { bucket, amount } => (
                apply_delta_to_bucket(buckets, bucket, -amount),
                aggregate.after_removal(amount),
            ),
            MutationOp::Adjust {
                bucket,
                previous_amount,
                current_amount,
            } => (
                apply_delta_to_bucket(buckets, bucket, current_amount - previous_amount),
                aggregate.after_amount_change(previous_amount, current_amount),
            ),
            MutationOp::Move(mv) => (
                move_between_buckets(buckets, mv),
                aggregate.after_amount_change(mv.previous_amount, mv.current_amount),
            ),
        };

        let mut anomalies = Vec::new();
        if buckets.clamped {
            anomalies.push(Anomaly::BucketClamped);
        }
        if aggregate.clamped {
            anomalies.push(Anomaly::AggregateClamped);
        }

        let mut totals = RevenueTotals::from_parts(buckets.value, aggregate.value);
        let bucket_sum = buckets.value.sum();
        if totals.total_amount != bucket_sum {
            anomalies.push(Anomaly::TotalMismatch {
                aggregate_total: totals.total_amount,
                bucket_sum,
            });
            totals.total_amount = bucket_sum;
        }

        MutationOutcome { totals, anomalies }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use revsync_core::AggregateId;
    use revsync_invoicing::{InvoiceId, InvoiceStatus};

    fn id() -> InvoiceId {
        InvoiceId::new(AggregateId::new())
    }

    fn snap(id: InvoiceId, amount: i64, status: InvoiceStatus, date: &str) -> InvoiceSnapshot {
        InvoiceSnapshot::new(id, amount, status, date)
    }

    fn month(raw: &str) -> PeriodKey {
        PeriodKey::parse_month(raw).unwrap()
    }

    #[test]
    fn absent_to_eligible_is_create() {
        let cur = snap(id(), 200, InvoiceStatus::Paid, "2024-03-10");
        let t = classify(None, Some(&cur)).unwrap();
        assert_eq!(
            t,
            Transition::Create {
                period: month("2024-03"),
                bucket: Bucket::Paid,
                amount: 200
            }
        );
    }

    #[test]
    fn eligible_to_absent_is_delete() {
        let prev = snap(id(), 200, InvoiceStatus::Pending, "2024-03-10");
        let t = classify(Some(&prev), None).unwrap();
        assert_eq!(
            t,
            Transition::Delete {
                period: month("2024-03"),
                bucket: Bucket::Pending,
                amount: 200
            }
        );
    }

    #[test]
    fn ineligible_to_eligible_adds() {
        let i = id();
        let prev = snap(i, 90, InvoiceStatus::Draft, "2024-03-10");
        let cur = snap(i, 90, InvoiceStatus::Pending, "2024-03-10");
        assert_eq!(
            classify(Some(&prev), Some(&cur)).unwrap(),
            Transition::IneligibleToEligible {
                period: month("2024-03"),
                bucket: Bucket::Pending,
                amount: 90
            }
        );
    }

    #[test]
    fn eligible_to_ineligible_removes() {
        let i = id();
        let prev = snap(i, 90, InvoiceStatus::Paid, "2024-03-10");
        let cur = snap(i, 90, InvoiceStatus::Void, "2024-03-10");
        assert_eq!(
            classify(Some(&prev), Some(&cur)).unwrap(),
            Transition::EligibleToIneligible {
                period: month("2024-03"),
                bucket: Bucket::Paid,
                amount: 90
            }
        );
    }

    #[test]
    fn same_status_amount_edit_is_amount_change() {
        let i = id();
        let prev = snap(i, 200, InvoiceStatus::Paid, "2024-03-10");
        let cur = snap(i, 350, InvoiceStatus::Paid, "2024-03-20");
        assert_eq!(
            classify(Some(&prev), Some(&cur)).unwrap(),
            Transition::AmountChange {
                period: month("2024-03"),
                bucket: Bucket::Paid,
                previous_amount: 200,
                current_amount: 350
            }
        );
    }

    #[test]
    fn paid_to_pending_is_bucket_move() {
        let i = id();
        let prev = snap(i, 350, InvoiceStatus::Paid, "2024-03-10");
        let cur = snap(i, 350, InvoiceStatus::Pending, "2024-03-10");
        let t = classify(Some(&prev), Some(&cur)).unwrap();
        assert!(matches!(
            t,
            Transition::BucketMove { mv, .. } if mv.from == Bucket::Paid && mv.to == Bucket::Pending
        ));
    }

    #[test]
    fn date_across_months_is_period_move() {
        let i = id();
        let prev = snap(i, 75, InvoiceStatus::Pending, "2024-03-31");
        let cur = snap(i, 75, InvoiceStatus::Pending, "2024-04-01");
        let t = classify(Some(&prev), Some(&cur)).unwrap();
        assert_eq!(t.name(), "period_move");

        let muts = t.mutations();
        assert_eq!(muts.len(), 2);
        assert_eq!(muts[0].period, month("2024-03"));
        assert!(matches!(muts[0].op, MutationOp::Remove { amount: 75, .. }));
        assert_eq!(muts[1].period, month("2024-04"));
        assert!(matches!(muts[1].op, MutationOp::Add { amount: 75, .. }));
    }

    #[test]
    fn ineligible_on_both_sides_is_noop() {
        let i = id();
        let prev = snap(i, 10, InvoiceStatus::Draft, "2024-03-10");
        let cur = snap(i, 20, InvoiceStatus::Void, "garbage");
        let t = classify(Some(&prev), Some(&cur)).unwrap();
        assert_eq!(t, Transition::NoOp);
        assert!(t.mutations().is_empty());

        let created_draft = snap(i, 10, InvoiceStatus::Draft, "2024-03-10");
        assert_eq!(classify(None, Some(&created_draft)).unwrap(), Transition::NoOp);
        assert_eq!(classify(Some(&created_draft), None).unwrap(), Transition::NoOp);
    }

    #[test]
    fn period_change_on_eligibility_flip_uses_the_eligible_side() {
        let i = id();
        let prev = snap(i, 40, InvoiceStatus::Draft, "2024-02-10");
        let cur = snap(i, 40, InvoiceStatus::Paid, "2024-03-10");
        let muts = classify(Some(&prev), Some(&cur)).unwrap().mutations();
        assert_eq!(muts.len(), 1);
        assert_eq!(muts[0].period, month("2024-03"));

        let prev = snap(i, 40, InvoiceStatus::Paid, "2024-02-10");
        let cur = snap(i, 40, InvoiceStatus::Void, "2024-03-10");
        let muts = classify(Some(&prev), Some(&cur)).unwrap().mutations();
        assert_eq!(muts.len(), 1);
        assert_eq!(muts[0].period, month("2024-02"));
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(matches!(classify(None, None), Err(DomainError::InvalidEventShape(_))));

        let a = snap(id(), 10, InvoiceStatus::Paid, "2024-03-10");
        let b = snap(id(), 10, InvoiceStatus::Paid, "2024-03-10");
        assert!(matches!(
            classify(Some(&a), Some(&b)),
            Err(DomainError::InvalidEventShape(_))
        ));

        let bad_date = snap(id(), 10, InvoiceStatus::Paid, "31/03/2024");
        assert!(matches!(
            classify(None, Some(&bad_date)),
            Err(DomainError::InvalidDate(_))
        ));

        let negative = snap(id(), -5, InvoiceStatus::Paid, "2024-03-10");
        assert!(matches!(
            classify(None, Some(&negative)),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn march_scenario_walks_through_every_single_period_kind() {
        let i = id();
        let created = snap(i, 200, InvoiceStatus::Paid, "2024-03-05");
        let raised = snap(i, 350, InvoiceStatus::Paid, "2024-03-05");
        let pending = snap(i, 350, InvoiceStatus::Pending, "2024-03-05");

        let steps = [
            (None, Some(&created), RevenueTotals::new(200, 0, 1)),
            (Some(&created), Some(&raised), RevenueTotals::new(350, 0, 1)),
            (Some(&raised), Some(&pending), RevenueTotals::new(0, 350, 1)),
            (Some(&pending), None, RevenueTotals::zero()),
        ];

        let mut totals = RevenueTotals::zero();
        for (prev, cur, expected) in steps {
            for m in classify(prev, cur).unwrap().mutations() {
                let outcome = m.apply(&totals);
                assert!(outcome.is_clean(), "unexpected anomalies: {:?}", outcome.anomalies);
                totals = outcome.totals;
            }
            assert_eq!(totals, expected);
        }
    }

    #[test]
    fn over_removal_is_clamped_and_reported() {
        let m = PeriodMutation::new(
            month("2024-03"),
            MutationOp::Remove {
                bucket: Bucket::Paid,
                amount: 500,
            },
        );
        let outcome = m.apply(&RevenueTotals::new(100, 50, 1));
        assert_eq!(outcome.totals, RevenueTotals::new(0, 50, 0));
        assert!(outcome.anomalies.contains(&Anomaly::BucketClamped));
        assert!(outcome.anomalies.contains(&Anomaly::AggregateClamped));
        assert!(outcome.totals.check_invariants().is_ok());
    }

    fn arb_bucket() -> impl Strategy<Value = Bucket> {
        prop_oneof![Just(Bucket::Paid), Just(Bucket::Pending)]
    }

    fn arb_op() -> impl Strategy<Value = MutationOp> {
        let amount = 0i64..1_000_000i64;
        prop_oneof![
            (arb_bucket(), amount.clone()).prop_map(|(bucket, amount)| MutationOp::Add { bucket, amount }),
            (arb_bucket(), amount.clone())
                .prop_map(|(bucket, amount)| MutationOp::Remove { bucket, amount }),
            (arb_bucket(), amount.clone(), amount.clone()).prop_map(|(bucket, p, c)| {
                MutationOp::Adjust {
                    bucket,
                    previous_amount: p,
                    current_amount: c,
                }
            }),
            (arb_bucket(), arb_bucket(), amount.clone(), amount).prop_map(|(from, to, p, c)| {
                MutationOp::Move(BucketMove {
                    from,
                    to,
                    previous_amount: p,
                    current_amount: c,
                })
            }),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: no sequence of mutations, however inconsistent, can
        /// break `total == paid + pending` or drive a field negative.
        #[test]
        fn totals_invariant_survives_any_sequence(
            ops in prop::collection::vec(arb_op(), 1..40)
        ) {
            let period = month("2024-03");
            let mut totals = RevenueTotals::zero();
            for op in ops {
                totals = PeriodMutation::new(period, op).apply(&totals).totals;
                prop_assert!(totals.check_invariants().is_ok(), "broken totals: {:?}", totals);
            }
        }

        /// Property: adding an invoice and then removing it restores the
        /// starting totals when the starting state is consistent.
        #[test]
        fn add_then_remove_round_trips(
            paid in 0i64..1_000_000i64,
            pending in 0i64..1_000_000i64,
            count in 0i64..1_000i64,
            bucket in arb_bucket(),
            amount in 0i64..1_000_000i64,
        ) {
            let period = month("2024-03");
            let start = RevenueTotals::new(paid, pending, count);

            let added = PeriodMutation::new(period, MutationOp::Add { bucket, amount }).apply(&start);
            let removed = PeriodMutation::new(period, MutationOp::Remove { bucket, amount })
                .apply(&added.totals);

            prop_assert!(added.is_clean());
            prop_assert!(removed.is_clean());
            prop_assert_eq!(removed.totals, start);
        }
    }
}
