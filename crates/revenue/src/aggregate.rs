use serde::{Deserialize, Serialize};

use crate::buckets::Adjusted;

/// `(invoice_count, total_amount)` for one period.
///
/// All transitions floor both fields at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodAggregate {
    pub invoice_count: i64,
    pub total_amount: i64,
}

impl PeriodAggregate {
    pub fn new(invoice_count: i64, total_amount: i64) -> Self {
        Self {
            invoice_count,
            total_amount,
        }
    }

    pub fn after_add(self, amount: i64) -> Adjusted<Self> {
        Self::floored(
            self.invoice_count.saturating_add(1),
            self.total_amount.saturating_add(amount),
        )
    }

    pub fn after_removal(self, amount: i64) -> Adjusted<Self> {
        Self::floored(
            self.invoice_count.saturating_sub(1),
            self.total_amount.saturating_sub(amount),
        )
    }

    pub fn after_amount_change(self, previous: i64, current: i64) -> Adjusted<Self> {
        Self::floored(
            self.invoice_count,
            self.total_amount.saturating_add(current.saturating_sub(previous)),
        )
    }

    fn floored(count: i64, total: i64) -> Adjusted<Self> {
        Adjusted {
            value: Self::new(count.max(0), total.max(0)),
            clamped: count < 0 || total < 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_remove_returns_to_start() {
        let start = PeriodAggregate::new(2, 500);
        let added = start.after_add(100).value;
        assert_eq!(added, PeriodAggregate::new(3, 600));
        assert_eq!(added.after_removal(100).value, start);
    }

    #[test]
    fn amount_change_keeps_count() {
        let r = PeriodAggregate::new(1, 200).after_amount_change(200, 350);
        assert_eq!(r.value, PeriodAggregate::new(1, 350));
        assert!(!r.clamped);
    }

    #[test]
    fn removal_from_empty_period_is_clamped() {
        let r = PeriodAggregate::default().after_removal(75);
        assert_eq!(r.value, PeriodAggregate::default());
        assert!(r.clamped);
    }
}
