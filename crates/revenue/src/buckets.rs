//! Paid/pending bucket arithmetic.

use serde::{Deserialize, Serialize};

use revsync_invoicing::InvoiceStatus;

/// Revenue bucket an eligible invoice contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Paid,
    Pending,
}

impl Bucket {
    /// `None` for statuses that do not count towards revenue.
    pub fn for_status(status: InvoiceStatus) -> Option<Bucket> {
        match status {
            InvoiceStatus::Paid => Some(Bucket::Paid),
            InvoiceStatus::Pending => Some(Bucket::Pending),
            InvoiceStatus::Draft | InvoiceStatus::Void => None,
        }
    }
}

impl core::fmt::Display for Bucket {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Bucket::Paid => f.write_str("paid"),
            Bucket::Pending => f.write_str("pending"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketTotals {
    pub paid: i64,
    pub pending: i64,
}

impl BucketTotals {
    pub fn new(paid: i64, pending: i64) -> Self {
        Self { paid, pending }
    }

    pub fn get(&self, bucket: Bucket) -> i64 {
        match bucket {
            Bucket::Paid => self.paid,
            Bucket::Pending => self.pending,
        }
    }

    fn with(mut self, bucket: Bucket, value: i64) -> Self {
        match bucket {
            Bucket::Paid => self.paid = value,
            Bucket::Pending => self.pending = value,
        }
        self
    }

    pub fn sum(&self) -> i64 {
        self.paid.saturating_add(self.pending)
    }
}

/// A computed value plus whether a non-negative floor had to be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adjusted<T> {
    pub value: T,
    pub clamped: bool,
}

impl<T> Adjusted<T> {
    pub fn exact(value: T) -> Self {
        Self {
            value,
            clamped: false,
        }
    }
}

/// Add `delta` to a single bucket, flooring at zero.
///
/// The other bucket is never touched.
pub fn apply_delta_to_bucket(current: BucketTotals, bucket: Bucket, delta: i64) -> Adjusted<BucketTotals> {
    let raw = current.get(bucket).saturating_add(delta);
    Adjusted {
        value: current.with(bucket, raw.max(0)),
        clamped: raw < 0,
    }
}

/// Status change between the two buckets for one invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketMove {
    pub from: Bucket,
    pub to: Bucket,
    pub previous_amount: i64,
    pub current_amount: i64,
}

/// Take `previous_amount` out of `from` and put `current_amount` into `to`.
pub fn move_between_buckets(current: BucketTotals, mv: BucketMove) -> Adjusted<BucketTotals> {
    let out = apply_delta_to_bucket(current, mv.from, -mv.previous_amount);
    let into = apply_delta_to_bucket(out.value, mv.to, mv.current_amount);
    Adjusted {
        value: into.value,
        clamped: out.clamped || into.clamped,
    }
}
