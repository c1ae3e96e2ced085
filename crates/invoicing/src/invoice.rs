use core::str::FromStr;

use serde::{Deserialize, Serialize};

use revsync_core::{AggregateId, DomainError, DomainResult};

/// Invoice identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub AggregateId);

impl InvoiceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Invoice status as stored by the invoice collaborator.
///
/// Only `Pending` and `Paid` count towards revenue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Pending,
    Paid,
    Void,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Void => "void",
        }
    }
}

impl core::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "draft" => Ok(InvoiceStatus::Draft),
            "pending" => Ok(InvoiceStatus::Pending),
            "paid" => Ok(InvoiceStatus::Paid),
            "void" => Ok(InvoiceStatus::Void),
            other => Err(DomainError::validation(format!(
                "unknown invoice status '{other}' (expected draft, pending, paid or void)"
            ))),
        }
    }
}

/// Read-only view of an invoice at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSnapshot {
    pub id: InvoiceId,
    /// Amount in the smallest currency unit (e.g. cents).
    pub amount: i64,
    pub status: InvoiceStatus,
    /// Effective date exactly as the invoice collaborator delivers it.
    ///
    /// Kept raw so that a malformed value surfaces as a validation error
    /// instead of being coerced into some default month.
    pub date: String,
}

impl InvoiceSnapshot {
    pub fn new(
        id: InvoiceId,
        amount: i64,
        status: InvoiceStatus,
        date: impl Into<String>,
    ) -> Self {
        Self {
            id,
            amount,
            status,
            date: date.into(),
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.amount < 0 {
            return Err(DomainError::validation(format!(
                "invoice {} has negative amount {}",
                self.id, self.amount
            )));
        }
        Ok(())
    }
}
