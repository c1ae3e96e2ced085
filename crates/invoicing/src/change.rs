use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use revsync_core::{DomainError, DomainResult};
use revsync_events::Event;

use crate::invoice::{InvoiceId, InvoiceSnapshot};

/// Which snapshots a change carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeShape {
    Created,
    Updated,
    Deleted,
    /// Neither snapshot present. Never valid.
    Empty,
}

/// An invoice change as published by the invoice collaborator.
///
/// Absent `previous` means creation, absent `current` means deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceChange {
    #[serde(default)]
    pub previous: Option<InvoiceSnapshot>,
    #[serde(default)]
    pub current: Option<InvoiceSnapshot>,
    /// Monotonic invoice revision after this change, if the publisher versions
    /// its events.
    #[serde(default)]
    pub revision: Option<u64>,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
}

impl InvoiceChange {
    pub fn new(previous: Option<InvoiceSnapshot>, current: Option<InvoiceSnapshot>) -> Self {
        Self {
            previous,
            current,
            revision: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn created(current: InvoiceSnapshot) -> Self {
        Self::new(None, Some(current))
    }

    pub fn updated(previous: InvoiceSnapshot, current: InvoiceSnapshot) -> Self {
        Self::new(Some(previous), Some(current))
    }

    pub fn deleted(previous: InvoiceSnapshot) -> Self {
        Self::new(Some(previous), None)
    }

    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = Some(revision);
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    pub fn shape(&self) -> ChangeShape {
        match (&self.previous, &self.current) {
            (None, Some(_)) => ChangeShape::Created,
            (Some(_), Some(_)) => ChangeShape::Updated,
            (Some(_), None) => ChangeShape::Deleted,
            (None, None) => ChangeShape::Empty,
        }
    }

    /// Id of the invoice this change is about, preferring the current snapshot.
    pub fn invoice_id(&self) -> Option<InvoiceId> {
        self.current
            .as_ref()
            .or(self.previous.as_ref())
            .map(|s| s.id)
    }

    /// Structural checks that do not involve date parsing.
    ///
    /// Fails when both snapshots are missing, when they disagree on the
    /// invoice id, or when either carries a negative amount.
    pub fn validate(&self) -> DomainResult<()> {
        match (&self.previous, &self.current) {
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

        if let Some(prev) = &self.previous {
            prev.validate()?;
        }
        if let Some(cur) = &self.current {
            cur.validate()?;
        }
        Ok(())
    }
}

impl Event for InvoiceChange {
    fn event_type(&self) -> &'static str {
        match self.shape() {
            ChangeShape::Created => "invoicing.invoice.created",
            ChangeShape::Updated => "invoicing.invoice.updated",
            ChangeShape::Deleted => "invoicing.invoice.deleted",
            ChangeShape::Empty => "invoicing.invoice.invalid",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
