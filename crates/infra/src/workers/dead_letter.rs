use std::sync::Mutex;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use revsync_events::EventEnvelope;
use revsync_invoicing::InvoiceChange;

use crate::revenue_store::RevenueRepository;
use crate::revenue_sync::RevenueSynchronizer;

#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("dead-letter queue lock poisoned")]
    Poisoned,
}

/// An event that could not be applied, kept for inspection and redrive.
#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    pub envelope: EventEnvelope<InvoiceChange>,
    pub reason: String,
    pub attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedriveReport {
    pub succeeded: usize,
    pub failed: usize,
}

/// In-process dead-letter queue, ordered by first failure.
///
/// Entries are keyed by envelope id: dead-lettering the same delivery again
/// updates the existing entry instead of adding a duplicate.
#[derive(Debug, Default)]
pub struct DeadLetterQueue {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl DeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &self,
        envelope: EventEnvelope<InvoiceChange>,
        reason: impl Into<String>,
    ) -> Result<(), DeadLetterError> {
        let reason = reason.into();
        let mut entries = self.entries.lock().map_err(|_| DeadLetterError::Poisoned)?;

        if let Some(existing) = entries
            .iter_mut()
            .find(|e| e.envelope.event_id() == envelope.event_id())
        {
            existing.attempts += 1;
            existing.reason = reason;
            existing.dead_lettered_at = Utc::now();
            return Ok(());
        }

        entries.push(DeadLetterEntry {
            envelope,
            reason,
            attempts: 1,
            dead_lettered_at: Utc::now(),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn list(&self) -> Result<Vec<DeadLetterEntry>, DeadLetterError> {
        Ok(self.entries.lock().map_err(|_| DeadLetterError::Poisoned)?.clone())
    }

    /// Drop an entry without reprocessing it.
    pub fn discard(&self, event_id: Uuid) -> Result<Option<DeadLetterEntry>, DeadLetterError> {
        let mut entries = self.entries.lock().map_err(|_| DeadLetterError::Poisoned)?;
        Ok(entries
            .iter()
            .position(|e| e.envelope.event_id() == event_id)
            .map(|idx| entries.remove(idx)))
    }

    /// Reprocess every parked event, oldest first.
    ///
    /// Successes leave the queue; failures go back with a bumped attempt
    /// count. Safe because the synchronizer skips already-applied revisions.
    pub fn redrive<R>(&self, synchronizer: &RevenueSynchronizer<R>) -> Result<RedriveReport, DeadLetterError>
    where
        R: RevenueRepository,
    {
        let drained: Vec<DeadLetterEntry> = {
            let mut entries = self.entries.lock().map_err(|_| DeadLetterError::Poisoned)?;
            std::mem::take(&mut *entries)
        };

        let mut report = RedriveReport::default();
        let mut still_failing = Vec::new();

        for mut entry in drained {
            match synchronizer.process_invoice_change(entry.envelope.payload()) {
                Ok(_) => report.succeeded += 1,
                Err(err) => {
                    warn!(
                        event_id = %entry.envelope.event_id(),
                        attempts = entry.attempts + 1,
                        error = %err,
                        "redrive failed; keeping event parked"
                    );
                    entry.attempts += 1;
                    entry.reason = err.to_string();
                    entry.dead_lettered_at = Utc::now();
                    still_failing.push(entry);
                    report.failed += 1;
                }
            }
        }

        if !still_failing.is_empty() {
            let mut entries = self.entries.lock().map_err(|_| DeadLetterError::Poisoned)?;
            // Anything parked while we were redriving goes after the retries.
            still_failing.append(&mut entries);
            *entries = still_failing;
        }

        info!(succeeded = report.succeeded, failed = report.failed, "dead-letter redrive finished");
        Ok(report)
    }
}
