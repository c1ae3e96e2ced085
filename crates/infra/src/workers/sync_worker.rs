use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use revsync_events::{EventBus, EventEnvelope, Subscription};
use revsync_invoicing::InvoiceChange;

use super::dead_letter::DeadLetterQueue;
use crate::config::FailurePolicy;
use crate::revenue_store::RevenueRepository;
use crate::revenue_sync::{RevenueSynchronizer, SyncError};

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub received: u64,
    pub succeeded: u64,
    /// Successful changes that touched no period (e.g. draft edits).
    pub no_revenue_impact: u64,
    pub failed: u64,
    pub dead_lettered: u64,
    /// Set when the `Halt` policy stopped the worker.
    pub halted: bool,
}

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// True once the loop has exited (halted, bus closed or shut down).
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }

    /// Request graceful shutdown, wait for the worker and return final stats.
    pub fn shutdown(mut self) -> WorkerStats {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            if j.join().is_err() {
                error!("sync worker thread panicked");
            }
        }
        self.stats()
    }
}

/// Drains invoice changes from a bus into a [`RevenueSynchronizer`].
///
/// - subscribes before the thread starts, so nothing published after `spawn`
///   returns is missed
/// - processes one envelope at a time, in arrival order
/// - applies the synchronizer's configured [`FailurePolicy`] to every failed
///   envelope
#[derive(Debug)]
pub struct SyncWorker;

impl SyncWorker {
    pub fn spawn<B, R>(
        name: &'static str,
        bus: B,
        synchronizer: Arc<RevenueSynchronizer<R>>,
        dead_letters: Arc<DeadLetterQueue>,
    ) -> std::io::Result<WorkerHandle>
    where
        B: EventBus<EventEnvelope<InvoiceChange>> + 'static,
        R: RevenueRepository + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub = bus.subscribe();
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let tick = synchronizer.config().poll_interval;
        let policy = synchronizer.config().failure_policy;

        let worker = Worker {
            name,
            synchronizer,
            policy,
            dead_letters,
            stats: stats.clone(),
        };

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker.run(sub, shutdown_rx, tick))?;

        info!(worker = name, ?policy, "sync worker started");
        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

struct Worker<R> {
    name: &'static str,
    synchronizer: Arc<RevenueSynchronizer<R>>,
    policy: FailurePolicy,
    dead_letters: Arc<DeadLetterQueue>,
    stats: Arc<Mutex<WorkerStats>>,
}

enum Flow {
    Continue,
    Halt,
}

impl<R: RevenueRepository> Worker<R> {
    fn run(
        self,
        sub: Subscription<EventEnvelope<InvoiceChange>>,
        shutdown_rx: mpsc::Receiver<()>,
        tick: Duration,
    ) {
        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!(worker = self.name, "sync worker shutting down");
                break;
            }

            match sub.recv_timeout(tick) {
                Ok(envelope) => {
                    if let Flow::Halt = self.handle(envelope) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    info!(worker = self.name, "event bus closed; sync worker stopping");
                    break;
                }
            }
        }
    }

    fn handle(&self, envelope: EventEnvelope<InvoiceChange>) -> Flow {
        self.bump(|s| s.received += 1);

        let err = match self.synchronizer.process_invoice_change(envelope.payload()) {
            Ok(outcome) => {
                debug!(
                    worker = self.name,
                    event_id = %envelope.event_id(),
                    transition = outcome.transition.name(),
                    periods = outcome.periods.len(),
                    "invoice change applied"
                );
                let noop = outcome.is_noop();
                self.bump(|s| {
                    s.succeeded += 1;
                    if noop {
                        s.no_revenue_impact += 1;
                    }
                });
                return Flow::Continue;
            }
            Err(err) => err,
        };

        self.bump(|s| s.failed += 1);
        self.apply_policy(envelope, err)
    }

    fn apply_policy(&self, envelope: EventEnvelope<InvoiceChange>, err: SyncError) -> Flow {
        let event_id = envelope.event_id();
        match self.policy {
            FailurePolicy::LogAndContinue => {
                error!(worker = self.name, %event_id, error = %err, "invoice change failed; continuing");
                Flow::Continue
            }
            FailurePolicy::DeadLetter => {
                match self.dead_letters.push(envelope, err.to_string()) {
                    Ok(()) => {
                        warn!(worker = self.name, %event_id, error = %err, "invoice change dead-lettered");
                        self.bump(|s| s.dead_lettered += 1);
                    }
                    Err(dl_err) => {
                        error!(
                            worker = self.name,
                            %event_id,
                            error = %err,
                            dead_letter_error = %dl_err,
                            "invoice change failed and could not be dead-lettered"
                        );
                    }
                }
                Flow::Continue
            }
            FailurePolicy::Halt => {
                error!(worker = self.name, %event_id, error = %err, "invoice change failed; halting worker");
                self.bump(|s| s.halted = true);
                Flow::Halt
            }
        }
    }

    fn bump(&self, f: impl FnOnce(&mut WorkerStats)) {
        if let Ok(mut s) = self.stats.lock() {
            f(&mut s);
        }
    }
}
