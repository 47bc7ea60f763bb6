//! Debounced scheduling of reconciliation cycles.
//!
//! A single task owns the debounce deadline and runs cycles inline, so no
//! two cycles ever overlap. Every watch batch or manual request pushes the
//! deadline out to `now + debounce`; the cycle runs once the deadline passes
//! without further input.

use std::sync::Arc;
use std::time::Duration;

use dropzone_telemetry::CycleTrigger;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::engine::Reconcile;
use crate::watcher::WatchBatch;

/// Inputs of the orchestrator task.
pub struct OrchestratorInputs {
    /// Batches from the directory watcher. A closed channel means no
    /// filesystem-triggered cycles.
    pub batches: mpsc::Receiver<WatchBatch>,
    /// Manual cycle requests.
    pub manual: mpsc::UnboundedReceiver<()>,
    /// Stops the task; a cycle already running finishes first.
    pub cancel: CancellationToken,
}

/// Runs cycles on a [`Reconcile`] implementation after quiet periods.
pub struct Orchestrator<R> {
    engine: Arc<R>,
    debounce: Duration,
}

impl<R: Reconcile + 'static> Orchestrator<R> {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(engine: Arc<R>, debounce: Duration) -> Self {
        Self { engine, debounce }
    }

    /// Spawn the orchestrator task.
    ///
    /// The task ends when cancelled, or when both input channels are closed
    /// and no cycle is pending. It returns the number of cycles it ran.
    pub fn spawn(self, inputs: OrchestratorInputs) -> JoinHandle<u64> {
        tokio::spawn(self.run(inputs))
    }

    async fn run(self, inputs: OrchestratorInputs) -> u64 {
        let OrchestratorInputs {
            mut batches,
            mut manual,
            cancel,
        } = inputs;
        let mut pending: Option<(Instant, CycleTrigger)> = None;
        let mut batches_open = true;
        let mut manual_open = true;
        let mut cycles = 0u64;

        loop {
            if pending.is_none() && !batches_open && !manual_open {
                debug!("All orchestrator inputs closed");
                break;
            }
            let deadline = pending.map(|(at, _)| at);

            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    if pending.is_some() {
                        debug!("Dropping scheduled cycle on shutdown");
                    }
                    break;
                }

                () = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    let Some((_, trigger)) = pending.take() else {
                        continue;
                    };
                    // Failures are logged by the engine; the next trigger retries.
                    let _ = self.engine.run_cycle(trigger).await;
                    cycles = cycles.saturating_add(1);
                }

                batch = batches.recv(), if batches_open => match batch {
                    Some(batch) => {
                        trace!(changes = batch.changes.len(), "Rescheduling cycle");
                        pending = Some((self.deadline(), CycleTrigger::FilesystemChange));
                    },
                    None => batches_open = false,
                },

                request = manual.recv(), if manual_open => match request {
                    Some(()) => {
                        debug!("Manual cycle requested");
                        pending = Some((self.deadline(), CycleTrigger::Manual));
                    },
                    None => manual_open = false,
                },
            }
        }

        cycles
    }

    fn deadline(&self) -> Instant {
        #[allow(clippy::arithmetic_side_effects)]
        // Instant + Duration cannot overflow in practice
        let deadline = Instant::now() + self.debounce;
        deadline
    }
}
