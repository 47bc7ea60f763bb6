//! The hot-deployment service: initial cycle, watcher, orchestrator.

use std::sync::Arc;
use std::time::Duration;

use dropzone_telemetry::CycleTrigger;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::DeployConfig;
use crate::engine::{CycleReport, Reconcile, ReconciliationEngine};
use crate::error::{DeployError, DeployResult};
use crate::orchestrator::{Orchestrator, OrchestratorInputs};
use crate::runtime::ModuleRuntime;
use crate::watcher::{DirectoryWatcher, WatchBatch};

/// Entry point of the engine.
pub struct HotDeployService;

impl HotDeployService {
    /// Deploy the install root once, then keep it deployed.
    ///
    /// The initial cycle always runs. When hot deployment is enabled the
    /// install root is watched afterwards; if the watcher cannot be set up
    /// the failure is logged once and the service carries on without it.
    /// Manual cycle requests work either way.
    pub async fn start(config: DeployConfig, runtime: Arc<dyn ModuleRuntime>) -> ServiceHandle {
        let shutdown_grace = config.shutdown_grace;
        let debounce = config.debounce;
        let hot_deploy = config.hot_deploy;
        let root = config.install_root.path().to_path_buf();
        let engine = Arc::new(ReconciliationEngine::new(config, runtime));

        let initial_report = engine.run_cycle(CycleTrigger::Startup).await.ok();

        let mut watcher = None;
        let batches = if hot_deploy {
            let mut candidate = DirectoryWatcher::new(&root);
            match candidate.start() {
                Ok(rx) => {
                    watcher = Some(candidate);
                    rx
                },
                Err(e) => {
                    error!(error = %e, "Hot deployment disabled");
                    closed_batches()
                },
            }
        } else {
            info!(root = %root.display(), "Hot deployment disabled by configuration");
            closed_batches()
        };

        let (manual_tx, manual) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let orchestrator = Orchestrator::new(engine, debounce).spawn(OrchestratorInputs {
            batches,
            manual,
            cancel: cancel.clone(),
        });

        ServiceHandle {
            initial_report,
            watcher,
            manual_tx,
            cancel,
            orchestrator,
            shutdown_grace,
        }
    }
}

fn closed_batches() -> mpsc::Receiver<WatchBatch> {
    let (tx, rx) = mpsc::channel(1);
    drop(tx);
    rx
}

/// A running [`HotDeployService`].
pub struct ServiceHandle {
    initial_report: Option<CycleReport>,
    watcher: Option<DirectoryWatcher>,
    manual_tx: mpsc::UnboundedSender<()>,
    cancel: CancellationToken,
    orchestrator: JoinHandle<u64>,
    shutdown_grace: Duration,
}

impl ServiceHandle {
    /// Report of the startup cycle, if it ran to completion.
    #[must_use]
    pub fn initial_report(&self) -> Option<&CycleReport> {
        self.initial_report.as_ref()
    }

    /// Whether the install root is being watched.
    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Ask for a cycle after the debounce window.
    ///
    /// Returns `false` once the service is shutting down.
    pub fn request_cycle(&self) -> bool {
        self.manual_tx.send(()).is_ok()
    }

    /// Stop with the configured shutdown grace period.
    ///
    /// # Errors
    ///
    /// See [`stop_with_grace`](Self::stop_with_grace).
    pub async fn stop(self) -> DeployResult<u64> {
        let grace = self.shutdown_grace;
        self.stop_with_grace(grace).await
    }

    /// Stop watching, cancel any scheduled cycle, and wait up to `grace` for
    /// a running cycle to finish. Returns the number of scheduled cycles
    /// that ran, excluding the startup cycle.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::ShutdownTimeout`] if a cycle was still running
    /// when `grace` expired and had to be aborted, or
    /// [`DeployError::Join`] if the orchestrator task panicked.
    pub async fn stop_with_grace(mut self, grace: Duration) -> DeployResult<u64> {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop().await;
        }
        self.cancel.cancel();

        match tokio::time::timeout(grace, &mut self.orchestrator).await {
            Ok(joined) => {
                let cycles = joined?;
                info!(cycles, "Hot deployment stopped");
                Ok(cycles)
            },
            Err(_) => {
                warn!(grace = ?grace, "Cycle still running after grace period, aborting");
                self.orchestrator.abort();
                Err(DeployError::ShutdownTimeout { grace })
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstallRoot;
    use crate::runtime::InMemoryRuntime;

    #[tokio::test]
    async fn test_missing_root_disables_hot_deploy_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = DeployConfig::new(InstallRoot::from_path(&dir.path().join("absent")).unwrap());
        let runtime = InMemoryRuntime::new(".fragment");

        let handle = HotDeployService::start(config, Arc::new(runtime)).await;

        assert!(!handle.is_watching());
        assert!(handle.initial_report().is_some());
        assert!(handle.request_cycle());
        handle.stop_with_grace(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_initial_cycle_deploys_existing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.pkg"), b"module").unwrap();
        let config =
            DeployConfig::new(InstallRoot::from_path(dir.path()).unwrap()).with_hot_deploy(false);
        let runtime = InMemoryRuntime::new(".fragment");

        let handle = HotDeployService::start(config, Arc::new(runtime.clone())).await;

        assert_eq!(handle.initial_report().unwrap().installed.len(), 1);
        assert!(!handle.is_watching());
        assert_eq!(runtime.modules().len(), 1);
        handle.stop().await.unwrap();
    }
}
