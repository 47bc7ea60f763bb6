//! One full reconciliation cycle.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dropzone_config::UninstallFailurePolicy;
use dropzone_telemetry::{CycleContext, CycleGuard, CycleTrigger};
use tracing::{Instrument, debug, error, info};
use uuid::Uuid;

use crate::config::DeployConfig;
use crate::error::{DeployError, DeployResult};
use crate::lifecycle::{LifecycleController, RefreshOutcome};
use crate::reconciler::{ReconciliationPlan, Reconciler};
use crate::registry::RegistrySnapshot;
use crate::runtime::{ModuleRecord, ModuleRuntime};
use crate::scanner::ArtifactScanner;
use crate::startup::StartupSequencer;

/// What a cycle did.
#[derive(Debug)]
pub struct CycleReport {
    /// Cycle id, matching the `cycle_id` field of the cycle's log span.
    pub cycle_id: Uuid,
    /// Why the cycle ran.
    pub trigger: CycleTrigger,
    /// When the cycle started.
    pub started_at: DateTime<Utc>,
    /// Artifacts found on disk.
    pub artifacts: usize,
    /// The plan the cycle executed.
    pub plan: ReconciliationPlan,
    /// Orphans removed from the runtime.
    pub uninstalled: Vec<ModuleRecord>,
    /// Newly installed modules.
    pub installed: Vec<ModuleRecord>,
    /// Updated modules.
    pub updated: Vec<ModuleRecord>,
    /// Started modules.
    pub started: Vec<ModuleRecord>,
    /// Every per-module failure of the cycle.
    pub failures: Vec<DeployError>,
    /// How the refresh ended.
    pub refresh: RefreshOutcome,
    /// Wall time of the cycle.
    pub elapsed_ms: i64,
}

impl CycleReport {
    /// An empty report for `context`.
    #[must_use]
    pub fn empty(context: &CycleContext) -> Self {
        Self {
            cycle_id: context.cycle_id,
            trigger: context.trigger,
            started_at: context.started_at,
            artifacts: 0,
            plan: ReconciliationPlan::default(),
            uninstalled: Vec::new(),
            installed: Vec::new(),
            updated: Vec::new(),
            started: Vec::new(),
            failures: Vec::new(),
            refresh: RefreshOutcome::NotNeeded,
            elapsed_ms: 0,
        }
    }

    /// Whether the cycle changed nothing in the runtime.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.uninstalled.is_empty()
            && self.installed.is_empty()
            && self.updated.is_empty()
            && self.started.is_empty()
    }
}

/// Something that can run a reconciliation cycle.
#[async_trait]
pub trait Reconcile: Send + Sync {
    /// Run one cycle.
    async fn run_cycle(&self, trigger: CycleTrigger) -> DeployResult<CycleReport>;
}

/// Scan, diff, apply, and start against a runtime.
pub struct ReconciliationEngine {
    config: DeployConfig,
    runtime: Arc<dyn ModuleRuntime>,
    scanner: ArtifactScanner,
    reconciler: Reconciler,
    lifecycle: LifecycleController,
    sequencer: StartupSequencer,
}

impl ReconciliationEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(config: DeployConfig, runtime: Arc<dyn ModuleRuntime>) -> Self {
        let scanner = ArtifactScanner::new(
            config.install_root.path(),
            config.artifact_suffix.clone(),
        );
        Self {
            reconciler: Reconciler::new(config.default_start_level),
            lifecycle: LifecycleController::new(Arc::clone(&runtime), config.refresh_timeout),
            sequencer: StartupSequencer::new(Arc::clone(&runtime)),
            scanner,
            runtime,
            config,
        }
    }

    /// The engine's configuration.
    #[must_use]
    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    async fn cycle(&self, context: &CycleContext) -> DeployResult<CycleReport> {
        let mut report = CycleReport::empty(context);

        let artifacts = self.scanner.scan_blocking().await?;
        report.artifacts = artifacts.len();

        let mut snapshot = RegistrySnapshot::capture(
            Arc::clone(&self.runtime),
            self.config.install_root.location_prefix(),
        )
        .await?;
        snapshot.log_diagnostics();

        let orphans = snapshot.uninstall_orphans(&artifacts).await;
        if !orphans.failures.is_empty()
            && self.config.uninstall_failure == UninstallFailurePolicy::Abort
        {
            return Err(DeployError::UninstallAborted {
                failures: orphans.failures.len(),
            });
        }
        report.uninstalled = orphans.uninstalled;
        report.failures = orphans.failures;

        let plan = self.reconciler.plan(&artifacts, snapshot.modules());
        if !plan.to_uninstall.is_empty() {
            debug!(count = plan.to_uninstall.len(), "Orphaned modules remain loaded");
        }

        let applied = self
            .lifecycle
            .apply(&plan, !report.uninstalled.is_empty())
            .await;
        let started = self.sequencer.start(&applied.changed_modules()).await;

        report.plan = plan;
        report.installed = applied.installed;
        report.updated = applied.updated;
        report.refresh = applied.refresh;
        report.failures.extend(applied.failures);
        report.started = started.started;
        report.failures.extend(started.failures);
        report.elapsed_ms = context.elapsed_ms();
        Ok(report)
    }
}

#[async_trait]
impl Reconcile for ReconciliationEngine {
    async fn run_cycle(&self, trigger: CycleTrigger) -> DeployResult<CycleReport> {
        let guard = CycleGuard::new(CycleContext::new(trigger));
        let span = guard.span().clone();

        let result = self.cycle(guard.context()).instrument(span.clone()).await;

        span.in_scope(|| match &result {
            Ok(report) if report.is_noop() && report.failures.is_empty() => {
                debug!(artifacts = report.artifacts, "Nothing to deploy");
            },
            Ok(report) => info!(
                artifacts = report.artifacts,
                uninstalled = report.uninstalled.len(),
                installed = report.installed.len(),
                updated = report.updated.len(),
                started = report.started.len(),
                failures = report.failures.len(),
                refresh = %report.refresh,
                elapsed_ms = report.elapsed_ms,
                "Deployment cycle complete"
            ),
            Err(e) => error!(error = %e, "Deployment cycle failed"),
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstallRoot;
    use crate::runtime::InMemoryRuntime;
    use std::fs;
    use std::path::Path;

    fn engine(root: &Path, runtime: &InMemoryRuntime) -> ReconciliationEngine {
        let config = DeployConfig::new(InstallRoot::from_path(root).unwrap());
        ReconciliationEngine::new(config, Arc::new(runtime.clone()))
    }

    fn write(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"module").unwrap();
    }

    #[tokio::test]
    async fn test_cycle_converges_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.pkg");
        write(dir.path(), "20/b.pkg");
        let runtime = InMemoryRuntime::new(".fragment");
        let engine = engine(dir.path(), &runtime);

        let first = engine.run_cycle(CycleTrigger::Startup).await.unwrap();
        assert_eq!(first.installed.len(), 2);
        assert_eq!(first.started.len(), 2);
        assert_eq!(first.refresh, RefreshOutcome::Completed);
        assert_eq!(runtime.modules().len(), 2);

        let second = engine.run_cycle(CycleTrigger::Manual).await.unwrap();
        assert!(!second.plan.has_changes());
        assert!(second.is_noop());
        assert_eq!(second.refresh, RefreshOutcome::NotNeeded);
    }

    #[tokio::test]
    async fn test_removed_artifact_is_uninstalled() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.pkg");
        write(dir.path(), "b.pkg");
        let runtime = InMemoryRuntime::new(".fragment");
        let engine = engine(dir.path(), &runtime);
        engine.run_cycle(CycleTrigger::Startup).await.unwrap();

        fs::remove_file(dir.path().join("b.pkg")).unwrap();
        let report = engine
            .run_cycle(CycleTrigger::FilesystemChange)
            .await
            .unwrap();

        assert_eq!(report.uninstalled.len(), 1);
        assert_eq!(report.refresh, RefreshOutcome::Completed);
        assert_eq!(runtime.modules().len(), 1);
    }

    #[tokio::test]
    async fn test_modules_outside_root_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = InMemoryRuntime::new(".fragment");
        runtime.install("file:///elsewhere/x.pkg").await.unwrap();

        let report = engine(dir.path(), &runtime)
            .run_cycle(CycleTrigger::Startup)
            .await
            .unwrap();

        assert!(report.uninstalled.is_empty());
        assert_eq!(runtime.modules().len(), 1);
    }
}
