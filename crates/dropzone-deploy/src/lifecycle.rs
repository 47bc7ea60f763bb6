//! Applying a plan to the runtime.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{DeployError, ModuleOperationKind};
use crate::reconciler::{PlannedInstall, ReconciliationPlan};
use crate::runtime::{ModuleRecord, ModuleRuntime, RefreshSubscription};

/// How a refresh ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Nothing changed, so no refresh was issued.
    NotNeeded,
    /// The runtime confirmed the refresh.
    Completed,
    /// No confirmation within the timeout. Processing continued.
    TimedOut,
    /// The refresh could not be issued.
    Failed(String),
}

impl fmt::Display for RefreshOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotNeeded => f.write_str("not_needed"),
            Self::Completed => f.write_str("completed"),
            Self::TimedOut => f.write_str("timed_out"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Result of [`LifecycleController::apply`].
#[derive(Debug)]
pub struct ApplyOutcome {
    /// Newly installed modules.
    pub installed: Vec<ModuleRecord>,
    /// Updated modules.
    pub updated: Vec<ModuleRecord>,
    /// Per-module failures.
    pub failures: Vec<DeployError>,
    /// How the refresh ended.
    pub refresh: RefreshOutcome,
}

impl ApplyOutcome {
    /// Modules that are new or changed, in plan order.
    #[must_use]
    pub fn changed_modules(&self) -> Vec<ModuleRecord> {
        self.installed
            .iter()
            .chain(&self.updated)
            .cloned()
            .collect()
    }
}

/// Installs, updates, and refreshes modules.
pub struct LifecycleController {
    runtime: Arc<dyn ModuleRuntime>,
    refresh_timeout: Duration,
}

impl LifecycleController {
    /// Create a controller.
    #[must_use]
    pub fn new(runtime: Arc<dyn ModuleRuntime>, refresh_timeout: Duration) -> Self {
        Self {
            runtime,
            refresh_timeout,
        }
    }

    /// Execute the install and update parts of `plan`, then refresh.
    ///
    /// A failure affects only its own module. The refresh runs when
    /// anything was installed or updated, or when `force_refresh` is set
    /// (orphans were uninstalled earlier in the cycle). Modules are not
    /// started here.
    pub async fn apply(&self, plan: &ReconciliationPlan, force_refresh: bool) -> ApplyOutcome {
        let mut outcome = ApplyOutcome {
            installed: Vec::new(),
            updated: Vec::new(),
            failures: Vec::new(),
            refresh: RefreshOutcome::NotNeeded,
        };

        for planned in &plan.to_install {
            match self.install(planned).await {
                Ok(record) => outcome.installed.push(record),
                Err(err) => {
                    warn!(error = %err, "Module operation failed");
                    outcome.failures.push(err);
                },
            }
        }

        for record in &plan.to_update {
            match self.runtime.update(record.handle).await {
                Ok(updated) => {
                    info!(location = %updated.location, handle = %updated.handle, "Updated module");
                    outcome.updated.push(updated);
                },
                Err(e) => {
                    let err =
                        DeployError::module_operation(ModuleOperationKind::Update, &record.location, &e);
                    warn!(handle = %record.handle, error = %err, "Module operation failed");
                    outcome.failures.push(err);
                },
            }
        }

        if force_refresh || !outcome.installed.is_empty() || !outcome.updated.is_empty() {
            outcome.refresh = self.refresh_and_wait().await;
        }

        outcome
    }

    async fn install(&self, planned: &PlannedInstall) -> Result<ModuleRecord, DeployError> {
        let record = self.runtime.install(&planned.location).await.map_err(|e| {
            DeployError::module_operation(ModuleOperationKind::Install, &planned.location, &e)
        })?;

        if let Err(e) = self
            .runtime
            .set_start_level(record.handle, planned.start_level)
            .await
        {
            // Roll back so the next cycle plans a fresh install.
            if let Err(rollback) = self.runtime.uninstall(record.handle).await {
                warn!(
                    location = %record.location,
                    handle = %record.handle,
                    error = %rollback,
                    "Failed to roll back install"
                );
            }
            return Err(DeployError::module_operation(
                ModuleOperationKind::SetStartLevel,
                &planned.location,
                &e,
            ));
        }

        info!(
            location = %record.location,
            handle = %record.handle,
            start_level = planned.start_level,
            is_fragment = record.is_fragment,
            "Installed module"
        );
        Ok(record)
    }

    /// Refresh the whole module graph and wait for completion.
    ///
    /// The completion listener is registered before the refresh is issued
    /// and unregistered on every exit path. A timeout is logged as a warning
    /// and does not fail the cycle.
    pub async fn refresh_and_wait(&self) -> RefreshOutcome {
        let (subscription, completed) = RefreshSubscription::register(self.runtime.as_ref());
        let root = self.runtime.system_root_handle();

        if let Err(e) = self.runtime.refresh(root).await {
            warn!(error = %e, "Failed to issue refresh");
            return RefreshOutcome::Failed(e.to_string());
        }

        let outcome = match tokio::time::timeout(self.refresh_timeout, completed).await {
            Ok(Ok(())) => {
                debug!("Refresh completed");
                RefreshOutcome::Completed
            },
            Ok(Err(_)) => {
                // The runtime dropped the listener without firing it.
                warn!("Refresh listener dropped before completion");
                RefreshOutcome::Failed("listener dropped".into())
            },
            Err(_) => {
                let err = DeployError::RefreshTimeout {
                    timeout: self.refresh_timeout,
                };
                warn!(error = %err, "Continuing without refresh confirmation");
                RefreshOutcome::TimedOut
            },
        };
        drop(subscription);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::InMemoryRuntime;

    fn controller(runtime: &InMemoryRuntime) -> LifecycleController {
        LifecycleController::new(Arc::new(runtime.clone()), Duration::from_secs(5))
    }

    fn install(location: &str, start_level: u32) -> PlannedInstall {
        PlannedInstall {
            location: location.to_owned(),
            start_level,
        }
    }

    #[tokio::test]
    async fn test_apply_installs_and_sets_start_level() {
        let runtime = InMemoryRuntime::new(".fragment");
        let plan = ReconciliationPlan {
            to_install: vec![install("file:///deploy/30/a.pkg", 30)],
            ..ReconciliationPlan::default()
        };

        let outcome = controller(&runtime).apply(&plan, false).await;

        assert_eq!(outcome.installed.len(), 1);
        assert_eq!(outcome.refresh, RefreshOutcome::Completed);
        assert_eq!(runtime.start_level_of(outcome.installed[0].handle), Some(30));
        assert_eq!(runtime.refresh_count(), 1);
        assert_eq!(runtime.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_plan_skips_refresh() {
        let runtime = InMemoryRuntime::new(".fragment");
        let outcome = controller(&runtime)
            .apply(&ReconciliationPlan::default(), false)
            .await;
        assert_eq!(outcome.refresh, RefreshOutcome::NotNeeded);
        assert_eq!(runtime.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_forced_refresh_after_uninstall() {
        let runtime = InMemoryRuntime::new(".fragment");
        let outcome = controller(&runtime)
            .apply(&ReconciliationPlan::default(), true)
            .await;
        assert_eq!(outcome.refresh, RefreshOutcome::Completed);
        assert_eq!(runtime.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_install_failure_does_not_block_others() {
        let runtime = InMemoryRuntime::new(".fragment");
        runtime.install("file:///deploy/b.pkg").await.unwrap();
        let plan = ReconciliationPlan {
            to_install: vec![
                install("file:///deploy/a.pkg", 1),
                // Already installed: the runtime rejects the duplicate.
                install("file:///deploy/b.pkg", 1),
                install("file:///deploy/c.pkg", 1),
            ],
            ..ReconciliationPlan::default()
        };

        let outcome = controller(&runtime).apply(&plan, false).await;

        assert_eq!(outcome.installed.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(
            outcome.failures[0].operation(),
            Some(ModuleOperationKind::Install)
        );
    }

    #[tokio::test]
    async fn test_start_level_failure_rolls_back_install() {
        let runtime = InMemoryRuntime::new(".fragment");
        let plan = ReconciliationPlan {
            to_install: vec![install("file:///deploy/a.pkg", 0)],
            ..ReconciliationPlan::default()
        };
        let outcome = controller(&runtime).apply(&plan, false).await;
        assert!(outcome.installed.is_empty());
        assert_eq!(
            outcome.failures[0].operation(),
            Some(ModuleOperationKind::SetStartLevel)
        );
        assert!(runtime.modules().is_empty());
    }

    #[tokio::test]
    async fn test_update_changes_modules() {
        let runtime = InMemoryRuntime::new(".fragment");
        let record = runtime.install("file:///deploy/a.pkg").await.unwrap();
        let plan = ReconciliationPlan {
            to_update: vec![record.clone()],
            ..ReconciliationPlan::default()
        };

        let outcome = controller(&runtime).apply(&plan, false).await;

        let changed = outcome.changed_modules();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].handle, record.handle);
        assert_eq!(outcome.refresh, RefreshOutcome::Completed);
    }
}
