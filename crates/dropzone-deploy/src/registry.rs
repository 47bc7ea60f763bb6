//! Snapshot of the modules the runtime holds under the install root.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{DeployError, DeployResult, ModuleOperationKind};
use crate::runtime::{ModuleRecord, ModuleRuntime};
use crate::scanner::ArtifactSet;

/// Result of [`RegistrySnapshot::uninstall_orphans`].
#[derive(Debug, Default)]
pub struct OrphanOutcome {
    /// Modules removed from the runtime.
    pub uninstalled: Vec<ModuleRecord>,
    /// Uninstalls that failed. Those modules stay in the snapshot.
    pub failures: Vec<DeployError>,
}

/// Modules under one location prefix, keyed by location.
///
/// Lives for a single cycle. The runtime remains the source of truth.
pub struct RegistrySnapshot {
    runtime: Arc<dyn ModuleRuntime>,
    prefix: String,
    modules: BTreeMap<String, ModuleRecord>,
}

impl RegistrySnapshot {
    /// Query the runtime for modules whose location starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::Runtime`] if the runtime cannot list modules.
    pub async fn capture(runtime: Arc<dyn ModuleRuntime>, prefix: &str) -> DeployResult<Self> {
        let listed = runtime.list_modules(prefix).await?;
        let mut modules = BTreeMap::new();

        for record in listed {
            // The runtime is expected to filter already; keep the guarantee local.
            if !record.location.starts_with(prefix) {
                continue;
            }
            match modules.entry(record.location.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(record);
                },
                Entry::Occupied(existing) => {
                    warn!(
                        location = %record.location,
                        kept = %existing.get().handle,
                        ignored = %record.handle,
                        "Runtime reported two modules for one location"
                    );
                },
            }
        }

        Ok(Self {
            runtime,
            prefix: prefix.to_owned(),
            modules,
        })
    }

    /// Remove every module whose artifact is gone.
    ///
    /// Each failure is logged and collected; the remaining orphans are still
    /// processed. Successfully uninstalled modules leave the snapshot.
    pub async fn uninstall_orphans(&mut self, artifacts: &ArtifactSet) -> OrphanOutcome {
        let orphans: Vec<ModuleRecord> = self
            .modules
            .values()
            .filter(|record| !artifacts.contains_key(&record.location))
            .cloned()
            .collect();

        let mut outcome = OrphanOutcome::default();
        for record in orphans {
            match self.runtime.uninstall(record.handle).await {
                Ok(()) => {
                    info!(location = %record.location, handle = %record.handle, "Uninstalled module");
                    self.modules.remove(&record.location);
                    outcome.uninstalled.push(record);
                },
                Err(e) => {
                    let err = DeployError::module_operation(
                        ModuleOperationKind::Uninstall,
                        &record.location,
                        &e,
                    );
                    warn!(handle = %record.handle, error = %err, "Module operation failed");
                    outcome.failures.push(err);
                },
            }
        }
        outcome
    }

    /// Look up a module by location.
    #[must_use]
    pub fn get(&self, location: &str) -> Option<&ModuleRecord> {
        self.modules.get(location)
    }

    /// All retained modules, keyed by location.
    #[must_use]
    pub fn modules(&self) -> &BTreeMap<String, ModuleRecord> {
        &self.modules
    }

    /// The location prefix this snapshot covers.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of retained modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether no module is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Log every retained module at debug level.
    pub fn log_diagnostics(&self) {
        debug!(prefix = %self.prefix, count = self.modules.len(), "Registry snapshot");
        for record in self.modules.values() {
            let last_modified = chrono::DateTime::<chrono::Utc>::from(record.last_modified);
            debug!(
                location = %record.location,
                handle = %record.handle,
                last_modified = %last_modified.to_rfc3339(),
                is_fragment = record.is_fragment,
                "Retained module"
            );
        }
    }
}
