//! Starting new and updated modules.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{DeployError, ModuleOperationKind};
use crate::runtime::{ActivationPolicy, ModuleRecord, ModuleRuntime};

/// Result of [`StartupSequencer::start`].
#[derive(Debug, Default)]
pub struct StartSummary {
    /// Modules that were started.
    pub started: Vec<ModuleRecord>,
    /// Fragments that were skipped.
    pub skipped_fragments: usize,
    /// Start failures.
    pub failures: Vec<DeployError>,
}

/// Starts modules with lazy activation, one failure at a time.
pub struct StartupSequencer {
    runtime: Arc<dyn ModuleRuntime>,
}

impl StartupSequencer {
    /// Create a sequencer.
    #[must_use]
    pub fn new(runtime: Arc<dyn ModuleRuntime>) -> Self {
        Self { runtime }
    }

    /// Start every non-fragment module in `modules`.
    pub async fn start(&self, modules: &[ModuleRecord]) -> StartSummary {
        let mut summary = StartSummary::default();

        for record in modules {
            if record.is_fragment {
                debug!(location = %record.location, "Not starting fragment");
                summary.skipped_fragments = summary.skipped_fragments.saturating_add(1);
                continue;
            }

            match self
                .runtime
                .start(record.handle, ActivationPolicy::Lazy)
                .await
            {
                Ok(()) => {
                    debug!(location = %record.location, handle = %record.handle, "Started module");
                    summary.started.push(record.clone());
                },
                Err(e) => {
                    let err =
                        DeployError::module_operation(ModuleOperationKind::Start, &record.location, &e);
                    warn!(handle = %record.handle, error = %err, "Module operation failed");
                    summary.failures.push(err);
                },
            }
        }

        if !modules.is_empty() {
            info!(
                started = summary.started.len(),
                failed = summary.failures.len(),
                "{} started, {} failed",
                summary.started.len(),
                summary.failures.len()
            );
        }
        summary
    }
}
