//! Artifact reconciliation and hot deployment for dropzone.
//!
//! Keeps the modules loaded in a host runtime consistent with the artifact
//! files under an install root:
//!
//! - [`ArtifactScanner`]: recursive artifact discovery
//! - [`RegistrySnapshot`]: the runtime's modules under the install root,
//!   with eager orphan uninstall
//! - [`Reconciler`]: install/update planning and start level derivation
//! - [`LifecycleController`]: plan execution and bounded refresh wait
//! - [`StartupSequencer`]: lazy start of new and updated modules
//! - [`DirectoryWatcher`]: filesystem notifications for the whole tree
//! - [`Orchestrator`]: debounced, serialized cycle scheduling
//! - [`HotDeployService`]: all of the above behind one handle
//!
//! The runtime itself is reached only through [`ModuleRuntime`].
//! [`InMemoryRuntime`] is a complete implementation for embedding and tests.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use dropzone_deploy::{DeployConfig, HotDeployService, InMemoryRuntime, InstallRoot};
//!
//! # async fn run() -> Result<(), dropzone_deploy::DeployError> {
//! let config = DeployConfig::new(InstallRoot::resolve("/srv/app/deploy")?);
//! let runtime = Arc::new(InMemoryRuntime::new(".fragment"));
//!
//! let service = HotDeployService::start(config, runtime).await;
//! // ... the install root is now deployed and watched ...
//! service.stop().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod orchestrator;
pub mod reconciler;
pub mod registry;
pub mod runtime;
pub mod scanner;
pub mod service;
pub mod start_level;
pub mod startup;
pub mod watcher;

pub use config::{DeployConfig, InstallRoot};
pub use dropzone_config::UninstallFailurePolicy;
pub use dropzone_telemetry::CycleTrigger;
pub use engine::{CycleReport, Reconcile, ReconciliationEngine};
pub use error::{DeployError, DeployResult, ModuleOperationKind};
pub use lifecycle::{ApplyOutcome, LifecycleController, RefreshOutcome};
pub use orchestrator::{Orchestrator, OrchestratorInputs};
pub use reconciler::{PlannedInstall, ReconciliationPlan, Reconciler};
pub use registry::{OrphanOutcome, RegistrySnapshot};
pub use runtime::{
    ActivationPolicy, InMemoryRuntime, ListenerId, ModuleHandle, ModuleRecord, ModuleRuntime,
    ModuleState, RefreshListener, RefreshSubscription, RuntimeError, RuntimeResult,
};
pub use scanner::{Artifact, ArtifactScanner, ArtifactSet};
pub use service::{HotDeployService, ServiceHandle};
pub use start_level::derive_start_level;
pub use startup::{StartSummary, StartupSequencer};
pub use watcher::{ChangeKind, DirectoryWatcher, FileChange, WatchBatch, WatcherState};
