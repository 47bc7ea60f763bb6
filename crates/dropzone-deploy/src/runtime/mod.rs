//! The host module runtime seam.
//!
//! The engine never loads code itself. Everything it does to modules goes
//! through [`ModuleRuntime`], which every component receives explicitly as
//! an `Arc<dyn ModuleRuntime>`.

mod memory;

pub use memory::{InMemoryRuntime, ModuleState};

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::oneshot;

/// Opaque reference to a module loaded in the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleHandle(u64);

impl ModuleHandle {
    /// Wrap a raw runtime id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw runtime id.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A module as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    /// Location the module was installed from.
    pub location: String,
    /// Runtime handle.
    pub handle: ModuleHandle,
    /// When the runtime last (re)loaded the module's content.
    pub last_modified: SystemTime,
    /// Fragments are hosted by another module and never started.
    pub is_fragment: bool,
}

/// How a started module is activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationPolicy {
    /// Activate immediately.
    Eager,
    /// Defer activation until the module is first used.
    #[default]
    Lazy,
}

/// Identifies a registered refresh listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Wrap a raw listener id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Errors reported by a [`ModuleRuntime`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// No module with this handle or location.
    #[error("module not found: {0}")]
    NotFound(String),
    /// The runtime refused the operation.
    #[error("operation rejected: {0}")]
    Rejected(String),
    /// The runtime cannot serve requests.
    #[error("runtime unavailable: {0}")]
    Unavailable(String),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// One-shot refresh completion signal.
///
/// Clones share the same signal. The first [`notify`](Self::notify) wins;
/// later calls are no-ops.
#[derive(Debug, Clone)]
pub struct RefreshListener {
    tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl RefreshListener {
    /// Create a listener and the receiver that resolves when it fires.
    #[must_use]
    pub fn channel() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Signal refresh completion.
    pub fn notify(&self) {
        let sender = self.tx.lock().ok().and_then(|mut guard| guard.take());
        if let Some(tx) = sender {
            let _ = tx.send(());
        }
    }

    /// Whether the listener has already fired.
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.tx.lock().map_or(true, |guard| guard.is_none())
    }
}

/// The host module runtime.
///
/// All mutating calls are issued from a single reconciliation cycle at a
/// time; implementations need not guard against concurrent engine calls but
/// must be `Send + Sync` so the engine can hold them across tasks.
#[async_trait]
pub trait ModuleRuntime: Send + Sync {
    /// Modules whose location starts with `location_prefix`.
    async fn list_modules(&self, location_prefix: &str) -> RuntimeResult<Vec<ModuleRecord>>;

    /// Install a module from `location`. The module is not started.
    async fn install(&self, location: &str) -> RuntimeResult<ModuleRecord>;

    /// Reload a module's content from its location.
    async fn update(&self, handle: ModuleHandle) -> RuntimeResult<ModuleRecord>;

    /// Remove a module.
    async fn uninstall(&self, handle: ModuleHandle) -> RuntimeResult<()>;

    /// Assign the module's start level.
    async fn set_start_level(&self, handle: ModuleHandle, level: u32) -> RuntimeResult<()>;

    /// Start a module.
    async fn start(&self, handle: ModuleHandle, policy: ActivationPolicy) -> RuntimeResult<()>;

    /// Register a listener notified when the next refresh completes.
    fn add_refresh_listener(&self, listener: RefreshListener) -> ListenerId;

    /// Unregister a listener. Unknown ids are ignored.
    fn remove_refresh_listener(&self, id: ListenerId);

    /// Issue a dependency-graph refresh rooted at `root`.
    ///
    /// Returns once the refresh is issued. Completion is signalled to the
    /// registered listeners.
    async fn refresh(&self, root: ModuleHandle) -> RuntimeResult<()>;

    /// Handle of the runtime's own root module.
    fn system_root_handle(&self) -> ModuleHandle;
}

/// A refresh listener registered for the lifetime of this value.
///
/// Dropping the subscription unregisters the listener, whichever way the
/// wait ended.
pub struct RefreshSubscription<'a> {
    runtime: &'a dyn ModuleRuntime,
    id: ListenerId,
}

impl<'a> RefreshSubscription<'a> {
    /// Register a fresh listener with `runtime`.
    #[must_use]
    pub fn register(runtime: &'a dyn ModuleRuntime) -> (Self, oneshot::Receiver<()>) {
        let (listener, rx) = RefreshListener::channel();
        let id = runtime.add_refresh_listener(listener);
        (Self { runtime, id }, rx)
    }

    /// The registered listener id.
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl Drop for RefreshSubscription<'_> {
    fn drop(&mut self) {
        self.runtime.remove_refresh_listener(self.id);
    }
}
