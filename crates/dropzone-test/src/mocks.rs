//! Mock implementations for testing.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dropzone_deploy::{
    ActivationPolicy, InMemoryRuntime, ListenerId, ModuleHandle, ModuleOperationKind,
    ModuleRecord, ModuleRuntime, RefreshListener, RuntimeError, RuntimeResult,
};

/// A call received by [`MockRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    /// `list_modules(prefix)`
    List(String),
    /// `install(location)`
    Install(String),
    /// `update(handle)`
    Update(ModuleHandle),
    /// `uninstall(handle)`
    Uninstall(ModuleHandle),
    /// `set_start_level(handle, level)`
    SetStartLevel(ModuleHandle, u32),
    /// `start(handle, policy)`
    Start(ModuleHandle, ActivationPolicy),
    /// `refresh(root)`
    Refresh(ModuleHandle),
}

/// A [`ModuleRuntime`] that records calls and injects failures.
///
/// Module bookkeeping is delegated to an [`InMemoryRuntime`]. Failures are
/// keyed by operation and module location. Refresh completion can be
/// withheld to exercise the refresh timeout.
#[derive(Debug, Clone)]
pub struct MockRuntime {
    inner: InMemoryRuntime,
    calls: Arc<Mutex<Vec<RuntimeCall>>>,
    failures: Arc<Mutex<HashSet<(ModuleOperationKind, String)>>>,
    withhold_refresh: Arc<AtomicBool>,
}

impl MockRuntime {
    /// Create a mock with the default `.fragment` marker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: InMemoryRuntime::new(".fragment"),
            calls: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(HashSet::new())),
            withhold_refresh: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make `operation` fail for the module at `location`.
    #[must_use]
    pub fn with_failure(self, operation: ModuleOperationKind, location: impl Into<String>) -> Self {
        self.fail(operation, location);
        self
    }

    /// Make `operation` fail for the module at `location` from now on.
    pub fn fail(&self, operation: ModuleOperationKind, location: impl Into<String>) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert((operation, location.into()));
        }
    }

    /// Stop injecting failures.
    pub fn clear_failures(&self) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.clear();
        }
    }

    /// Never signal refresh completion while `withhold` is set.
    pub fn withhold_refresh(&self, withhold: bool) {
        self.withhold_refresh.store(withhold, Ordering::SeqCst);
    }

    /// Every call received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    /// Handles passed to `start`, in call order.
    #[must_use]
    pub fn started(&self) -> Vec<ModuleHandle> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RuntimeCall::Start(handle, _) => Some(handle),
                _ => None,
            })
            .collect()
    }

    /// Number of `refresh` calls.
    #[must_use]
    pub fn refresh_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, RuntimeCall::Refresh(_)))
            .count()
    }

    /// Currently loaded modules.
    #[must_use]
    pub fn modules(&self) -> Vec<ModuleRecord> {
        self.inner.modules()
    }

    /// Locations of the currently loaded modules, sorted.
    #[must_use]
    pub fn locations(&self) -> Vec<String> {
        let mut locations: Vec<String> =
            self.modules().into_iter().map(|m| m.location).collect();
        locations.sort();
        locations
    }

    /// The module loaded from `location`.
    #[must_use]
    pub fn module_at(&self, location: &str) -> Option<ModuleRecord> {
        self.modules().into_iter().find(|m| m.location == location)
    }

    /// Registered refresh listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listener_count()
    }

    /// The underlying in-memory runtime.
    #[must_use]
    pub fn inner(&self) -> &InMemoryRuntime {
        &self.inner
    }

    fn record(&self, call: RuntimeCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn check(&self, operation: ModuleOperationKind, location: &str) -> RuntimeResult<()> {
        let injected = self
            .failures
            .lock()
            .map(|f| f.contains(&(operation, location.to_owned())))
            .unwrap_or(false);
        if injected {
            Err(RuntimeError::Rejected(format!("injected {operation} failure")))
        } else {
            Ok(())
        }
    }

    fn check_handle(&self, operation: ModuleOperationKind, handle: ModuleHandle) -> RuntimeResult<()> {
        match self.modules().into_iter().find(|m| m.handle == handle) {
            Some(module) => self.check(operation, &module.location),
            None => Ok(()),
        }
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModuleRuntime for MockRuntime {
    async fn list_modules(&self, location_prefix: &str) -> RuntimeResult<Vec<ModuleRecord>> {
        self.record(RuntimeCall::List(location_prefix.to_owned()));
        self.inner.list_modules(location_prefix).await
    }

    async fn install(&self, location: &str) -> RuntimeResult<ModuleRecord> {
        self.record(RuntimeCall::Install(location.to_owned()));
        self.check(ModuleOperationKind::Install, location)?;
        self.inner.install(location).await
    }

    async fn update(&self, handle: ModuleHandle) -> RuntimeResult<ModuleRecord> {
        self.record(RuntimeCall::Update(handle));
        self.check_handle(ModuleOperationKind::Update, handle)?;
        self.inner.update(handle).await
    }

    async fn uninstall(&self, handle: ModuleHandle) -> RuntimeResult<()> {
        self.record(RuntimeCall::Uninstall(handle));
        self.check_handle(ModuleOperationKind::Uninstall, handle)?;
        self.inner.uninstall(handle).await
    }

    async fn set_start_level(&self, handle: ModuleHandle, level: u32) -> RuntimeResult<()> {
        self.record(RuntimeCall::SetStartLevel(handle, level));
        self.check_handle(ModuleOperationKind::SetStartLevel, handle)?;
        self.inner.set_start_level(handle, level).await
    }

    async fn start(&self, handle: ModuleHandle, policy: ActivationPolicy) -> RuntimeResult<()> {
        self.record(RuntimeCall::Start(handle, policy));
        self.check_handle(ModuleOperationKind::Start, handle)?;
        self.inner.start(handle, policy).await
    }

    fn add_refresh_listener(&self, listener: RefreshListener) -> ListenerId {
        self.inner.add_refresh_listener(listener)
    }

    fn remove_refresh_listener(&self, id: ListenerId) {
        self.inner.remove_refresh_listener(id);
    }

    async fn refresh(&self, root: ModuleHandle) -> RuntimeResult<()> {
        self.record(RuntimeCall::Refresh(root));
        if self.withhold_refresh.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.refresh(root).await
    }

    fn system_root_handle(&self) -> ModuleHandle {
        self.inner.system_root_handle()
    }
}
