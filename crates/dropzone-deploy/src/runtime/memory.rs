use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::{
    ActivationPolicy, ListenerId, ModuleHandle, ModuleRecord, ModuleRuntime, RefreshListener,
    RuntimeError, RuntimeResult,
};

const SYSTEM_ROOT: ModuleHandle = ModuleHandle::new(0);

/// Lifecycle state of a module held by [`InMemoryRuntime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Installed, not started.
    Installed,
    /// Started with lazy activation; waiting for first use.
    Starting,
    /// Started and active.
    Active,
}

#[derive(Debug)]
struct Entry {
    record: ModuleRecord,
    start_level: Option<u32>,
    state: ModuleState,
}

#[derive(Debug, Default)]
struct State {
    modules: BTreeMap<ModuleHandle, Entry>,
    next_handle: u64,
    listeners: HashMap<ListenerId, RefreshListener>,
    next_listener: u64,
    refreshes: u64,
}

/// A module runtime that keeps its module table in memory.
///
/// Installing records the location and stamps `last_modified` with the
/// current time. A module is a fragment when its file stem ends with the
/// configured marker (`db.fragment.pkg` with marker `.fragment`). Refreshes
/// complete on a spawned task and notify every registered listener.
#[derive(Debug, Clone)]
pub struct InMemoryRuntime {
    state: Arc<Mutex<State>>,
    fragment_marker: String,
}

impl InMemoryRuntime {
    /// Create an empty runtime.
    #[must_use]
    pub fn new(fragment_marker: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                next_handle: 1,
                ..State::default()
            })),
            fragment_marker: fragment_marker.into(),
        }
    }

    fn lock(&self) -> RuntimeResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| RuntimeError::Unavailable("module table lock poisoned".into()))
    }

    fn is_fragment(&self, location: &str) -> bool {
        if self.fragment_marker.is_empty() {
            return false;
        }
        let name = location.rsplit('/').next().unwrap_or(location);
        let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
        stem.ends_with(&self.fragment_marker)
    }

    /// All modules, ordered by handle.
    #[must_use]
    pub fn modules(&self) -> Vec<ModuleRecord> {
        self.lock()
            .map(|s| s.modules.values().map(|e| e.record.clone()).collect())
            .unwrap_or_default()
    }

    /// Lifecycle state of a module.
    #[must_use]
    pub fn state_of(&self, handle: ModuleHandle) -> Option<ModuleState> {
        self.lock().ok()?.modules.get(&handle).map(|e| e.state)
    }

    /// Start level assigned to a module.
    #[must_use]
    pub fn start_level_of(&self, handle: ModuleHandle) -> Option<u32> {
        self.lock().ok()?.modules.get(&handle)?.start_level
    }

    /// Number of refreshes issued so far.
    #[must_use]
    pub fn refresh_count(&self) -> u64 {
        self.lock().map(|s| s.refreshes).unwrap_or_default()
    }

    /// Number of currently registered refresh listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.lock().map(|s| s.listeners.len()).unwrap_or_default()
    }

    fn with_entry<T>(
        &self,
        handle: ModuleHandle,
        f: impl FnOnce(&mut Entry) -> T,
    ) -> RuntimeResult<T> {
        let mut state = self.lock()?;
        let entry = state
            .modules
            .get_mut(&handle)
            .ok_or_else(|| RuntimeError::NotFound(handle.to_string()))?;
        Ok(f(entry))
    }
}

#[async_trait]
impl ModuleRuntime for InMemoryRuntime {
    async fn list_modules(&self, location_prefix: &str) -> RuntimeResult<Vec<ModuleRecord>> {
        let state = self.lock()?;
        Ok(state
            .modules
            .values()
            .filter(|e| e.record.location.starts_with(location_prefix))
            .map(|e| e.record.clone())
            .collect())
    }

    async fn install(&self, location: &str) -> RuntimeResult<ModuleRecord> {
        let is_fragment = self.is_fragment(location);
        let mut state = self.lock()?;
        if state
            .modules
            .values()
            .any(|e| e.record.location == location)
        {
            return Err(RuntimeError::Rejected(format!(
                "a module is already installed from {location}"
            )));
        }

        let handle = ModuleHandle::new(state.next_handle);
        state.next_handle = state.next_handle.saturating_add(1);
        let record = ModuleRecord {
            location: location.to_owned(),
            handle,
            last_modified: SystemTime::now(),
            is_fragment,
        };
        state.modules.insert(
            handle,
            Entry {
                record: record.clone(),
                start_level: None,
                state: ModuleState::Installed,
            },
        );
        debug!(%handle, location, is_fragment, "Module installed");
        Ok(record)
    }

    async fn update(&self, handle: ModuleHandle) -> RuntimeResult<ModuleRecord> {
        let record = self.with_entry(handle, |entry| {
            entry.record.last_modified = SystemTime::now();
            entry.record.clone()
        })?;
        debug!(%handle, location = %record.location, "Module updated");
        Ok(record)
    }

    async fn uninstall(&self, handle: ModuleHandle) -> RuntimeResult<()> {
        if handle == SYSTEM_ROOT {
            return Err(RuntimeError::Rejected(
                "the system root cannot be uninstalled".into(),
            ));
        }
        let removed = self.lock()?.modules.remove(&handle);
        match removed {
            Some(entry) => {
                debug!(%handle, location = %entry.record.location, "Module uninstalled");
                Ok(())
            },
            None => Err(RuntimeError::NotFound(handle.to_string())),
        }
    }

    async fn set_start_level(&self, handle: ModuleHandle, level: u32) -> RuntimeResult<()> {
        if level == 0 {
            return Err(RuntimeError::Rejected(
                "start level 0 is reserved for the system root".into(),
            ));
        }
        self.with_entry(handle, |entry| entry.start_level = Some(level))
    }

    async fn start(&self, handle: ModuleHandle, policy: ActivationPolicy) -> RuntimeResult<()> {
        self.with_entry(handle, |entry| {
            if entry.record.is_fragment {
                return Err(RuntimeError::Rejected(format!(
                    "{} is a fragment and cannot be started",
                    entry.record.location
                )));
            }
            entry.state = match policy {
                ActivationPolicy::Eager => ModuleState::Active,
                ActivationPolicy::Lazy => ModuleState::Starting,
            };
            Ok(())
        })?
    }

    fn add_refresh_listener(&self, listener: RefreshListener) -> ListenerId {
        let Ok(mut state) = self.lock() else {
            // A poisoned table cannot refresh; the caller's wait times out.
            return ListenerId::new(u64::MAX);
        };
        let id = ListenerId::new(state.next_listener);
        state.next_listener = state.next_listener.saturating_add(1);
        state.listeners.insert(id, listener);
        id
    }

    fn remove_refresh_listener(&self, id: ListenerId) {
        if let Ok(mut state) = self.lock() {
            state.listeners.remove(&id);
        }
    }

    async fn refresh(&self, root: ModuleHandle) -> RuntimeResult<()> {
        if root != SYSTEM_ROOT {
            return Err(RuntimeError::NotFound(root.to_string()));
        }
        let listeners: Vec<RefreshListener> = {
            let mut state = self.lock()?;
            state.refreshes = state.refreshes.saturating_add(1);
            state.listeners.values().cloned().collect()
        };
        trace!(listeners = listeners.len(), "Refresh issued");

        tokio::spawn(async move {
            tokio::task::yield_now().await;
            for listener in listeners {
                listener.notify();
            }
        });
        Ok(())
    }

    fn system_root_handle(&self) -> ModuleHandle {
        SYSTEM_ROOT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> InMemoryRuntime {
        InMemoryRuntime::new(".fragment")
    }

    #[tokio::test]
    async fn test_install_and_list_by_prefix() {
        let rt = runtime();
        rt.install("file:///deploy/a.pkg").await.unwrap();
        rt.install("file:///other/b.pkg").await.unwrap();

        let listed = rt.list_modules("file:///deploy/").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].location, "file:///deploy/a.pkg");
        assert_eq!(rt.state_of(listed[0].handle), Some(ModuleState::Installed));
    }

    #[tokio::test]
    async fn test_duplicate_install_rejected() {
        let rt = runtime();
        rt.install("file:///deploy/a.pkg").await.unwrap();
        let err = rt.install("file:///deploy/a.pkg").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_fragment_detection() {
        let rt = runtime();
        let fragment = rt.install("file:///deploy/db.fragment.pkg").await.unwrap();
        let plain = rt.install("file:///deploy/fragmentation.pkg").await.unwrap();
        assert!(fragment.is_fragment);
        assert!(!plain.is_fragment);

        let err = rt
            .start(fragment.handle, ActivationPolicy::Lazy)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_update_advances_last_modified() {
        let rt = runtime();
        let installed = rt.install("file:///deploy/a.pkg").await.unwrap();
        let updated = rt.update(installed.handle).await.unwrap();
        assert!(updated.last_modified >= installed.last_modified);
    }

    #[tokio::test]
    async fn test_start_policy_sets_state() {
        let rt = runtime();
        let lazy = rt.install("file:///deploy/a.pkg").await.unwrap();
        let eager = rt.install("file:///deploy/b.pkg").await.unwrap();
        rt.start(lazy.handle, ActivationPolicy::Lazy).await.unwrap();
        rt.start(eager.handle, ActivationPolicy::Eager).await.unwrap();
        assert_eq!(rt.state_of(lazy.handle), Some(ModuleState::Starting));
        assert_eq!(rt.state_of(eager.handle), Some(ModuleState::Active));
    }

    #[tokio::test]
    async fn test_unknown_handle_not_found() {
        let rt = runtime();
        let missing = ModuleHandle::new(99);
        assert!(matches!(
            rt.uninstall(missing).await,
            Err(RuntimeError::NotFound(_))
        ));
        assert!(matches!(
            rt.set_start_level(missing, 5).await,
            Err(RuntimeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_notifies_listeners() {
        let rt = runtime();
        let (listener, rx) = RefreshListener::channel();
        let id = rt.add_refresh_listener(listener);

        rt.refresh(rt.system_root_handle()).await.unwrap();
        rx.await.unwrap();

        assert_eq!(rt.refresh_count(), 1);
        rt.remove_refresh_listener(id);
        assert_eq!(rt.listener_count(), 0);
    }
}
