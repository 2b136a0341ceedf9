//! Asset handles - the cache-resident cell for one asset path.
//!
//! A handle keeps its identity for as long as its manager lives. Reloading
//! replaces the value inside it, bumps [`AssetHandle::version`] and notifies the
//! handle's listeners, so holders of the handle observe new content without
//! looking the asset up again.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use relic_core::dispatch::{DispatchError, panic_message};

use crate::asset::{Asset, LoadedAsset};
use crate::error::AssetResult;
use crate::manager::{AssetManager, WeakAssetManager};

/// Callback invoked after a handle's asset has been invalidated.
///
/// Keep a clone of the `Arc` to remove the listener later; listeners are
/// compared by pointer.
pub type Listener = Arc<dyn Fn(&AssetHandle) + Send + Sync>;

#[derive(Default)]
struct HandleState {
    value: Option<LoadedAsset>,
    /// Set when the last load attempt failed; cleared by a reload.
    load_failed: bool,
}

/// The cached state of one asset path.
pub struct AssetHandle {
    manager: WeakAssetManager,
    path: Arc<str>,
    version: AtomicU32,
    state: Mutex<HandleState>,
    listeners: Mutex<Vec<Listener>>,
}

impl AssetHandle {
    pub(crate) fn new(manager: WeakAssetManager, path: Arc<str>, value: Option<LoadedAsset>) -> Self {
        Self {
            manager,
            path,
            version: AtomicU32::new(0),
            state: Mutex::new(HandleState {
                value,
                load_failed: false,
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Normalized path of the asset, relative to its manager.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Number of times the asset has been invalidated.
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    /// The owning manager, if it is still alive.
    pub fn manager(&self) -> Option<AssetManager> {
        self.manager.upgrade()
    }

    /// Whether a value is currently cached, without loading one.
    pub fn is_loaded(&self) -> bool {
        self.state.lock().value.is_some()
    }

    /// Returns the cached value, loading it if needed.
    ///
    /// A failed load is remembered: later calls return `None` without touching
    /// the source again until the handle is reloaded.
    pub fn value(&self) -> Option<LoadedAsset> {
        match self.try_value() {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Failed to load asset '{}': {}", self.path, e);
                None
            }
        }
    }

    /// Like [`value`](Self::value), but reports load errors the manager does not
    /// degrade to "not found".
    pub fn try_value(&self) -> AssetResult<Option<LoadedAsset>> {
        let mut state = self.state.lock();
        if let Some(value) = &state.value {
            return Ok(Some(value.clone()));
        }
        if state.load_failed {
            return Ok(None);
        }

        let Some(manager) = self.manager.upgrade() else {
            return Ok(None);
        };
        let result = manager.load_new_asset(&self.path);
        match &result {
            Ok(Some(value)) => state.value = Some(value.clone()),
            Ok(None) | Err(_) => state.load_failed = true,
        }
        result
    }

    /// Returns the value as `T`, or `None` if it is missing or of another type.
    pub fn get<T: Asset>(&self) -> Option<Arc<T>> {
        self.value()?.downcast::<T>()
    }

    /// Registers `listener`. Registering the same listener twice makes it run twice.
    pub fn add_listener(&self, listener: Listener) {
        self.listeners.lock().push(listener);
    }

    /// Removes one registration of `listener`. Returns `false` if it was not registered.
    pub fn remove_listener(&self, listener: &Listener) -> bool {
        let mut listeners = self.listeners.lock();
        match listeners.iter().position(|l| Arc::ptr_eq(l, listener)) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Drops the cached value, bumps the version and runs every listener in
    /// registration order.
    ///
    /// A panicking listener does not stop the rest; the panics are returned
    /// together once all listeners have run.
    pub(crate) fn trigger_reload(&self) -> Result<(), DispatchError> {
        *self.state.lock() = HandleState::default();
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!("Reloading asset '{}' (version {})", self.path, version);

        // Listeners may add or remove listeners on this handle.
        let listeners = self.listeners.lock().clone();
        let mut errors = Vec::new();
        for listener in listeners {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(self))) {
                errors.push(DispatchError::Panicked(panic_message(payload.as_ref())));
            }
        }
        match DispatchError::collect(errors) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for AssetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetHandle")
            .field("path", &self.path)
            .field("version", &self.version())
            .field("loaded", &self.is_loaded())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached(value: Option<LoadedAsset>) -> AssetHandle {
        AssetHandle::new(WeakAssetManager::new(), Arc::from("test/asset"), value)
    }

    fn counter() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Listener) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = Arc::clone(&log);
            move |name: &'static str| -> Listener {
                let log = Arc::clone(&log);
                Arc::new(move |_: &AssetHandle| log.lock().push(name))
            }
        };
        (log, make)
    }

    #[test]
    fn test_version_starts_at_zero_and_increments() {
        let handle = detached(None);
        assert_eq!(handle.version(), 0);
        for expected in 1..=3 {
            handle.trigger_reload().unwrap();
            assert_eq!(handle.version(), expected);
        }
    }

    #[test]
    fn test_reload_clears_value() {
        let handle = detached(Some(LoadedAsset::new(String::from("cached"))));
        assert_eq!(handle.get::<String>().as_deref().map(String::as_str), Some("cached"));
        handle.trigger_reload().unwrap();
        assert!(!handle.is_loaded());
        // No manager to load from.
        assert!(handle.value().is_none());
    }

    #[test]
    fn test_listeners_run_in_order() {
        let handle = detached(None);
        let (log, make) = counter();
        handle.add_listener(make("a"));
        handle.add_listener(make("b"));
        handle.add_listener(make("c"));
        handle.trigger_reload().unwrap();
        assert_eq!(*log.lock(), ["a", "b", "c"]);
    }

    #[test]
    fn test_duplicate_listener_runs_twice() {
        let handle = detached(None);
        let (log, make) = counter();
        let listener = make("dup");
        handle.add_listener(Arc::clone(&listener));
        handle.add_listener(Arc::clone(&listener));
        handle.trigger_reload().unwrap();
        assert_eq!(log.lock().len(), 2);

        assert!(handle.remove_listener(&listener));
        handle.trigger_reload().unwrap();
        assert_eq!(log.lock().len(), 3);

        assert!(handle.remove_listener(&listener));
        assert!(!handle.remove_listener(&listener));
        handle.trigger_reload().unwrap();
        assert_eq!(log.lock().len(), 3);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let handle = detached(None);
        let (log, make) = counter();
        handle.add_listener(make("before"));
        handle.add_listener(Arc::new(|_: &AssetHandle| panic!("listener broke")));
        handle.add_listener(make("after"));

        let err = handle.trigger_reload().unwrap_err();
        assert!(matches!(err, DispatchError::Panicked(ref m) if m == "listener broke"));
        assert_eq!(*log.lock(), ["before", "after"]);
        assert_eq!(handle.version(), 1);
    }

    #[test]
    fn test_listener_sees_new_version() {
        let handle = detached(None);
        let seen = Arc::new(AtomicU32::new(0));
        let sink = Arc::clone(&seen);
        handle.add_listener(Arc::new(move |h: &AssetHandle| sink.store(h.version(), Ordering::SeqCst)));
        handle.trigger_reload().unwrap();
        handle.trigger_reload().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
