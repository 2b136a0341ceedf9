//! The path-keyed asset cache shared by every backing store.

use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use relic_core::alloc::{HashSet, StrKeyedMap};
use relic_core::dispatch;
use relic_core::profiling::profile_function;

use crate::asset::{Asset, LoadedAsset, Sprite, Texture};
use crate::error::{AssetError, AssetResult};
use crate::handle::AssetHandle;
use crate::registry;

/// A source of assets behind an [`AssetManager`].
///
/// Backends resolve normalized relative paths; caching, invalidation and the
/// typed API live in the manager.
pub trait AssetBackend: Send + Sync + 'static {
    /// Name used in logs and error messages.
    fn display_name(&self) -> String;

    /// Called once, when the manager wrapping this backend is created.
    fn attach(&self, _manager: WeakAssetManager) {}

    /// Resolves and decodes `path`, or returns `Ok(None)` if nothing exists there.
    fn load_asset(&self, path: &str) -> AssetResult<Option<LoadedAsset>>;

    /// Releases watchers and open files. Called by [`AssetManager::dispose`].
    fn dispose(&self) {}
}

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

struct ManagerShared {
    id: u64,
    name: String,
    backend: Box<dyn AssetBackend>,
    cache: Mutex<StrKeyedMap<Arc<AssetHandle>>>,
    /// Paths with a refresh queued on the dispatch queue.
    pending_refresh: Mutex<HashSet<Arc<str>>>,
    prefix: Mutex<Option<String>>,
    disposed: AtomicBool,
}

/// A cache of [`AssetHandle`]s over one [`AssetBackend`].
///
/// Cloning is cheap and yields another reference to the same cache.
#[derive(Clone)]
pub struct AssetManager {
    shared: Arc<ManagerShared>,
}

/// A non-owning reference to an [`AssetManager`].
#[derive(Clone, Default)]
pub struct WeakAssetManager {
    shared: Weak<ManagerShared>,
}

impl WeakAssetManager {
    /// A reference that never upgrades.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upgrade(&self) -> Option<AssetManager> {
        self.shared.upgrade().map(|shared| AssetManager { shared })
    }
}

/// Converts backslashes to slashes and strips one leading slash.
///
/// Borrows when `path` has no backslash.
pub fn normalize_path(path: &str) -> Cow<'_, str> {
    if !path.contains('\\') {
        return Cow::Borrowed(path.strip_prefix('/').unwrap_or(path));
    }
    let replaced = path.replace('\\', "/");
    match replaced.strip_prefix('/') {
        Some(stripped) => Cow::Owned(stripped.to_owned()),
        None => Cow::Owned(replaced),
    }
}

/// Splits `path` into the part before the last segment's extension and the
/// extension itself. Dot-files such as `.gitignore` have no extension.
pub fn split_extension(path: &str) -> (&str, Option<&str>) {
    let segment_start = path.rfind('/').map_or(0, |i| i + 1);
    match path[segment_start..].rfind('.') {
        Some(dot) if dot > 0 => {
            let dot = segment_start + dot;
            (&path[..dot], Some(&path[dot + 1..]))
        }
        _ => (path, None),
    }
}

impl AssetManager {
    /// Wraps `backend` in a new, empty cache.
    pub fn new<B: AssetBackend>(backend: B) -> Self {
        let manager = Self {
            shared: Arc::new(ManagerShared {
                id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
                name: backend.display_name(),
                backend: Box::new(backend),
                cache: Mutex::new(StrKeyedMap::new()),
                pending_refresh: Mutex::new(HashSet::default()),
                prefix: Mutex::new(None),
                disposed: AtomicBool::new(false),
            }),
        };
        manager.shared.backend.attach(manager.downgrade());
        manager
    }

    pub fn downgrade(&self) -> WeakAssetManager {
        WeakAssetManager {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Unique id of this manager.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn display_name(&self) -> &str {
        &self.shared.name
    }

    /// Prefix this manager is registered under, if any.
    pub fn prefix(&self) -> Option<String> {
        self.shared.prefix.lock().clone()
    }

    pub(crate) fn prefix_slot(&self) -> &Mutex<Option<String>> {
        &self.shared.prefix
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Whether both values refer to the same manager.
    pub fn ptr_eq(&self, other: &AssetManager) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn ensure_alive(&self) -> AssetResult<()> {
        if self.is_disposed() {
            return Err(AssetError::Disposed {
                manager: self.shared.name.clone(),
            });
        }
        Ok(())
    }

    fn not_found(&self, path: &str) -> AssetError {
        AssetError::not_found(path, self.shared.name.as_str())
    }

    /// Loads an asset from the backend, bypassing the cache.
    ///
    /// Decode and read failures are logged and reported as `Ok(None)`.
    pub(crate) fn load_new_asset(&self, path: &str) -> AssetResult<Option<LoadedAsset>> {
        profile_function!();
        match self.shared.backend.load_asset(path) {
            Err(e) if e.is_recoverable() => {
                tracing::warn!("Could not load asset '{}' from {}: {}", path, self.shared.name, e);
                Ok(None)
            }
            result => result,
        }
    }

    /// Returns the handle for `path`, creating it on first use.
    ///
    /// Returns `Ok(None)` when the path resolves to nothing; a handle is only
    /// created once its asset has loaded successfully. Concurrent calls for one
    /// path share a single handle.
    pub fn get_handle(&self, path: &str) -> AssetResult<Option<Arc<AssetHandle>>> {
        profile_function!();
        self.ensure_alive()?;
        let path = normalize_path(path);

        let mut cache = self.shared.cache.lock();
        if let Some(handle) = cache.get(&path) {
            return Ok(Some(Arc::clone(handle)));
        }

        let Some(value) = self.load_new_asset(&path)? else {
            return Ok(None);
        };
        let key: Arc<str> = Arc::from(path.as_ref());
        let handle = Arc::new(AssetHandle::new(self.downgrade(), Arc::clone(&key), Some(value)));
        cache.insert(key, Arc::clone(&handle));
        Ok(Some(handle))
    }

    /// Loads the asset at `path` as `T`.
    ///
    /// Fails with [`AssetError::NotFound`] if nothing loads from `path`, and with
    /// [`AssetError::TypeMismatch`] if the asset is not a `T`. Requesting a
    /// [`Texture`] loads the [`Sprite`] at `path` and returns its texture.
    pub fn load<T: Asset>(&self, path: &str) -> AssetResult<Arc<T>> {
        if TypeId::of::<T>() == TypeId::of::<Texture>() {
            let sprite = self.load::<Sprite>(path)?;
            let texture: Arc<dyn Any + Send + Sync> = sprite.texture.clone();
            return texture.downcast::<T>().map_err(|_| AssetError::TypeMismatch {
                path: normalize_path(path).into_owned(),
                expected: T::type_name(),
                actual: Texture::type_name(),
            });
        }

        let path = normalize_path(path);
        let handle = self.get_handle(&path)?.ok_or_else(|| self.not_found(&path))?;
        let value = handle.try_value()?.ok_or_else(|| self.not_found(&path))?;
        value.downcast::<T>().ok_or_else(|| AssetError::TypeMismatch {
            path: path.into_owned(),
            expected: T::type_name(),
            actual: value.type_name(),
        })
    }

    /// Loads the asset at `path` as `T`, returning `None` on any failure.
    pub fn try_load<T: Asset>(&self, path: &str) -> Option<Arc<T>> {
        match self.load::<T>(path) {
            Ok(asset) => Some(asset),
            Err(AssetError::NotFound { .. }) => None,
            Err(e) => {
                tracing::debug!("try_load of '{}' failed: {}", path, e);
                None
            }
        }
    }

    /// Loads the asset at `path` as `T`, falling back to `T::default()`.
    pub fn load_or_default<T: Asset + Default>(&self, path: &str) -> Arc<T> {
        self.try_load(path).unwrap_or_default()
    }

    /// Invalidates the cached handle for `path`, if there is one.
    ///
    /// The handle's value is dropped, its version bumped and its listeners run
    /// before this returns. Returns whether a handle was cached.
    pub fn refresh_asset(&self, path: &str) -> AssetResult<bool> {
        if self.is_disposed() {
            return Ok(false);
        }
        let path = normalize_path(path);
        // Listeners may load assets, so the cache must not stay locked.
        let handle = self.shared.cache.lock().get(&path).cloned();
        let Some(handle) = handle else {
            return Ok(false);
        };
        handle.trigger_reload()?;
        Ok(true)
    }

    /// Returns the cache's own key for `path` if a handle exists for it.
    pub(crate) fn find_cached_key(&self, path: &str) -> Option<Arc<str>> {
        self.shared.cache.lock().find_key(path).cloned()
    }

    /// Queues a refresh of the cached path `key` on the dispatch queue.
    ///
    /// Requests for a path that already has a refresh queued are merged.
    pub(crate) fn schedule_refresh(&self, key: Arc<str>) {
        if !self.shared.pending_refresh.lock().insert(Arc::clone(&key)) {
            return;
        }
        tracing::trace!("Queueing refresh of '{}' in {}", key, self.shared.name);
        let manager = self.downgrade();
        dispatch::enqueue_fallible(move || -> AssetResult<()> {
            let Some(manager) = manager.upgrade() else {
                return Ok(());
            };
            manager.shared.pending_refresh.lock().remove(&key);
            manager.refresh_asset(&key).map(|_| ())
        });
    }

    /// Queues a refresh of `path` if it is cached. Returns whether one was queued.
    pub(crate) fn schedule_refresh_path(&self, path: &str) -> bool {
        match self.find_cached_key(path) {
            Some(key) => {
                self.schedule_refresh(key);
                true
            }
            None => false,
        }
    }

    /// Paths with a cached handle.
    pub fn cached_paths(&self) -> Vec<Arc<str>> {
        self.shared.cache.lock().keys().cloned().collect()
    }

    /// Shuts the manager down.
    ///
    /// Later loads fail with [`AssetError::Disposed`]. The manager is removed
    /// from the registry, its cache is dropped and its backend disposed.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        registry::unregister(self);
        self.shared.cache.lock().clear();
        self.shared.pending_refresh.lock().clear();
        self.shared.backend.dispose();
        tracing::debug!("Disposed asset manager {}", self.shared.name);
    }
}

impl std::fmt::Debug for AssetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetManager")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("prefix", &self.prefix())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
