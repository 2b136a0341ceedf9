//! Process-wide routing of prefixed asset paths.
//!
//! Managers are registered under short prefixes. A query path of the form
//! `prefix:/relative/path` is sent to the manager registered as `prefix`;
//! a path without a prefix (`relative/path` or `/relative/path`) goes to the
//! manager registered under the empty prefix.
//!
//! ```no_run
//! use relic_assets::{FileSystemAssetManager, Sprite, registry};
//!
//! let mods = FileSystemAssetManager::new("mods/example");
//! registry::register("example", &mods).unwrap();
//! let hero = registry::load::<Sprite>("example:/sprites/hero").unwrap();
//! ```

use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use relic_core::alloc::HashMap;

use crate::asset::Asset;
use crate::error::{AssetError, AssetResult};
use crate::handle::AssetHandle;
use crate::manager::AssetManager;

static MANAGERS: LazyLock<RwLock<HashMap<String, AssetManager>>> = LazyLock::new(|| RwLock::new(HashMap::default()));

/// Separates the prefix from the relative path in a query.
pub const PREFIX_SEPARATOR: &str = ":/";

/// Splits a query into its prefix and relative path.
///
/// `"mod:/a/b"` gives `("mod", "a/b")`; `"/a/b"` and `"a/b"` give `("", "a/b")`.
pub fn split_path(query: &str) -> (&str, &str) {
    match query.split_once(PREFIX_SEPARATOR) {
        Some((prefix, relative)) => (prefix, relative),
        None => ("", query.strip_prefix('/').unwrap_or(query)),
    }
}

/// Registers `manager` under `prefix`.
///
/// Fails if another manager already uses `prefix`, or if `manager` is
/// already registered.
pub fn register(prefix: &str, manager: &AssetManager) -> AssetResult<()> {
    if manager.is_disposed() {
        return Err(AssetError::Disposed {
            manager: manager.display_name().to_owned(),
        });
    }
    let mut managers = MANAGERS.write();
    if managers.contains_key(prefix) {
        return Err(AssetError::PrefixInUse {
            prefix: prefix.to_owned(),
        });
    }
    let mut slot = manager.prefix_slot().lock();
    if let Some(existing) = slot.as_ref() {
        return Err(AssetError::AlreadyRegistered {
            prefix: existing.clone(),
        });
    }
    *slot = Some(prefix.to_owned());
    managers.insert(prefix.to_owned(), manager.clone());
    tracing::debug!("Registered {} under prefix \"{}\"", manager.display_name(), prefix);
    Ok(())
}

/// Removes `manager` from the registry. Returns `false` if it was not registered.
pub fn unregister(manager: &AssetManager) -> bool {
    let mut managers = MANAGERS.write();
    let Some(prefix) = manager.prefix_slot().lock().take() else {
        return false;
    };
    match managers.get(&prefix) {
        Some(registered) if registered.ptr_eq(manager) => {
            managers.remove(&prefix);
            tracing::debug!("Unregistered {} from prefix \"{}\"", manager.display_name(), prefix);
            true
        }
        _ => false,
    }
}

/// The manager registered under `prefix`.
pub fn manager(prefix: &str) -> Option<AssetManager> {
    MANAGERS.read().get(prefix).cloned()
}

/// Prefixes currently in use.
pub fn prefixes() -> Vec<String> {
    MANAGERS.read().keys().cloned().collect()
}

fn route(query: &str) -> AssetResult<(AssetManager, &str)> {
    let (prefix, relative) = split_path(query);
    let manager = manager(prefix).ok_or_else(|| AssetError::UnknownPrefix {
        prefix: prefix.to_owned(),
    })?;
    Ok((manager, relative))
}

/// Loads the asset at `query` as `T`. See [`AssetManager::load`].
pub fn load<T: Asset>(query: &str) -> AssetResult<Arc<T>> {
    let (manager, relative) = route(query)?;
    manager.load::<T>(relative)
}

/// Loads the asset at `query` as `T`, returning `None` on any failure.
pub fn try_load<T: Asset>(query: &str) -> Option<Arc<T>> {
    match route(query) {
        Ok((manager, relative)) => manager.try_load(relative),
        Err(e) => {
            tracing::debug!("try_load of '{}' failed: {}", query, e);
            None
        }
    }
}

/// Loads the asset at `query` as `T`, falling back to `T::default()`.
pub fn load_or_default<T: Asset + Default>(query: &str) -> Arc<T> {
    try_load(query).unwrap_or_default()
}

/// Returns the handle for `query`. See [`AssetManager::get_handle`].
pub fn get_handle(query: &str) -> AssetResult<Option<Arc<AssetHandle>>> {
    let (manager, relative) = route(query)?;
    manager.get_handle(relative)
}

/// Invalidates the cached handle for `query`. See [`AssetManager::refresh_asset`].
pub fn refresh(query: &str) -> AssetResult<bool> {
    let (manager, relative) = route(query)?;
    manager.refresh_asset(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedded::EmbeddedAssetManager;

    fn embedded(text: &str) -> EmbeddedAssetManager {
        let manager = EmbeddedAssetManager::new("Registry test");
        manager.insert("greeting.txt", text.as_bytes());
        manager
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("mod:/sprites/hero"), ("mod", "sprites/hero"));
        assert_eq!(split_path("/sprites/hero"), ("", "sprites/hero"));
        assert_eq!(split_path("sprites/hero"), ("", "sprites/hero"));
        assert_eq!(split_path(":/hero"), ("", "hero"));
        assert_eq!(split_path("a:b"), ("", "a:b"));
    }

    #[test]
    fn test_register_and_route() {
        let first = embedded("first");
        let second = embedded("second");
        register("registry-route-a", &first).unwrap();
        register("registry-route-b", &second).unwrap();
        assert_eq!(first.prefix().as_deref(), Some("registry-route-a"));

        assert_eq!(*load::<String>("registry-route-a:/greeting").unwrap(), "first");
        assert_eq!(*load::<String>("registry-route-b:/greeting").unwrap(), "second");
        assert!(get_handle("registry-route-a:/greeting").unwrap().is_some());
        assert!(refresh("registry-route-a:/greeting").unwrap());

        assert!(unregister(&first));
        assert!(unregister(&second));
        assert!(!unregister(&first));
        assert_eq!(first.prefix(), None);
    }

    #[test]
    fn test_register_conflicts() {
        let first = embedded("first");
        let second = embedded("second");
        register("registry-conflict", &first).unwrap();

        assert!(matches!(
            register("registry-conflict", &second),
            Err(AssetError::PrefixInUse { .. })
        ));
        assert!(matches!(
            register("registry-conflict-other", &first),
            Err(AssetError::AlreadyRegistered { ref prefix }) if prefix == "registry-conflict"
        ));
        assert!(manager("registry-conflict-other").is_none());

        first.dispose();
        assert!(manager("registry-conflict").is_none());
        register("registry-conflict", &second).unwrap();
        assert!(matches!(
            register("registry-conflict-again", &first),
            Err(AssetError::Disposed { .. })
        ));
        unregister(&second);
    }

    #[test]
    fn test_unknown_prefix() {
        assert!(matches!(
            load::<String>("registry-missing:/greeting"),
            Err(AssetError::UnknownPrefix { ref prefix }) if prefix == "registry-missing"
        ));
        assert!(try_load::<String>("registry-missing:/greeting").is_none());
        assert!(load_or_default::<String>("registry-missing:/greeting").is_empty());
    }
}
