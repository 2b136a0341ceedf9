//! Assets held in memory, such as resources compiled into the binary.

use std::io;
use std::ops::Deref;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use relic_core::alloc::StrKeyedMap;

use crate::error::AssetResult;
use crate::external::{ExternalAssetInfo, ExternalAssetSource, ExternalBackend};
use crate::format::AssetFormat;
use crate::manager::{AssetManager, WeakAssetManager, normalize_path, split_extension};
use crate::metadata::is_metadata_extension;

#[derive(Clone)]
struct EmbeddedAsset {
    format: AssetFormat,
    data: Arc<[u8]>,
}

#[derive(Default)]
struct EmbeddedStore {
    assets: StrKeyedMap<EmbeddedAsset>,
    metadata: StrKeyedMap<Arc<[u8]>>,
}

struct EmbeddedInfo {
    asset: EmbeddedAsset,
    metadata: Option<Arc<[u8]>>,
}

impl ExternalAssetInfo for EmbeddedInfo {
    fn format(&self) -> AssetFormat {
        self.asset.format
    }

    fn read_asset(&self) -> io::Result<Vec<u8>> {
        Ok(self.asset.data.to_vec())
    }

    fn read_metadata(&self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.metadata.as_deref().map(<[u8]>::to_vec))
    }
}

struct EmbeddedSource {
    name: String,
    store: RwLock<EmbeddedStore>,
    manager: OnceLock<WeakAssetManager>,
}

impl ExternalAssetSource for EmbeddedSource {
    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn attach(&self, manager: WeakAssetManager) {
        let _ = self.manager.set(manager);
    }

    fn asset_info(&self, path: &str) -> AssetResult<Option<Box<dyn ExternalAssetInfo + '_>>> {
        let store = self.store.read();
        let Some(asset) = store.assets.get(path) else {
            return Ok(None);
        };
        Ok(Some(Box::new(EmbeddedInfo {
            asset: asset.clone(),
            metadata: store.metadata.get(path).cloned(),
        })))
    }

    fn dispose(&self) {
        let mut store = self.store.write();
        store.assets.clear();
        store.metadata.clear();
    }
}

/// An [`AssetManager`] over named byte blobs.
///
/// Blobs are added under file names (`ui/button.png`, `ui/button.meta`) and
/// loaded by declared name (`ui/button`), exactly like files on disk.
pub struct EmbeddedAssetManager {
    manager: AssetManager,
    source: Arc<EmbeddedSource>,
}

impl EmbeddedAssetManager {
    pub fn new(name: impl Into<String>) -> Self {
        let source = Arc::new(EmbeddedSource {
            name: name.into(),
            store: RwLock::new(EmbeddedStore::default()),
            manager: OnceLock::new(),
        });
        let manager = AssetManager::new(ExternalBackend::new(Arc::clone(&source)));
        Self { manager, source }
    }

    /// Stores `data` under `file_name`, replacing any previous blob.
    ///
    /// A cached asset of the same declared name is queued for reload. Returns
    /// the declared name.
    pub fn insert(&self, file_name: &str, data: impl Into<Arc<[u8]>>) -> String {
        let file_name = normalize_path(file_name);
        let (declared, extension) = split_extension(&file_name);
        {
            let mut store = self.source.store.write();
            match extension {
                Some(extension) if is_metadata_extension(extension) => {
                    store.metadata.insert(declared, data.into());
                }
                _ => {
                    let asset = EmbeddedAsset {
                        format: AssetFormat::from_extension(extension.unwrap_or_default()),
                        data: data.into(),
                    };
                    store.assets.insert(declared, asset);
                }
            }
        }
        self.manager.schedule_refresh_path(declared);
        declared.to_owned()
    }

    /// Removes the blob stored under `file_name`. Returns whether it existed.
    pub fn remove(&self, file_name: &str) -> bool {
        let file_name = normalize_path(file_name);
        let (declared, extension) = split_extension(&file_name);
        let removed = {
            let mut store = self.source.store.write();
            match extension {
                Some(extension) if is_metadata_extension(extension) => store.metadata.remove(declared).is_some(),
                // Extension-less names address the asset directly.
                _ => store.assets.remove(declared).is_some(),
            }
        };
        if removed {
            self.manager.schedule_refresh_path(declared);
        }
        removed
    }

    /// Whether an asset is stored under the declared name `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.source.store.read().assets.contains_key(&normalize_path(path))
    }

    /// Number of stored assets, not counting metadata.
    pub fn len(&self) -> usize {
        self.source.store.read().assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn manager(&self) -> &AssetManager {
        &self.manager
    }
}

impl Deref for EmbeddedAssetManager {
    type Target = AssetManager;

    fn deref(&self) -> &AssetManager {
        &self.manager
    }
}

impl From<EmbeddedAssetManager> for AssetManager {
    fn from(value: EmbeddedAssetManager) -> Self {
        value.manager
    }
}
