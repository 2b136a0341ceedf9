//! Assets packed into a single zip archive.
//!
//! The archive is read into memory on first use and indexed by declared name:
//! the entry's path without its extension, relative to an optional prefix
//! directory. `name.meta` entries are metadata for the `name.*` asset next to
//! them and are never assets themselves.
//!
//! When the archive file changes the index is rebuilt and compared with the
//! previous one by CRC-32. Only assets whose entries were added, removed or
//! changed are invalidated, so resaving an archive with one edited asset
//! reloads just that asset.

use std::fs;
use std::io::{self, Cursor, Read};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, RwLock};
use relic_core::alloc::StrKeyedMap;
use relic_core::profiling::profile_function;
use zip::ZipArchive;

use crate::error::{AssetError, AssetResult};
use crate::external::{ExternalAssetInfo, ExternalAssetSource, ExternalBackend};
use crate::format::AssetFormat;
use crate::manager::{AssetManager, WeakAssetManager, split_extension};
use crate::metadata::{METADATA_EXTENSION, is_metadata_extension};

type Archive = ZipArchive<Cursor<Arc<[u8]>>>;

/// Settings for a [`ZipArchiveAssetManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipArchiveOptions {
    /// Watch the archive file and reload changed assets.
    ///
    /// Has no effect without the `hot-reload` feature.
    pub observe_changes: bool,
    /// Only entries under this directory are assets, named relative to it.
    pub prefix_directory: Option<String>,
}

impl Default for ZipArchiveOptions {
    fn default() -> Self {
        Self {
            observe_changes: true,
            prefix_directory: None,
        }
    }
}

impl ZipArchiveOptions {
    pub fn observe_changes(mut self, observe_changes: bool) -> Self {
        self.observe_changes = observe_changes;
        self
    }

    pub fn prefix_directory(mut self, prefix: impl Into<String>) -> Self {
        self.prefix_directory = Some(prefix.into());
        self
    }
}

/// Strips a leading `/` and ensures a trailing one. Empty prefixes become `None`.
fn normalize_prefix(prefix: Option<String>) -> Option<String> {
    let prefix = prefix?.replace('\\', "/");
    let prefix = prefix.trim_start_matches('/');
    if prefix.is_empty() {
        return None;
    }
    Some(if prefix.ends_with('/') {
        prefix.to_owned()
    } else {
        format!("{prefix}/")
    })
}

/// One asset in the archive index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ArchiveEntry {
    format: AssetFormat,
    asset: usize,
    crc32: u32,
    metadata: Option<usize>,
    metadata_crc32: Option<u32>,
}

impl ArchiveEntry {
    /// Entry indices shift whenever the archive is rewritten, so only the
    /// checksums and format are compared.
    fn same_content(&self, other: &ArchiveEntry) -> bool {
        self.format == other.format && self.crc32 == other.crc32 && self.metadata_crc32 == other.metadata_crc32
    }
}

struct ArchiveState {
    /// `None` when the archive file does not exist.
    archive: Option<Archive>,
    lookup: StrKeyedMap<ArchiveEntry>,
}

impl ArchiveState {
    fn empty() -> Self {
        Self {
            archive: None,
            lookup: StrKeyedMap::new(),
        }
    }

    /// Declared names that were added, removed or changed between `self` and `newer`.
    fn changed_names(&self, newer: &ArchiveState) -> Vec<Arc<str>> {
        let mut changed: Vec<Arc<str>> = self
            .lookup
            .iter()
            .filter(|(name, entry)| !newer.lookup.get(name).is_some_and(|new| new.same_content(entry)))
            .map(|(name, _)| Arc::clone(name))
            .collect();
        changed.extend(
            newer
                .lookup
                .keys()
                .filter(|name| !self.lookup.contains_key(name))
                .cloned(),
        );
        changed
    }
}

fn build_lookup(archive: &mut Archive, prefix: Option<&str>) -> zip::result::ZipResult<StrKeyedMap<ArchiveEntry>> {
    profile_function!();
    let mut files = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let file = archive.by_index(index)?;
        files.push((file.name().to_owned(), file.crc32(), file.is_dir()));
    }

    let mut lookup = StrKeyedMap::with_capacity(files.len());
    for (index, (name, crc32, is_dir)) in files.iter().enumerate() {
        if *is_dir {
            continue;
        }
        let relative = match prefix {
            Some(prefix) => match name.strip_prefix(prefix) {
                Some(relative) => relative,
                None => continue,
            },
            None => name.as_str(),
        };
        let (declared, extension) = split_extension(relative);
        if declared.is_empty() || extension.is_some_and(is_metadata_extension) {
            continue;
        }

        let metadata_name = format!("{}.{}", split_extension(name).0, METADATA_EXTENSION);
        let metadata = archive.index_for_name(&metadata_name);
        let entry = ArchiveEntry {
            format: AssetFormat::from_extension(extension.unwrap_or_default()),
            asset: index,
            crc32: *crc32,
            metadata,
            metadata_crc32: metadata.and_then(|m| files.get(m)).map(|(_, crc32, _)| *crc32),
        };
        if !lookup.try_add(declared, entry) {
            tracing::warn!("Archive entry '{}' duplicates asset '{}'; keeping the first", name, declared);
        }
    }
    Ok(lookup)
}

fn read_entry(archive: &Archive, index: usize) -> io::Result<Vec<u8>> {
    let mut archive = archive.clone();
    let mut file = archive.by_index(index).map_err(io::Error::other)?;
    let mut data = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut data)?;
    Ok(data)
}

struct ZipEntryInfo {
    archive: Archive,
    entry: ArchiveEntry,
}

impl ExternalAssetInfo for ZipEntryInfo {
    fn format(&self) -> AssetFormat {
        self.entry.format
    }

    fn read_asset(&self) -> io::Result<Vec<u8>> {
        read_entry(&self.archive, self.entry.asset)
    }

    fn read_metadata(&self) -> io::Result<Option<Vec<u8>>> {
        self.entry.metadata.map(|index| read_entry(&self.archive, index)).transpose()
    }
}

#[cfg(feature = "hot-reload")]
enum WatchState {
    Idle,
    Watching(notify::RecommendedWatcher),
    Failed,
    Stopped,
}

#[cfg_attr(not(feature = "hot-reload"), allow(dead_code))]
struct ZipArchiveSource {
    path: PathBuf,
    name: String,
    observe_changes: bool,
    prefix_directory: RwLock<Option<String>>,
    /// `None` until the archive is first opened.
    state: RwLock<Option<ArchiveState>>,
    manager: OnceLock<WeakAssetManager>,
    this: Weak<ZipArchiveSource>,
    #[cfg(feature = "hot-reload")]
    watch: Mutex<WatchState>,
    /// Serializes rebuilds so diffs are always taken against the latest table.
    refresh_lock: Mutex<()>,
}

impl ZipArchiveSource {
    fn load_state(&self) -> AssetResult<ArchiveState> {
        profile_function!();
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("Archive {} does not exist; serving no assets", self.path.display());
                return Ok(ArchiveState::empty());
            }
            Err(source) => {
                return Err(AssetError::Io {
                    path: self.path.display().to_string(),
                    source,
                });
            }
        };

        let archive_error = |source| AssetError::Archive {
            archive: self.name.clone(),
            source,
        };
        let mut archive = ZipArchive::new(Cursor::new(Arc::<[u8]>::from(bytes))).map_err(archive_error)?;
        let prefix = self.prefix_directory.read().clone();
        let lookup = build_lookup(&mut archive, prefix.as_deref()).map_err(archive_error)?;
        tracing::debug!("Indexed {} assets in {}", lookup.len(), self.name);
        Ok(ArchiveState {
            archive: Some(archive),
            lookup,
        })
    }

    /// Runs `f` on the archive state, opening the archive first if needed.
    ///
    /// An archive that cannot be read serves no assets until a later rebuild
    /// succeeds.
    fn with_state<R>(&self, f: impl FnOnce(&ArchiveState) -> R) -> R {
        if let Some(state) = self.state.read().as_ref() {
            return f(state);
        }

        let mut guard = self.state.write();
        let state = match guard.take() {
            Some(state) => state,
            None => {
                let state = self.load_state().unwrap_or_else(|e| {
                    tracing::warn!("Serving no assets from {}: {}", self.name, e);
                    ArchiveState::empty()
                });
                self.ensure_watching();
                state
            }
        };
        f(guard.insert(state))
    }

    fn refresh(&self) -> AssetResult<usize> {
        profile_function!();
        let _refreshing = self.refresh_lock.lock();
        if self.state.read().is_none() {
            return Ok(0);
        }

        let newer = self.load_state()?;
        let changed = {
            let mut guard = self.state.write();
            // Disposed while the archive was being read.
            let Some(older) = guard.as_ref() else {
                return Ok(0);
            };
            let changed = older.changed_names(&newer);
            *guard = Some(newer);
            changed
        };

        // The cache lock is taken below, so the state lock must be released by now.
        let Some(manager) = self.manager.get().and_then(WeakAssetManager::upgrade) else {
            return Ok(0);
        };
        let queued = changed
            .iter()
            .filter(|name| manager.schedule_refresh_path(name))
            .count();
        tracing::debug!(
            "Rebuilt index of {}: {} assets changed, {} cached assets queued for reload",
            self.name,
            changed.len(),
            queued
        );
        Ok(queued)
    }

    #[cfg(feature = "hot-reload")]
    fn is_watching(&self) -> bool {
        matches!(*self.watch.lock(), WatchState::Watching(_))
    }

    #[cfg(not(feature = "hot-reload"))]
    fn is_watching(&self) -> bool {
        false
    }

    #[cfg(feature = "hot-reload")]
    fn ensure_watching(&self) {
        if !self.observe_changes {
            return;
        }
        let mut watch = self.watch.lock();
        if !matches!(*watch, WatchState::Idle) {
            return;
        }
        *watch = match watch_archive(&self.path, self.this.clone()) {
            Ok(watcher) => {
                tracing::debug!("Watching archive for changes: {}", self.path.display());
                WatchState::Watching(watcher)
            }
            Err(e) => {
                tracing::error!("Failed to watch {}: {}", self.path.display(), e);
                WatchState::Failed
            }
        };
    }

    #[cfg(not(feature = "hot-reload"))]
    fn ensure_watching(&self) {}
}

impl ExternalAssetSource for ZipArchiveSource {
    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn attach(&self, manager: WeakAssetManager) {
        let _ = self.manager.set(manager);
    }

    fn asset_info(&self, path: &str) -> AssetResult<Option<Box<dyn ExternalAssetInfo + '_>>> {
        let info = self.with_state(|state| {
            let entry = *state.lookup.get(path)?;
            let archive = state.archive.clone()?;
            Some(ZipEntryInfo { archive, entry })
        });
        let Some(info) = info else {
            return Ok(None);
        };
        Ok(Some(Box::new(info)))
    }

    fn dispose(&self) {
        #[cfg(feature = "hot-reload")]
        {
            *self.watch.lock() = WatchState::Stopped;
        }
        *self.state.write() = None;
    }
}

/// Watches the archive's parent directory, since editors often replace the
/// file instead of writing to it.
#[cfg(feature = "hot-reload")]
fn watch_archive(path: &Path, source: Weak<ZipArchiveSource>) -> Result<notify::RecommendedWatcher, notify::Error> {
    use notify::{Event, EventKind, RecursiveMode, Watcher};
    use relic_core::profiling::profile_scope;

    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path.file_name().map(|name| name.to_os_string());
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                tracing::error!("File watcher error: {}", e);
                return;
            }
        };
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
        ) {
            return;
        }
        if !event.paths.iter().any(|p| p.file_name() == file_name.as_deref()) {
            return;
        }
        let Some(source) = source.upgrade() else {
            return;
        };
        profile_scope!("archive_changed");
        if let Err(e) = source.refresh() {
            tracing::warn!("Keeping previous index of {}: {}", source.name, e);
        }
    })?;
    watcher.watch(&directory, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// An [`AssetManager`] over a zip archive.
///
/// Dereferences to the underlying [`AssetManager`].
pub struct ZipArchiveAssetManager {
    manager: AssetManager,
    source: Arc<ZipArchiveSource>,
}

impl ZipArchiveAssetManager {
    /// Creates a manager over the archive at `path` with the default options.
    ///
    /// The archive is not opened until the first asset is requested. A missing
    /// or unreadable archive serves no assets.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_options(path, ZipArchiveOptions::default())
    }

    pub fn with_options(path: impl Into<PathBuf>, options: ZipArchiveOptions) -> Self {
        let path = path.into();
        let path = std::path::absolute(&path).unwrap_or(path);
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned());
        let source = Arc::new_cyclic(|this| ZipArchiveSource {
            path,
            name,
            observe_changes: options.observe_changes,
            prefix_directory: RwLock::new(normalize_prefix(options.prefix_directory)),
            state: RwLock::new(None),
            manager: OnceLock::new(),
            this: this.clone(),
            #[cfg(feature = "hot-reload")]
            watch: Mutex::new(WatchState::Idle),
            refresh_lock: Mutex::new(()),
        });
        let manager = AssetManager::new(ExternalBackend::new(Arc::clone(&source)));
        Self { manager, source }
    }

    /// The absolute path of the archive file.
    pub fn archive_path(&self) -> &Path {
        &self.source.path
    }

    /// Directory inside the archive that holds the assets, always ending in `/`.
    pub fn prefix_directory(&self) -> Option<String> {
        self.source.prefix_directory.read().clone()
    }

    /// Changes the directory inside the archive that holds the assets.
    ///
    /// If the archive is open its index is rebuilt and the cached assets whose
    /// entries differ under the new prefix are queued for reload.
    pub fn set_prefix_directory(&self, prefix: Option<&str>) -> AssetResult<()> {
        let prefix = normalize_prefix(prefix.map(str::to_owned));
        {
            let mut current = self.source.prefix_directory.write();
            if *current == prefix {
                return Ok(());
            }
            *current = prefix;
        }
        self.source.refresh().map(|_| ())
    }

    /// Re-reads the archive and queues a reload of every cached asset whose
    /// entry was added, removed or changed since the last read.
    ///
    /// Returns the number of reloads queued. If the archive cannot be parsed
    /// the previous index stays in use and the error is returned.
    pub fn refresh_archive(&self) -> AssetResult<usize> {
        self.source.refresh()
    }

    /// Number of assets in the archive index, opening the archive if needed.
    pub fn asset_count(&self) -> usize {
        self.source.with_state(|state| state.lookup.len())
    }

    /// Whether an archive watcher is currently installed.
    pub fn is_watching(&self) -> bool {
        self.source.is_watching()
    }

    pub fn manager(&self) -> &AssetManager {
        &self.manager
    }
}

impl Deref for ZipArchiveAssetManager {
    type Target = AssetManager;

    fn deref(&self) -> &AssetManager {
        &self.manager
    }
}

impl From<ZipArchiveAssetManager> for AssetManager {
    fn from(value: ZipArchiveAssetManager) -> Self {
        value.manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Sprite;
    use crate::test_support;

    fn unwatched(path: &Path) -> ZipArchiveAssetManager {
        ZipArchiveAssetManager::with_options(path, ZipArchiveOptions::default().observe_changes(false))
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix(None), None);
        assert_eq!(normalize_prefix(Some("".into())), None);
        assert_eq!(normalize_prefix(Some("/".into())), None);
        assert_eq!(normalize_prefix(Some("/content".into())).as_deref(), Some("content/"));
        assert_eq!(normalize_prefix(Some("content/".into())).as_deref(), Some("content/"));
        assert_eq!(normalize_prefix(Some("a\\b".into())).as_deref(), Some("a/b/"));
    }

    #[test]
    fn test_lookup_groups_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assets.zip");
        let png = test_support::png(8, 8);
        fs::write(
            &path,
            test_support::zip_bytes(&[
                ("sprites/hero.png", &png),
                ("sprites/hero.meta", br#"{ "ppu": 8 }"#),
                ("sprites/", b""),
                ("notes.txt", b"hello"),
            ]),
        )
        .unwrap();
        let manager = unwatched(&path);

        assert_eq!(manager.asset_count(), 2);
        assert_eq!(manager.display_name(), "assets.zip");
        let sprite = manager.load::<Sprite>("sprites/hero").unwrap();
        assert_eq!(sprite.pixels_per_unit, 8.0);
        assert_eq!(*manager.load::<String>("notes").unwrap(), "hello");
        assert!(manager.load::<String>("sprites/hero.meta").unwrap_err().is_not_found());
    }

    #[test]
    fn test_first_entry_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assets.zip");
        fs::write(&path, test_support::zip_bytes(&[("data.txt", b"first"), ("data.bin", b"second")])).unwrap();
        let manager = unwatched(&path);
        assert_eq!(manager.asset_count(), 1);
        assert_eq!(*manager.load::<String>("data").unwrap(), "first");
    }

    #[test]
    fn test_prefix_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mod.zip");
        fs::write(
            &path,
            test_support::zip_bytes(&[("content/readme.txt", b"inner"), ("readme.txt", b"outer")]),
        )
        .unwrap();
        let manager = ZipArchiveAssetManager::with_options(
            &path,
            ZipArchiveOptions::default().observe_changes(false).prefix_directory("/content"),
        );
        assert_eq!(manager.prefix_directory().as_deref(), Some("content/"));
        assert_eq!(*manager.load::<String>("readme").unwrap(), "inner");

        manager.set_prefix_directory(None).unwrap();
        assert_eq!(manager.asset_count(), 2);
        assert_eq!(*manager.load::<String>("content/readme").unwrap(), "inner");
    }

    #[test]
    fn test_missing_archive_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manager = unwatched(&dir.path().join("absent.zip"));
        assert_eq!(manager.asset_count(), 0);
        assert!(manager.get_handle("anything").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_archive_serves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.zip");
        fs::write(&path, b"this is not a zip file").unwrap();
        let manager = unwatched(&path);
        assert!(manager.get_handle("x").unwrap().is_none());
        assert!(manager.load::<String>("x").unwrap_err().is_not_found());
        assert_eq!(manager.asset_count(), 0);
        assert!(manager.source.state.read().is_some());

        fs::write(&path, test_support::zip_bytes(&[("x.txt", b"fixed")])).unwrap();
        assert_eq!(manager.refresh_archive().unwrap(), 0);
        assert_eq!(*manager.load::<String>("x").unwrap(), "fixed");
    }

    #[test]
    fn test_refresh_after_dispose_stays_closed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assets.zip");
        fs::write(&path, test_support::zip_bytes(&[("a.txt", b"A")])).unwrap();
        let manager = unwatched(&path);
        assert_eq!(manager.asset_count(), 1);

        manager.dispose();
        assert_eq!(manager.refresh_archive().unwrap(), 0);
        assert!(manager.source.state.read().is_none());
    }

    #[test]
    fn test_changed_names_diff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assets.zip");
        fs::write(
            &path,
            test_support::zip_bytes(&[("a.txt", b"A"), ("b.txt", b"B"), ("c.txt", b"C"), ("d.txt", b"D")]),
        )
        .unwrap();
        let manager = unwatched(&path);
        let older = manager.source.load_state().unwrap();

        fs::write(
            &path,
            test_support::zip_bytes(&[("c.txt", b"C"), ("a.txt", b"A"), ("b.txt", b"B2"), ("e.txt", b"E")]),
        )
        .unwrap();
        let newer = manager.source.load_state().unwrap();

        let mut changed: Vec<String> = older.changed_names(&newer).iter().map(|n| n.to_string()).collect();
        changed.sort();
        assert_eq!(changed, ["b", "d", "e"]);
    }

    #[test]
    fn test_refresh_before_open_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assets.zip");
        fs::write(&path, test_support::zip_bytes(&[("a.txt", b"A")])).unwrap();
        let manager = unwatched(&path);
        assert_eq!(manager.refresh_archive().unwrap(), 0);
    }

    #[test]
    fn test_corrupt_rebuild_keeps_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assets.zip");
        fs::write(&path, test_support::zip_bytes(&[("a.txt", b"A")])).unwrap();
        let manager = unwatched(&path);
        assert_eq!(*manager.load::<String>("a").unwrap(), "A");

        fs::write(&path, b"half-written").unwrap();
        assert!(manager.refresh_archive().is_err());
        assert_eq!(manager.asset_count(), 1);
    }
}
