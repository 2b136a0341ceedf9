//! Assets stored as loose files under a directory.
//!
//! An asset's path names a file without its extension: `sprites/hero` resolves
//! to `sprites/hero.png`, with settings read from `sprites/hero.meta` if that
//! file exists. With the `hot-reload` feature the directory is watched once
//! the first asset has been resolved, and changed files invalidate their
//! cached handles through the dispatch queue.

use std::fs;
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use relic_core::profiling::profile_function;

use crate::error::{AssetError, AssetResult};
use crate::external::{ExternalAssetInfo, ExternalAssetSource, ExternalBackend};
use crate::format::AssetFormat;
use crate::manager::{AssetManager, WeakAssetManager, split_extension};
use crate::metadata::is_metadata_extension;

/// Settings for a [`FileSystemAssetManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSystemOptions {
    /// Watch the directory and reload assets when their files change.
    ///
    /// Has no effect without the `hot-reload` feature.
    pub observe_changes: bool,
}

impl Default for FileSystemOptions {
    fn default() -> Self {
        Self { observe_changes: true }
    }
}

impl FileSystemOptions {
    pub fn observe_changes(mut self, observe_changes: bool) -> Self {
        self.observe_changes = observe_changes;
        self
    }
}

/// An [`AssetManager`] over a directory tree.
///
/// Dereferences to the underlying [`AssetManager`].
pub struct FileSystemAssetManager {
    manager: AssetManager,
    source: Arc<FileSystemSource>,
}

impl FileSystemAssetManager {
    /// Creates a manager over `directory` with the default options.
    ///
    /// The directory does not have to exist yet; until it does every lookup
    /// resolves to nothing.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self::with_options(directory, FileSystemOptions::default())
    }

    pub fn with_options(directory: impl Into<PathBuf>, options: FileSystemOptions) -> Self {
        let directory = directory.into();
        let directory = std::path::absolute(&directory).unwrap_or(directory);
        let source = Arc::new(FileSystemSource {
            directory,
            options,
            manager: OnceLock::new(),
            #[cfg(feature = "hot-reload")]
            watch: parking_lot::Mutex::new(WatchState::Idle),
        });
        let manager = AssetManager::new(ExternalBackend::new(Arc::clone(&source)));
        Self { manager, source }
    }

    /// The absolute path of the backing directory.
    pub fn directory(&self) -> &Path {
        &self.source.directory
    }

    pub fn options(&self) -> FileSystemOptions {
        self.source.options
    }

    /// Whether a directory watcher is currently installed.
    pub fn is_watching(&self) -> bool {
        self.source.is_watching()
    }

    pub fn manager(&self) -> &AssetManager {
        &self.manager
    }
}

impl Deref for FileSystemAssetManager {
    type Target = AssetManager;

    fn deref(&self) -> &AssetManager {
        &self.manager
    }
}

impl From<FileSystemAssetManager> for AssetManager {
    fn from(value: FileSystemAssetManager) -> Self {
        value.manager
    }
}

#[cfg(feature = "hot-reload")]
enum WatchState {
    Idle,
    Watching(notify::RecommendedWatcher),
    /// Creating the watcher failed; the error has been logged.
    Failed,
    Stopped,
}

struct FileSystemSource {
    directory: PathBuf,
    options: FileSystemOptions,
    manager: OnceLock<WeakAssetManager>,
    #[cfg(feature = "hot-reload")]
    watch: parking_lot::Mutex<WatchState>,
}

struct FileInfo {
    format: AssetFormat,
    asset: PathBuf,
    metadata: Option<PathBuf>,
}

impl ExternalAssetInfo for FileInfo {
    fn format(&self) -> AssetFormat {
        self.format
    }

    fn read_asset(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.asset)
    }

    fn read_metadata(&self) -> io::Result<Option<Vec<u8>>> {
        self.metadata.as_ref().map(fs::read).transpose()
    }
}

impl FileSystemSource {
    fn find_files(&self, path: &str) -> AssetResult<Option<FileInfo>> {
        let (directory, name) = match path.rsplit_once('/') {
            Some((directory, name)) => (self.directory.join(directory), name),
            None => (self.directory.clone(), path),
        };
        if name.is_empty() {
            return Ok(None);
        }

        let entries = match fs::read_dir(&directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(AssetError::Io {
                    path: path.to_owned(),
                    source,
                });
            }
        };

        let mut candidates = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| AssetError::Io {
                path: path.to_owned(),
                source,
            })?;
            let Ok(file_name) = entry.file_name().into_string() else {
                continue;
            };
            if split_extension(&file_name).0 != name || !entry.path().is_file() {
                continue;
            }
            candidates.push(file_name);
        }
        // read_dir order is platform-dependent.
        candidates.sort_unstable();

        let mut asset: Option<&str> = None;
        let mut metadata = None;
        for file_name in &candidates {
            match split_extension(file_name).1 {
                Some(extension) if is_metadata_extension(extension) => metadata = Some(directory.join(file_name)),
                _ if asset.is_some() => {
                    tracing::warn!(
                        "Asset '{}' in {} matches both '{}' and '{}'; using the first",
                        path,
                        self.directory.display(),
                        asset.unwrap_or_default(),
                        file_name
                    );
                }
                _ => asset = Some(file_name),
            }
        }

        Ok(asset.map(|file_name| FileInfo {
            format: AssetFormat::from_extension(split_extension(file_name).1.unwrap_or_default()),
            asset: directory.join(file_name),
            metadata,
        }))
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
        if !self.options.observe_changes {
            return;
        }
        let mut watch = self.watch.lock();
        if !matches!(*watch, WatchState::Idle) {
            return;
        }
        let Some(manager) = self.manager.get().cloned() else {
            return;
        };
        *watch = match watch_directory(&self.directory, manager) {
            Ok(watcher) => {
                tracing::debug!("Watching directory for changes: {}", self.directory.display());
                WatchState::Watching(watcher)
            }
            Err(e) => {
                tracing::error!("Failed to watch {}: {}", self.directory.display(), e);
                WatchState::Failed
            }
        };
    }

    #[cfg(not(feature = "hot-reload"))]
    fn ensure_watching(&self) {}
}

impl ExternalAssetSource for FileSystemSource {
    fn display_name(&self) -> String {
        self.directory.display().to_string()
    }

    fn attach(&self, manager: WeakAssetManager) {
        let _ = self.manager.set(manager);
    }

    fn asset_info(&self, path: &str) -> AssetResult<Option<Box<dyn ExternalAssetInfo + '_>>> {
        profile_function!();
        if path.split('/').any(|segment| segment == "..") {
            tracing::warn!("Refusing to resolve '{}' outside of {}", path, self.directory.display());
            return Ok(None);
        }
        let Some(info) = self.find_files(path)? else {
            return Ok(None);
        };
        self.ensure_watching();
        Ok(Some(Box::new(info)))
    }

    fn dispose(&self) {
        #[cfg(feature = "hot-reload")]
        {
            *self.watch.lock() = WatchState::Stopped;
        }
    }
}

/// Turns a changed file into the asset path it belongs to: relative to
/// `root`, without its extension, with `/` separators.
fn changed_asset_path(root: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(root).ok()?;
    let relative = relative.to_str()?.replace('\\', "/");
    let (declared, _) = split_extension(&relative);
    (!declared.is_empty()).then(|| declared.to_owned())
}

#[cfg(feature = "hot-reload")]
fn watch_directory(directory: &Path, manager: WeakAssetManager) -> Result<notify::RecommendedWatcher, notify::Error> {
    use notify::{Event, EventKind, RecursiveMode, Watcher};

    // Events report resolved paths.
    let root = directory.canonicalize()?;
    let watch_root = root.clone();
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
        let Some(manager) = manager.upgrade() else {
            return;
        };
        // A rename reports both the old and the new path.
        for file in &event.paths {
            if let Some(path) = changed_asset_path(&root, file)
                && manager.schedule_refresh_path(&path)
            {
                tracing::debug!("File changed, marking for reload: {}", file.display());
            }
        }
    })?;
    watcher.watch(&watch_root, RecursiveMode::Recursive)?;
    Ok(watcher)
}
