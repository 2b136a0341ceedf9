//! Relic Assets - asset caching with hot reload
//!
//! This crate loads assets from directories, zip archives and memory, caches
//! them per path and keeps them current while the files change:
//! - [`AssetManager`] caches one [`AssetHandle`] per path over a backing store
//! - [`FileSystemAssetManager`], [`ZipArchiveAssetManager`] and
//!   [`EmbeddedAssetManager`] are the stores
//! - [`registry`] routes `prefix:/path` queries to registered managers
//! - watcher threads queue reloads on the [`relic_core::dispatch`] queue; the
//!   thread owning the [`MainThreadRunner`](relic_core::dispatch::MainThreadRunner)
//!   applies them and runs the handles' listeners
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relic_assets::{FileSystemAssetManager, Sprite, registry};
//! use relic_core::dispatch::MainThreadRunner;
//!
//! let mut runner = MainThreadRunner::new();
//! runner.enable();
//!
//! let assets = FileSystemAssetManager::new("assets");
//! registry::register("", &assets).unwrap();
//!
//! let hero = registry::load::<Sprite>("sprites/hero").unwrap();
//! let handle = registry::get_handle("sprites/hero").unwrap().unwrap();
//! handle.add_listener(std::sync::Arc::new(|h: &relic_assets::AssetHandle| {
//!     println!("{} reloaded (version {})", h.path(), h.version());
//! }));
//!
//! loop {
//!     // Applies file changes seen since the last frame.
//!     runner.run_pending().unwrap();
//!     # break;
//! }
//! # let _ = hero;
//! ```
//!
//! ## Asset types
//!
//! | Format | Loads as |
//! |--------|----------|
//! | png, jpg, jpeg | [`Sprite`] (and [`Texture`] through the sprite) |
//! | mp3, ogg, wav | [`AudioClip`] |
//! | txt, csv, json, yaml, xml | `String` |
//! | bin, bytes | `Vec<u8>` |
//!
//! ## Features
//!
//! - `hot-reload` (default): watch directories and archives with `notify`

pub mod asset;
pub mod embedded;
pub mod error;
pub mod external;
pub mod filesystem;
pub mod format;
pub mod handle;
pub mod manager;
pub mod metadata;
pub mod registry;
pub mod zip_archive;

pub use asset::{Asset, AudioClip, DecodeError, FilterMode, LoadedAsset, Rect, Sprite, Texture};
pub use embedded::EmbeddedAssetManager;
pub use error::{AssetError, AssetResult};
pub use external::{ExternalAssetInfo, ExternalAssetSource, ExternalBackend};
pub use filesystem::{FileSystemAssetManager, FileSystemOptions};
pub use format::{AssetFormat, AssetType};
pub use handle::{AssetHandle, Listener};
pub use manager::{AssetBackend, AssetManager, WeakAssetManager};
pub use metadata::SpriteMetadata;
pub use zip_archive::{ZipArchiveAssetManager, ZipArchiveOptions};
