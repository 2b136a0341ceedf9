//! Decoding of byte-stream backed assets.
//!
//! Stores such as directories and archives implement [`ExternalAssetSource`]:
//! they turn a relative path into an [`ExternalAssetInfo`] describing where
//! the bytes and optional metadata live. [`ExternalBackend`] reads those bytes
//! and decodes them according to their [`AssetType`].

use std::io;
use std::sync::Arc;

use relic_core::profiling::profile_function;

use crate::asset::{AudioClip, LoadedAsset, Sprite};
use crate::error::{AssetError, AssetResult};
use crate::format::{AssetFormat, AssetType};
use crate::manager::{AssetBackend, WeakAssetManager};
use crate::metadata::SpriteMetadata;

/// Location and format of one resolved asset.
pub trait ExternalAssetInfo {
    fn format(&self) -> AssetFormat;

    /// Reads the whole asset.
    fn read_asset(&self) -> io::Result<Vec<u8>>;

    /// Reads the companion metadata, or `None` if the asset has none.
    fn read_metadata(&self) -> io::Result<Option<Vec<u8>>>;
}

/// A byte-stream store that can be wrapped in an [`ExternalBackend`].
pub trait ExternalAssetSource: Send + Sync + 'static {
    fn display_name(&self) -> String;

    /// See [`AssetBackend::attach`].
    fn attach(&self, _manager: WeakAssetManager) {}

    /// Resolves a normalized relative path, or returns `Ok(None)` if nothing is stored there.
    fn asset_info(&self, path: &str) -> AssetResult<Option<Box<dyn ExternalAssetInfo + '_>>>;

    fn dispose(&self) {}
}

/// Adapts an [`ExternalAssetSource`] to the [`AssetBackend`] interface.
pub struct ExternalBackend<S> {
    source: Arc<S>,
}

impl<S: ExternalAssetSource> ExternalBackend<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }
}

impl<S: ExternalAssetSource> AssetBackend for ExternalBackend<S> {
    fn display_name(&self) -> String {
        self.source.display_name()
    }

    fn attach(&self, manager: WeakAssetManager) {
        self.source.attach(manager);
    }

    fn load_asset(&self, path: &str) -> AssetResult<Option<LoadedAsset>> {
        let Some(info) = self.source.asset_info(path)? else {
            return Ok(None);
        };
        create_asset(path, info.as_ref()).map(Some)
    }

    fn dispose(&self) {
        self.source.dispose();
    }
}

fn io_error(path: &str, source: io::Error) -> AssetError {
    AssetError::Io {
        path: path.to_owned(),
        source,
    }
}

/// Reads the sprite settings for `path`, using the defaults when there is no metadata.
pub fn read_sprite_metadata(path: &str, info: &dyn ExternalAssetInfo) -> AssetResult<SpriteMetadata> {
    match info.read_metadata().map_err(|e| io_error(path, e))? {
        Some(bytes) => SpriteMetadata::from_json(&bytes).map_err(|source| AssetError::InvalidMetadata {
            path: path.to_owned(),
            source,
        }),
        None => Ok(SpriteMetadata::default()),
    }
}

/// Reads and decodes the asset described by `info`.
///
/// Images become [`Sprite`]s, audio becomes [`AudioClip`]s, text becomes a
/// `String` and binary data stays a `Vec<u8>`. Video and unknown formats fail
/// before any bytes are read.
pub fn create_asset(path: &str, info: &dyn ExternalAssetInfo) -> AssetResult<LoadedAsset> {
    profile_function!();
    let format = info.format();
    let read = || info.read_asset().map_err(|e| io_error(path, e));
    let asset = match format.to_type() {
        AssetType::Image => {
            let data = read()?;
            let metadata = read_sprite_metadata(path, info)?;
            LoadedAsset::new(Sprite::decode(&data, &metadata).map_err(|e| AssetError::decode(path, e))?)
        }
        AssetType::Audio => LoadedAsset::new(AudioClip::decode(read()?).map_err(|e| AssetError::decode(path, e))?),
        AssetType::Text => {
            // Decoded once here; lossy so stray bytes don't hide the whole file.
            let text = match String::from_utf8(read()?) {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!("Asset '{}' is not valid UTF-8: {}", path, e.utf8_error());
                    String::from_utf8_lossy(e.as_bytes()).into_owned()
                }
            };
            LoadedAsset::new(text)
        }
        AssetType::Binary => LoadedAsset::new(read()?),
        AssetType::Video => {
            return Err(AssetError::UnsupportedFormat {
                path: path.to_owned(),
                format,
            });
        }
        AssetType::Unknown => return Err(AssetError::UnknownType { path: path.to_owned() }),
    };
    tracing::trace!("Decoded '{}' as {}", path, asset.type_name());
    Ok(asset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use std::cell::Cell;

    struct MemoryInfo {
        format: AssetFormat,
        data: Vec<u8>,
        metadata: Option<Vec<u8>>,
        reads: Cell<usize>,
    }

    impl MemoryInfo {
        fn new(format: AssetFormat, data: impl Into<Vec<u8>>) -> Self {
            Self {
                format,
                data: data.into(),
                metadata: None,
                reads: Cell::new(0),
            }
        }

        fn with_metadata(mut self, metadata: &str) -> Self {
            self.metadata = Some(metadata.as_bytes().to_vec());
            self
        }
    }

    impl ExternalAssetInfo for MemoryInfo {
        fn format(&self) -> AssetFormat {
            self.format
        }

        fn read_asset(&self) -> io::Result<Vec<u8>> {
            self.reads.set(self.reads.get() + 1);
            Ok(self.data.clone())
        }

        fn read_metadata(&self) -> io::Result<Option<Vec<u8>>> {
            Ok(self.metadata.clone())
        }
    }

    #[test]
    fn test_image_becomes_sprite() {
        let info = MemoryInfo::new(AssetFormat::Png, test_support::png(8, 4)).with_metadata(r#"{ "ppu": 8 }"#);
        let asset = create_asset("hero", &info).unwrap();
        let sprite = asset.downcast::<Sprite>().unwrap();
        assert_eq!(sprite.pixels_per_unit, 8.0);
        assert_eq!(sprite.size(), [1.0, 0.5]);
    }

    #[test]
    fn test_invalid_metadata_is_recoverable() {
        let info = MemoryInfo::new(AssetFormat::Png, test_support::png(8, 4)).with_metadata("ppu = 8");
        let err = create_asset("hero", &info).unwrap_err();
        assert!(matches!(err, AssetError::InvalidMetadata { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_corrupt_image_is_decode_error() {
        let info = MemoryInfo::new(AssetFormat::Png, b"\x89PNG\r\n\x1a\ntruncated".to_vec());
        let err = create_asset("hero", &info).unwrap_err();
        assert!(matches!(err, AssetError::Decode { .. }));
    }

    #[test]
    fn test_text_and_binary() {
        let text = create_asset("notes", &MemoryInfo::new(AssetFormat::Txt, "héllo")).unwrap();
        assert_eq!(*text.downcast::<String>().unwrap(), "héllo");

        let lossy = create_asset("notes", &MemoryInfo::new(AssetFormat::Csv, b"a,\xFF".to_vec())).unwrap();
        assert_eq!(*lossy.downcast::<String>().unwrap(), "a,\u{FFFD}");

        let bytes = create_asset("blob", &MemoryInfo::new(AssetFormat::Bin, vec![0, 1, 2])).unwrap();
        assert_eq!(*bytes.downcast::<Vec<u8>>().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_audio() {
        let clip = create_asset("sfx", &MemoryInfo::new(AssetFormat::Wav, test_support::wav(1, 22_050))).unwrap();
        let clip = clip.downcast::<AudioClip>().unwrap();
        assert_eq!(clip.sample_rate, Some(22_050));

        let err = create_asset("sfx", &MemoryInfo::new(AssetFormat::Mp3, b"garbage bytes!".to_vec())).unwrap_err();
        assert!(matches!(err, AssetError::Decode { .. }));
    }

    #[test]
    fn test_video_and_unknown_fail_without_reading() {
        let video = MemoryInfo::new(AssetFormat::Mp4, vec![0; 16]);
        assert!(matches!(
            create_asset("clip", &video),
            Err(AssetError::UnsupportedFormat { format: AssetFormat::Mp4, .. })
        ));
        assert_eq!(video.reads.get(), 0);

        let unknown = MemoryInfo::new(AssetFormat::Unknown, vec![0; 16]);
        let err = create_asset("thing", &unknown).unwrap_err();
        assert_eq!(err.to_string(), "Asset \"thing\" is of unknown type.");
        assert!(!err.is_recoverable());
        assert_eq!(unknown.reads.get(), 0);
    }
}
