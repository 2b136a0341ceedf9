//! In-memory asset types produced by the decode pipeline.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::format::{AssetFormat, detect_audio_format};
use crate::metadata::SpriteMetadata;

/// Marker trait for types that can be stored in an asset cache.
pub trait Asset: Any + Send + Sync + 'static {
    /// Get a human-readable name for this asset type.
    fn type_name() -> &'static str
    where
        Self: Sized;
}

impl Asset for String {
    fn type_name() -> &'static str {
        "String"
    }
}

impl Asset for Vec<u8> {
    fn type_name() -> &'static str {
        "Bytes"
    }
}

/// Errors raised while turning raw bytes into an asset.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("pixels per unit must be greater than 0, got {0}")]
    InvalidPixelsPerUnit(f32),
    #[error("data does not contain valid image data: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error("region {region:?} does not fit in the {width}x{height} texture")]
    RegionOutOfBounds { region: Rect, width: u32, height: u32 },
    #[error("the audio file's format could not be identified")]
    UnknownAudioFormat,
}

/// A type-erased, shared asset value.
#[derive(Clone)]
pub struct LoadedAsset {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl LoadedAsset {
    pub fn new<T: Asset>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T: Asset>(value: Arc<T>) -> Self {
        Self {
            value,
            type_name: T::type_name(),
        }
    }

    /// Name of the stored type, as reported by [`Asset::type_name`].
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Asset>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Returns the value as `T`, sharing the allocation.
    pub fn downcast<T: Asset>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    /// Whether both values share one allocation.
    pub fn ptr_eq(&self, other: &LoadedAsset) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for LoadedAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedAsset")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Axis-aligned rectangle in texture pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const ZERO: Rect = Rect::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_zero(&self) -> bool {
        *self == Rect::ZERO
    }
}

/// How a texture is sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    #[default]
    Point,
    Bilinear,
}

/// Decoded RGBA8 pixel data.
#[derive(Debug, Clone)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub filter_mode: FilterMode,
    /// Row-major RGBA8, `width * height * 4` bytes.
    pub pixels: Arc<[u8]>,
}

impl Asset for Texture {
    fn type_name() -> &'static str {
        "Texture"
    }
}

impl Texture {
    /// Decodes a PNG or JPEG image.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let image = image::load_from_memory(data)?.to_rgba8();
        let (width, height) = image.dimensions();
        Ok(Self {
            width,
            height,
            filter_mode: FilterMode::Point,
            pixels: Arc::from(image.into_raw()),
        })
    }
}

/// A displayable region of a texture.
///
/// Image assets always load as sprites; the texture is reachable through
/// [`Sprite::texture`].
#[derive(Debug, Clone)]
pub struct Sprite {
    pub texture: Arc<Texture>,
    pub region: Rect,
    pub pivot: [f32; 2],
    pub pixels_per_unit: f32,
}

impl Asset for Sprite {
    fn type_name() -> &'static str {
        "Sprite"
    }
}

impl Sprite {
    /// Decodes image bytes into a sprite centred on its region.
    ///
    /// A missing or zero region covers the whole texture.
    pub fn decode(data: &[u8], metadata: &SpriteMetadata) -> Result<Self, DecodeError> {
        let ppu = metadata.ppu;
        if ppu.is_nan() || ppu <= 0.0 {
            return Err(DecodeError::InvalidPixelsPerUnit(ppu));
        }

        let texture = Texture::decode(data)?;
        let (width, height) = (texture.width, texture.height);
        let region = match metadata.region {
            Some(region) if !region.is_zero() => region,
            _ => Rect::new(0.0, 0.0, width as f32, height as f32),
        };
        let fits = region.x >= 0.0
            && region.y >= 0.0
            && region.width > 0.0
            && region.height > 0.0
            && region.x + region.width <= width as f32
            && region.y + region.height <= height as f32;
        if !fits {
            return Err(DecodeError::RegionOutOfBounds { region, width, height });
        }

        Ok(Self {
            texture: Arc::new(texture),
            region,
            pivot: [0.5, 0.5],
            pixels_per_unit: ppu,
        })
    }

    /// Size in world units.
    pub fn size(&self) -> [f32; 2] {
        [
            self.region.width / self.pixels_per_unit,
            self.region.height / self.pixels_per_unit,
        ]
    }
}

/// Encoded audio, ready to hand to a platform decoder.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub format: AssetFormat,
    pub data: Arc<[u8]>,
    /// Read from the `fmt ` chunk of WAV files.
    pub channels: Option<u16>,
    pub sample_rate: Option<u32>,
}

impl Asset for AudioClip {
    fn type_name() -> &'static str {
        "AudioClip"
    }
}

impl AudioClip {
    /// Wraps encoded Ogg, WAV or MP3 data, identified by its leading bytes.
    pub fn decode(data: Vec<u8>) -> Result<Self, DecodeError> {
        let format = detect_audio_format(&data);
        if format.is_unknown() {
            return Err(DecodeError::UnknownAudioFormat);
        }
        let (channels, sample_rate) = match format {
            AssetFormat::Wav => parse_wav_format(&data).unzip(),
            _ => (None, None),
        };
        Ok(Self {
            format,
            data: Arc::from(data),
            channels,
            sample_rate,
        })
    }
}

/// Walks the RIFF chunks after the `WAVE` tag looking for `fmt `.
fn parse_wav_format(data: &[u8]) -> Option<(u16, u32)> {
    let mut offset = 12;
    while offset + 8 <= data.len() {
        let id = &data[offset..offset + 4];
        let size = u32::from_le_bytes(data[offset + 4..offset + 8].try_into().ok()?) as usize;
        let body = offset + 8;
        if id == b"fmt " {
            let chunk = data.get(body..body.checked_add(16)?)?;
            let channels = u16::from_le_bytes([chunk[2], chunk[3]]);
            let sample_rate = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
            return Some((channels, sample_rate));
        }
        // Chunks are padded to an even length.
        offset = body.checked_add(size)?.checked_add(size & 1)?;
    }
    None
}
