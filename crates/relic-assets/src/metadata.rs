//! Companion metadata files.
//!
//! An asset stored as `name.ext` may have its metadata next to it in
//! `name.meta`, a JSON document:
//!
//! ```json
//! { "ppu": 32, "region": { "x": 0, "y": 0, "width": 16, "height": 16 } }
//! ```
//!
//! Every field is optional. No other metadata extension is recognised.

use serde::{Deserialize, Serialize};

use crate::asset::Rect;

/// Extension of metadata files, without the dot.
pub const METADATA_EXTENSION: &str = "meta";

/// Default pixels-per-unit of sprites without metadata.
pub const DEFAULT_PPU: f32 = 64.0;

fn default_ppu() -> f32 {
    DEFAULT_PPU
}

/// Settings applied when an image asset is turned into a [`Sprite`](crate::Sprite).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpriteMetadata {
    #[serde(default = "default_ppu")]
    pub ppu: f32,
    /// Sub-region of the texture; `None` or an all-zero rectangle means the whole image.
    #[serde(default)]
    pub region: Option<Rect>,
}

impl Default for SpriteMetadata {
    fn default() -> Self {
        Self {
            ppu: DEFAULT_PPU,
            region: None,
        }
    }
}

impl SpriteMetadata {
    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Whether `extension` (without the dot) marks a metadata file.
pub fn is_metadata_extension(extension: &str) -> bool {
    extension.eq_ignore_ascii_case(METADATA_EXTENSION)
}
