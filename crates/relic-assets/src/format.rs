//! Asset format detection.
//!
//! Formats are numbered in 32-wide bands, one per [`AssetType`], so the coarse
//! type of a format is `(format + 31) >> 5`:
//!
//! | band       | type   | formats                          |
//! |------------|--------|----------------------------------|
//! | `0`        | unknown|                                  |
//! | `1..=32`   | audio  | Mp3 (13), Ogg (14), Wav (20)     |
//! | `33..=64`  | image  | Png (33), Jpeg (34)              |
//! | `65..=96`  | video  | Mp4 (65)                         |
//! | `97..=128` | text   | Txt, Csv, Json, Yaml, Xml        |
//! | `129..=160`| binary | Bin (129)                        |
//!
//! Audio and image values line up with the codes platform decoders use for
//! them, which is why the audio formats are not contiguous.

use std::fmt;
use std::path::Path;

/// Fewest bytes [`detect_audio_format`] needs (a WAV header).
pub const MIN_BYTES_TO_DETECT_AUDIO_FORMAT: usize = 12;
/// Fewest bytes [`detect_image_format`] needs (a PNG signature).
pub const MIN_BYTES_TO_DETECT_IMAGE_FORMAT: usize = 8;

const OGG_HEADER: &[u8; 4] = b"OggS";
const RIFF_HEADER: &[u8; 4] = b"RIFF";
const WAVE_HEADER: &[u8; 4] = b"WAVE";
const PNG_HEADER: &[u8; 8] = b"\x89PNG\r\n\x1a\n";

/// Concrete data format of an asset.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AssetFormat {
    #[default]
    Unknown = 0,

    Mp3 = 13,
    Ogg = 14,
    Wav = 20,

    Png = 33,
    Jpeg = 34,

    Mp4 = 65,

    Txt = 97,
    Csv = 98,
    Json = 99,
    Yaml = 100,
    Xml = 101,

    Bin = 129,
}

/// Coarse kind of an asset, selecting how its bytes are decoded.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AssetType {
    #[default]
    Unknown = 0,
    Audio = 1,
    Image = 2,
    Video = 3,
    Text = 4,
    Binary = 5,
}

impl AssetFormat {
    /// Maps the format to its band's [`AssetType`].
    pub const fn to_type(self) -> AssetType {
        match (self as u32 + 31) >> 5 {
            1 => AssetType::Audio,
            2 => AssetType::Image,
            3 => AssetType::Video,
            4 => AssetType::Text,
            5 => AssetType::Binary,
            _ => AssetType::Unknown,
        }
    }

    /// Looks up a format by file extension, with or without the leading dot.
    ///
    /// Matching ignores ASCII case.
    pub fn from_extension(extension: &str) -> Self {
        let extension = extension.strip_prefix('.').unwrap_or(extension);
        const TABLE: &[(&str, AssetFormat)] = &[
            ("mp3", AssetFormat::Mp3),
            ("ogg", AssetFormat::Ogg),
            ("wav", AssetFormat::Wav),
            ("png", AssetFormat::Png),
            ("jpg", AssetFormat::Jpeg),
            ("jpeg", AssetFormat::Jpeg),
            ("mp4", AssetFormat::Mp4),
            ("txt", AssetFormat::Txt),
            ("csv", AssetFormat::Csv),
            ("json", AssetFormat::Json),
            ("yaml", AssetFormat::Yaml),
            ("xml", AssetFormat::Xml),
            ("bin", AssetFormat::Bin),
            ("bytes", AssetFormat::Bin),
        ];
        TABLE
            .iter()
            .find(|(ext, _)| ext.eq_ignore_ascii_case(extension))
            .map_or(AssetFormat::Unknown, |&(_, format)| format)
    }

    /// Looks up a format by the extension of `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(AssetFormat::Unknown, Self::from_extension)
    }

    pub fn is_unknown(self) -> bool {
        self == AssetFormat::Unknown
    }
}

impl fmt::Display for AssetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Identifies Ogg, WAV and MP3 audio by their leading bytes.
pub fn detect_audio_format(data: &[u8]) -> AssetFormat {
    if data.len() < MIN_BYTES_TO_DETECT_AUDIO_FORMAT {
        return AssetFormat::Unknown;
    }
    if data.starts_with(OGG_HEADER) {
        return AssetFormat::Ogg;
    }
    if data.starts_with(RIFF_HEADER) && &data[8..12] == WAVE_HEADER {
        return AssetFormat::Wav;
    }
    // ID3 tag, or an MPEG frame sync with the protection bit either way.
    if data.starts_with(b"ID3") || (data[0] == 0xFF && (data[1] | 1) == 0xFB) {
        return AssetFormat::Mp3;
    }
    AssetFormat::Unknown
}

/// Identifies PNG and JPEG images by their leading bytes.
pub fn detect_image_format(data: &[u8]) -> AssetFormat {
    if data.len() < MIN_BYTES_TO_DETECT_IMAGE_FORMAT {
        return AssetFormat::Unknown;
    }
    if data.starts_with(PNG_HEADER) {
        return AssetFormat::Png;
    }
    // marker, start of image, marker
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return AssetFormat::Jpeg;
    }
    AssetFormat::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_type_bands() {
        assert_eq!(AssetFormat::Unknown.to_type(), AssetType::Unknown);
        assert_eq!(AssetFormat::Mp3.to_type(), AssetType::Audio);
        assert_eq!(AssetFormat::Ogg.to_type(), AssetType::Audio);
        assert_eq!(AssetFormat::Wav.to_type(), AssetType::Audio);
        assert_eq!(AssetFormat::Png.to_type(), AssetType::Image);
        assert_eq!(AssetFormat::Jpeg.to_type(), AssetType::Image);
        assert_eq!(AssetFormat::Mp4.to_type(), AssetType::Video);
        for format in [AssetFormat::Txt, AssetFormat::Csv, AssetFormat::Json, AssetFormat::Yaml, AssetFormat::Xml] {
            assert_eq!(format.to_type(), AssetType::Text);
        }
        assert_eq!(AssetFormat::Bin.to_type(), AssetType::Binary);
    }

    #[test]
    fn test_band_values() {
        assert_eq!(AssetFormat::Mp3 as u8, 13);
        assert_eq!(AssetFormat::Ogg as u8, 14);
        assert_eq!(AssetFormat::Wav as u8, 20);
        assert_eq!(AssetFormat::Png as u8, 33);
        assert_eq!(AssetFormat::Jpeg as u8, 34);
        assert_eq!(AssetFormat::Mp4 as u8, 65);
        assert_eq!(AssetFormat::Txt as u8, 97);
        assert_eq!(AssetFormat::Xml as u8, 101);
        assert_eq!(AssetFormat::Bin as u8, 129);
    }

    #[test]
    fn test_from_extension() {
        assert_eq!(AssetFormat::from_extension(".mp3"), AssetFormat::Mp3);
        assert_eq!(AssetFormat::from_extension("ogg"), AssetFormat::Ogg);
        assert_eq!(AssetFormat::from_extension(".wav"), AssetFormat::Wav);
        assert_eq!(AssetFormat::from_extension(".png"), AssetFormat::Png);
        assert_eq!(AssetFormat::from_extension(".jpg"), AssetFormat::Jpeg);
        assert_eq!(AssetFormat::from_extension(".jpeg"), AssetFormat::Jpeg);
        assert_eq!(AssetFormat::from_extension(".mp4"), AssetFormat::Mp4);
        assert_eq!(AssetFormat::from_extension(".txt"), AssetFormat::Txt);
        assert_eq!(AssetFormat::from_extension(".csv"), AssetFormat::Csv);
        assert_eq!(AssetFormat::from_extension(".json"), AssetFormat::Json);
        assert_eq!(AssetFormat::from_extension(".yaml"), AssetFormat::Yaml);
        assert_eq!(AssetFormat::from_extension(".xml"), AssetFormat::Xml);
        assert_eq!(AssetFormat::from_extension(".bin"), AssetFormat::Bin);
        assert_eq!(AssetFormat::from_extension(".bytes"), AssetFormat::Bin);
        assert_eq!(AssetFormat::from_extension(".PNG"), AssetFormat::Png);
        assert_eq!(AssetFormat::from_extension(".yml"), AssetFormat::Unknown);
        assert_eq!(AssetFormat::from_extension(".meta"), AssetFormat::Unknown);
        assert_eq!(AssetFormat::from_extension(""), AssetFormat::Unknown);
    }

    #[test]
    fn test_from_path() {
        assert_eq!(AssetFormat::from_path("sprites/hero.png"), AssetFormat::Png);
        assert_eq!(AssetFormat::from_path("data/table.bytes"), AssetFormat::Bin);
        assert_eq!(AssetFormat::from_path("README"), AssetFormat::Unknown);
    }

    #[test]
    fn test_detect_image_format() {
        let png = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(detect_image_format(&png), AssetFormat::Png);
        assert_eq!(detect_image_format(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F']), AssetFormat::Jpeg);
        assert_eq!(detect_image_format(&png[..7]), AssetFormat::Unknown);
        assert_eq!(detect_image_format(&[0xFF, 0xD8, 0xFF]), AssetFormat::Unknown);
        assert_eq!(detect_image_format(b"GIF89a\0\0"), AssetFormat::Unknown);
    }

    #[test]
    fn test_detect_audio_format() {
        assert_eq!(detect_audio_format(b"OggS\0\x02\0\0\0\0\0\0"), AssetFormat::Ogg);
        assert_eq!(detect_audio_format(b"RIFF\x24\0\0\0WAVEfmt "), AssetFormat::Wav);
        assert_eq!(detect_audio_format(b"RIFF\x24\0\0\0AVI LIST"), AssetFormat::Unknown);
        assert_eq!(detect_audio_format(b"ID3\x04\0\0\0\0\0\0\0\0"), AssetFormat::Mp3);
        assert_eq!(detect_audio_format(&[0xFF, 0xFB, 0x90, 0x44, 0, 0, 0, 0, 0, 0, 0, 0]), AssetFormat::Mp3);
        assert_eq!(detect_audio_format(&[0xFF, 0xFA, 0x90, 0x44, 0, 0, 0, 0, 0, 0, 0, 0]), AssetFormat::Mp3);
        assert_eq!(detect_audio_format(&[0xFF, 0xF3, 0x90, 0x44, 0, 0, 0, 0, 0, 0, 0, 0]), AssetFormat::Unknown);
        // Too short, even with a valid magic.
        assert_eq!(detect_audio_format(b"OggS\0\x02\0\0\0\0\0"), AssetFormat::Unknown);
    }
}
