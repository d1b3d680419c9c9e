//! Sticker media formats
//!
//! Source format detection (declared MIME type plus magic-byte sniffing) and
//! the renderable target formats the engine can produce.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Container/codec of a sticker's source bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceFormat {
    Png,
    Apng,
    Gif,
    Webp,
    AnimatedWebp,
    Jpeg,
    Webm,
    Mp4,
    Unknown,
}

impl SourceFormat {
    /// Detects the format from the bytes, falling back to the declared MIME type.
    ///
    /// Sniffing wins over the declared type: sticker stores commonly label
    /// animated PNGs as `image/png`.
    pub fn detect(mime_type: Option<&str>, bytes: &[u8]) -> Self {
        match sniff(bytes) {
            SourceFormat::Unknown => mime_type
                .map(SourceFormat::from_mime)
                .unwrap_or(SourceFormat::Unknown),
            sniffed => sniffed,
        }
    }

    /// Maps a MIME type to a format (parameters such as `; charset` are ignored).
    pub fn from_mime(mime_type: &str) -> Self {
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "image/png" => SourceFormat::Png,
            "image/apng" | "image/vnd.mozilla.apng" => SourceFormat::Apng,
            "image/gif" => SourceFormat::Gif,
            "image/webp" => SourceFormat::Webp,
            "image/jpeg" | "image/jpg" => SourceFormat::Jpeg,
            "video/webm" => SourceFormat::Webm,
            "video/mp4" => SourceFormat::Mp4,
            _ => SourceFormat::Unknown,
        }
    }

    /// Whether the source carries more than one frame.
    pub fn is_animated(self) -> bool {
        matches!(
            self,
            SourceFormat::Apng
                | SourceFormat::Gif
                | SourceFormat::AnimatedWebp
                | SourceFormat::Webm
                | SourceFormat::Mp4
        )
    }

    /// File extension used when a pack is written to disk.
    pub fn extension(self) -> &'static str {
        match self {
            SourceFormat::Png | SourceFormat::Apng => "png",
            SourceFormat::Gif => "gif",
            SourceFormat::Webp | SourceFormat::AnimatedWebp => "webp",
            SourceFormat::Jpeg => "jpg",
            SourceFormat::Webm => "webm",
            SourceFormat::Mp4 => "mp4",
            SourceFormat::Unknown => "bin",
        }
    }

    /// Code passed to the guest engine's `ms_transcode` export.
    pub fn wire_code(self) -> i32 {
        match self {
            SourceFormat::Unknown => 0,
            SourceFormat::Png => 1,
            SourceFormat::Apng => 2,
            SourceFormat::Gif => 3,
            SourceFormat::Webp => 4,
            SourceFormat::AnimatedWebp => 5,
            SourceFormat::Jpeg => 6,
            SourceFormat::Webm => 7,
            SourceFormat::Mp4 => 8,
        }
    }
}

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

fn sniff(bytes: &[u8]) -> SourceFormat {
    if bytes.starts_with(PNG_SIGNATURE) {
        return sniff_png(bytes);
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return SourceFormat::Gif;
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return sniff_webp(bytes);
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return SourceFormat::Jpeg;
    }
    if bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return SourceFormat::Webm;
    }
    if bytes.len() >= 8 && &bytes[4..8] == b"ftyp" {
        return SourceFormat::Mp4;
    }
    SourceFormat::Unknown
}

/// APNG files carry an `acTL` chunk before the first `IDAT`.
fn sniff_png(bytes: &[u8]) -> SourceFormat {
    let mut offset = PNG_SIGNATURE.len();
    while offset + 8 <= bytes.len() {
        let len = u32::from_be_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]) as usize;
        match &bytes[offset + 4..offset + 8] {
            b"acTL" => return SourceFormat::Apng,
            b"IDAT" | b"IEND" => return SourceFormat::Png,
            _ => {}
        }
        // length + type + data + crc
        offset = match offset.checked_add(12).and_then(|o| o.checked_add(len)) {
            Some(next) => next,
            None => break,
        };
    }
    SourceFormat::Png
}

/// Extended WebP (`VP8X`) sets bit 1 of the flags byte for animation.
fn sniff_webp(bytes: &[u8]) -> SourceFormat {
    if bytes.len() >= 21 && &bytes[12..16] == b"VP8X" && bytes[20] & 0x02 != 0 {
        SourceFormat::AnimatedWebp
    } else {
        SourceFormat::Webp
    }
}

/// Renderable output format produced by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    Gif,
    Webp,
    Png,
}

impl TargetFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            TargetFormat::Gif => "image/gif",
            TargetFormat::Webp => "image/webp",
            TargetFormat::Png => "image/png",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            TargetFormat::Gif => "gif",
            TargetFormat::Webp => "webp",
            TargetFormat::Png => "png",
        }
    }

    /// Code passed to the guest engine's `ms_transcode` export.
    pub fn wire_code(self) -> i32 {
        match self {
            TargetFormat::Gif => 1,
            TargetFormat::Webp => 2,
            TargetFormat::Png => 3,
        }
    }

    /// Whether the format can hold an animation.
    pub fn is_animated_capable(self) -> bool {
        matches!(self, TargetFormat::Gif | TargetFormat::Webp)
    }

    /// Whether the format is accepted for still stickers.
    pub fn is_still_capable(self) -> bool {
        matches!(self, TargetFormat::Png | TargetFormat::Webp)
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for TargetFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gif" => Ok(TargetFormat::Gif),
            "webp" => Ok(TargetFormat::Webp),
            "png" => Ok(TargetFormat::Png),
            other => Err(format!("Unknown target format: {}", other)),
        }
    }
}

/// Chooses the output format for a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetPolicy {
    /// Output for animated sources
    pub animated: TargetFormat,
    /// Output for still sources
    pub still: TargetFormat,
}

impl Default for TargetPolicy {
    fn default() -> Self {
        Self {
            animated: TargetFormat::Gif,
            still: TargetFormat::Png,
        }
    }
}

impl TargetPolicy {
    pub fn target_for(&self, source: SourceFormat) -> TargetFormat {
        if source.is_animated() {
            self.animated
        } else {
            self.still
        }
    }
}

/// Raw sticker bytes plus what is known about their encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAsset {
    /// Raw bytes
    pub data: Arc<Vec<u8>>,
    /// Declared MIME type, if the store provided one
    pub mime_type: Option<String>,
    /// Detected format
    pub format: SourceFormat,
    content_hash: String,
}

impl SourceAsset {
    pub fn new(data: Vec<u8>, mime_type: Option<String>) -> Self {
        let format = SourceFormat::detect(mime_type.as_deref(), &data);
        let content_hash = format!("{:x}", Sha256::digest(&data));
        Self {
            data: Arc::new(data),
            mime_type,
            format,
            content_hash,
        }
    }

    /// SHA-256 of the bytes, lowercase hex. This is the content identity used
    /// by the transcode cache.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Minimal PNG chunk stream (signature + one chunk), not a decodable image.
    pub fn png_with_first_chunk(kind: &[u8; 4]) -> Vec<u8> {
        let mut bytes = super::PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(kind);
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes
    }

    pub fn still_png() -> Vec<u8> {
        png_with_first_chunk(b"IDAT")
    }

    pub fn apng() -> Vec<u8> {
        png_with_first_chunk(b"acTL")
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_sniff_png_and_apng() {
        assert_eq!(SourceFormat::detect(None, &still_png()), SourceFormat::Png);
        assert_eq!(SourceFormat::detect(None, &apng()), SourceFormat::Apng);
        // Declared type does not override the sniffed animation chunk
        assert_eq!(
            SourceFormat::detect(Some("image/png"), &apng()),
            SourceFormat::Apng
        );
    }

    #[test]
    fn test_sniff_png_skips_ancillary_chunks() {
        let mut bytes = PNG_SIGNATURE.to_vec();
        // IHDR with 13 bytes of data
        bytes.extend_from_slice(&13u32.to_be_bytes());
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&[0u8; 13]);
        bytes.extend_from_slice(&[0u8; 4]);
        bytes.extend_from_slice(&8u32.to_be_bytes());
        bytes.extend_from_slice(b"acTL");
        bytes.extend_from_slice(&[0u8; 12]);

        assert_eq!(SourceFormat::detect(None, &bytes), SourceFormat::Apng);
    }

    #[test]
    fn test_sniff_png_truncated_chunk_length() {
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(&u32::MAX.to_be_bytes());
        bytes.extend_from_slice(b"tEXt");
        assert_eq!(SourceFormat::detect(None, &bytes), SourceFormat::Png);
    }

    #[test]
    fn test_sniff_other_containers() {
        assert_eq!(SourceFormat::detect(None, b"GIF89a...."), SourceFormat::Gif);
        assert_eq!(
            SourceFormat::detect(None, &[0xFF, 0xD8, 0xFF, 0xE0]),
            SourceFormat::Jpeg
        );
        assert_eq!(
            SourceFormat::detect(None, &[0x1A, 0x45, 0xDF, 0xA3, 0x01]),
            SourceFormat::Webm
        );
        assert_eq!(
            SourceFormat::detect(None, b"\0\0\0\x18ftypisom"),
            SourceFormat::Mp4
        );

        let mut webp = b"RIFF\0\0\0\0WEBPVP8X".to_vec();
        webp.extend_from_slice(&[0, 0, 0, 0, 0x02]);
        assert_eq!(SourceFormat::detect(None, &webp), SourceFormat::AnimatedWebp);

        let still_webp = b"RIFF\0\0\0\0WEBPVP8 \0\0\0\0\0".to_vec();
        assert_eq!(SourceFormat::detect(None, &still_webp), SourceFormat::Webp);
    }

    #[test]
    fn test_mime_fallback() {
        assert_eq!(
            SourceFormat::detect(Some("image/gif"), b"???"),
            SourceFormat::Gif
        );
        assert_eq!(
            SourceFormat::detect(Some("IMAGE/APNG; q=1"), b"???"),
            SourceFormat::Apng
        );
        assert_eq!(SourceFormat::detect(None, b"???"), SourceFormat::Unknown);
        assert_eq!(
            SourceFormat::detect(Some("text/plain"), b"???"),
            SourceFormat::Unknown
        );
    }

    #[test]
    fn test_target_policy() {
        let policy = TargetPolicy::default();
        assert_eq!(policy.target_for(SourceFormat::Apng), TargetFormat::Gif);
        assert_eq!(policy.target_for(SourceFormat::Webm), TargetFormat::Gif);
        assert_eq!(policy.target_for(SourceFormat::Png), TargetFormat::Png);
        assert_eq!(policy.target_for(SourceFormat::Unknown), TargetFormat::Png);
    }

    #[test]
    fn test_target_format_parse_and_display() {
        assert_eq!("GIF".parse::<TargetFormat>().unwrap(), TargetFormat::Gif);
        assert_eq!(" webp ".parse::<TargetFormat>().unwrap(), TargetFormat::Webp);
        assert!("bmp".parse::<TargetFormat>().is_err());
        assert_eq!(TargetFormat::Png.to_string(), "png");
        assert_eq!(TargetFormat::Gif.mime_type(), "image/gif");
    }

    #[test]
    fn test_content_hash_depends_only_on_bytes() {
        let a = SourceAsset::new(vec![1, 2, 3], Some("image/png".to_string()));
        let b = SourceAsset::new(vec![1, 2, 3], None);
        let c = SourceAsset::new(vec![1, 2, 4], None);

        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
        assert_eq!(a.content_hash().len(), 64);
    }
}
