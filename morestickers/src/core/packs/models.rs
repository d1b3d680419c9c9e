//! Sticker pack data model

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::core::fs::validate_path_id_component;
use crate::core::transcode::{SourceAsset, SourceFormat};
use crate::core::{CoreError, CoreResult, PackId, RenderableAsset, StickerId};

/// Pack icon reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackLogo {
    /// Icon URI (remote URL or file name inside the pack)
    pub image: String,
}

/// Lightweight pack descriptor shown in the picker sidebar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StickerPackMeta {
    pub id: PackId,
    pub title: String,
    pub logo: PackLogo,
}

// =============================================================================
// Raw (unconverted) packs
// =============================================================================

/// Sticker as stored, before transcoding
#[derive(Debug, Clone)]
pub struct RawSticker {
    pub id: StickerId,
    pub title: String,
    /// Source bytes; `None` when the store could not read them
    pub source: Option<SourceAsset>,
}

/// Full pack contents as returned by a pack store
#[derive(Debug, Clone)]
pub struct RawStickerPack {
    pub meta: StickerPackMeta,
    pub author: Option<String>,
    pub stickers: Vec<RawSticker>,
}

impl RawStickerPack {
    pub fn id(&self) -> &str {
        &self.meta.id
    }
}

// =============================================================================
// Resolved packs
// =============================================================================

/// Rendering state of a resolved sticker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum StickerRender {
    /// Transcoded and registered under an object URL
    Ready { asset: RenderableAsset },
    /// Could not be rendered; shown as a placeholder tile
    Placeholder { reason: String },
}

/// A sticker in a resolved pack
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sticker {
    pub id: StickerId,
    pub title: String,
    pub source_format: SourceFormat,
    pub source_mime_type: Option<String>,
    /// Content identity of the source bytes (empty when unreadable)
    pub content_hash: String,
    pub render: StickerRender,
}

impl Sticker {
    pub fn renderable(&self) -> Option<&RenderableAsset> {
        match &self.render {
            StickerRender::Ready { asset } => Some(asset),
            StickerRender::Placeholder { .. } => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.render, StickerRender::Placeholder { .. })
    }
}

/// A pack whose stickers have all been resolved (rendered or placeholder)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StickerPack {
    pub id: PackId,
    pub title: String,
    pub logo: PackLogo,
    pub stickers: Vec<Sticker>,
}

impl StickerPack {
    pub fn sticker(&self, sticker_id: &str) -> Option<&Sticker> {
        self.stickers.iter().find(|s| s.id == sticker_id)
    }

    pub fn placeholder_count(&self) -> usize {
        self.stickers.iter().filter(|s| s.is_placeholder()).count()
    }
}

// =============================================================================
// On-disk manifest
// =============================================================================

/// `manifest.json` of a pack directory or archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackManifest {
    pub id: PackId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub logo: PackLogo,
    #[serde(default)]
    pub stickers: Vec<ManifestSticker>,
}

/// Sticker entry of a [`PackManifest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSticker {
    pub id: StickerId,
    pub title: String,
    /// File name relative to the pack directory
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl PackManifest {
    /// Checks ids and file names before anything touches the filesystem.
    pub fn validate(&self) -> CoreResult<()> {
        validate_path_id_component(&self.id, "packId").map_err(CoreError::InvalidPackManifest)?;

        if self.title.trim().is_empty() {
            return Err(CoreError::InvalidPackManifest(format!(
                "Pack '{}' has an empty title",
                self.id
            )));
        }

        let mut seen = HashSet::new();
        for sticker in &self.stickers {
            if sticker.id.trim().is_empty() {
                return Err(CoreError::InvalidPackManifest(format!(
                    "Pack '{}' has a sticker with an empty id",
                    self.id
                )));
            }
            if !seen.insert(sticker.id.as_str()) {
                return Err(CoreError::InvalidPackManifest(format!(
                    "Pack '{}' has duplicate sticker id '{}'",
                    self.id, sticker.id
                )));
            }
            validate_path_id_component(&sticker.file, "sticker file")
                .map_err(CoreError::InvalidPackManifest)?;
        }

        Ok(())
    }

    pub fn meta(&self) -> StickerPackMeta {
        StickerPackMeta {
            id: self.id.clone(),
            title: self.title.clone(),
            logo: self.logo.clone(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> PackManifest {
        serde_json::from_value(serde_json::json!({
            "id": "line-11537",
            "title": "Brown & Cony",
            "logo": { "image": "logo.png" },
            "stickers": [
                { "id": "1", "title": "Wave", "file": "1.png", "mimeType": "image/png" },
                { "id": "2", "title": "Dance", "file": "2.png" }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_manifest_parses_and_validates() {
        let manifest = manifest();
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.author, None);
        assert_eq!(manifest.stickers[1].mime_type, None);
        assert_eq!(manifest.meta().logo.image, "logo.png");
    }

    #[test]
    fn test_manifest_rejects_traversal_and_duplicates() {
        let mut bad = manifest();
        bad.stickers[0].file = "../../secret".to_string();
        assert!(matches!(
            bad.validate(),
            Err(CoreError::InvalidPackManifest(_))
        ));

        let mut dup = manifest();
        dup.stickers[1].id = "1".to_string();
        assert!(dup.validate().is_err());

        let mut bad_id = manifest();
        bad_id.id = "a/b".to_string();
        assert!(bad_id.validate().is_err());
    }

    #[test]
    fn test_sticker_render_serialization() {
        let sticker = Sticker {
            id: "s".to_string(),
            title: "S".to_string(),
            source_format: SourceFormat::Gif,
            source_mime_type: None,
            content_hash: String::new(),
            render: StickerRender::Placeholder {
                reason: "corrupt".to_string(),
            },
        };
        let json = serde_json::to_value(&sticker).unwrap();
        assert_eq!(json["render"]["status"], "placeholder");
        assert_eq!(json["sourceFormat"], "gif");
        assert!(sticker.is_placeholder());
        assert!(sticker.renderable().is_none());
    }
}
