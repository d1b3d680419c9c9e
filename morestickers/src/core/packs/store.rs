//! Pack Stores
//!
//! Where sticker packs live. The picker only needs `list_pack_metas` and
//! `get_raw_assets`; `save_pack`/`delete_pack` back pack management.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::models::{
    ManifestSticker, PackManifest, RawSticker, RawStickerPack, StickerPackMeta,
};
use crate::core::fs::{atomic_write_json_pretty, validate_path_id_component};
use crate::core::transcode::SourceAsset;
use crate::core::{CoreError, CoreResult};

/// Manifest file name inside a pack directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Storage backend for sticker packs
#[async_trait]
pub trait PackStore: Send + Sync {
    /// Lists every available pack. Order is not significant.
    async fn list_pack_metas(&self) -> CoreResult<Vec<StickerPackMeta>>;

    /// Full pack contents, or `None` if the pack no longer exists.
    async fn get_raw_assets(&self, pack_id: &str) -> CoreResult<Option<RawStickerPack>>;

    /// Adds a new pack. Fails with `PackAlreadyExists` if the id is taken.
    async fn save_pack(&self, pack: RawStickerPack) -> CoreResult<()>;

    /// Removes a pack. Returns `false` if it did not exist.
    async fn delete_pack(&self, pack_id: &str) -> CoreResult<bool>;
}

/// Guesses a MIME type from a file extension.
pub fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "apng" => "image/apng",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => return None,
    };
    Some(mime)
}

// =============================================================================
// Directory store
// =============================================================================

/// Packs stored as `{dir}/{pack_id}/manifest.json` plus sticker files
#[derive(Debug, Clone)]
pub struct DirectoryPackStore {
    dir: PathBuf,
}

impl DirectoryPackStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn pack_dir(&self, pack_id: &str) -> CoreResult<PathBuf> {
        validate_path_id_component(pack_id, "packId").map_err(CoreError::ValidationError)?;
        Ok(self.dir.join(pack_id))
    }

    /// Reads and validates a pack's manifest. `None` if the pack is gone.
    pub async fn read_manifest(&self, pack_id: &str) -> CoreResult<Option<PackManifest>> {
        let path = self.pack_dir(pack_id)?.join(MANIFEST_FILE);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let manifest: PackManifest = serde_json::from_slice(&content).map_err(|e| {
            CoreError::InvalidPackManifest(format!("{}: {}", path.display(), e))
        })?;
        manifest.validate()?;

        if manifest.id != pack_id {
            return Err(CoreError::InvalidPackManifest(format!(
                "{}: id '{}' does not match directory '{}'",
                path.display(),
                manifest.id,
                pack_id
            )));
        }

        Ok(Some(manifest))
    }
}

#[async_trait]
impl PackStore for DirectoryPackStore {
    async fn list_pack_metas(&self) -> CoreResult<Vec<StickerPackMeta>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            // Nothing imported yet
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CoreError::MetadataUnavailable(format!(
                    "Failed to read pack directory {}: {}",
                    self.dir.display(),
                    e
                )))
            }
        };

        let mut metas = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    return Err(CoreError::MetadataUnavailable(format!(
                        "Failed to read pack directory {}: {}",
                        self.dir.display(),
                        e
                    )))
                }
            };

            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            let Some(pack_id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            // Staging directories of in-progress imports
            if !is_dir || pack_id.starts_with('.') {
                continue;
            }

            match self.read_manifest(&pack_id).await {
                Ok(Some(manifest)) => metas.push(manifest.meta()),
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping sticker pack {:?}: {}", entry.path(), e),
            }
        }

        metas.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(metas)
    }

    async fn get_raw_assets(&self, pack_id: &str) -> CoreResult<Option<RawStickerPack>> {
        let Some(manifest) = self.read_manifest(pack_id).await? else {
            return Ok(None);
        };
        let pack_dir = self.dir.join(pack_id);

        let mut stickers = Vec::with_capacity(manifest.stickers.len());
        for entry in &manifest.stickers {
            let path = pack_dir.join(&entry.file);
            let source = match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    let mime = entry
                        .mime_type
                        .clone()
                        .or_else(|| mime_from_extension(&path).map(str::to_string));
                    Some(SourceAsset::new(bytes, mime))
                }
                Err(e) => {
                    // Deleted while we were reading it
                    if !pack_dir.exists() {
                        return Ok(None);
                    }
                    tracing::warn!("Failed to read sticker file {:?}: {}", path, e);
                    None
                }
            };
            stickers.push(RawSticker {
                id: entry.id.clone(),
                title: entry.title.clone(),
                source,
            });
        }

        Ok(Some(RawStickerPack {
            meta: manifest.meta(),
            author: manifest.author,
            stickers,
        }))
    }

    async fn save_pack(&self, pack: RawStickerPack) -> CoreResult<()> {
        let final_dir = self.pack_dir(pack.id())?;
        if tokio::fs::try_exists(&final_dir).await? {
            return Err(CoreError::PackAlreadyExists(pack.meta.id.clone()));
        }

        let mut manifest = PackManifest {
            id: pack.meta.id.clone(),
            title: pack.meta.title.clone(),
            author: pack.author.clone(),
            logo: pack.meta.logo.clone(),
            stickers: Vec::with_capacity(pack.stickers.len()),
        };
        for sticker in &pack.stickers {
            let source = sticker.source.as_ref().ok_or_else(|| {
                CoreError::ValidationError(format!("Sticker '{}' has no source bytes", sticker.id))
            })?;
            validate_path_id_component(&sticker.id, "stickerId")
                .map_err(CoreError::ValidationError)?;
            manifest.stickers.push(ManifestSticker {
                id: sticker.id.clone(),
                title: sticker.title.clone(),
                file: format!("{}.{}", sticker.id, source.format.extension()),
                mime_type: source.mime_type.clone(),
            });
        }
        manifest.validate()?;

        let staging = self
            .dir
            .join(format!(".{}.{}.tmp", manifest.id, ulid::Ulid::new()));
        let result = write_pack_dir(&staging, &manifest, &pack).await;
        let result = match result {
            Ok(()) => tokio::fs::rename(&staging, &final_dir)
                .await
                .map_err(CoreError::from),
            Err(e) => Err(e),
        };
        if result.is_err() {
            let _ = tokio::fs::remove_dir_all(&staging).await;
        }
        result?;

        tracing::info!(
            "Saved sticker pack '{}' ({} stickers)",
            manifest.id,
            manifest.stickers.len()
        );
        Ok(())
    }

    async fn delete_pack(&self, pack_id: &str) -> CoreResult<bool> {
        let dir = self.pack_dir(pack_id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::info!("Deleted sticker pack '{}'", pack_id);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

async fn write_pack_dir(
    dir: &Path,
    manifest: &PackManifest,
    pack: &RawStickerPack,
) -> CoreResult<()> {
    tokio::fs::create_dir_all(dir).await?;
    for (entry, sticker) in manifest.stickers.iter().zip(&pack.stickers) {
        if let Some(source) = &sticker.source {
            tokio::fs::write(dir.join(&entry.file), source.data.as_slice()).await?;
        }
    }
    let manifest_path = dir.join(MANIFEST_FILE);
    let manifest = manifest.clone();
    tokio::task::spawn_blocking(move || atomic_write_json_pretty(&manifest_path, &manifest))
        .await
        .map_err(|e| CoreError::Internal(format!("Manifest write task failed: {}", e)))?
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::super::models::fixtures::raw_pack;
    use super::*;
    use crate::core::transcode::{fixtures, SourceFormat};
    use tempfile::TempDir;

    fn create_test_pack(temp_dir: &TempDir, pack_id: &str) {
        let pack_dir = temp_dir.path().join(pack_id);
        std::fs::create_dir_all(&pack_dir).unwrap();

        let manifest = serde_json::json!({
            "id": pack_id,
            "title": format!("Pack {}", pack_id),
            "author": "LINE Corporation",
            "logo": { "image": "logo.png" },
            "stickers": [
                { "id": "wave", "title": "Wave", "file": "wave.png" },
                { "id": "dance", "title": "Dance", "file": "dance.gif", "mimeType": "image/gif" }
            ]
        });
        std::fs::write(
            pack_dir.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest).unwrap(),
        )
        .unwrap();
        std::fs::write(pack_dir.join("wave.png"), fixtures::apng()).unwrap();
        std::fs::write(pack_dir.join("dance.gif"), b"GIF89a....").unwrap();
    }

    #[test]
    fn test_mime_from_extension() {
        assert_eq!(mime_from_extension(Path::new("a.PNG")), Some("image/png"));
        assert_eq!(mime_from_extension(Path::new("a.webm")), Some("video/webm"));
        assert_eq!(mime_from_extension(Path::new("a.txt")), None);
        assert_eq!(mime_from_extension(Path::new("noext")), None);
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = DirectoryPackStore::new(temp_dir.path().join("packs"));
        assert!(store.list_pack_metas().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_skips_corrupt_manifests() {
        let temp_dir = TempDir::new().unwrap();
        create_test_pack(&temp_dir, "b-pack");
        create_test_pack(&temp_dir, "a-pack");

        let broken = temp_dir.path().join("broken");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join(MANIFEST_FILE), "{ not json").unwrap();

        let mismatched = temp_dir.path().join("renamed");
        std::fs::create_dir_all(&mismatched).unwrap();
        std::fs::write(
            mismatched.join(MANIFEST_FILE),
            r#"{"id":"other","title":"T","logo":{"image":"x"}}"#,
        )
        .unwrap();

        std::fs::write(temp_dir.path().join("stray.txt"), "x").unwrap();

        let store = DirectoryPackStore::new(temp_dir.path().to_path_buf());
        let metas = store.list_pack_metas().await.unwrap();
        let ids: Vec<_> = metas.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a-pack", "b-pack"]);
        assert_eq!(metas[0].logo.image, "logo.png");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_unreadable_path_is_metadata_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();

        let store = DirectoryPackStore::new(file);
        let err = store.list_pack_metas().await.unwrap_err();
        assert!(matches!(err, CoreError::MetadataUnavailable(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_get_raw_assets() {
        let temp_dir = TempDir::new().unwrap();
        create_test_pack(&temp_dir, "line-1");
        let store = DirectoryPackStore::new(temp_dir.path().to_path_buf());

        let pack = store.get_raw_assets("line-1").await.unwrap().unwrap();
        assert_eq!(pack.author.as_deref(), Some("LINE Corporation"));
        assert_eq!(pack.stickers.len(), 2);

        let wave = pack.stickers[0].source.as_ref().unwrap();
        assert_eq!(wave.format, SourceFormat::Apng);
        assert_eq!(wave.mime_type.as_deref(), Some("image/png"));

        let dance = pack.stickers[1].source.as_ref().unwrap();
        assert_eq!(dance.format, SourceFormat::Gif);
    }

    #[tokio::test]
    async fn test_get_raw_assets_missing_pack_and_file() {
        let temp_dir = TempDir::new().unwrap();
        create_test_pack(&temp_dir, "line-1");
        std::fs::remove_file(temp_dir.path().join("line-1").join("dance.gif")).unwrap();
        let store = DirectoryPackStore::new(temp_dir.path().to_path_buf());

        assert!(store.get_raw_assets("nope").await.unwrap().is_none());

        let pack = store.get_raw_assets("line-1").await.unwrap().unwrap();
        assert!(pack.stickers[0].source.is_some());
        assert!(pack.stickers[1].source.is_none());

        assert!(matches!(
            store.get_raw_assets("../etc").await,
            Err(CoreError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_save_and_delete_pack() {
        let temp_dir = TempDir::new().unwrap();
        let store = DirectoryPackStore::new(temp_dir.path().to_path_buf());

        let pack = raw_pack("fresh", &[&fixtures::apng(), b"GIF89a.."]);
        store.save_pack(pack.clone()).await.unwrap();

        let loaded = store.get_raw_assets("fresh").await.unwrap().unwrap();
        assert_eq!(loaded.meta, pack.meta);
        assert_eq!(loaded.stickers.len(), 2);
        assert!(temp_dir.path().join("fresh").join("fresh-0.png").exists());
        assert!(temp_dir.path().join("fresh").join("fresh-1.gif").exists());

        let err = store.save_pack(pack).await.unwrap_err();
        assert!(matches!(err, CoreError::PackAlreadyExists(_)));

        assert!(store.delete_pack("fresh").await.unwrap());
        assert!(!store.delete_pack("fresh").await.unwrap());
        assert!(store.list_pack_metas().await.unwrap().is_empty());

        // No staging directories left behind
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }
}
