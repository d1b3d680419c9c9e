//! Pack archive import
//!
//! A pack archive is a `.zip` holding `manifest.json` and the sticker files it
//! references, either at the root or inside a single top-level folder.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Component, Path, PathBuf};

use zip::ZipArchive;

use super::models::{PackManifest, StickerPackMeta};
use super::store::MANIFEST_FILE;
use crate::core::fs::atomic_write_json_pretty;
use crate::core::{CoreError, CoreResult};

/// Largest sticker file accepted from an archive
pub const MAX_ARCHIVE_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

/// Imports `archive` into `store_dir`, returning the new pack's metadata.
pub async fn import_pack_archive(store_dir: &Path, archive: &Path) -> CoreResult<StickerPackMeta> {
    let store_dir = store_dir.to_path_buf();
    let archive = archive.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = File::open(&archive)?;
        import_from_reader(&store_dir, file)
    })
    .await
    .map_err(|e| CoreError::Internal(format!("Archive import task failed: {}", e)))?
}

/// Synchronous import from any seekable reader.
pub fn import_from_reader<R: Read + Seek>(store_dir: &Path, reader: R) -> CoreResult<StickerPackMeta> {
    let mut zip = ZipArchive::new(reader)
        .map_err(|e| CoreError::ValidationError(format!("Not a zip archive: {}", e)))?;

    // Every entry must stay inside the archive root
    let mut manifest_entry: Option<(String, PathBuf)> = None;
    for index in 0..zip.len() {
        let entry = zip
            .by_index(index)
            .map_err(|e| CoreError::ValidationError(format!("Corrupt archive entry: {}", e)))?;
        let name = entry.name().to_string();
        let Some(path) = safe_entry_path(&name) else {
            return Err(CoreError::ValidationError(format!(
                "Archive entry escapes the pack directory: {}",
                name
            )));
        };
        if path.file_name().and_then(|n| n.to_str()) == Some(MANIFEST_FILE)
            && path.components().count() <= 2
        {
            let depth_wins = manifest_entry
                .as_ref()
                .map_or(true, |(_, current)| path.components().count() < current.components().count());
            if depth_wins {
                manifest_entry = Some((name, path));
            }
        }
    }

    let (manifest_name, manifest_path) = manifest_entry.ok_or_else(|| {
        CoreError::InvalidPackManifest(format!("Archive has no {}", MANIFEST_FILE))
    })?;
    let prefix = manifest_path.parent().map(Path::to_path_buf).unwrap_or_default();

    let manifest: PackManifest = {
        let entry = zip
            .by_name(&manifest_name)
            .map_err(|e| CoreError::InvalidPackManifest(e.to_string()))?;
        let content = read_limited(entry, &manifest_name)?;
        serde_json::from_slice(&content)
            .map_err(|e| CoreError::InvalidPackManifest(format!("{}: {}", MANIFEST_FILE, e)))?
    };
    manifest.validate()?;

    let final_dir = store_dir.join(&manifest.id);
    if final_dir.exists() {
        return Err(CoreError::PackAlreadyExists(manifest.id.clone()));
    }

    let staging = store_dir.join(format!(".{}.{}.tmp", manifest.id, ulid::Ulid::new()));
    let result = extract_into(&mut zip, &manifest, &prefix, &staging)
        .and_then(|()| std::fs::rename(&staging, &final_dir).map_err(CoreError::from));
    if result.is_err() {
        let _ = std::fs::remove_dir_all(&staging);
    }
    result?;

    tracing::info!(
        "Imported sticker pack '{}' ({} stickers)",
        manifest.id,
        manifest.stickers.len()
    );
    Ok(manifest.meta())
}

fn extract_into<R: Read + Seek>(
    zip: &mut ZipArchive<R>,
    manifest: &PackManifest,
    prefix: &Path,
    staging: &Path,
) -> CoreResult<()> {
    std::fs::create_dir_all(staging)?;

    for sticker in &manifest.stickers {
        let entry_name = archive_name(prefix, &sticker.file);
        let entry = zip.by_name(&entry_name).map_err(|_| {
            CoreError::InvalidPackManifest(format!(
                "Sticker '{}' references missing file {}",
                sticker.id, sticker.file
            ))
        })?;
        let bytes = read_limited(entry, &entry_name)?;
        std::fs::write(staging.join(&sticker.file), bytes)?;
    }

    // The logo may be bundled too
    let logo_name = archive_name(prefix, &manifest.logo.image);
    if safe_entry_path(&manifest.logo.image).is_some_and(|p| p.components().count() == 1) {
        if let Ok(entry) = zip.by_name(&logo_name) {
            let bytes = read_limited(entry, &logo_name)?;
            std::fs::write(staging.join(&manifest.logo.image), bytes)?;
        }
    }

    atomic_write_json_pretty(&staging.join(MANIFEST_FILE), manifest)
}

fn archive_name(prefix: &Path, file: &str) -> String {
    if prefix.as_os_str().is_empty() {
        file.to_string()
    } else {
        format!("{}/{}", prefix.to_string_lossy(), file)
    }
}

fn read_limited(entry: impl Read, name: &str) -> CoreResult<Vec<u8>> {
    let mut bytes = Vec::new();
    entry
        .take(MAX_ARCHIVE_ENTRY_BYTES + 1)
        .read_to_end(&mut bytes)?;
    if bytes.len() as u64 > MAX_ARCHIVE_ENTRY_BYTES {
        return Err(CoreError::ValidationError(format!(
            "Archive entry {} exceeds {} bytes",
            name, MAX_ARCHIVE_ENTRY_BYTES
        )));
    }
    Ok(bytes)
}

/// Relative, traversal-free path for an archive entry name.
fn safe_entry_path(name: &str) -> Option<PathBuf> {
    if name.contains('\\') || name.contains(':') {
        return None;
    }
    let mut path = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(path)
}
