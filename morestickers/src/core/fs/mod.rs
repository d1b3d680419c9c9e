//! Filesystem utilities.
//!
//! Safe primitives for pack manifests and settings: identifier validation and
//! crash-tolerant writes.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::CoreResult;

// =============================================================================
// Path Validation Utilities
// =============================================================================

/// Validates that an identifier component is safe to use in file paths.
///
/// Rejects empty strings, path traversal sequences (`..`), path separators
/// (`/`, `\`), drive letter indicators (`:`) and control characters.
///
/// Pack ids and sticker file names MUST go through this before being joined
/// onto the pack directory.
pub fn validate_path_id_component(id: &str, label: &str) -> Result<(), String> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(format!("{label} is empty or contains only whitespace"));
    }
    if trimmed != id {
        return Err(format!("Invalid {label}: has leading or trailing whitespace"));
    }
    if trimmed.contains("..")
        || trimmed.contains('/')
        || trimmed.contains('\\')
        || trimmed.contains(':')
    {
        return Err(format!(
            "Invalid {label}: contains path traversal characters"
        ));
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(format!("Invalid {label}: contains control characters"));
    }
    Ok(())
}

/// Write bytes to `path` using an atomic replace pattern.
///
/// - Write to a sibling temporary file.
/// - Flush and sync the temp file.
/// - Swap into place by renaming.
/// - If the destination exists, it is first moved aside as a `.bak` file, then removed.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = tmp_path_for(path);
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    atomic_replace(path, &tmp_path)?;
    Ok(())
}

/// Write a JSON file atomically with pretty formatting.
pub fn atomic_write_json_pretty<T: serde::Serialize>(path: &Path, value: &T) -> CoreResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "tmp".to_string());
    tmp.set_file_name(format!("{file_name}.tmp"));
    tmp
}

fn bak_path_for(path: &Path) -> PathBuf {
    let mut bak = path.to_path_buf();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "bak".to_string());
    bak.set_file_name(format!("{file_name}.bak"));
    bak
}

fn atomic_replace(dest: &Path, src_tmp: &Path) -> CoreResult<()> {
    if !dest.exists() {
        std::fs::rename(src_tmp, dest)?;
        return Ok(());
    }

    // Windows: rename-over-existing may fail depending on filesystem; use a backup swap.
    let bak = bak_path_for(dest);
    if bak.exists() {
        let _ = std::fs::remove_file(&bak);
    }

    std::fs::rename(dest, &bak)?;
    match std::fs::rename(src_tmp, dest) {
        Ok(()) => {
            let _ = std::fs::remove_file(&bak);
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::rename(&bak, dest);
            Err(e.into())
        }
    }
}
