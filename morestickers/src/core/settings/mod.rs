//! Settings Persistence System
//!
//! Provides persistent sticker settings with:
//! - Atomic file writes (temp file + rename)
//! - Schema validation with defaults
//! - Version stamping on load
//!
//! Storage location: {data_dir}/settings.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::core::fs::atomic_write_json_pretty;
use crate::core::transcode::{TargetFormat, TargetPolicy};

/// Settings schema version for migration support
pub const SETTINGS_VERSION: u32 = 1;

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";

/// Lock file name (advisory lock to prevent concurrent writers)
pub const SETTINGS_LOCK_FILE: &str = "settings.json.lock";

/// Default application data directory (`{platform data dir}/morestickers`).
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("morestickers")
}

/// Sticker settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StickerSettings {
    /// Schema version for migrations
    #[serde(default = "default_version")]
    pub version: u32,

    /// Transcoding engine settings
    #[serde(default)]
    pub engine: EngineSettings,

    /// Pack storage settings
    #[serde(default)]
    pub packs: PackSettings,

    /// Picker behaviour
    #[serde(default)]
    pub picker: PickerSettings,

    /// Transcode cache settings
    #[serde(default)]
    pub cache: CacheSettings,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

impl Default for StickerSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            engine: EngineSettings::default(),
            packs: PackSettings::default(),
            picker: PickerSettings::default(),
            cache: CacheSettings::default(),
        }
    }
}

impl StickerSettings {
    /// Normalizes and clamps settings so persisted state is always valid.
    ///
    /// Corrects bad values instead of failing, so corrupted/old configs still load.
    pub fn normalize(&mut self) {
        self.version = SETTINGS_VERSION;

        self.engine.max_memory_mb = self.engine.max_memory_mb.clamp(16, 4096);
        self.engine.transcode_timeout_ms = self.engine.transcode_timeout_ms.min(600_000);
        self.engine.max_concurrent_transcodes = self.engine.max_concurrent_transcodes.min(256);
        self.engine.wasm_sha256 = self
            .engine
            .wasm_sha256
            .take()
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| is_sha256_hex(s));
        self.engine.wasm_path = self.engine.wasm_path.take().filter(|p| !p.as_os_str().is_empty());
        self.engine.wasm_url = self
            .engine
            .wasm_url
            .take()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());

        self.picker.poll_interval_secs = self.picker.poll_interval_secs.min(24 * 60 * 60);
        if !self.picker.animated_target.is_animated_capable() {
            self.picker.animated_target = default_animated_target();
        }
        if !self.picker.static_target.is_still_capable() {
            self.picker.static_target = default_static_target();
        }

        self.cache.soft_entry_limit = self.cache.soft_entry_limit.clamp(1, 100_000);
    }

    /// Resolved pack directory, falling back to `{data_dir}/packs`.
    pub fn pack_dir(&self, data_dir: &Path) -> PathBuf {
        self.packs
            .directory
            .clone()
            .unwrap_or_else(|| data_dir.join("packs"))
    }

    /// Target format policy derived from the picker section.
    pub fn target_policy(&self) -> TargetPolicy {
        TargetPolicy {
            animated: self.picker.animated_target,
            still: self.picker.static_target,
        }
    }
}

fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}

// =============================================================================
// Sections
// =============================================================================

/// Transcoding engine settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    /// Local engine binary
    #[serde(default)]
    pub wasm_path: Option<PathBuf>,

    /// Remote engine binary (used when no local path is set)
    #[serde(default)]
    pub wasm_url: Option<String>,

    /// Expected SHA-256 of the engine binary
    #[serde(default)]
    pub wasm_sha256: Option<String>,

    /// Linear memory cap per conversion
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u32,

    /// Fuel per conversion (0 = unmetered)
    #[serde(default = "default_fuel")]
    pub fuel: u64,

    /// Soft timeout per conversion (0 = none)
    #[serde(default = "default_transcode_timeout_ms")]
    pub transcode_timeout_ms: u64,

    /// Parallel conversions (0 = number of CPUs)
    #[serde(default)]
    pub max_concurrent_transcodes: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            wasm_path: None,
            wasm_url: None,
            wasm_sha256: None,
            max_memory_mb: default_max_memory_mb(),
            fuel: default_fuel(),
            transcode_timeout_ms: default_transcode_timeout_ms(),
            max_concurrent_transcodes: 0,
        }
    }
}

fn default_max_memory_mb() -> u32 {
    256
}

fn default_fuel() -> u64 {
    1_000_000_000
}

fn default_transcode_timeout_ms() -> u64 {
    30_000
}

/// Pack storage settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PackSettings {
    /// Pack directory (defaults to `{data_dir}/packs`)
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Refresh the picker when the pack directory changes
    #[serde(default = "default_true")]
    pub watch: bool,
}

impl Default for PackSettings {
    fn default() -> Self {
        Self {
            directory: None,
            watch: true,
        }
    }
}

/// Picker behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PickerSettings {
    /// Metadata poll interval (0 = mount and explicit refresh only)
    #[serde(default)]
    pub poll_interval_secs: u64,

    /// Output format for animated stickers
    #[serde(default = "default_animated_target")]
    pub animated_target: TargetFormat,

    /// Output format for still stickers
    #[serde(default = "default_static_target")]
    pub static_target: TargetFormat,
}

impl Default for PickerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 0,
            animated_target: default_animated_target(),
            static_target: default_static_target(),
        }
    }
}

fn default_animated_target() -> TargetFormat {
    TargetFormat::Gif
}

fn default_static_target() -> TargetFormat {
    TargetFormat::Png
}

/// Transcode cache settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheSettings {
    /// Entry count above which a resource warning is logged
    #[serde(default = "default_soft_entry_limit")]
    pub soft_entry_limit: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            soft_entry_limit: default_soft_entry_limit(),
        }
    }
}

fn default_soft_entry_limit() -> usize {
    2_000
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Settings Manager
// =============================================================================

/// Settings manager for loading, saving, and resetting settings
pub struct SettingsManager {
    settings_path: PathBuf,
}

impl SettingsManager {
    /// Create a new settings manager with the given data directory
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            settings_path: data_dir.join(SETTINGS_FILE),
        }
    }

    fn lock_path(&self) -> PathBuf {
        self.settings_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(SETTINGS_LOCK_FILE)
    }

    fn with_lock<T>(
        &self,
        exclusive: bool,
        op: impl FnOnce() -> Result<T, String>,
    ) -> Result<T, String> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create settings directory: {}", e))?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())
            .map_err(|e| format!("Failed to open settings lock file: {}", e))?;

        if exclusive {
            fs2::FileExt::lock_exclusive(&lock_file)
                .map_err(|e| format!("Failed to lock settings file (exclusive): {}", e))?;
        } else {
            fs2::FileExt::lock_shared(&lock_file)
                .map_err(|e| format!("Failed to lock settings file (shared): {}", e))?;
        }

        let result = op();

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!("Failed to unlock settings lock file: {}", e);
        }

        result
    }

    /// Get the settings file path
    pub fn settings_path(&self) -> &PathBuf {
        &self.settings_path
    }

    /// Load settings from disk, returning defaults if the file doesn't exist
    pub fn load(&self) -> StickerSettings {
        let result = self.with_lock(false, || {
            if !self.settings_path.exists() {
                info!("Settings file not found, using defaults");
                return Ok(StickerSettings::default());
            }

            let content = fs::read_to_string(&self.settings_path)
                .map_err(|e| format!("Failed to read settings file: {}", e))?;

            let mut settings = serde_json::from_str::<StickerSettings>(&content)
                .map_err(|e| format!("Failed to parse settings file: {}", e))?;

            if settings.version != SETTINGS_VERSION {
                info!(
                    "Settings file has version {}, normalizing to {}",
                    settings.version, SETTINGS_VERSION
                );
            }
            settings.normalize();
            Ok(settings)
        });

        match result {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load settings, using defaults: {}", e);
                let mut settings = StickerSettings::default();
                settings.normalize();
                settings
            }
        }
    }

    /// Save settings to disk using atomic write (temp file + rename)
    pub fn save(&self, settings: &StickerSettings) -> Result<StickerSettings, String> {
        self.with_lock(true, || {
            let mut normalized = settings.clone();
            normalized.normalize();

            atomic_write_json_pretty(&self.settings_path, &normalized)
                .map_err(|e| format!("Failed to write settings: {}", e))?;

            info!("Settings saved to {:?}", self.settings_path);
            Ok(normalized)
        })
    }

    /// Reset settings to defaults and delete the settings file
    pub fn reset(&self) -> Result<StickerSettings, String> {
        self.with_lock(true, || {
            if self.settings_path.exists() {
                fs::remove_file(&self.settings_path)
                    .map_err(|e| format!("Failed to delete settings file: {}", e))?;
                info!("Settings file deleted");
            }
            let mut settings = StickerSettings::default();
            settings.normalize();
            Ok(settings)
        })
    }
}
