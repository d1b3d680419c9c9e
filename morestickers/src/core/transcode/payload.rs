//! Engine Payload
//!
//! Locates and fetches the WASM engine binary, with optional SHA-256
//! verification. The binary may live on disk, behind an HTTP(S) URL
//! (feature `remote-engine`), or be embedded by the host.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::core::settings::EngineSettings;
use crate::core::{CoreError, CoreResult};

/// Timeout for remote payload downloads
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 120;

/// Where the engine binary comes from
#[derive(Clone)]
pub enum EnginePayload {
    /// Local `.wasm` (or `.wat`) file
    File(PathBuf),
    /// Remote binary
    Url(String),
    /// Bytes supplied by the host
    Bytes(Arc<Vec<u8>>),
}

impl fmt::Debug for EnginePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnginePayload::File(path) => f.debug_tuple("File").field(path).finish(),
            EnginePayload::Url(url) => f.debug_tuple("Url").field(url).finish(),
            EnginePayload::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
        }
    }
}

impl fmt::Display for EnginePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnginePayload::File(path) => write!(f, "{}", path.display()),
            EnginePayload::Url(url) => f.write_str(url),
            EnginePayload::Bytes(bytes) => write!(f, "<embedded {} bytes>", bytes.len()),
        }
    }
}

impl EnginePayload {
    /// Picks the payload from settings: a local path wins over a URL.
    pub fn from_settings(engine: &EngineSettings) -> Option<Self> {
        if let Some(path) = &engine.wasm_path {
            return Some(EnginePayload::File(path.clone()));
        }
        engine.wasm_url.clone().map(EnginePayload::Url)
    }

    /// Fetches the binary.
    pub async fn fetch(&self) -> CoreResult<Vec<u8>> {
        match self {
            EnginePayload::File(path) => tokio::fs::read(path).await.map_err(|e| {
                CoreError::EngineInitFailed(format!(
                    "Failed to read engine binary {}: {}",
                    path.display(),
                    e
                ))
            }),
            EnginePayload::Url(url) => download(url).await,
            EnginePayload::Bytes(bytes) => Ok(bytes.as_ref().clone()),
        }
    }
}

#[cfg(feature = "remote-engine")]
async fn download(url: &str) -> CoreResult<Vec<u8>> {
    let lower = url.to_ascii_lowercase();
    if !lower.starts_with("https://") && !lower.starts_with("http://") {
        return Err(CoreError::EngineInitFailed(format!(
            "Engine URL must be http(s): {}",
            url
        )));
    }

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
        .build()
        .map_err(|e| CoreError::EngineInitFailed(format!("Failed to create HTTP client: {}", e)))?;

    tracing::info!("Downloading transcoding engine from {}", url);

    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| CoreError::EngineInitFailed(format!("Engine download failed: {}", e)))?;

    let bytes = response
        .bytes()
        .await
        .map_err(|e| CoreError::EngineInitFailed(format!("Engine download failed: {}", e)))?;

    Ok(bytes.to_vec())
}

#[cfg(not(feature = "remote-engine"))]
async fn download(url: &str) -> CoreResult<Vec<u8>> {
    Err(CoreError::EngineInitFailed(format!(
        "Remote engine support is disabled (feature `remote-engine`): {}",
        url
    )))
}

/// SHA-256 of `bytes`, lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Verifies `bytes` against an expected SHA-256 (case-insensitive).
pub fn verify_checksum(bytes: &[u8], expected_sha256: &str) -> CoreResult<()> {
    let actual = sha256_hex(bytes);
    if actual.eq_ignore_ascii_case(expected_sha256.trim()) {
        Ok(())
    } else {
        Err(CoreError::ChecksumMismatch {
            expected: expected_sha256.trim().to_ascii_lowercase(),
            actual,
        })
    }
}
