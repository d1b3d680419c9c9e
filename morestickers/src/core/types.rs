//! MoreStickers Core Type Definitions
//!
//! Defines fundamental types used throughout the project.

use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Sticker pack identifier (stable across polls)
pub type PackId = String;

/// Sticker identifier (unique within its pack)
pub type StickerId = String;

/// Host channel identifier
pub type ChannelId = String;

/// Object URL handed out for a renderable asset (`blob:morestickers/<ulid>`)
pub type ObjectUrl = String;

// =============================================================================
// Renderable Assets
// =============================================================================

/// A transcoded, renderable sticker asset.
///
/// The bytes live in the [`BlobStore`](crate::core::transcode::BlobStore) under
/// `url` until the URL is revoked.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderableAsset {
    /// Object URL of the transcoded bytes
    pub url: ObjectUrl,
    /// MIME type of the transcoded bytes
    pub mime_type: String,
    /// Size of the transcoded bytes
    pub size_bytes: u64,
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
