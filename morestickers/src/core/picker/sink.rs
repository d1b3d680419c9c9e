//! Host handoff for committed stickers

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::transcode::TargetFormat;
use crate::core::{ChannelId, CoreResult, PackId, RenderableAsset, StickerId};

/// A sticker the user picked, ready to be uploaded by the host
#[derive(Debug, Clone)]
pub struct StickerSubmission {
    pub channel_id: ChannelId,
    pub pack_id: PackId,
    pub sticker_id: StickerId,
    pub asset: RenderableAsset,
    /// Transcoded bytes behind `asset.url`
    pub data: Arc<Vec<u8>>,
    /// Upload file name, `{sticker_id}.{ext}`
    pub filename: String,
}

impl StickerSubmission {
    pub fn filename_for(sticker_id: &str, mime_type: &str) -> String {
        let extension = [TargetFormat::Gif, TargetFormat::Webp, TargetFormat::Png]
            .into_iter()
            .find(|format| format.mime_type() == mime_type)
            .map_or("bin", TargetFormat::extension);
        format!("{}.{}", sticker_id, extension)
    }
}

/// Receives committed stickers (the host's upload path)
#[async_trait]
pub trait StickerSink: Send + Sync {
    async fn submit(&self, submission: StickerSubmission) -> CoreResult<()>;
}
