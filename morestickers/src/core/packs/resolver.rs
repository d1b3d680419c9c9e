//! Pack Content Resolver
//!
//! Materializes full packs: reads raw stickers from the store and converts
//! each one through the transcode cache. Stickers within a pack and packs
//! within a batch resolve concurrently.

use std::sync::Arc;

use futures::future::join_all;

use super::models::{RawSticker, Sticker, StickerPack, StickerRender};
use super::store::PackStore;
use crate::core::cache::TranscodeCache;
use crate::core::transcode::{SourceFormat, TargetPolicy};
use crate::core::{CoreError, CoreResult, PackId};

/// Resolves pack ids into renderable packs
#[derive(Clone)]
pub struct PackResolver {
    store: Arc<dyn PackStore>,
    cache: Arc<TranscodeCache>,
    policy: TargetPolicy,
}

impl PackResolver {
    pub fn new(store: Arc<dyn PackStore>, cache: Arc<TranscodeCache>, policy: TargetPolicy) -> Self {
        Self {
            store,
            cache,
            policy,
        }
    }

    pub fn cache(&self) -> &Arc<TranscodeCache> {
        &self.cache
    }

    pub fn policy(&self) -> TargetPolicy {
        self.policy
    }

    /// Resolves one pack. `Ok(None)` when the pack no longer exists.
    ///
    /// Waits for the engine; fails only if the store fails or the engine
    /// cannot be initialized. Individual sticker failures become placeholders.
    pub async fn resolve_pack(&self, pack_id: &str) -> CoreResult<Option<StickerPack>> {
        let Some(raw) = self.store.get_raw_assets(pack_id).await? else {
            tracing::debug!("Sticker pack '{}' no longer exists", pack_id);
            return Ok(None);
        };

        self.cache.engine().ensure_loaded().await?;

        let stickers = join_all(
            raw.stickers
                .iter()
                .map(|sticker| self.resolve_sticker(pack_id, sticker)),
        )
        .await;

        let placeholders = stickers.iter().filter(|s| s.is_placeholder()).count();
        if placeholders > 0 {
            tracing::warn!(
                "Sticker pack '{}': {} of {} stickers could not be rendered",
                pack_id,
                placeholders,
                stickers.len()
            );
        }

        Ok(Some(StickerPack {
            id: raw.meta.id,
            title: raw.meta.title,
            logo: raw.meta.logo,
            stickers,
        }))
    }

    async fn resolve_sticker(&self, pack_id: &str, raw: &RawSticker) -> Sticker {
        let Some(source) = &raw.source else {
            return Sticker {
                id: raw.id.clone(),
                title: raw.title.clone(),
                source_format: SourceFormat::Unknown,
                source_mime_type: None,
                content_hash: String::new(),
                render: StickerRender::Placeholder {
                    reason: "source unavailable".to_string(),
                },
            };
        };

        let target = self.policy.target_for(source.format);
        let render = match self.cache.get_or_convert(pack_id, source, target).await {
            Ok(asset) => StickerRender::Ready { asset },
            Err(e) => {
                if e.is_sticker_local() {
                    tracing::debug!("Sticker '{}' in '{}' degraded: {}", raw.id, pack_id, e);
                } else {
                    tracing::warn!("Sticker '{}' in '{}' degraded: {}", raw.id, pack_id, e);
                }
                StickerRender::Placeholder {
                    reason: e.to_string(),
                }
            }
        };

        Sticker {
            id: raw.id.clone(),
            title: raw.title.clone(),
            source_format: source.format,
            source_mime_type: source.mime_type.clone(),
            content_hash: source.content_hash().to_string(),
            render,
        }
    }

    /// Resolves a batch concurrently, keeping input order and dropping packs
    /// that no longer exist or failed to load.
    ///
    /// An engine initialization failure aborts the batch.
    pub async fn resolve_packs(&self, pack_ids: &[PackId]) -> CoreResult<Vec<StickerPack>> {
        let results = join_all(pack_ids.iter().map(|id| self.resolve_pack(id))).await;

        let mut packs = Vec::with_capacity(pack_ids.len());
        for (pack_id, result) in pack_ids.iter().zip(results) {
            match result {
                Ok(Some(pack)) => packs.push(pack),
                Ok(None) => {}
                Err(e @ CoreError::EngineInitFailed(_)) => return Err(e),
                Err(e) => tracing::warn!("Failed to resolve sticker pack '{}': {}", pack_id, e),
            }
        }
        Ok(packs)
    }
}

impl std::fmt::Debug for PackResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackResolver")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
