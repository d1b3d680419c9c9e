//! In-process pack store, for embedding hosts and tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::models::{RawStickerPack, StickerPackMeta};
use super::store::PackStore;
use crate::core::{CoreError, CoreResult};

/// Pack store backed by a vector; listing preserves insertion order
#[derive(Debug, Default)]
pub struct MemoryPackStore {
    packs: RwLock<Vec<RawStickerPack>>,
    unavailable: RwLock<Option<String>>,
    fetch_delay: Option<Duration>,
    list_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl MemoryPackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_packs(packs: Vec<RawStickerPack>) -> Self {
        Self {
            packs: RwLock::new(packs),
            ..Self::default()
        }
    }

    /// Delays every `get_raw_assets` call, to widen race windows.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Inserts or replaces a pack.
    pub async fn upsert(&self, pack: RawStickerPack) {
        let mut packs = self.packs.write().await;
        match packs.iter_mut().find(|p| p.meta.id == pack.meta.id) {
            Some(existing) => *existing = pack,
            None => packs.push(pack),
        }
    }

    /// Replaces the whole pack list (and its order).
    pub async fn replace_all(&self, packs: Vec<RawStickerPack>) {
        *self.packs.write().await = packs;
    }

    /// Makes `list_pack_metas` fail until cleared with `None`.
    pub async fn set_unavailable(&self, reason: Option<&str>) {
        *self.unavailable.write().await = reason.map(str::to_string);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackStore for MemoryPackStore {
    async fn list_pack_metas(&self) -> CoreResult<Vec<StickerPackMeta>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.unavailable.read().await.clone() {
            return Err(CoreError::MetadataUnavailable(reason));
        }
        Ok(self
            .packs
            .read()
            .await
            .iter()
            .map(|p| p.meta.clone())
            .collect())
    }

    async fn get_raw_assets(&self, pack_id: &str) -> CoreResult<Option<RawStickerPack>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .packs
            .read()
            .await
            .iter()
            .find(|p| p.meta.id == pack_id)
            .cloned())
    }

    async fn save_pack(&self, pack: RawStickerPack) -> CoreResult<()> {
        let mut packs = self.packs.write().await;
        if packs.iter().any(|p| p.meta.id == pack.meta.id) {
            return Err(CoreError::PackAlreadyExists(pack.meta.id));
        }
        packs.push(pack);
        Ok(())
    }

    async fn delete_pack(&self, pack_id: &str) -> CoreResult<bool> {
        let mut packs = self.packs.write().await;
        let before = packs.len();
        packs.retain(|p| p.meta.id != pack_id);
        Ok(packs.len() != before)
    }
}
