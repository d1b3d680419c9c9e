//! Transcode Cache
//!
//! Memoizes engine output by content identity so a sticker's bytes are
//! converted at most once per target format for the whole session.
//!
//! Entries are reference counted by the packs that hold them. When the last
//! holder is released the entry is evicted and its object URL revoked.
//! Failed conversions are never cached.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{OnceCell, RwLock};

use crate::core::transcode::{EngineHandle, SourceAsset, SourceFormat, TargetFormat};
use crate::core::{CoreResult, ObjectUrl, PackId, RenderableAsset};

/// Default number of entries after which a warning is logged
pub const DEFAULT_SOFT_ENTRY_LIMIT: usize = 2000;

/// Content identity of a conversion
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// SHA-256 of the source bytes
    pub content: String,
    /// Format the bytes are handed to the engine as
    pub source: SourceFormat,
    /// Requested output format
    pub target: TargetFormat,
}

impl CacheKey {
    pub fn new(asset: &SourceAsset, target: TargetFormat) -> Self {
        Self {
            content: asset.content_hash().to_string(),
            source: asset.format,
            target,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.content.get(..12).unwrap_or(&self.content);
        write!(f, "{}:{}", short, self.target)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Converted entries currently held
    pub entries: usize,
    /// Lookups served without invoking the engine
    pub hits: u64,
    /// Lookups that invoked the engine
    pub misses: u64,
    /// Entries evicted (object URL revoked)
    pub evictions: u64,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct CacheSlot {
    cell: Arc<OnceCell<RenderableAsset>>,
    holders: HashSet<PackId>,
    in_flight: usize,
}

impl CacheSlot {
    fn is_unheld(&self) -> bool {
        self.holders.is_empty() && self.in_flight == 0
    }

    fn url(&self) -> Option<ObjectUrl> {
        self.cell.get().map(|asset| asset.url.clone())
    }
}

/// Session-scoped conversion cache
pub struct TranscodeCache {
    engine: Arc<EngineHandle>,
    slots: RwLock<HashMap<CacheKey, CacheSlot>>,
    stats: RwLock<CacheStats>,
    soft_entry_limit: usize,
    limit_warned: AtomicBool,
}

impl TranscodeCache {
    pub fn new(engine: Arc<EngineHandle>, soft_entry_limit: usize) -> Self {
        Self {
            engine,
            slots: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
            soft_entry_limit: soft_entry_limit.max(1),
            limit_warned: AtomicBool::new(false),
        }
    }

    pub fn engine(&self) -> &Arc<EngineHandle> {
        &self.engine
    }

    /// Returns the renderable asset for `asset`, converting it on first use.
    ///
    /// `holder` (a pack id) keeps the entry alive until it is released.
    /// Concurrent lookups of the same content share one conversion.
    pub async fn get_or_convert(
        &self,
        holder: &str,
        asset: &SourceAsset,
        target: TargetFormat,
    ) -> CoreResult<RenderableAsset> {
        let key = CacheKey::new(asset, target);

        let cell = {
            let mut slots = self.slots.write().await;
            let slot = slots.entry(key.clone()).or_default();
            slot.holders.insert(holder.to_string());

            if let Some(ready) = slot.cell.get() {
                let ready = ready.clone();
                drop(slots);
                self.record_lookup(true).await;
                tracing::debug!("Transcode cache hit for {}", key);
                return Ok(ready);
            }

            slot.in_flight += 1;
            Arc::clone(&slot.cell)
        };

        let mut converted = false;
        let result = cell
            .get_or_try_init(|| {
                converted = true;
                self.engine.convert(asset, target)
            })
            .await
            .cloned();

        let orphaned = {
            let mut slots = self.slots.write().await;
            let unheld = match slots.get_mut(&key) {
                Some(slot) if Arc::ptr_eq(&slot.cell, &cell) => {
                    slot.in_flight = slot.in_flight.saturating_sub(1);
                    Some(slot.is_unheld())
                }
                _ => None,
            };
            match unheld {
                Some(true) => slots.remove(&key).and_then(|slot| slot.url()),
                Some(false) => None,
                // Cleared while converting: nobody else will revoke our output
                None if converted => result.as_ref().ok().map(|asset| asset.url.clone()),
                None => None,
            }
        };
        if let Some(url) = orphaned {
            self.revoke_all(vec![url]).await;
        }

        self.record_lookup(!converted).await;
        if result.is_ok() && converted {
            self.check_soft_limit().await;
        }

        result
    }

    /// Drops every hold of `pack_id`. Returns the number of evicted entries.
    pub async fn release_pack(&self, pack_id: &str) -> usize {
        self.release_where(|holder| holder == pack_id).await
    }

    /// Releases every pack not in `keep`. Returns the number of evicted entries.
    pub async fn retain_packs(&self, keep: &[PackId]) -> usize {
        let keep: HashSet<&str> = keep.iter().map(String::as_str).collect();
        self.release_where(|holder| !keep.contains(holder)).await
    }

    async fn release_where(&self, mut release: impl FnMut(&str) -> bool) -> usize {
        let urls = {
            let mut slots = self.slots.write().await;
            let mut urls = Vec::new();
            slots.retain(|_, slot| {
                slot.holders.retain(|holder| !release(holder.as_str()));
                if slot.is_unheld() {
                    urls.extend(slot.url());
                    false
                } else {
                    true
                }
            });
            urls
        };
        self.revoke_all(urls).await
    }

    /// Evicts every entry and revokes its URL.
    pub async fn clear(&self) -> usize {
        let urls: Vec<ObjectUrl> = {
            let mut slots = self.slots.write().await;
            slots.drain().filter_map(|(_, slot)| slot.url()).collect()
        };
        let evicted = self.revoke_all(urls).await;
        self.limit_warned.store(false, Ordering::SeqCst);
        evicted
    }

    async fn revoke_all(&self, urls: Vec<ObjectUrl>) -> usize {
        if urls.is_empty() {
            return 0;
        }
        for url in &urls {
            self.engine.blobs().revoke(url).await;
        }
        let mut stats = self.stats.write().await;
        stats.evictions += urls.len() as u64;
        tracing::debug!("Evicted {} transcode cache entries", urls.len());
        urls.len()
    }

    /// Converted entries currently held.
    pub async fn len(&self) -> usize {
        self.slots
            .read()
            .await
            .values()
            .filter(|slot| slot.cell.initialized())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, key: &CacheKey) -> bool {
        self.slots
            .read()
            .await
            .get(key)
            .is_some_and(|slot| slot.cell.initialized())
    }

    /// Packs currently holding `key`.
    pub async fn holders(&self, key: &CacheKey) -> Vec<PackId> {
        let mut holders: Vec<PackId> = self
            .slots
            .read()
            .await
            .get(key)
            .map(|slot| slot.holders.iter().cloned().collect())
            .unwrap_or_default();
        holders.sort();
        holders
    }

    pub async fn stats(&self) -> CacheStats {
        let mut stats = self.stats.read().await.clone();
        stats.entries = self.len().await;
        stats
    }

    async fn record_lookup(&self, hit: bool) {
        let mut stats = self.stats.write().await;
        if hit {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        let total = stats.hits + stats.misses;
        if total > 0 {
            stats.hit_rate = stats.hits as f64 / total as f64;
        }
    }

    async fn check_soft_limit(&self) {
        let entries = self.len().await;
        if entries > self.soft_entry_limit && !self.limit_warned.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                "Transcode cache holds {} entries (soft limit {}); release unused packs to free memory",
                entries,
                self.soft_entry_limit
            );
        }
    }
}

impl fmt::Debug for TranscodeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscodeCache")
            .field("soft_entry_limit", &self.soft_entry_limit)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
