//! Object URL registry for transcoded bytes
//!
//! Every conversion registers its output here and receives an object URL.
//! Nothing in this module revokes URLs on its own: the transcode cache does
//! that when the last pack holding an entry is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::core::{ObjectUrl, RenderableAsset};

/// Scheme prefix of URLs handed out by [`BlobStore`]
pub const OBJECT_URL_PREFIX: &str = "blob:morestickers/";

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobStats {
    /// Live URLs
    pub live: usize,
    /// Bytes held by live URLs
    pub live_bytes: u64,
    /// URLs created since startup
    pub created: u64,
    /// URLs revoked since startup
    pub revoked: u64,
}

/// In-process object URL registry
#[derive(Debug, Default)]
pub struct BlobStore {
    entries: RwLock<HashMap<ObjectUrl, Arc<Vec<u8>>>>,
    created: AtomicU64,
    revoked: AtomicU64,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers bytes and returns a fresh object URL for them.
    pub async fn create(&self, data: Vec<u8>, mime_type: &str) -> RenderableAsset {
        let url = format!("{}{}", OBJECT_URL_PREFIX, ulid::Ulid::new());
        let size_bytes = data.len() as u64;

        self.entries
            .write()
            .await
            .insert(url.clone(), Arc::new(data));
        self.created.fetch_add(1, Ordering::SeqCst);

        RenderableAsset {
            url,
            mime_type: mime_type.to_string(),
            size_bytes,
        }
    }

    /// Bytes behind a live URL.
    pub async fn get(&self, url: &str) -> Option<Arc<Vec<u8>>> {
        self.entries
            .read()
            .await
            .get(url)
            .map(Arc::clone)
    }

    /// Revokes a URL. Returns `false` if it was not live.
    pub async fn revoke(&self, url: &str) -> bool {
        let removed = self.entries.write().await.remove(url).is_some();
        if removed {
            self.revoked.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }

    pub async fn contains(&self, url: &str) -> bool {
        self.entries.read().await.contains_key(url)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn stats(&self) -> BlobStats {
        let entries = self.entries.read().await;
        BlobStats {
            live: entries.len(),
            live_bytes: entries.values().map(|data| data.len() as u64).sum(),
            created: self.created.load(Ordering::SeqCst),
            revoked: self.revoked.load(Ordering::SeqCst),
        }
    }
}
