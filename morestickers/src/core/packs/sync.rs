//! Pack Set Synchronizer
//!
//! Re-reads the pack store and reports a change only when the set of pack ids
//! differs from the last observed one.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::models::StickerPackMeta;
use super::store::PackStore;
use crate::core::{CoreError, CoreResult};

/// Order-independent identity of a pack id set: sorted ids joined by `,`.
///
/// Ids containing `,` can collide (`["a,b"]` vs `["a", "b"]`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MetasSignature(String);

impl MetasSignature {
    /// Signature of the empty set; the state before the first poll.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn of_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ids: Vec<String> = ids.into_iter().map(|id| id.as_ref().to_string()).collect();
        ids.sort();
        Self(ids.join(","))
    }

    pub fn of_metas(metas: &[StickerPackMeta]) -> Self {
        Self::of_ids(metas.iter().map(|m| m.id.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MetasSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of one poll
#[derive(Debug, Clone)]
pub struct PollOutcome {
    /// Whether the id set differs from the previous signature
    pub changed: bool,
    /// Current metas, deduplicated by id, in store order
    pub metas: Vec<StickerPackMeta>,
    pub signature: MetasSignature,
}

/// Polls a pack store for id-set changes
#[derive(Clone)]
pub struct PackSetSynchronizer {
    store: Arc<dyn PackStore>,
}

impl PackSetSynchronizer {
    pub fn new(store: Arc<dyn PackStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn PackStore> {
        &self.store
    }

    /// Lists metas and compares their signature with `last`.
    ///
    /// Any store failure is reported as `MetadataUnavailable`.
    pub async fn poll(&self, last: &MetasSignature) -> CoreResult<PollOutcome> {
        let listed = self.store.list_pack_metas().await.map_err(|e| match e {
            CoreError::MetadataUnavailable(_) => e,
            other => CoreError::MetadataUnavailable(other.to_string()),
        })?;

        let mut seen = HashSet::new();
        let mut metas = Vec::with_capacity(listed.len());
        for meta in listed {
            if seen.insert(meta.id.clone()) {
                metas.push(meta);
            } else {
                tracing::warn!("Ignoring duplicate sticker pack id '{}'", meta.id);
            }
        }

        let signature = MetasSignature::of_metas(&metas);
        let changed = &signature != last;
        if changed {
            tracing::info!(
                "Sticker pack set changed ({} packs): [{}]",
                metas.len(),
                signature
            );
        }

        Ok(PollOutcome {
            changed,
            metas,
            signature,
        })
    }
}

impl fmt::Debug for PackSetSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackSetSynchronizer").finish_non_exhaustive()
    }
}
