//! Picker state tree
//!
//! The snapshot the presentation layer renders from. Only the controller
//! writes it; readers get clones through a `watch` channel.

use serde::Serialize;

use crate::core::packs::{MetasSignature, Sticker, StickerPack, StickerPackMeta};
use crate::core::transcode::EngineStatus;
use crate::core::PackId;

/// Pack lifecycle of the picker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PickerPhase {
    #[default]
    Uninitialized,
    MetasLoading,
    MetasReady,
    PacksResolving,
    PacksReady,
}

/// Whether external stickers can be shown at all
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Availability {
    #[default]
    Available,
    /// The engine could not be initialized; the picker shows native stickers only
    Unavailable { reason: String },
}

/// Engine readiness as seen by the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineView {
    pub status: EngineStatus,
    pub is_loaded: bool,
}

impl EngineView {
    pub fn from_status(status: EngineStatus) -> Self {
        Self {
            is_loaded: status.is_ready(),
            status,
        }
    }
}

/// A sticker matched by the current query, with its pack
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibleSticker {
    pub pack_id: PackId,
    pub sticker: Sticker,
}

/// Reactive picker state
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PickerState {
    pub phase: PickerPhase,
    pub sticker_pack_metas: Vec<StickerPackMeta>,
    pub sticker_packs: Vec<StickerPack>,
    pub selected_sticker_pack_id: Option<PackId>,
    pub query: String,
    pub engine: EngineView,
    pub availability: Availability,
    /// Signature of the pack set the current packs were resolved for
    pub signature: MetasSignature,
    /// Poll generation of the last applied resolution
    pub generation: u64,
    /// Last poll or resolution failure, cleared by the next success
    pub last_error: Option<String>,
}

impl PickerState {
    pub fn is_available(&self) -> bool {
        matches!(self.availability, Availability::Available)
    }

    pub fn selected_pack(&self) -> Option<&StickerPack> {
        let id = self.selected_sticker_pack_id.as_deref()?;
        self.sticker_packs.iter().find(|p| p.id == id)
    }

    /// Stickers matching the query, in pack then sticker order.
    ///
    /// A sticker matches when its title or its pack's title contains the
    /// query, ignoring case. An empty query matches everything.
    pub fn visible_stickers(&self) -> Vec<VisibleSticker> {
        let query = self.query.trim().to_lowercase();

        let mut visible = Vec::new();
        for pack in &self.sticker_packs {
            let pack_matches = query.is_empty() || pack.title.to_lowercase().contains(&query);
            for sticker in &pack.stickers {
                if pack_matches || sticker.title.to_lowercase().contains(&query) {
                    visible.push(VisibleSticker {
                        pack_id: pack.id.clone(),
                        sticker: sticker.clone(),
                    });
                }
            }
        }
        visible
    }

    /// Finds a sticker, looking in the selected pack first.
    pub fn find_sticker(&self, sticker_id: &str) -> Option<(&StickerPack, &Sticker)> {
        let selected = self
            .selected_pack()
            .and_then(|pack| pack.sticker(sticker_id).map(|s| (pack, s)));
        selected.or_else(|| {
            self.sticker_packs
                .iter()
                .find_map(|pack| pack.sticker(sticker_id).map(|s| (pack, s)))
        })
    }
}
