//! Sticker Packs Module
//!
//! Pack storage, metadata polling and on-demand pack resolution.

mod archive;
mod memory;
mod models;
mod resolver;
mod store;
mod sync;
mod watcher;

pub use archive::{import_from_reader, import_pack_archive, MAX_ARCHIVE_ENTRY_BYTES};
pub use memory::MemoryPackStore;
pub use models::{
    ManifestSticker, PackLogo, PackManifest, RawSticker, RawStickerPack, Sticker, StickerPack,
    StickerPackMeta, StickerRender,
};
pub use resolver::PackResolver;
pub use store::{mime_from_extension, DirectoryPackStore, PackStore, MANIFEST_FILE};
pub use sync::{MetasSignature, PackSetSynchronizer, PollOutcome};
pub use watcher::{PackDirectoryWatcher, WATCH_DEBOUNCE};

#[cfg(test)]
pub(crate) use models::fixtures;
