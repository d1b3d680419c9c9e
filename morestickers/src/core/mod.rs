//! MoreStickers Core Engine
//!
//! Sticker pack acquisition, caching and transcoding.
//! Handles the transcoding engine, pack storage and resolution, and the
//! picker state that ties them together.

pub mod cache;
pub mod fs;
pub mod packs;
pub mod picker;
pub mod settings;
pub mod transcode;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;

#[cfg(test)]
mod tests_pipeline;
