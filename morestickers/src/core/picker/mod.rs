//! Sticker Picker Module
//!
//! Reactive picker state and the controller that orchestrates engine,
//! packs and cache for one mounted picker.

mod controller;
mod sink;
mod state;

pub use controller::{PickerController, PickerDeps, PickerOptions};
pub use sink::{StickerSink, StickerSubmission};
pub use state::{Availability, EngineView, PickerPhase, PickerState, VisibleSticker};
