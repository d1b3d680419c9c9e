//! Sticker Transcoding Module
//!
//! Hosts the WASM multimedia engine that turns source sticker assets into
//! renderable GIF/WebP/PNG output.
//!
//! - `media`: source/target formats and format detection
//! - `blobs`: object URL registry for transcoded bytes
//! - `payload`: locating, downloading and verifying the engine binary
//! - `wasm`: wasmtime host for the guest engine ABI
//! - `state`: shared engine handle with single-flight initialization

mod blobs;
mod media;
mod payload;
mod state;
mod wasm;

pub use blobs::{BlobStats, BlobStore, OBJECT_URL_PREFIX};
pub use media::{SourceAsset, SourceFormat, TargetFormat, TargetPolicy};
pub use payload::{sha256_hex, verify_checksum, EnginePayload, DOWNLOAD_TIMEOUT_SECS};
pub use state::{EngineHandle, EngineOptions, EngineStatus};
pub use wasm::{WasmEngineConfig, WasmEngineLoader, WasmTranscoder, ABI_VERSION};

#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
pub(crate) use media::fixtures;
#[cfg(test)]
pub(crate) use wasm::test_engines;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::{CoreError, CoreResult};

/// Failures raised by a transcoder backend
#[derive(Error, Debug)]
pub enum TranscodeError {
    /// Negative status returned by the guest engine
    #[error("engine returned error code {code}: {message}")]
    Guest { code: i64, message: &'static str },

    /// The guest trapped (including fuel exhaustion and memory limits)
    #[error("engine trapped: {0}")]
    Trap(String),

    /// The guest violated the host/guest calling convention
    #[error("engine ABI violation: {0}")]
    Abi(String),

    /// The returned output range lies outside guest memory
    #[error("engine output out of bounds (ptr {ptr}, len {len})")]
    OutputOutOfBounds { ptr: u32, len: u32 },
}

/// Human-readable text for guest error codes.
pub fn guest_error_message(code: i64) -> &'static str {
    match code {
        -1 => "unsupported input format",
        -2 => "corrupt input",
        -3 => "unsupported target format",
        -4 => "out of memory",
        _ => "unknown engine error",
    }
}

impl TranscodeError {
    pub fn guest(code: i64) -> Self {
        TranscodeError::Guest {
            code,
            message: guest_error_message(code),
        }
    }
}

impl From<TranscodeError> for CoreError {
    fn from(err: TranscodeError) -> Self {
        CoreError::TranscodeFailed(err.to_string())
    }
}

/// A loaded engine able to convert bytes between formats.
///
/// Implementations are called from blocking threads.
pub trait Transcoder: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn transcode(
        &self,
        input: &[u8],
        source: SourceFormat,
        target: TargetFormat,
    ) -> Result<Vec<u8>, TranscodeError>;
}

/// Produces a [`Transcoder`]; invoked at most once per [`EngineHandle`].
#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn load(&self) -> CoreResult<Arc<dyn Transcoder>>;
}
