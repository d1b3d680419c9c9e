//! MoreStickers Error Definitions
//!
//! Defines error types used throughout the project.

use thiserror::Error;

use super::{PackId, StickerId};

/// Core engine error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Engine Errors
    // =========================================================================
    #[error("Transcoding engine is not loaded yet")]
    EngineNotReady,

    #[error("Transcoding engine failed to initialize: {0}")]
    EngineInitFailed(String),

    #[error("Engine payload checksum mismatch (expected {expected}, got {actual})")]
    ChecksumMismatch { expected: String, actual: String },

    // =========================================================================
    // Transcode Errors
    // =========================================================================
    #[error("Transcode failed: {0}")]
    TranscodeFailed(String),

    #[error("Transcode timed out: {0}")]
    TranscodeTimeout(String),

    // =========================================================================
    // Pack Errors
    // =========================================================================
    #[error("Sticker pack metadata unavailable: {0}")]
    MetadataUnavailable(String),

    #[error("Sticker pack not found: {0}")]
    PackNotFound(PackId),

    #[error("Sticker pack already exists: {0}")]
    PackAlreadyExists(PackId),

    #[error("Invalid pack manifest: {0}")]
    InvalidPackManifest(String),

    #[error("Sticker not found: {0}")]
    StickerNotFound(StickerId),

    #[error("Sticker has no renderable asset: {0}")]
    StickerUnavailable(StickerId),

    // =========================================================================
    // Picker Errors
    // =========================================================================
    #[error("Picker controller is closed")]
    ControllerClosed,

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core engine result type
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Whether the failure is expected to clear up on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::EngineNotReady
                | CoreError::MetadataUnavailable(_)
                | CoreError::TranscodeTimeout(_)
        )
    }

    /// Whether the failure only affects a single sticker.
    pub fn is_sticker_local(&self) -> bool {
        matches!(
            self,
            CoreError::TranscodeFailed(_) | CoreError::TranscodeTimeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::PackNotFound("line-1234".to_string());
        assert_eq!(err.to_string(), "Sticker pack not found: line-1234");

        let err = CoreError::TranscodeFailed("unsupported codec".to_string());
        assert!(err.to_string().contains("unsupported codec"));

        let err = CoreError::ChecksumMismatch {
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        assert!(err.to_string().contains("expected aa"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(CoreError::EngineNotReady.is_transient());
        assert!(CoreError::MetadataUnavailable("io".to_string()).is_transient());
        assert!(!CoreError::EngineInitFailed("bad wasm".to_string()).is_transient());
        assert!(!CoreError::PackNotFound("x".to_string()).is_transient());
    }

    #[test]
    fn test_sticker_local_classification() {
        assert!(CoreError::TranscodeFailed("x".to_string()).is_sticker_local());
        assert!(CoreError::TranscodeTimeout("x".to_string()).is_sticker_local());
        assert!(!CoreError::EngineNotReady.is_sticker_local());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: CoreError = io.into();
        assert!(matches!(err, CoreError::IoError(_)));
    }
}
