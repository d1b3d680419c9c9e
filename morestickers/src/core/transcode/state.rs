//! Shared transcoding engine state
//!
//! One [`EngineHandle`] owns the engine for a session. Initialization runs at
//! most once no matter how many callers race on [`EngineHandle::ensure_loaded`];
//! a failed initialization is latched so the feature degrades instead of
//! retrying on every sticker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, OnceCell, Semaphore};

use super::{BlobStore, EngineLoader, SourceAsset, TargetFormat, Transcoder};
use crate::core::settings::EngineSettings;
use crate::core::{CoreError, CoreResult, RenderableAsset};

/// Engine lifecycle as observed by the picker
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "camelCase")]
pub enum EngineStatus {
    /// `ensure_loaded` has not been called
    #[default]
    Idle,
    /// Initialization in flight
    Loading,
    /// Conversions are accepted
    Ready,
    /// Initialization failed; the handle stays unusable
    Failed(String),
}

impl EngineStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, EngineStatus::Ready)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, EngineStatus::Failed(_))
    }
}

/// Conversion scheduling options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Parallel conversions (0 = number of CPUs)
    pub max_concurrent: usize,
    /// Soft per-conversion timeout
    pub timeout: Option<Duration>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 0,
            timeout: None,
        }
    }
}

impl EngineOptions {
    pub fn from_settings(engine: &EngineSettings) -> Self {
        Self {
            max_concurrent: engine.max_concurrent_transcodes as usize,
            timeout: (engine.transcode_timeout_ms > 0)
                .then(|| Duration::from_millis(engine.transcode_timeout_ms)),
        }
    }

    fn permits(&self) -> usize {
        if self.max_concurrent == 0 {
            num_cpus::get().max(1)
        } else {
            self.max_concurrent
        }
    }
}

/// Shared handle to the transcoding engine.
pub struct EngineHandle {
    loader: Arc<dyn EngineLoader>,
    transcoder: OnceCell<Arc<dyn Transcoder>>,
    status: watch::Sender<EngineStatus>,
    permits: Arc<Semaphore>,
    blobs: Arc<BlobStore>,
    timeout: Option<Duration>,
    conversions: AtomicU64,
}

impl EngineHandle {
    pub fn new(
        loader: Arc<dyn EngineLoader>,
        blobs: Arc<BlobStore>,
        options: EngineOptions,
    ) -> Self {
        let (status, _) = watch::channel(EngineStatus::Idle);
        Self {
            loader,
            transcoder: OnceCell::new(),
            status,
            permits: Arc::new(Semaphore::new(options.permits())),
            blobs,
            timeout: options.timeout,
            conversions: AtomicU64::new(0),
        }
    }

    /// Loads the engine once. Concurrent callers wait on the same
    /// initialization and all observe its outcome.
    pub async fn ensure_loaded(&self) -> CoreResult<()> {
        if let Some(reason) = self.failure_reason() {
            return Err(CoreError::EngineInitFailed(reason));
        }

        self.transcoder
            .get_or_try_init(|| async {
                // Another caller may have failed while we waited for the cell
                if let Some(reason) = self.failure_reason() {
                    return Err(CoreError::EngineInitFailed(reason));
                }

                self.status.send_replace(EngineStatus::Loading);
                tracing::info!("Initializing transcoding engine");

                self.loader.load().await.map_err(|e| {
                    let reason = match e {
                        CoreError::EngineInitFailed(reason) => reason,
                        other => other.to_string(),
                    };
                    tracing::error!("Transcoding engine unavailable: {}", reason);
                    self.status
                        .send_replace(EngineStatus::Failed(reason.clone()));
                    CoreError::EngineInitFailed(reason)
                })
            })
            .await?;

        // Ready is only published once the cell holds the engine
        self.status.send_if_modified(|status| {
            if status.is_ready() {
                false
            } else {
                *status = EngineStatus::Ready;
                true
            }
        });

        Ok(())
    }

    fn failure_reason(&self) -> Option<String> {
        match &*self.status.borrow() {
            EngineStatus::Failed(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.transcoder.initialized()
    }

    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.status.subscribe()
    }

    /// Name of the loaded engine.
    pub fn engine_name(&self) -> Option<String> {
        self.transcoder.get().map(|t| t.name().to_string())
    }

    /// Registry holding every URL this handle created.
    pub fn blobs(&self) -> &Arc<BlobStore> {
        &self.blobs
    }

    /// Number of conversions that reached the engine.
    pub fn conversion_count(&self) -> u64 {
        self.conversions.load(Ordering::SeqCst)
    }

    /// Converts a source asset and registers the output under a new object URL.
    ///
    /// The URL is never revoked here; whoever holds the returned asset owns it.
    pub async fn convert(
        &self,
        asset: &SourceAsset,
        target: TargetFormat,
    ) -> CoreResult<RenderableAsset> {
        let transcoder = self
            .transcoder
            .get()
            .cloned()
            .ok_or(CoreError::EngineNotReady)?;

        let source = asset.format;
        let work = async {
            let permit = Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .map_err(|_| CoreError::Internal("Transcode semaphore closed".to_string()))?;

            self.conversions.fetch_add(1, Ordering::SeqCst);
            let data = Arc::clone(&asset.data);
            // The permit travels with the blocking job so a timed-out conversion
            // still counts against the limit until it really finishes.
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                transcoder.transcode(&data, source, target)
            })
            .await
            .map_err(|e| CoreError::Internal(format!("Transcode task failed: {}", e)))?
            .map_err(CoreError::from)
        };

        // The limit covers the wait for a permit, so stickers queued behind a
        // stuck conversion time out too.
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, work).await.map_err(|_| {
                CoreError::TranscodeTimeout(format!(
                    "{:?} -> {} exceeded {} ms",
                    source,
                    target,
                    limit.as_millis()
                ))
            })??,
            None => work.await?,
        };

        if output.is_empty() {
            return Err(CoreError::TranscodeFailed(
                "engine produced empty output".to_string(),
            ));
        }

        Ok(self.blobs.create(output, target.mime_type()).await)
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("status", &*self.status.borrow())
            .field("timeout", &self.timeout)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
