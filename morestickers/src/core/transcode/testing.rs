//! In-process transcoder fakes for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{EngineLoader, SourceFormat, TargetFormat, TranscodeError, Transcoder};
use crate::core::{CoreError, CoreResult};

/// First input byte that makes [`CountingTranscoder`] fail
pub const POISON_BYTE: u8 = 0xFF;

/// Echoes input, counts calls, fails on [`POISON_BYTE`]
#[derive(Debug, Default)]
pub struct CountingTranscoder {
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl CountingTranscoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay: Some(delay),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transcoder for CountingTranscoder {
    fn name(&self) -> &str {
        "counting"
    }

    fn transcode(
        &self,
        input: &[u8],
        _source: SourceFormat,
        target: TargetFormat,
    ) -> Result<Vec<u8>, TranscodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if input.first() == Some(&POISON_BYTE) {
            return Err(TranscodeError::guest(-2));
        }
        let mut output = vec![target.wire_code() as u8];
        output.extend_from_slice(input);
        Ok(output)
    }
}

/// Hands out a shared transcoder after an optional delay, counting loads
pub struct CountingLoader {
    transcoder: Arc<CountingTranscoder>,
    loads: AtomicUsize,
    delay: Duration,
    fail_with: Option<String>,
}

impl CountingLoader {
    pub fn new(transcoder: Arc<CountingTranscoder>) -> Arc<Self> {
        Arc::new(Self {
            transcoder,
            loads: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail_with: None,
        })
    }

    pub fn slow(transcoder: Arc<CountingTranscoder>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            transcoder,
            loads: AtomicUsize::new(0),
            delay,
            fail_with: None,
        })
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            transcoder: CountingTranscoder::new(),
            loads: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail_with: Some(reason.to_string()),
        })
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineLoader for CountingLoader {
    async fn load(&self) -> CoreResult<Arc<dyn Transcoder>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.fail_with {
            Some(reason) => Err(CoreError::EngineInitFailed(reason.clone())),
            None => Ok(self.transcoder.clone() as Arc<dyn Transcoder>),
        }
    }
}
