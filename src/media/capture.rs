use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::media::stream::MediaStream;

/// Local camera + microphone acquisition.
///
/// Acquired exactly once per application lifetime; the resulting stream is
/// shared for the rest of the process. Failure (permission denied, no
/// device) is terminal for the session and must be surfaced, never retried
/// silently.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn acquire(&self) -> Result<Arc<MediaStream>>;
}

/// Capture source without a physical device: yields an audio + video track
/// pair whose frames are pushed by the embedding application. Used by demos
/// and tests; a device-backed implementation plugs in through the same
/// trait.
#[derive(Default)]
pub struct SyntheticCapture;

impl SyntheticCapture {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CaptureSource for SyntheticCapture {
    async fn acquire(&self) -> Result<Arc<MediaStream>> {
        Ok(MediaStream::audio_video())
    }
}
