use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::media::mix::mix_pcm16;
use crate::media::{MediaStream, TrackKind};

/// Fixed output name, container extension included.
pub const RECORDING_FILE_NAME: &str = "recording.webm";

const CHUNK_AUDIO: u8 = b'a';
const CHUNK_VIDEO: u8 = b'v';
const CHUNK_HEADER_LEN: usize = 5;

/// Remote frames waiting for a local frame to be mixed into. A stalled
/// local capture must not let the backlog grow for the life of the
/// recording, so the oldest frames are dropped beyond this depth.
const REMOTE_QUEUE_DEPTH: usize = 32;

/// One tagged chunk of a recorded buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedChunk {
    pub kind: TrackKind,
    pub payload: Bytes,
}

fn encode_chunk(tag: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(CHUNK_HEADER_LEN + payload.len());
    buf.put_u8(tag);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Parses a recorded buffer back into its tagged chunks. Inverse of the
/// framing applied while recording; trailing garbage is ignored.
pub fn read_chunks(mut data: &[u8]) -> Vec<RecordedChunk> {
    let mut chunks = Vec::new();
    while data.len() >= CHUNK_HEADER_LEN {
        let kind = match data[0] {
            CHUNK_AUDIO => TrackKind::Audio,
            CHUNK_VIDEO => TrackKind::Video,
            _ => break,
        };
        let len = u32::from_be_bytes([data[1], data[2], data[3], data[4]]) as usize;
        if data.len() < CHUNK_HEADER_LEN + len {
            break;
        }
        chunks.push(RecordedChunk {
            kind,
            payload: Bytes::copy_from_slice(&data[CHUNK_HEADER_LEN..CHUNK_HEADER_LEN + len]),
        });
        data = &data[CHUNK_HEADER_LEN + len..];
    }
    chunks
}

struct ActiveRecording {
    chunks: Arc<Mutex<Vec<Bytes>>>,
    mixer: JoinHandle<()>,
}

/// Captures the composite of a call into a single downloadable file.
///
/// One audio mix graph: local audio is the base input, remote audio (when a
/// remote stream is attached) is summed into it. Local video passes through
/// unchanged. Each mixed result is framed as a tagged chunk and buffered in
/// arrival order; `stop` concatenates the buffer into one file.
pub struct Recorder {
    output_dir: PathBuf,
    inner: Mutex<Option<ActiveRecording>>,
}

impl Recorder {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            inner: Mutex::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }

    /// Starts capturing. `remote = None` is the degraded-but-valid mode:
    /// the file contains local audio and video only. Starting while already
    /// active is a no-op returning `Ok(false)`; the running chunk buffer is
    /// neither reset nor duplicated.
    pub fn start(
        &self,
        local: &MediaStream,
        remote: Option<&MediaStream>,
    ) -> Result<bool> {
        let mut slot = self.inner.lock().unwrap();
        if slot.is_some() {
            tracing::debug!("recording already active, ignoring start");
            return Ok(false);
        }

        let local_audio = local
            .first_of(TrackKind::Audio)
            .ok_or(Error::RecordingPrecondition("local stream has no audio track"))?;
        let local_video = local
            .first_of(TrackKind::Video)
            .ok_or(Error::RecordingPrecondition("local stream has no video track"))?;

        let audio_rx = local_audio.subscribe();
        let video_rx = local_video.subscribe();
        // A held sender keeps the placeholder channel silent but open, so
        // the mixer loop needs no special case for the local-only mode.
        let (remote_rx, remote_guard) = match remote.and_then(|s| s.first_of(TrackKind::Audio)) {
            Some(track) => (track.subscribe(), None),
            None => {
                let (tx, rx) = broadcast::channel(1);
                (rx, Some(tx))
            }
        };

        let chunks = Arc::new(Mutex::new(Vec::new()));
        let mixer = tokio::spawn(run_mixer(
            Arc::clone(&chunks),
            audio_rx,
            video_rx,
            remote_rx,
            remote_guard,
        ));

        tracing::info!(degraded = remote.is_none(), "recording started");
        *slot = Some(ActiveRecording { chunks, mixer });
        Ok(true)
    }

    /// Stops capturing, concatenates the buffered chunks into one file under
    /// the output directory and returns its path. The chunk buffer is
    /// discarded afterwards.
    pub async fn stop(&self) -> Result<PathBuf> {
        let recording = self
            .inner
            .lock()
            .unwrap()
            .take()
            .ok_or(Error::RecordingPrecondition("recording not active"))?;
        recording.mixer.abort();

        let chunks = std::mem::take(&mut *recording.chunks.lock().unwrap());
        let mut blob = BytesMut::new();
        for chunk in &chunks {
            blob.put_slice(chunk);
        }

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.output_dir.join(RECORDING_FILE_NAME);
        tokio::fs::write(&path, &blob).await?;
        tracing::info!(path = %path.display(), chunks = chunks.len(), "recording saved");
        Ok(path)
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(RECORDING_FILE_NAME)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

async fn run_mixer(
    chunks: Arc<Mutex<Vec<Bytes>>>,
    mut audio_rx: broadcast::Receiver<Bytes>,
    mut video_rx: broadcast::Receiver<Bytes>,
    mut remote_rx: broadcast::Receiver<Bytes>,
    // Held, never used: keeps the placeholder remote channel open.
    mut _remote_guard: Option<broadcast::Sender<Bytes>>,
) {
    let mut pending_remote: VecDeque<Bytes> = VecDeque::new();
    loop {
        tokio::select! {
            frame = audio_rx.recv() => match frame {
                Ok(local) => {
                    let mixed = match pending_remote.pop_front() {
                        Some(remote) => mix_pcm16(&local, &remote),
                        None => local,
                    };
                    chunks.lock().unwrap().push(encode_chunk(CHUNK_AUDIO, &mixed));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "recorder lagging behind local audio");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            frame = video_rx.recv() => match frame {
                Ok(video) => {
                    chunks.lock().unwrap().push(encode_chunk(CHUNK_VIDEO, &video));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "recorder lagging behind local video");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            frame = remote_rx.recv() => match frame {
                Ok(remote) => {
                    pending_remote.push_back(remote);
                    if pending_remote.len() > REMOTE_QUEUE_DEPTH {
                        pending_remote.pop_front();
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                // Remote side went away mid-recording: carry on local-only.
                Err(broadcast::error::RecvError::Closed) => {
                    let (tx, rx) = broadcast::channel(1);
                    _remote_guard = Some(tx);
                    remote_rx = rx;
                }
            },
        }
    }
}
