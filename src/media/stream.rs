use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast;

/// Frame channel depth per track. Consumers that fall behind observe
/// `Lagged` and skip ahead; they never block the producer.
const TRACK_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// One media track of the shared capture (or remote) stream.
///
/// The enabled flag is flipped in place, so every holder of the track sees
/// a toggle instantly, whether it is previewing, sending or recording.
/// A disabled track substitutes zeroed frames (silence or a black picture)
/// for whatever is pushed into it.
#[derive(Debug)]
pub struct MediaTrack {
    kind: TrackKind,
    enabled: AtomicBool,
    frames: broadcast::Sender<Bytes>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind) -> Arc<Self> {
        let (frames, _) = broadcast::channel(TRACK_CHANNEL_CAPACITY);
        Arc::new(Self {
            kind,
            enabled: AtomicBool::new(true),
            frames,
        })
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Flips the enabled flag, returning the new value.
    pub fn toggle(&self) -> bool {
        !self.enabled.fetch_xor(true, Ordering::SeqCst)
    }

    /// Delivers a frame to all current subscribers. Frames pushed while the
    /// track is disabled are replaced by a zeroed buffer of the same length.
    pub fn push_frame(&self, data: Bytes) {
        let out = if self.is_enabled() {
            data
        } else {
            Bytes::from(vec![0u8; data.len()])
        };
        let _ = self.frames.send(out);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.frames.subscribe()
    }
}

/// Shared-ownership handle over a set of tracks.
///
/// The capture stream is acquired once and then shared (never copied) by the
/// preview, the active transport and the recorder, so mutation through any
/// handle is visible to all of them.
#[derive(Debug)]
pub struct MediaStream {
    tracks: Vec<Arc<MediaTrack>>,
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<MediaTrack>>) -> Arc<Self> {
        Arc::new(Self { tracks })
    }

    /// The usual capture shape: one audio track plus one video track.
    pub fn audio_video() -> Arc<Self> {
        Self::new(vec![
            MediaTrack::new(TrackKind::Audio),
            MediaTrack::new(TrackKind::Video),
        ])
    }

    pub fn tracks(&self) -> &[Arc<MediaTrack>] {
        &self.tracks
    }

    pub fn first_of(&self, kind: TrackKind) -> Option<Arc<MediaTrack>> {
        self.tracks.iter().find(|t| t.kind() == kind).cloned()
    }

    /// Flips all tracks of the given kind in place. Returns the resulting
    /// enabled state, or false when the stream has no such track.
    pub fn toggle_kind(&self, kind: TrackKind) -> bool {
        let mut state = false;
        for track in self.tracks.iter().filter(|t| t.kind() == kind) {
            state = track.toggle();
        }
        state
    }

    pub fn kind_enabled(&self, kind: TrackKind) -> bool {
        self.tracks
            .iter()
            .filter(|t| t.kind() == kind)
            .all(|t| t.is_enabled())
            && self.tracks.iter().any(|t| t.kind() == kind)
    }
}
