//! Two-party call core: relay signaling, an explicit call-session state
//! machine, a peer transport over WebRTC, shared media capture with
//! per-kind mute, and a mixing recorder that writes the combined call to a
//! single file.

pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod recording;
pub mod session;
pub mod signaling;
mod utils;

pub use config::{ServerConfig, SessionConfig};
pub use error::{Error, Result};
pub use media::{CaptureSource, MediaStream, MediaTrack, SyntheticCapture, TrackKind};
pub use peer::{PeerEvent, PeerTransport, PeerTransportFactory, Role, RtcTransportFactory};
pub use recording::{Recorder, RecordedChunk};
pub use session::{CallSession, CallState, SessionEvent};
pub use signaling::{
    AttemptId, CallAccept, CallInvite, ClientMessage, LocalRelay, RelayMessage, SessionId,
    SignalPayload, SignalingChannel,
};
