use crate::session::CallState;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy for the call core.
///
/// Stale invites/accepts are not represented here: a message referencing a
/// superseded call attempt is dropped with a debug log, never surfaced.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Camera/microphone could not be acquired. Terminal for the session:
    /// no call or recording can proceed.
    #[error("media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// The relay is unreachable or refused a message. No automatic retry.
    #[error("signaling transport error: {0}")]
    SignalingTransport(String),

    /// A signal payload was malformed or rejected by the underlying
    /// connection. Aborts the current call attempt back to idle.
    #[error("peer negotiation failed: {0}")]
    PeerNegotiation(String),

    /// Recording was started or stopped in a state that does not allow it.
    #[error("recording precondition not met: {0}")]
    RecordingPrecondition(&'static str),

    /// A session operation was invoked in the wrong call state.
    #[error("invalid call state: expected {expected}, currently {actual}")]
    InvalidState {
        expected: &'static str,
        actual: CallState,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
