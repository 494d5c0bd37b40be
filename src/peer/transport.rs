use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::media::MediaStream;

/// Which side of the point-to-point negotiation this transport plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Produces the first signal blob, expects exactly one accept blob back.
    Initiator,
    /// Consumes one invite blob, produces exactly one accept blob.
    Responder,
}

/// Events emitted by a peer transport towards the session.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// The locally produced signal blob, ready to go out through signaling.
    /// Fired once per connection: immediately-after-gathering for the
    /// initiator, after the invite blob has been fed for the responder.
    LocalSignal(String),
    /// The far side's media became available. Fired at most once.
    RemoteStream(Arc<MediaStream>),
    /// The underlying connection ended (far side closed, ICE failure).
    Closed,
    /// Negotiation failed; the attempt must be aborted.
    Failed(String),
}

/// One point-to-point media connection.
///
/// Owned exclusively by the session for the duration of a single call
/// attempt and destroyed on hang-up or failure.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Consumes the counterpart's signal blob. Exactly once per connection;
    /// a second feed is a negotiation error.
    async fn feed_remote_signal(&self, blob: &str) -> Result<()>;

    /// Releases all underlying resources. Idempotent.
    async fn teardown(&self);
}

/// Creates transports for new call attempts, with the local stream attached
/// so outgoing media flows as soon as the connection is up.
#[async_trait]
pub trait PeerTransportFactory: Send + Sync {
    async fn create(
        &self,
        role: Role,
        local_stream: Arc<MediaStream>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerTransport>>;
}
