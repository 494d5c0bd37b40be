pub mod relay;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;

pub use relay::{LocalChannel, LocalRelay};

/// Relay-assigned client identifier, valid for the lifetime of the
/// transport connection.
pub type SessionId = String;

/// Tag for one call attempt. Stale invites/accepts are matched against it
/// and discarded.
pub type AttemptId = String;

/// Opaque signaling blob produced by a peer transport, wrapped with the
/// attempt tag and a timestamp.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SignalPayload {
    pub attempt: AttemptId,
    pub blob: String,
    pub ts: i64,
}

impl SignalPayload {
    pub fn new(attempt: AttemptId, blob: String) -> Self {
        Self {
            attempt,
            blob,
            ts: chrono::Utc::now().timestamp(),
        }
    }
}

/// Dialing side → target. Consumed exactly once by the target.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CallInvite {
    pub target_id: SessionId,
    pub signal_payload: SignalPayload,
    pub from_id: SessionId,
    pub display_name: String,
}

/// Answering side → caller. Consumed exactly once by the dialer.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CallAccept {
    pub signal_payload: SignalPayload,
    pub to_id: SessionId,
}

/// Messages delivered relay → client.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RelayMessage {
    #[serde(rename_all = "camelCase")]
    PresenceAssigned { session_id: SessionId },
    CallInvite(CallInvite),
    CallAccept(CallAccept),
}

/// Messages published client → relay.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ClientMessage {
    CallInvite(CallInvite),
    CallAccept(CallAccept),
}

/// Persistent bidirectional channel to the relay.
///
/// The relay is assumed to behave as a reliable low-latency pub/sub: FIFO
/// per message kind per peer pair, no cross-kind ordering, no persistence.
/// A message sent to a disconnected target is dropped.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Completes the transport handshake and returns the assigned session
    /// id. Fires once; later calls return the same id.
    async fn connect(&self) -> Result<SessionId>;

    /// Publishes a message towards its addressee.
    async fn send(&self, msg: ClientMessage) -> Result<()>;

    /// Subscribes to incoming messages. Multiple subscribers are allowed;
    /// each receives every message from the moment of subscription.
    fn subscribe(&self) -> broadcast::Receiver<RelayMessage>;
}
