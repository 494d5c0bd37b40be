use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::signaling::{ClientMessage, RelayMessage, SessionId, SignalingChannel};
use crate::utils::random_id;

/// Per-client delivery channel depth.
const CLIENT_CHANNEL_CAPACITY: usize = 64;

/// In-process reference relay.
///
/// Routes invites and accepts between connected clients and assigns session
/// ids, with the contract semantics of a real relay: no persistence, so a
/// message addressed to an id that is not currently connected is dropped.
#[derive(Default)]
pub struct LocalRelay {
    clients: Mutex<HashMap<SessionId, broadcast::Sender<RelayMessage>>>,
}

impl LocalRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Opens a client channel. The session id is assigned on `connect`.
    pub fn channel(self: &Arc<Self>) -> LocalChannel {
        let (tx, _) = broadcast::channel(CLIENT_CHANNEL_CAPACITY);
        LocalChannel {
            relay: Arc::clone(self),
            tx,
            id: Mutex::new(None),
        }
    }

    fn deliver(&self, target: &SessionId, msg: RelayMessage) {
        match self.clients.lock().unwrap().get(target) {
            Some(tx) => {
                let _ = tx.send(msg);
            }
            None => {
                tracing::debug!(target_id = %target, "target not connected, dropping message");
            }
        }
    }

    fn disconnect(&self, id: &SessionId) {
        self.clients.lock().unwrap().remove(id);
        tracing::debug!(session_id = %id, "client disconnected from relay");
    }
}

/// One client's connection to a [`LocalRelay`].
pub struct LocalChannel {
    relay: Arc<LocalRelay>,
    tx: broadcast::Sender<RelayMessage>,
    id: Mutex<Option<SessionId>>,
}

#[async_trait]
impl SignalingChannel for LocalChannel {
    async fn connect(&self) -> Result<SessionId> {
        let mut slot = self.id.lock().unwrap();
        if let Some(id) = slot.as_ref() {
            return Ok(id.clone());
        }
        let id = random_id();
        self.relay
            .clients
            .lock()
            .unwrap()
            .insert(id.clone(), self.tx.clone());
        let _ = self.tx.send(RelayMessage::PresenceAssigned {
            session_id: id.clone(),
        });
        tracing::info!(session_id = %id, "client registered with relay");
        *slot = Some(id.clone());
        Ok(id)
    }

    async fn send(&self, msg: ClientMessage) -> Result<()> {
        match msg {
            ClientMessage::CallInvite(invite) => {
                let target = invite.target_id.clone();
                self.relay.deliver(&target, RelayMessage::CallInvite(invite));
            }
            ClientMessage::CallAccept(accept) => {
                let target = accept.to_id.clone();
                self.relay.deliver(&target, RelayMessage::CallAccept(accept));
            }
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RelayMessage> {
        self.tx.subscribe()
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        if let Some(id) = self.id.lock().unwrap().take() {
            self.relay.disconnect(&id);
        }
    }
}
