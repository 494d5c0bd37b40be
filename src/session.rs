use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex};

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::media::{CaptureSource, MediaStream, TrackKind};
use crate::peer::{PeerEvent, PeerTransport, PeerTransportFactory, Role};
use crate::recording::Recorder;
use crate::signaling::{
    AttemptId, CallAccept, CallInvite, ClientMessage, RelayMessage, SessionId, SignalPayload,
    SignalingChannel,
};
use crate::utils::random_id;

/// Where this client stands in the call lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Dialing,
    Ringing,
    Connected,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallState::Idle => "idle",
            CallState::Dialing => "dialing",
            CallState::Ringing => "ringing",
            CallState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Notifications towards the presentation layer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    IdAssigned(SessionId),
    LocalStreamReady,
    /// Media acquisition failed; calls and recording stay disabled.
    MediaFailed(String),
    StateChanged(CallState),
    IncomingCall {
        from: SessionId,
        display_name: String,
    },
    RemoteStreamAvailable,
    /// The current attempt was aborted (negotiation failure, transport
    /// loss, dial timeout).
    CallFailed(String),
    RecordingSaved(PathBuf),
}

struct PendingInvite {
    from: SessionId,
    display_name: String,
    payload: SignalPayload,
}

struct ActiveCall {
    attempt: AttemptId,
    counterpart: SessionId,
    caller_name: Option<String>,
    transport: Arc<dyn PeerTransport>,
    remote_stream: Option<Arc<MediaStream>>,
}

struct Inner {
    session_id: SessionId,
    local_stream: Option<Arc<MediaStream>>,
    media_error: Option<String>,
    state: CallState,
    pending_invite: Option<PendingInvite>,
    active: Option<ActiveCall>,
}

/// The call-session state machine.
///
/// Mediates between local intent (call / answer / hang up), signaling
/// events and the peer transport. At most one transport is live at any
/// time; every call attempt carries a random tag, and invites/accepts
/// referencing a superseded tag are discarded silently.
pub struct CallSession {
    signaling: Arc<dyn SignalingChannel>,
    transports: Arc<dyn PeerTransportFactory>,
    recorder: Recorder,
    config: SessionConfig,
    inner: Mutex<Inner>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl CallSession {
    /// Connects to the relay, acquires local media and starts the signaling
    /// pump. A relay failure is fatal; a media failure is surfaced through
    /// [`SessionEvent::MediaFailed`] and leaves the session alive but unable
    /// to call or record.
    pub async fn connect(
        signaling: Arc<dyn SignalingChannel>,
        capture: Arc<dyn CaptureSource>,
        transports: Arc<dyn PeerTransportFactory>,
        config: SessionConfig,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>)> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        // Subscribe before the handshake so nothing is missed.
        let mut relay_rx = signaling.subscribe();
        let session_id = signaling.connect().await?;
        let _ = events_tx.send(SessionEvent::IdAssigned(session_id.clone()));

        let (local_stream, media_error) = match capture.acquire().await {
            Ok(stream) => {
                let _ = events_tx.send(SessionEvent::LocalStreamReady);
                (Some(stream), None)
            }
            Err(e) => {
                tracing::warn!(error = %e, "media acquisition failed, calls are disabled");
                let _ = events_tx.send(SessionEvent::MediaFailed(e.to_string()));
                (None, Some(e.to_string()))
            }
        };

        let session = Arc::new(Self {
            signaling,
            transports,
            recorder: Recorder::new(config.recording_dir.clone()),
            config,
            inner: Mutex::new(Inner {
                session_id,
                local_stream,
                media_error,
                state: CallState::Idle,
                pending_invite: None,
                active: None,
            }),
            events: events_tx,
        });

        let pump = Arc::clone(&session);
        tokio::spawn(async move {
            loop {
                match relay_rx.recv().await {
                    Ok(msg) => pump.handle_relay_message(msg).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "signaling receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok((session, events_rx))
    }

    pub async fn session_id(&self) -> SessionId {
        self.inner.lock().await.session_id.clone()
    }

    pub async fn call_state(&self) -> CallState {
        self.inner.lock().await.state
    }

    pub async fn local_stream_ready(&self) -> bool {
        self.inner.lock().await.local_stream.is_some()
    }

    pub async fn local_stream(&self) -> Option<Arc<MediaStream>> {
        self.inner.lock().await.local_stream.clone()
    }

    /// The remote party's display name: the pending caller while ringing,
    /// or the answered caller while connected.
    pub async fn caller_display_name(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        inner
            .pending_invite
            .as_ref()
            .map(|i| i.display_name.clone())
            .or_else(|| inner.active.as_ref().and_then(|a| a.caller_name.clone()))
    }

    /// Dials another client. Valid only while idle, with local media
    /// acquired. The invite goes out once the transport's local signal has
    /// been produced.
    pub async fn place_call(self: &Arc<Self>, target: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let stream = require_local_stream(&inner)?;
        if inner.state != CallState::Idle {
            return Err(Error::InvalidState {
                expected: "idle",
                actual: inner.state,
            });
        }

        let attempt = random_id();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let transport = self
            .transports
            .create(Role::Initiator, stream, peer_tx)
            .await?;
        tracing::info!(attempt = %attempt, target_id = %target, "placing call");
        inner.active = Some(ActiveCall {
            attempt: attempt.clone(),
            counterpart: target.to_string(),
            caller_name: None,
            transport,
            remote_stream: None,
        });
        self.set_state(&mut inner, CallState::Dialing);
        drop(inner);

        self.spawn_peer_pump(attempt.clone(), Role::Initiator, target.to_string(), peer_rx);
        if let Some(timeout) = self.config.dial_timeout {
            self.spawn_dial_timeout(attempt, timeout);
        }
        Ok(())
    }

    /// Accepts the pending invite. Valid only while ringing. The transport
    /// is created here, not at invite time, so an unanswered call never
    /// consumes connection resources.
    pub async fn answer_call(self: &Arc<Self>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let stream = require_local_stream(&inner)?;
        if inner.state != CallState::Ringing {
            return Err(Error::InvalidState {
                expected: "ringing",
                actual: inner.state,
            });
        }
        let Some(invite) = inner.pending_invite.take() else {
            self.set_state(&mut inner, CallState::Idle);
            return Err(Error::InvalidState {
                expected: "ringing",
                actual: CallState::Idle,
            });
        };

        // The responder adopts the caller's attempt tag, so both ends of
        // the exchange discard stale messages consistently.
        let attempt = invite.payload.attempt.clone();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let transport = match self
            .transports
            .create(Role::Responder, stream, peer_tx)
            .await
        {
            Ok(t) => t,
            Err(e) => {
                self.set_state(&mut inner, CallState::Idle);
                return Err(e);
            }
        };
        if let Err(e) = transport.feed_remote_signal(&invite.payload.blob).await {
            transport.teardown().await;
            self.set_state(&mut inner, CallState::Idle);
            return Err(e);
        }

        tracing::info!(attempt = %attempt, from = %invite.from, "call answered");
        inner.active = Some(ActiveCall {
            attempt: attempt.clone(),
            counterpart: invite.from.clone(),
            caller_name: Some(invite.display_name),
            transport,
            remote_stream: None,
        });
        self.set_state(&mut inner, CallState::Connected);
        drop(inner);

        self.spawn_peer_pump(attempt, Role::Responder, invite.from, peer_rx);
        Ok(())
    }

    /// Ends the current call, or resets any half-built attempt. Local
    /// capture is not released; further calls reuse it.
    pub async fn hang_up(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.pending_invite = None;
        if let Some(active) = inner.active.take() {
            tracing::info!(attempt = %active.attempt, "hanging up");
            active.transport.teardown().await;
        }
        self.set_state(&mut inner, CallState::Idle);
        Ok(())
    }

    /// Flips the microphone on the shared capture stream, returning the new
    /// enabled state. Takes effect instantly on the preview, the live
    /// transport and any active recording.
    pub async fn toggle_mic(&self) -> Result<bool> {
        let inner = self.inner.lock().await;
        let stream = require_local_stream(&inner)?;
        Ok(stream.toggle_kind(TrackKind::Audio))
    }

    /// Flips the camera. Same sharing semantics as [`Self::toggle_mic`].
    pub async fn toggle_camera(&self) -> Result<bool> {
        let inner = self.inner.lock().await;
        let stream = require_local_stream(&inner)?;
        Ok(stream.toggle_kind(TrackKind::Video))
    }

    /// Starts recording the current call. Requires local media and a live
    /// call attempt; a missing remote stream degrades to local-only capture
    /// rather than failing. Returns false (and leaves the running buffer
    /// untouched) when recording is already active.
    pub async fn start_recording(&self) -> Result<bool> {
        let inner = self.inner.lock().await;
        let stream = require_local_stream(&inner)
            .map_err(|_| Error::RecordingPrecondition("local stream not available"))?;
        let Some(active) = inner.active.as_ref() else {
            return Err(Error::RecordingPrecondition("no active call attempt"));
        };
        let remote = active.remote_stream.clone();
        drop(inner);
        self.recorder.start(&stream, remote.as_deref())
    }

    /// Stops recording and writes the captured file, returning its path.
    pub async fn stop_recording(&self) -> Result<PathBuf> {
        let path = self.recorder.stop().await?;
        self.emit(SessionEvent::RecordingSaved(path.clone()));
        Ok(path)
    }

    pub fn recording_active(&self) -> bool {
        self.recorder.is_active()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&self, inner: &mut Inner, state: CallState) {
        if inner.state != state {
            tracing::info!(from = %inner.state, to = %state, "call state changed");
            inner.state = state;
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    async fn handle_relay_message(self: &Arc<Self>, msg: RelayMessage) {
        match msg {
            RelayMessage::PresenceAssigned { session_id } => {
                let mut inner = self.inner.lock().await;
                if inner.session_id != session_id {
                    inner.session_id = session_id.clone();
                    self.emit(SessionEvent::IdAssigned(session_id));
                }
            }
            RelayMessage::CallInvite(invite) => self.handle_invite(invite).await,
            RelayMessage::CallAccept(accept) => self.handle_accept(accept).await,
        }
    }

    async fn handle_invite(&self, invite: CallInvite) {
        let mut inner = self.inner.lock().await;
        if invite.target_id != inner.session_id {
            tracing::debug!(target_id = %invite.target_id, "invite for another client, dropping");
            return;
        }
        match inner.state {
            CallState::Idle | CallState::Ringing => {
                // A newer invite while ringing replaces the pending caller
                // metadata; the earlier caller is simply superseded.
                tracing::info!(from = %invite.from_id, "incoming call");
                inner.pending_invite = Some(PendingInvite {
                    from: invite.from_id.clone(),
                    display_name: invite.display_name.clone(),
                    payload: invite.signal_payload,
                });
                self.set_state(&mut inner, CallState::Ringing);
                self.emit(SessionEvent::IncomingCall {
                    from: invite.from_id,
                    display_name: invite.display_name,
                });
            }
            CallState::Dialing | CallState::Connected => {
                tracing::debug!(from = %invite.from_id, state = %inner.state, "busy, dropping call-invite");
            }
        }
    }

    async fn handle_accept(&self, accept: CallAccept) {
        let (attempt, transport) = {
            let inner = self.inner.lock().await;
            if inner.state != CallState::Dialing {
                tracing::debug!(state = %inner.state, "call-accept outside dialing, dropping");
                return;
            }
            match inner.active.as_ref() {
                Some(active) if active.attempt == accept.signal_payload.attempt => {
                    (active.attempt.clone(), Arc::clone(&active.transport))
                }
                _ => {
                    tracing::debug!(
                        attempt = %accept.signal_payload.attempt,
                        "stale call-accept, dropping"
                    );
                    return;
                }
            }
        };

        match transport.feed_remote_signal(&accept.signal_payload.blob).await {
            Ok(()) => {
                let mut inner = self.inner.lock().await;
                if inner.state == CallState::Dialing
                    && inner.active.as_ref().is_some_and(|a| a.attempt == attempt)
                {
                    self.set_state(&mut inner, CallState::Connected);
                }
            }
            Err(e) => {
                self.abort_attempt(&attempt, &format!("accept rejected: {e}"))
                    .await
            }
        }
    }

    /// Tears down the attempt if it is still the live one; later messages
    /// carrying its tag will find nothing to act on.
    async fn abort_attempt(&self, attempt: &AttemptId, reason: &str) {
        let mut inner = self.inner.lock().await;
        let Some(active) = inner.active.take_if(|a| a.attempt == *attempt) else {
            return;
        };
        tracing::warn!(attempt = %attempt, reason, "call attempt aborted");
        active.transport.teardown().await;
        self.set_state(&mut inner, CallState::Idle);
        self.emit(SessionEvent::CallFailed(reason.to_string()));
    }

    fn spawn_peer_pump(
        self: &Arc<Self>,
        attempt: AttemptId,
        role: Role,
        counterpart: SessionId,
        mut peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    ) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = peer_events.recv().await {
                match event {
                    PeerEvent::LocalSignal(blob) => {
                        let payload = SignalPayload::new(attempt.clone(), blob);
                        let msg = match role {
                            Role::Initiator => {
                                let from_id = session.inner.lock().await.session_id.clone();
                                ClientMessage::CallInvite(CallInvite {
                                    target_id: counterpart.clone(),
                                    signal_payload: payload,
                                    from_id,
                                    display_name: session.config.display_name.clone(),
                                })
                            }
                            Role::Responder => ClientMessage::CallAccept(CallAccept {
                                signal_payload: payload,
                                to_id: counterpart.clone(),
                            }),
                        };
                        if let Err(e) = session.signaling.send(msg).await {
                            session
                                .abort_attempt(&attempt, &format!("signaling send failed: {e}"))
                                .await;
                            break;
                        }
                    }
                    PeerEvent::RemoteStream(stream) => {
                        let mut inner = session.inner.lock().await;
                        if let Some(active) = inner.active.as_mut() {
                            if active.attempt == attempt {
                                active.remote_stream = Some(stream);
                                session.emit(SessionEvent::RemoteStreamAvailable);
                            }
                        }
                    }
                    PeerEvent::Closed => {
                        let mut inner = session.inner.lock().await;
                        if let Some(active) = inner.active.take_if(|a| a.attempt == attempt) {
                            tracing::info!(attempt = %attempt, "peer connection closed");
                            active.transport.teardown().await;
                            session.set_state(&mut inner, CallState::Idle);
                        }
                        break;
                    }
                    PeerEvent::Failed(reason) => {
                        session.abort_attempt(&attempt, &reason).await;
                        break;
                    }
                }
            }
        });
    }

    fn spawn_dial_timeout(self: &Arc<Self>, attempt: AttemptId, timeout: Duration) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut inner = session.inner.lock().await;
            if inner.state != CallState::Dialing {
                return;
            }
            let Some(active) = inner.active.take_if(|a| a.attempt == attempt) else {
                return;
            };
            tracing::info!(attempt = %attempt, "call not answered in time");
            active.transport.teardown().await;
            session.set_state(&mut inner, CallState::Idle);
            session.emit(SessionEvent::CallFailed("call not answered".into()));
        });
    }
}

fn require_local_stream(inner: &Inner) -> Result<Arc<MediaStream>> {
    match &inner.local_stream {
        Some(stream) => Ok(Arc::clone(stream)),
        None => Err(Error::MediaAcquisition(
            inner
                .media_error
                .clone()
                .unwrap_or_else(|| "local media not acquired".into()),
        )),
    }
}
