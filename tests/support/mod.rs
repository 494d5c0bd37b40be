#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use duocall::{
    CallSession, CallState, CaptureSource, Error, LocalRelay, MediaStream, PeerEvent,
    PeerTransport, PeerTransportFactory, Result, Role, SessionConfig, SessionEvent, SessionId,
    SyntheticCapture,
};

const WAIT_LIMIT: Duration = Duration::from_secs(2);

/// Installs a per-process log subscriber honoring `RUST_LOG`, so test
/// failures can be chased with the crate's own tracing output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// In-memory stand-in for the media negotiation primitive. Transports are
/// paired by signal blob: the blob a transport emits is its own endpoint
/// id, and feeding a blob links the two endpoints and hands each side the
/// other's local stream.
pub struct MockNet {
    endpoints: Mutex<HashMap<String, Arc<Endpoint>>>,
    next: AtomicU64,
}

struct Endpoint {
    local_stream: Arc<MediaStream>,
    events: mpsc::UnboundedSender<PeerEvent>,
    peer: Mutex<Option<String>>,
    announced: AtomicBool,
    closed: AtomicBool,
}

impl Endpoint {
    fn announce(&self, stream: Arc<MediaStream>) {
        if !self.announced.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(PeerEvent::RemoteStream(stream));
        }
    }
}

impl MockNet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            endpoints: Mutex::new(HashMap::new()),
            next: AtomicU64::new(0),
        })
    }

    pub fn factory(self: &Arc<Self>) -> Arc<MockFactory> {
        Arc::new(MockFactory {
            net: Arc::clone(self),
        })
    }

    /// Number of endpoints that have not been torn down.
    pub fn live_endpoints(&self) -> usize {
        self.endpoints.lock().unwrap().len()
    }
}

pub struct MockFactory {
    net: Arc<MockNet>,
}

#[async_trait]
impl PeerTransportFactory for MockFactory {
    async fn create(
        &self,
        role: Role,
        local_stream: Arc<MediaStream>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerTransport>> {
        let id = format!("mock-{}", self.net.next.fetch_add(1, Ordering::SeqCst));
        let endpoint = Arc::new(Endpoint {
            local_stream,
            events: events.clone(),
            peer: Mutex::new(None),
            announced: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        self.net
            .endpoints
            .lock()
            .unwrap()
            .insert(id.clone(), Arc::clone(&endpoint));
        if role == Role::Initiator {
            let _ = events.send(PeerEvent::LocalSignal(id.clone()));
        }
        Ok(Arc::new(MockTransport {
            id,
            role,
            net: Arc::clone(&self.net),
            endpoint,
            fed: AtomicBool::new(false),
        }))
    }
}

pub struct MockTransport {
    id: String,
    role: Role,
    net: Arc<MockNet>,
    endpoint: Arc<Endpoint>,
    fed: AtomicBool,
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn feed_remote_signal(&self, blob: &str) -> Result<()> {
        if self.fed.swap(true, Ordering::SeqCst) {
            return Err(Error::PeerNegotiation(
                "remote signal already consumed".into(),
            ));
        }
        let other = self
            .net
            .endpoints
            .lock()
            .unwrap()
            .get(blob)
            .cloned()
            .ok_or_else(|| Error::PeerNegotiation(format!("unknown signal blob: {blob}")))?;

        *self.endpoint.peer.lock().unwrap() = Some(blob.to_string());
        *other.peer.lock().unwrap() = Some(self.id.clone());
        self.endpoint.announce(Arc::clone(&other.local_stream));
        other.announce(Arc::clone(&self.endpoint.local_stream));

        if self.role == Role::Responder {
            let _ = self
                .endpoint
                .events
                .send(PeerEvent::LocalSignal(self.id.clone()));
        }
        Ok(())
    }

    async fn teardown(&self) {
        if self.endpoint.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.net.endpoints.lock().unwrap().remove(&self.id);
        let peer = self.endpoint.peer.lock().unwrap().take();
        if let Some(peer_id) = peer {
            let other = self.net.endpoints.lock().unwrap().get(&peer_id).cloned();
            if let Some(other) = other {
                let _ = other.events.send(PeerEvent::Closed);
            }
        }
    }
}

/// Capture source that simulates a denied device permission.
pub struct DeniedCapture;

#[async_trait]
impl CaptureSource for DeniedCapture {
    async fn acquire(&self) -> Result<Arc<MediaStream>> {
        Err(Error::MediaAcquisition("permission denied".into()))
    }
}

pub struct TestClient {
    pub session: Arc<CallSession>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pub id: SessionId,
}

pub async fn client(relay: &Arc<LocalRelay>, net: &Arc<MockNet>, name: &str) -> TestClient {
    client_with_config(relay, net, SessionConfig::with_display_name(name)).await
}

pub async fn client_with_config(
    relay: &Arc<LocalRelay>,
    net: &Arc<MockNet>,
    config: SessionConfig,
) -> TestClient {
    init_tracing();
    let (session, events) = CallSession::connect(
        Arc::new(relay.channel()),
        Arc::new(SyntheticCapture::new()),
        net.factory(),
        config,
    )
    .await
    .expect("session connect");
    let id = session.session_id().await;
    TestClient {
        session,
        events,
        id,
    }
}

pub async fn denied_client(relay: &Arc<LocalRelay>, net: &Arc<MockNet>) -> TestClient {
    init_tracing();
    let (session, events) = CallSession::connect(
        Arc::new(relay.channel()),
        Arc::new(DeniedCapture),
        net.factory(),
        SessionConfig::with_display_name("denied"),
    )
    .await
    .expect("session connect");
    let id = session.session_id().await;
    TestClient {
        session,
        events,
        id,
    }
}

pub async fn wait_for_state(session: &Arc<CallSession>, want: CallState) {
    timeout(WAIT_LIMIT, async {
        loop {
            if session.call_state().await == want {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("state {want} not reached"));
}

/// Scans the event stream until the predicate matches or the wait limit
/// passes.
pub async fn saw_event(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> bool {
    timeout(WAIT_LIMIT, async {
        while let Some(event) = events.recv().await {
            if pred(&event) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false)
}
