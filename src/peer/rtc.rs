use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::config::{ServerConfig, DEFAULT_ICE_SERVERS};
use crate::error::{Error, Result};
use crate::media::{MediaStream, TrackKind};
use crate::peer::transport::{PeerEvent, PeerTransport, PeerTransportFactory, Role};
use crate::peer::types::{decode_payload, encode_payload, SdpPayload};
use crate::utils::{add_ice_url_scheme, random_id};

const SAMPLE_DURATION: Duration = Duration::from_millis(20);

fn rtc_err(e: webrtc::Error) -> Error {
    Error::PeerNegotiation(e.to_string())
}

fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    let ice_servers = servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect();

    RTCConfiguration {
        ice_servers,
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

/// Builds [`RtcPeerTransport`]s against the configured STUN/TURN servers.
pub struct RtcTransportFactory {
    ice_servers: Vec<ServerConfig>,
}

impl RtcTransportFactory {
    pub fn new() -> Self {
        Self {
            ice_servers: DEFAULT_ICE_SERVERS.clone(),
        }
    }

    pub fn with_ice_servers(ice_servers: Vec<ServerConfig>) -> Self {
        Self { ice_servers }
    }
}

impl Default for RtcTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerTransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        role: Role,
        local_stream: Arc<MediaStream>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerTransport>> {
        let transport =
            RtcPeerTransport::new(role, local_stream, events, &self.ice_servers).await?;
        Ok(transport as Arc<dyn PeerTransport>)
    }
}

/// Peer transport over the `webrtc` crate.
///
/// Non-trickle: the signal blob is one base64(JSON) SDP payload emitted
/// after candidate gathering completes, so a single invite/accept exchange
/// carries the whole negotiation. Local tracks are bridged into RTP sample
/// tracks; remote tracks surface as a [`MediaStream`] whose frames are the
/// incoming RTP payloads.
pub struct RtcPeerTransport {
    pc: Arc<RTCPeerConnection>,
    role: Role,
    events: mpsc::UnboundedSender<PeerEvent>,
    fed: AtomicBool,
    closed: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RtcPeerTransport {
    async fn new(
        role: Role,
        local_stream: Arc<MediaStream>,
        events: mpsc::UnboundedSender<PeerEvent>,
        ice_servers: &[ServerConfig],
    ) -> Result<Arc<Self>> {
        let mut media = MediaEngine::default();
        media.register_default_codecs().map_err(rtc_err)?;
        let api = APIBuilder::new().with_media_engine(media).build();
        let pc = Arc::new(
            api.new_peer_connection(rtc_config(ice_servers))
                .await
                .map_err(rtc_err)?,
        );

        let closed = Arc::new(AtomicBool::new(false));
        let remote_stream = MediaStream::audio_video();
        let announced = Arc::new(AtomicBool::new(false));

        {
            let remote_stream = Arc::clone(&remote_stream);
            let announced = Arc::clone(&announced);
            let events = events.clone();
            pc.on_track(Box::new(
                move |track: Arc<TrackRemote>, _receiver, _transceiver| {
                    let remote_stream = Arc::clone(&remote_stream);
                    let announced = Arc::clone(&announced);
                    let events = events.clone();
                    Box::pin(async move {
                        let kind = match track.kind() {
                            RTPCodecType::Audio => TrackKind::Audio,
                            RTPCodecType::Video => TrackKind::Video,
                            _ => return,
                        };
                        tracing::debug!(kind = ?kind, "remote track arrived");
                        let Some(dst) = remote_stream.first_of(kind) else {
                            return;
                        };
                        if !announced.swap(true, Ordering::SeqCst) {
                            let _ = events.send(PeerEvent::RemoteStream(remote_stream));
                        }
                        tokio::spawn(async move {
                            while let Ok((pkt, _)) = track.read_rtp().await {
                                if !pkt.payload.is_empty() {
                                    dst.push_frame(pkt.payload);
                                }
                            }
                        });
                    })
                },
            ));
        }

        {
            let events = events.clone();
            let closed = Arc::clone(&closed);
            pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                tracing::debug!(state = ?state, "peer connection state changed");
                match state {
                    RTCPeerConnectionState::Disconnected
                    | RTCPeerConnectionState::Failed
                    | RTCPeerConnectionState::Closed => {
                        if !closed.swap(true, Ordering::SeqCst) {
                            let _ = events.send(PeerEvent::Closed);
                        }
                    }
                    _ => {}
                }
                Box::pin(async {})
            }));
        }

        // Bridge every local track into an outgoing RTP sample track.
        let mut tasks = Vec::new();
        for src in local_stream.tracks() {
            let (codec, label) = match src.kind() {
                TrackKind::Audio => (
                    RTCRtpCodecCapability {
                        mime_type: MIME_TYPE_OPUS.to_owned(),
                        clock_rate: 48000,
                        channels: 2,
                        ..Default::default()
                    },
                    "audio",
                ),
                TrackKind::Video => (
                    RTCRtpCodecCapability {
                        mime_type: MIME_TYPE_VP8.to_owned(),
                        clock_rate: 90000,
                        ..Default::default()
                    },
                    "video",
                ),
            };
            let out = Arc::new(TrackLocalStaticSample::new(
                codec,
                label.to_owned(),
                "duocall".to_owned(),
            ));
            pc.add_track(Arc::clone(&out) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(rtc_err)?;

            let mut rx = src.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(frame) => {
                            let sample = Sample {
                                data: frame,
                                duration: SAMPLE_DURATION,
                                ..Default::default()
                            };
                            if out.write_sample(&sample).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }

        let transport = Arc::new(Self {
            pc: Arc::clone(&pc),
            role,
            events: events.clone(),
            fed: AtomicBool::new(false),
            closed,
            tasks: Mutex::new(tasks),
        });

        if role == Role::Initiator {
            let handle = tokio::spawn(async move {
                match produce_offer(&pc).await {
                    Ok(blob) => {
                        let _ = events.send(PeerEvent::LocalSignal(blob));
                    }
                    Err(e) => {
                        let _ = events.send(PeerEvent::Failed(e.to_string()));
                    }
                }
            });
            transport.tasks.lock().unwrap().push(handle);
        }

        Ok(transport)
    }
}

async fn produce_offer(pc: &Arc<RTCPeerConnection>) -> Result<String> {
    let offer = pc.create_offer(None).await.map_err(rtc_err)?;
    let mut gather_complete = pc.gathering_complete_promise().await;
    pc.set_local_description(offer).await.map_err(rtc_err)?;
    let _ = gather_complete.recv().await;
    let sdp = pc
        .local_description()
        .await
        .ok_or_else(|| Error::PeerNegotiation("missing local description".into()))?;
    encode_payload(&SdpPayload {
        sdp,
        id: random_id(),
        ts: chrono::Utc::now().timestamp(),
    })
}

#[async_trait]
impl PeerTransport for RtcPeerTransport {
    async fn feed_remote_signal(&self, blob: &str) -> Result<()> {
        if self.fed.swap(true, Ordering::SeqCst) {
            return Err(Error::PeerNegotiation(
                "remote signal already consumed".into(),
            ));
        }
        let payload = decode_payload(blob)?;
        match self.role {
            Role::Initiator => self
                .pc
                .set_remote_description(payload.sdp)
                .await
                .map_err(rtc_err),
            Role::Responder => {
                self.pc
                    .set_remote_description(payload.sdp)
                    .await
                    .map_err(rtc_err)?;
                let answer = self.pc.create_answer(None).await.map_err(rtc_err)?;
                let mut gather_complete = self.pc.gathering_complete_promise().await;
                self.pc.set_local_description(answer).await.map_err(rtc_err)?;
                let _ = gather_complete.recv().await;
                let sdp = self
                    .pc
                    .local_description()
                    .await
                    .ok_or_else(|| Error::PeerNegotiation("missing local description".into()))?;
                let blob = encode_payload(&SdpPayload {
                    sdp,
                    id: payload.id,
                    ts: chrono::Utc::now().timestamp(),
                })?;
                let _ = self.events.send(PeerEvent::LocalSignal(blob));
                Ok(())
            }
        }
    }

    async fn teardown(&self) {
        let already = self.closed.swap(true, Ordering::SeqCst);
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        if let Err(e) = self.pc.close().await {
            if !already {
                tracing::debug!(error = %e, "peer connection close");
            }
        }
    }
}
