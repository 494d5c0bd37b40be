use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::error::{Error, Result};

/// SDP description with metadata, carried as the opaque blob inside a
/// signaling payload.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SdpPayload {
    pub sdp: RTCSessionDescription,
    pub id: String,
    pub ts: i64,
}

/// Encodes an SDP payload as base64(JSON) for transport through the relay.
pub fn encode_payload(payload: &SdpPayload) -> Result<String> {
    let json = serde_json::to_string(payload)
        .map_err(|e| Error::PeerNegotiation(format!("payload encode: {e}")))?;
    Ok(general_purpose::STANDARD.encode(json))
}

/// Decodes a blob produced by [`encode_payload`].
pub fn decode_payload(blob: &str) -> Result<SdpPayload> {
    let raw = general_purpose::STANDARD
        .decode(blob)
        .map_err(|e| Error::PeerNegotiation(format!("payload decode: {e}")))?;
    serde_json::from_slice(&raw)
        .map_err(|e| Error::PeerNegotiation(format!("payload decode: {e}")))
}
