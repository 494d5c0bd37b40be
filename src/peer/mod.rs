pub mod rtc;
pub mod transport;
pub mod types;

pub use rtc::{RtcPeerTransport, RtcTransportFactory};
pub use transport::{PeerEvent, PeerTransport, PeerTransportFactory, Role};
pub use types::SdpPayload;
