use std::path::PathBuf;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// STUN/TURN server entry, as configured by the embedding application.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// Default STUN servers used when the application configures none.
pub static DEFAULT_ICE_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    vec![
        ServerConfig {
            id: "default-stun-0".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
});

/// Session-level knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name shown to the remote side in call invites.
    pub display_name: String,
    /// How long an outgoing call may ring unanswered before the attempt is
    /// aborted back to idle. `None` disables the timeout.
    pub dial_timeout: Option<Duration>,
    /// Directory the recording file is written into on stop.
    pub recording_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            dial_timeout: Some(Duration::from_secs(30)),
            recording_dir: std::env::temp_dir(),
        }
    }
}

impl SessionConfig {
    pub fn with_display_name(name: impl Into<String>) -> Self {
        Self {
            display_name: name.into(),
            ..Self::default()
        }
    }
}
