use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Portal-assigned session id. Stable for the life of the connection,
/// including across server restarts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SessionId(pub u64);

impl SessionId {
    pub const LEN: usize = 8;

    /// Used in frames that address the bridge itself rather than one session.
    pub const NONE: SessionId = SessionId(0);

    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(b: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(b))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Telnet,
    Websocket,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Telnet => "telnet",
            TransportKind::Websocket => "websocket",
        }
    }
}

/// What the client told us about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub encoding: String,
    pub ansi: bool,
    pub screen_width: u16,
    pub screen_height: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            encoding: "utf-8".to_string(),
            ansi: false,
            screen_width: 78,
            screen_height: 24,
            client_name: None,
        }
    }
}

impl Capabilities {
    /// Apply the kwargs of a `client_options` inputcommand.
    ///
    /// Unknown keys and values of the wrong type are ignored. Returns true if
    /// anything changed.
    pub fn apply_options(&mut self, kwargs: &Map<String, Value>) -> bool {
        let before = self.clone();
        for (k, v) in kwargs {
            match k.to_ascii_lowercase().as_str() {
                "encoding" => {
                    if let Some(s) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) {
                        self.encoding = s.to_ascii_lowercase();
                    }
                }
                "ansi" | "color" => {
                    if let Some(b) = v.as_bool() {
                        self.ansi = b;
                    }
                }
                "screenwidth" | "screen_width" => {
                    if let Some(n) = v.as_u64().filter(|n| *n > 0) {
                        self.screen_width = u16::try_from(n).unwrap_or(u16::MAX);
                    }
                }
                "screenheight" | "screen_height" => {
                    if let Some(n) = v.as_u64().filter(|n| *n > 0) {
                        self.screen_height = u16::try_from(n).unwrap_or(u16::MAX);
                    }
                }
                "client_name" | "client" => {
                    if let Some(s) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) {
                        self.client_name = Some(s.to_string());
                    }
                }
                _ => {}
            }
        }
        *self != before
    }
}

/// Login state as decided by the server, mirrored by the portal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub puppet: Option<u64>,
}

impl SessionState {
    pub fn is_logged_in(&self) -> bool {
        self.account.is_some()
    }
}

/// Everything the server needs to rebuild a session after it restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session: SessionId,
    pub transport: TransportKind,
    pub address: String,
    pub connected_unix: u64,
    #[serde(default)]
    pub caps: Capabilities,
    #[serde(default)]
    pub state: SessionState,
}
