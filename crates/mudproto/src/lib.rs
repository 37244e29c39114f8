//! `mudproto`: the envelope and bridge protocol shared by the portal and the server.
//!
//! Every message between the two processes travels inside a `mudio::frame`
//! length-prefixed frame:
//! - byte 0: message type (`REQ_*` portal -> server, `RESP_*` server -> portal)
//! - bytes 1..9: session id (`u64` big-endian, 0 for process-wide messages)
//! - remaining bytes: JSON body, shape depends on the type
//!
//! Game traffic itself is always a [`msg::Msg`]: the `(name, args, kwargs)`
//! tuple used for both inputcommands and outputcommands.

pub mod bridge;
pub mod msg;
pub mod session;

#[derive(Debug, Clone)]
pub enum ProtoError {
    TooShort { need: usize, got: usize },
    UnknownType(u8),
    Malformed(&'static str),
    BadBody { t: u8, err: String },
}

impl std::fmt::Display for ProtoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtoError::TooShort { need, got } => {
                write!(f, "message too short: need {need}, got {got}")
            }
            ProtoError::UnknownType(t) => write!(f, "unknown message type: 0x{t:02x}"),
            ProtoError::Malformed(s) => write!(f, "malformed message: {s}"),
            ProtoError::BadBody { t, err } => {
                write!(f, "bad body for message type 0x{t:02x}: {err}")
            }
        }
    }
}

impl std::error::Error for ProtoError {}
