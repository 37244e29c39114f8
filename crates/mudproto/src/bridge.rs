//! Portal <-> server messages.
//!
//! Payload layout (inside a `mudio::frame`):
//! - `t` (u8)
//! - `session` (8 bytes, big-endian)
//! - JSON body
//!
//! The body for each type:
//! - `REQ_CONNECT`, `REQ_SYNC`: [`SessionSnapshot`]
//! - `REQ_DISCONNECT`: empty
//! - `REQ_INPUT`, `RESP_OUTPUT`: [`Msg`]
//! - `REQ_SYNC_ALL`: `[SessionSnapshot, ...]`, session id 0
//! - `RESP_STATE`: [`SessionState`]
//! - `RESP_KICK`: UTF-8 reason text (not JSON)
//! - `RESP_RESYNC`: empty, session id 0

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::ProtoError;
use crate::msg::Msg;
use crate::session::{SessionId, SessionSnapshot, SessionState};

pub const REQ_CONNECT: u8 = 0x01;
pub const REQ_DISCONNECT: u8 = 0x02;
pub const REQ_INPUT: u8 = 0x03;
pub const REQ_SYNC: u8 = 0x04;
pub const REQ_SYNC_ALL: u8 = 0x05;

pub const RESP_OUTPUT: u8 = 0x81;
pub const RESP_STATE: u8 = 0x82;
pub const RESP_KICK: u8 = 0x83;
pub const RESP_RESYNC: u8 = 0x84;

pub const HEADER_LEN: usize = 1 + SessionId::LEN;

#[derive(Debug, Clone, PartialEq)]
pub enum PortalReq {
    Connect(SessionSnapshot),
    Disconnect { session: SessionId },
    Input { session: SessionId, msg: Msg },
    Sync(SessionSnapshot),
    SyncAll(Vec<SessionSnapshot>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerResp {
    Output { session: SessionId, msg: Msg },
    State { session: SessionId, state: SessionState },
    Kick { session: SessionId, reason: String },
    Resync,
}

/// An encoded message, ready for `FrameWriter::write_frame_parts`.
#[derive(Debug, Clone)]
pub struct Encoded {
    pub header: [u8; HEADER_LEN],
    pub body: Bytes,
}

impl Encoded {
    pub fn parts(&self) -> [&[u8]; 2] {
        [&self.header, &self.body]
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(HEADER_LEN + self.body.len());
        v.extend_from_slice(&self.header);
        v.extend_from_slice(&self.body);
        v
    }
}

pub fn header(t: u8, session: SessionId) -> [u8; HEADER_LEN] {
    let mut h = [0u8; HEADER_LEN];
    h[0] = t;
    h[1..].copy_from_slice(&session.to_be_bytes());
    h
}

fn json_body<T: Serialize>(t: u8, v: &T) -> Result<Bytes, ProtoError> {
    serde_json::to_vec(v).map(Bytes::from).map_err(|e| ProtoError::BadBody {
        t,
        err: e.to_string(),
    })
}

fn from_json<T: DeserializeOwned>(t: u8, body: &[u8]) -> Result<T, ProtoError> {
    serde_json::from_slice(body).map_err(|e| ProtoError::BadBody {
        t,
        err: e.to_string(),
    })
}

fn split_header(p: &Bytes) -> Result<(u8, SessionId, Bytes), ProtoError> {
    if p.len() < HEADER_LEN {
        return Err(ProtoError::TooShort {
            need: HEADER_LEN,
            got: p.len(),
        });
    }
    let t = p[0];
    let mut sid = [0u8; SessionId::LEN];
    sid.copy_from_slice(&p[1..HEADER_LEN]);
    Ok((t, SessionId::from_be_bytes(sid), p.slice(HEADER_LEN..)))
}

impl PortalReq {
    pub fn session(&self) -> SessionId {
        match self {
            PortalReq::Connect(s) | PortalReq::Sync(s) => s.session,
            PortalReq::Disconnect { session } | PortalReq::Input { session, .. } => *session,
            PortalReq::SyncAll(_) => SessionId::NONE,
        }
    }

    pub fn encode(&self) -> Result<Encoded, ProtoError> {
        let (t, body) = match self {
            PortalReq::Connect(s) => (REQ_CONNECT, json_body(REQ_CONNECT, s)?),
            PortalReq::Disconnect { .. } => (REQ_DISCONNECT, Bytes::new()),
            PortalReq::Input { msg, .. } => (REQ_INPUT, json_body(REQ_INPUT, msg)?),
            PortalReq::Sync(s) => (REQ_SYNC, json_body(REQ_SYNC, s)?),
            PortalReq::SyncAll(all) => (REQ_SYNC_ALL, json_body(REQ_SYNC_ALL, all)?),
        };
        Ok(Encoded {
            header: header(t, self.session()),
            body,
        })
    }
}

impl ServerResp {
    pub fn session(&self) -> SessionId {
        match self {
            ServerResp::Output { session, .. }
            | ServerResp::State { session, .. }
            | ServerResp::Kick { session, .. } => *session,
            ServerResp::Resync => SessionId::NONE,
        }
    }

    pub fn encode(&self) -> Result<Encoded, ProtoError> {
        let (t, body) = match self {
            ServerResp::Output { msg, .. } => (RESP_OUTPUT, json_body(RESP_OUTPUT, msg)?),
            ServerResp::State { state, .. } => (RESP_STATE, json_body(RESP_STATE, state)?),
            ServerResp::Kick { reason, .. } => {
                (RESP_KICK, Bytes::copy_from_slice(reason.as_bytes()))
            }
            ServerResp::Resync => (RESP_RESYNC, Bytes::new()),
        };
        Ok(Encoded {
            header: header(t, self.session()),
            body,
        })
    }
}

fn snapshot_for(t: u8, session: SessionId, body: &[u8]) -> Result<SessionSnapshot, ProtoError> {
    let snap: SessionSnapshot = from_json(t, body)?;
    if snap.session != session {
        return Err(ProtoError::Malformed("snapshot session id mismatch"));
    }
    Ok(snap)
}

pub fn parse_req(p: Bytes) -> Result<PortalReq, ProtoError> {
    let (t, session, body) = split_header(&p)?;
    match t {
        REQ_CONNECT => Ok(PortalReq::Connect(snapshot_for(t, session, &body)?)),
        REQ_DISCONNECT => Ok(PortalReq::Disconnect { session }),
        REQ_INPUT => Ok(PortalReq::Input {
            session,
            msg: from_json(t, &body)?,
        }),
        REQ_SYNC => Ok(PortalReq::Sync(snapshot_for(t, session, &body)?)),
        REQ_SYNC_ALL => {
            if session != SessionId::NONE {
                return Err(ProtoError::Malformed("sync_all must use session 0"));
            }
            Ok(PortalReq::SyncAll(from_json(t, &body)?))
        }
        _ => Err(ProtoError::UnknownType(t)),
    }
}

pub fn parse_resp(p: Bytes) -> Result<ServerResp, ProtoError> {
    let (t, session, body) = split_header(&p)?;
    match t {
        RESP_OUTPUT => Ok(ServerResp::Output {
            session,
            msg: from_json(t, &body)?,
        }),
        RESP_STATE => Ok(ServerResp::State {
            session,
            state: from_json(t, &body)?,
        }),
        RESP_KICK => Ok(ServerResp::Kick {
            session,
            reason: String::from_utf8_lossy(&body).into_owned(),
        }),
        RESP_RESYNC => Ok(ServerResp::Resync),
        _ => Err(ProtoError::UnknownType(t)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Capabilities, TransportKind};

    fn snap(id: u64) -> SessionSnapshot {
        SessionSnapshot {
            session: SessionId(id),
            transport: TransportKind::Telnet,
            address: "10.0.0.1:5555".to_string(),
            connected_unix: 1_700_000_000,
            caps: Capabilities::default(),
            state: SessionState {
                account: Some("alice".to_string()),
                puppet: Some(12),
            },
        }
    }

    #[test]
    fn header_layout() {
        let h = header(REQ_INPUT, SessionId(0x0102));
        assert_eq!(h, [REQ_INPUT, 0, 0, 0, 0, 0, 0, 1, 2]);
    }

    #[test]
    fn input_survives_the_bridge() {
        let req = PortalReq::Input {
            session: SessionId(9),
            msg: Msg::text("say hello"),
        };
        let enc = req.encode().unwrap();
        assert_eq!(parse_req(Bytes::from(enc.to_vec())).unwrap(), req);
    }

    #[test]
    fn sync_all_carries_login_state() {
        let req = PortalReq::SyncAll(vec![snap(1), snap(2)]);
        let enc = req.encode().unwrap();
        assert_eq!(&enc.header[1..], &[0u8; 8]);
        match parse_req(Bytes::from(enc.to_vec())).unwrap() {
            PortalReq::SyncAll(all) => {
                assert_eq!(all.len(), 2);
                assert_eq!(all[1].state.puppet, Some(12));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn connect_rejects_mismatched_session() {
        let body = serde_json::to_vec(&snap(5)).unwrap();
        let mut p = header(REQ_CONNECT, SessionId(6)).to_vec();
        p.extend_from_slice(&body);
        assert!(matches!(
            parse_req(Bytes::from(p)),
            Err(ProtoError::Malformed(_))
        ));
    }

    #[test]
    fn kick_reason_is_plain_text() {
        let resp = ServerResp::Kick {
            session: SessionId(3),
            reason: "Logged in from elsewhere.".to_string(),
        };
        let enc = resp.encode().unwrap();
        assert_eq!(&enc.body[..], b"Logged in from elsewhere.");
        assert_eq!(parse_resp(Bytes::from(enc.to_vec())).unwrap(), resp);
    }

    #[test]
    fn rejects_short_and_unknown() {
        assert!(matches!(
            parse_resp(Bytes::from_static(&[RESP_OUTPUT, 0, 0])),
            Err(ProtoError::TooShort { need: 9, got: 3 })
        ));
        let p = header(0x7f, SessionId(1));
        assert!(matches!(
            parse_resp(Bytes::copy_from_slice(&p)),
            Err(ProtoError::UnknownType(0x7f))
        ));
    }

    #[test]
    fn bad_json_body_is_reported_with_type() {
        let mut p = header(REQ_INPUT, SessionId(1)).to_vec();
        p.extend_from_slice(b"look");
        match parse_req(Bytes::from(p)) {
            Err(ProtoError::BadBody { t, .. }) => assert_eq!(t, REQ_INPUT),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
