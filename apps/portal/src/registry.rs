//! Live sessions, owned by the portal.
//!
//! The registry is the system of record for session ids, transport details and
//! capabilities. Login state is mirrored from the server's `STATE` messages so
//! it can be handed back in a `SYNC_ALL` after the server restarts.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use mudproto::bridge::ServerResp;
use mudproto::msg::Msg;
use mudproto::session::{Capabilities, SessionId, SessionSnapshot};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, warn};

/// Everything a connection's writer task can be asked to do.
#[derive(Debug)]
pub enum Outbound {
    Msg(Msg),
    /// Already-encoded transport bytes (telnet negotiation replies).
    Raw(Bytes),
    /// Capabilities changed; render subsequent output accordingly.
    Caps(Capabilities),
    /// Say goodbye and hang up.
    Close(String),
}

struct Entry {
    snap: SessionSnapshot,
    tx: mpsc::Sender<Outbound>,
    disconnect: watch::Sender<bool>,
}

#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<HashMap<SessionId, Entry>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(
        &self,
        snap: SessionSnapshot,
        tx: mpsc::Sender<Outbound>,
        disconnect: watch::Sender<bool>,
    ) {
        let mut m = self.inner.lock().await;
        m.insert(
            snap.session,
            Entry {
                snap,
                tx,
                disconnect,
            },
        );
    }

    pub async fn remove(&self, session: SessionId) -> bool {
        self.inner.lock().await.remove(&session).is_some()
    }

    pub async fn contains(&self, session: SessionId) -> bool {
        self.inner.lock().await.contains_key(&session)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Every live session, ordered by id.
    pub async fn snapshots(&self) -> Vec<SessionSnapshot> {
        let m = self.inner.lock().await;
        let mut out: Vec<SessionSnapshot> = m.values().map(|e| e.snap.clone()).collect();
        out.sort_by_key(|s| s.session);
        out
    }

    /// Change a session's capabilities in place. When `f` reports a change the
    /// writer is told and the updated snapshot is returned for a `SYNC`.
    pub async fn update_caps(
        &self,
        session: SessionId,
        f: impl FnOnce(&mut Capabilities) -> bool,
    ) -> Option<SessionSnapshot> {
        let mut m = self.inner.lock().await;
        let e = m.get_mut(&session)?;
        if !f(&mut e.snap.caps) {
            return None;
        }
        let _ = e.tx.try_send(Outbound::Caps(e.snap.caps.clone()));
        Some(e.snap.clone())
    }

    pub async fn caps(&self, session: SessionId) -> Option<Capabilities> {
        self.inner.lock().await.get(&session).map(|e| e.snap.caps.clone())
    }

    /// Fresh session id: random, nonzero and not in use.
    pub async fn alloc_id(&self) -> anyhow::Result<SessionId> {
        let m = self.inner.lock().await;
        loop {
            let mut b = [0u8; SessionId::LEN];
            getrandom::getrandom(&mut b).context("generate session id")?;
            let sid = SessionId::from_be_bytes(b);
            if sid != SessionId::NONE && !m.contains_key(&sid) {
                return Ok(sid);
            }
        }
    }

    /// Apply a server response that targets one session. `RESYNC` is the
    /// bridge's business and is ignored here.
    pub async fn route(&self, resp: ServerResp) {
        match resp {
            ServerResp::Output { session, msg } => {
                if msg.name == "client_options" {
                    // The server's view of the options; keep ours in step.
                    self.update_caps(session, |c| c.apply_options(&msg.kwargs)).await;
                }
                let tx = { self.inner.lock().await.get(&session).map(|e| e.tx.clone()) };
                let Some(tx) = tx else {
                    debug!(session = %session, "output for unknown session");
                    return;
                };
                // A full queue means the client isn't reading; only that client loses output.
                if tx.try_send(Outbound::Msg(msg)).is_err() {
                    warn!(session = %session, "session output queue full; dropping output");
                }
            }
            ServerResp::State { session, state } => {
                let mut m = self.inner.lock().await;
                if let Some(e) = m.get_mut(&session) {
                    e.snap.state = state;
                }
            }
            ServerResp::Kick { session, reason } => {
                let e = { self.inner.lock().await.remove(&session) };
                if let Some(e) = e {
                    let _ = e.tx.try_send(Outbound::Close(reason));
                    let _ = e.disconnect.send(true);
                }
            }
            ServerResp::Resync => {}
        }
    }

    pub async fn notify_all(&self, text: &str) {
        let txs = {
            let m = self.inner.lock().await;
            m.values().map(|e| e.tx.clone()).collect::<Vec<_>>()
        };
        for tx in txs {
            let _ = tx.try_send(Outbound::Msg(Msg::text(text)));
        }
    }

    pub async fn notify_one(&self, session: SessionId, text: &str) {
        let tx = { self.inner.lock().await.get(&session).map(|e| e.tx.clone()) };
        if let Some(tx) = tx {
            let _ = tx.try_send(Outbound::Msg(Msg::text(text)));
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use mudproto::session::{SessionState, TransportKind};

    pub fn snap(sid: u64) -> SessionSnapshot {
        SessionSnapshot {
            session: SessionId(sid),
            transport: TransportKind::Telnet,
            address: "127.0.0.1".to_string(),
            connected_unix: 1,
            caps: Capabilities::default(),
            state: SessionState::default(),
        }
    }

    async fn add(
        r: &Registry,
        sid: u64,
    ) -> (mpsc::Receiver<Outbound>, watch::Receiver<bool>) {
        let (tx, rx) = mpsc::channel(4);
        let (dtx, drx) = watch::channel(false);
        r.insert(snap(sid), tx, dtx).await;
        (rx, drx)
    }

    #[tokio::test]
    async fn output_reaches_only_its_session() {
        let r = Registry::new();
        let (mut a, _) = add(&r, 1).await;
        let (mut b, _) = add(&r, 2).await;

        r.route(ServerResp::Output {
            session: SessionId(2),
            msg: Msg::text("hi"),
        })
        .await;

        assert!(a.try_recv().is_err());
        match b.try_recv() {
            Ok(Outbound::Msg(m)) => assert_eq!(m.first_str(), Some("hi")),
            other => panic!("{other:?}"),
        }
    }

    #[tokio::test]
    async fn state_is_mirrored_into_snapshots() {
        let r = Registry::new();
        let _keep = add(&r, 5).await;
        let _keep2 = add(&r, 3).await;
        r.route(ServerResp::State {
            session: SessionId(5),
            state: SessionState {
                account: Some("alice".into()),
                puppet: Some(7),
            },
        })
        .await;

        let all = r.snapshots().await;
        assert_eq!(all.iter().map(|s| s.session.0).collect::<Vec<_>>(), vec![3, 5]);
        assert_eq!(all[1].state.account.as_deref(), Some("alice"));
        assert_eq!(all[1].state.puppet, Some(7));
    }

    #[tokio::test]
    async fn kick_closes_and_forgets_the_session() {
        let r = Registry::new();
        let (mut rx, drx) = add(&r, 9).await;
        r.route(ServerResp::Kick {
            session: SessionId(9),
            reason: "bye".into(),
        })
        .await;

        assert!(!r.contains(SessionId(9)).await);
        assert!(*drx.borrow());
        match rx.try_recv() {
            Ok(Outbound::Close(reason)) => assert_eq!(reason, "bye"),
            other => panic!("{other:?}"),
        }
    }

    #[tokio::test]
    async fn full_queue_drops_output_without_blocking() {
        let r = Registry::new();
        let (mut rx, _d) = add(&r, 1).await;
        for i in 0..10 {
            r.route(ServerResp::Output {
                session: SessionId(1),
                msg: Msg::text(format!("line {i}")),
            })
            .await;
        }
        let mut got = 0;
        while rx.try_recv().is_ok() {
            got += 1;
        }
        assert_eq!(got, 4);
    }

    #[tokio::test]
    async fn client_options_output_updates_portal_caps() {
        let r = Registry::new();
        let (mut rx, _d) = add(&r, 1).await;
        r.route(ServerResp::Output {
            session: SessionId(1),
            msg: Msg::new("client_options").with_kwarg("ansi", true),
        })
        .await;

        assert!(r.caps(SessionId(1)).await.unwrap().ansi);
        assert!(matches!(rx.try_recv(), Ok(Outbound::Caps(c)) if c.ansi));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Msg(m)) if m.name == "client_options"));
    }

    #[tokio::test]
    async fn allocated_ids_are_nonzero_and_fresh() {
        let r = Registry::new();
        let a = r.alloc_id().await.unwrap();
        assert_ne!(a, SessionId::NONE);
        let (tx, _rx) = mpsc::channel(1);
        let (dtx, _drx) = watch::channel(false);
        let mut s = snap(0);
        s.session = a;
        r.insert(s, tx, dtx).await;
        assert_ne!(r.alloc_id().await.unwrap(), a);
    }
}
