use anyhow::Context;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use mudproto::bridge::PortalReq;
use mudproto::msg::Msg;
use mudproto::session::{Capabilities, SessionSnapshot, SessionState, TransportKind};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

use crate::registry::{Outbound, Registry};
use crate::transport::{Transport, render};

/// Every outputcommand goes out as its JSON array, one text frame each.
pub struct WsOut;

impl WsOut {
    fn frame(msg: &Msg) -> Option<Message> {
        String::from_utf8(msg.to_json()).ok().map(Message::Text)
    }
}

impl Transport for WsOut {
    type Frame = Message;

    fn send_text(&mut self, msg: &Msg) -> Option<Message> {
        Self::frame(msg)
    }

    fn send_default(&mut self, msg: &Msg) -> Option<Message> {
        Self::frame(msg)
    }
}

/// `["name", [args], {kwargs}]`, or any other text as a `text` inputcommand.
pub fn parse_inbound(s: &str) -> Msg {
    let t = s.trim();
    if t.starts_with('[') {
        if let Ok(m) = Msg::from_json(t.as_bytes()) {
            return m;
        }
    }
    Msg::text(s.trim_end_matches(['\r', '\n']))
}

pub async fn handle_ws<S>(
    stream: S,
    address: String,
    registry: Registry,
    bridge: mpsc::Sender<PortalReq>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .context("accept ws")?;
    let session = registry.alloc_id().await?;
    let (mut sink, mut stream) = ws.split();

    let (disconnect_tx, mut disconnect_rx) = watch::channel(false);
    let (tx, mut rx) = mpsc::channel::<Outbound>(128);
    let writer = tokio::spawn(async move {
        let mut out = WsOut;
        while let Some(o) = rx.recv().await {
            let res = match o {
                Outbound::Msg(m) => match render(&mut out, &m) {
                    Some(f) => sink.send(f).await,
                    None => continue,
                },
                Outbound::Raw(_) | Outbound::Caps(_) => continue,
                Outbound::Close(reason) => {
                    if let Some(f) = out.send_text(&Msg::text(reason)) {
                        let _ = sink.send(f).await;
                    }
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            };
            if res.is_err() {
                break;
            }
        }
    });

    let snap = SessionSnapshot {
        session,
        transport: TransportKind::Websocket,
        address: address.clone(),
        connected_unix: u64::try_from(Utc::now().timestamp()).unwrap_or(0),
        caps: Capabilities {
            ansi: true,
            ..Capabilities::default()
        },
        state: SessionState::default(),
    };
    registry.insert(snap.clone(), tx.clone(), disconnect_tx).await;
    info!(session = %session, addr = %address, "websocket session connected");

    let res = async {
        bridge.send(PortalReq::Connect(snap)).await?;

        loop {
            tokio::select! {
                _ = disconnect_rx.changed() => break,
                m = stream.next() => {
                    let m = match m {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => {
                            debug!(session = %session, err = %e, "websocket read failed");
                            break;
                        }
                        None => break,
                    };
                    let msg = match m {
                        Message::Text(s) => parse_inbound(&s),
                        Message::Close(_) => break,
                        _ => continue,
                    };
                    if msg.name == "client_options" {
                        registry
                            .update_caps(session, |c| c.apply_options(&msg.kwargs))
                            .await;
                    }
                    bridge.send(PortalReq::Input { session, msg }).await?;
                }
            }
        }
        anyhow::Ok(())
    }
    .await;

    registry.remove(session).await;
    let _ = bridge.send(PortalReq::Disconnect { session }).await;
    info!(session = %session, "websocket session closed");
    drop(tx);
    let _ = writer.await;
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use mudproto::bridge::ServerResp;

    #[test]
    fn json_arrays_and_plain_text() {
        assert_eq!(
            parse_inbound(r#"["look", ["here"], {}]"#),
            Msg::new("look").with_arg("here")
        );
        assert_eq!(parse_inbound("say hi\n"), Msg::text("say hi"));
        assert_eq!(parse_inbound("[not json"), Msg::text("[not json"));
    }

    #[test]
    fn output_is_the_wire_array() {
        let f = render(&mut WsOut, &Msg::prompt("> ")).unwrap();
        assert_eq!(f, Message::Text(r#"["prompt",["> "],{}]"#.to_string()));
    }

    #[tokio::test]
    async fn websocket_session_round_trip() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let registry = Registry::new();
        let (btx, mut brx) = mpsc::channel(16);
        let conn = tokio::spawn(handle_ws(server, "::1".into(), registry.clone(), btx));

        let (mut ws, _) = tokio_tungstenite::client_async("ws://localhost/", client)
            .await
            .unwrap();

        let session = match brx.recv().await {
            Some(PortalReq::Connect(s)) => {
                assert_eq!(s.transport, TransportKind::Websocket);
                s.session
            }
            other => panic!("{other:?}"),
        };

        ws.send(Message::Text(r#"["client_options", [], {"screenwidth": 100}]"#.into()))
            .await
            .unwrap();
        match brx.recv().await {
            Some(PortalReq::Input { msg, .. }) => assert_eq!(msg.name, "client_options"),
            other => panic!("{other:?}"),
        }
        assert_eq!(registry.caps(session).await.unwrap().screen_width, 100);

        ws.send(Message::Text("look".into())).await.unwrap();
        match brx.recv().await {
            Some(PortalReq::Input { msg, .. }) => assert_eq!(msg, Msg::text("look")),
            other => panic!("{other:?}"),
        }

        registry
            .route(ServerResp::Output {
                session,
                msg: Msg::text("\x1b[1mbold\x1b[0m"),
            })
            .await;
        match ws.next().await {
            Some(Ok(Message::Text(s))) => {
                assert_eq!(Msg::from_json(s.as_bytes()).unwrap(), Msg::text("\x1b[1mbold\x1b[0m"));
            }
            other => panic!("{other:?}"),
        }

        ws.close(None).await.unwrap();
        match brx.recv().await {
            Some(PortalReq::Disconnect { session: s }) => assert_eq!(s, session),
            other => panic!("{other:?}"),
        }
        conn.await.unwrap().unwrap();
    }
}
