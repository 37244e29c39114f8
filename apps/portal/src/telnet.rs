use std::borrow::Cow;

use bytes::Bytes;
use chrono::Utc;
use mudio::line::{Line, LineBuffer};
use mudio::telnet::{IacParser, TelnetEvent, escape_iac, go_ahead};
use mudproto::bridge::PortalReq;
use mudproto::msg::Msg;
use mudproto::session::{Capabilities, SessionSnapshot, SessionState, TransportKind};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::registry::{Outbound, Registry};
use crate::transport::{Transport, render, strip_ansi};

const MAX_LINE_LEN: usize = 8 * 1024;

/// Terminal types that are known to understand ANSI color.
const ANSI_TERMS: &[&str] = &[
    "ansi", "xterm", "vt100", "vt102", "linux", "screen", "tmux", "color", "mudlet", "mushclient",
    "tintin", "zmud", "cmud",
];

pub struct TelnetOut {
    pub caps: Capabilities,
}

impl TelnetOut {
    pub fn new(caps: Capabilities) -> Self {
        Self { caps }
    }

    fn encode(&self, text: &str) -> Vec<u8> {
        let text = if self.caps.ansi {
            Cow::Borrowed(text)
        } else {
            strip_ansi(text)
        };
        let text = text.replace("\r\n", "\n").replace('\n', "\r\n");
        escape_iac(&encode_chars(&self.caps.encoding, &text))
    }
}

impl Transport for TelnetOut {
    type Frame = Vec<u8>;

    fn send_text(&mut self, msg: &Msg) -> Option<Vec<u8>> {
        let mut b = self.encode(&msg.joined_text());
        b.extend_from_slice(b"\r\n");
        Some(b)
    }

    /// No newline; `IAC GA` tells line-mode clients the prompt is complete.
    fn send_prompt(&mut self, msg: &Msg) -> Option<Vec<u8>> {
        let mut b = self.encode(&msg.joined_text());
        b.extend_from_slice(&go_ahead());
        Some(b)
    }

    fn send_default(&mut self, msg: &Msg) -> Option<Vec<u8>> {
        debug!(cmd = %msg.name, "telnet ignores outputcommand");
        None
    }
}

fn is_latin1(encoding: &str) -> bool {
    matches!(encoding, "latin-1" | "latin1" | "iso-8859-1")
}

fn encode_chars(encoding: &str, text: &str) -> Vec<u8> {
    if is_latin1(encoding) {
        text.chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect()
    } else {
        text.as_bytes().to_vec()
    }
}

fn decode_line(encoding: &str, b: &[u8]) -> String {
    if is_latin1(encoding) {
        b.iter().map(|&c| char::from(c)).collect()
    } else {
        String::from_utf8_lossy(b).into_owned()
    }
}

/// Fold negotiation results into `caps`. Returns true if anything changed.
fn apply_events(caps: &mut Capabilities, events: &[TelnetEvent]) -> bool {
    let before = caps.clone();
    for ev in events {
        match ev {
            TelnetEvent::WindowSize { width, height } => {
                if *width > 0 {
                    caps.screen_width = *width;
                }
                if *height > 0 {
                    caps.screen_height = *height;
                }
            }
            TelnetEvent::TerminalType(name) => {
                let lower = name.to_ascii_lowercase();
                if ANSI_TERMS.iter().any(|t| lower.contains(t)) {
                    caps.ansi = true;
                }
                caps.client_name = Some(name.clone());
            }
            TelnetEvent::Refused(opt) => debug!(opt = *opt, "client refused telnet option"),
        }
    }
    *caps != before
}

pub async fn handle_telnet<S>(
    stream: S,
    address: String,
    registry: Registry,
    bridge: mpsc::Sender<PortalReq>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let session = registry.alloc_id().await?;
    let (mut rd, mut wr) = tokio::io::split(stream);

    let (disconnect_tx, mut disconnect_rx) = watch::channel(false);
    let (write_tx, mut write_rx) = mpsc::channel::<Outbound>(128);
    let writer = tokio::spawn(async move {
        let mut out = TelnetOut::new(Capabilities::default());
        while let Some(o) = write_rx.recv().await {
            let b = match o {
                Outbound::Msg(m) => match render(&mut out, &m) {
                    Some(b) => b,
                    None => continue,
                },
                Outbound::Raw(b) => b.to_vec(),
                Outbound::Caps(c) => {
                    out.caps = c;
                    continue;
                }
                Outbound::Close(reason) => {
                    if let Some(b) = out.send_text(&Msg::text(reason)) {
                        let _ = wr.write_all(&b).await;
                    }
                    let _ = wr.shutdown().await;
                    break;
                }
            };
            if wr.write_all(&b).await.is_err() {
                break;
            }
        }
    });

    let mut iac = IacParser::new();
    let _ = write_tx.send(Outbound::Raw(Bytes::from(iac.greeting()))).await;

    let snap = SessionSnapshot {
        session,
        transport: TransportKind::Telnet,
        address: address.clone(),
        connected_unix: u64::try_from(Utc::now().timestamp()).unwrap_or(0),
        caps: Capabilities::default(),
        state: SessionState::default(),
    };
    registry.insert(snap.clone(), write_tx.clone(), disconnect_tx).await;
    let sessions = registry.len().await;
    info!(session = %session, addr = %address, sessions = sessions, "telnet session connected");

    let res = async {
        bridge.send(PortalReq::Connect(snap)).await?;

        let mut lines = LineBuffer::new(MAX_LINE_LEN);
        let mut buf = vec![0u8; 4096];
        loop {
            tokio::select! {
                _ = disconnect_rx.changed() => break,
                n = rd.read(&mut buf) => {
                    let n = n?;
                    if n == 0 {
                        break;
                    }
                    let p = iac.parse(&buf[..n]);
                    if !p.replies.is_empty() {
                        let _ = write_tx.send(Outbound::Raw(Bytes::from(p.replies))).await;
                    }
                    if !p.events.is_empty() {
                        let changed = registry
                            .update_caps(session, |c| apply_events(c, &p.events))
                            .await;
                        if let Some(s) = changed {
                            bridge.send(PortalReq::Sync(s)).await?;
                        }
                    }

                    lines.push(&p.data);
                    let encoding = match registry.caps(session).await {
                        Some(c) => c.encoding,
                        None => break,
                    };
                    while let Some(line) = lines.pop_line() {
                        match line {
                            Line::Complete(b) => {
                                let msg = Msg::text(decode_line(&encoding, &b));
                                bridge.send(PortalReq::Input { session, msg }).await?;
                            }
                            Line::Overlong => {
                                let _ = write_tx
                                    .send(Outbound::Msg(Msg::text("Line too long; ignored.")))
                                    .await;
                            }
                        }
                    }
                }
            }
        }
        anyhow::Ok(())
    }
    .await;

    registry.remove(session).await;
    let _ = bridge.send(PortalReq::Disconnect { session }).await;
    info!(session = %session, "telnet session closed");
    drop(write_tx);
    let _ = writer.await;
    res
}
