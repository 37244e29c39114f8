//! The portal's side of the bridge to the game server.
//!
//! One task owns the TCP link. Connections talk to it through a bounded
//! channel of [`PortalReq`]s and never wait on the server itself. When the
//! link is down, `INPUT` requests are held in a bounded [`OfflineQueue`];
//! everything else is covered by the `SYNC_ALL` sent when the server asks for
//! a resync.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use anyhow::Context;
use mudio::frame::{FrameReader, FrameWriter};
use mudproto::bridge::{PortalReq, ServerResp, parse_resp};
use mudproto::session::SessionId;
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::registry::Registry;

const RETRY_MS: u64 = 500;

/// Inputs typed while the server is unreachable.
#[derive(Debug)]
pub struct OfflineQueue {
    buf: VecDeque<PortalReq>,
    max: usize,
}

impl OfflineQueue {
    pub fn new(max: usize) -> Self {
        Self {
            buf: VecDeque::new(),
            max: max.max(1),
        }
    }

    /// Queue an `INPUT`. When full the oldest entry is evicted and returned.
    /// Other request kinds are not queued; they come back as `None`.
    pub fn push(&mut self, req: PortalReq) -> Option<PortalReq> {
        if !matches!(req, PortalReq::Input { .. }) {
            return None;
        }
        let evicted = if self.buf.len() >= self.max {
            self.buf.pop_front()
        } else {
            None
        };
        self.buf.push_back(req);
        evicted
    }

    pub fn take_all(&mut self) -> Vec<PortalReq> {
        self.buf.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }
}

enum LinkEnd {
    /// The server went away; reconnect.
    Lost,
    /// Every sender is gone; the portal is shutting down.
    Shutdown,
}

pub async fn bridge_task(
    server_addr: String,
    registry: Registry,
    mut rx: mpsc::Receiver<PortalReq>,
    queue_max: usize,
) {
    let mut announced_down = false;
    let mut offline = OfflineQueue::new(queue_max);

    loop {
        match TcpStream::connect(&server_addr).await {
            Ok(stream) => {
                announced_down = false;
                info!(server_addr = %server_addr, "connected to server");

                match run_link(stream, &registry, &mut rx, &mut offline).await {
                    Ok(LinkEnd::Shutdown) => return,
                    Ok(LinkEnd::Lost) => {}
                    Err(e) => warn!(server_addr = %server_addr, err = %format!("{e:#}"), "server link failed"),
                }
                warn!(server_addr = %server_addr, "server disconnected; reconnecting");
                registry
                    .notify_all("# The server is restarting; your input will be kept until it is back.")
                    .await;
            }
            Err(e) => {
                if !announced_down {
                    announced_down = true;
                    warn!(server_addr = %server_addr, err = %e, "server offline; retrying");
                }
            }
        }

        // Keep draining the channel while waiting so connections never block on us.
        let retry = tokio::time::sleep(Duration::from_millis(RETRY_MS));
        tokio::pin!(retry);
        loop {
            tokio::select! {
                _ = &mut retry => break,
                req = rx.recv() => {
                    let Some(req) = req else {
                        return;
                    };
                    hold(&mut offline, &registry, req).await;
                }
            }
        }
    }
}

async fn hold(offline: &mut OfflineQueue, registry: &Registry, req: PortalReq) {
    let session = req.session();
    let is_input = matches!(req, PortalReq::Input { .. });
    if let Some(old) = offline.push(req) {
        warn!(session = %old.session(), queued = offline.len(), "offline input queue full; dropping oldest");
        registry
            .notify_one(old.session(), "# Server offline; some of your input was dropped.")
            .await;
    } else if !is_input {
        debug!(session = %session, "server offline; request covered by next resync");
    }
}

async fn run_link(
    stream: TcpStream,
    registry: &Registry,
    rx: &mut mpsc::Receiver<PortalReq>,
    offline: &mut OfflineQueue,
) -> anyhow::Result<LinkEnd> {
    let (rd, wr) = stream.into_split();
    let mut fr = FrameReader::new(rd);
    let mut fw = FrameWriter::new(wr);

    // Until the server asks for a resync, it hasn't seen any session.
    let mut synced = false;
    // Sessions whose CONNECT may still be in the channel after SYNC_ALL named them.
    let mut in_sync_all: HashSet<SessionId> = HashSet::new();

    loop {
        tokio::select! {
            req = rx.recv() => {
                let Some(req) = req else {
                    return Ok(LinkEnd::Shutdown);
                };
                if !synced {
                    hold(offline, registry, req).await;
                    continue;
                }
                if let PortalReq::Connect(s) = &req {
                    if in_sync_all.remove(&s.session) {
                        continue;
                    }
                }
                write_req(&mut fw, &req).await?;
            }
            res = fr.read_frame() => {
                let Some(frame) = res.context("read from server")? else {
                    return Ok(LinkEnd::Lost);
                };
                match parse_resp(frame) {
                    Ok(ServerResp::Resync) => {
                        while let Ok(req) = rx.try_recv() {
                            hold(offline, registry, req).await;
                        }
                        let all = registry.snapshots().await;
                        info!(sessions = all.len(), queued = offline.len(), "server asked for resync");
                        in_sync_all = all.iter().map(|s| s.session).collect();
                        write_req(&mut fw, &PortalReq::SyncAll(all)).await?;
                        for req in offline.take_all() {
                            if registry.contains(req.session()).await {
                                write_req(&mut fw, &req).await?;
                            }
                        }
                        fw.flush().await?;
                        synced = true;
                    }
                    Ok(resp) => registry.route(resp).await,
                    Err(e) => warn!(err = %e, "bad server response"),
                }
            }
        }
    }
}

async fn write_req<W: AsyncWrite + Unpin>(
    fw: &mut FrameWriter<W>,
    req: &PortalReq,
) -> anyhow::Result<()> {
    let enc = req.encode().context("encode bridge request")?;
    fw.write_frame_parts(&enc.parts()).await?;
    Ok(())
}
