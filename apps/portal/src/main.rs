//! The portal: accepts telnet and websocket clients, owns their sessions, and
//! relays everything to the game server over the bridge. It keeps running
//! while the server restarts.

mod bridge;
mod registry;
mod telnet;
mod transport;
mod websocket;

use std::net::SocketAddr;

use mudproto::bridge::PortalReq;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{Level, info, warn};

use crate::registry::Registry;

fn usage_and_exit() -> ! {
    eprintln!(
        "portal\n\n\
USAGE:\n  portal [--telnet HOST:PORT] [--ws HOST:PORT] [--server HOST:PORT] [--lockdown]\n\n\
ENV:\n  PORTAL_TELNET_BIND     default 0.0.0.0:4000\n  PORTAL_WS_BIND         default 0.0.0.0:4001 (empty disables websockets)\n  SERVER_ADDR            default 127.0.0.1:4005\n  PORTAL_BRIDGE_BUFFER   default 1024 (inputs held while the server is down)\n  PORTAL_LOCKDOWN        1 to admit loopback peers only\n"
    );
    std::process::exit(2);
}

#[derive(Clone, Debug)]
struct Config {
    telnet_bind: SocketAddr,
    ws_bind: Option<SocketAddr>,
    server_addr: String,
    bridge_buffer: usize,
    lockdown: bool,
}

fn parse_args() -> Config {
    let mut telnet_bind: SocketAddr = std::env::var("PORTAL_TELNET_BIND")
        .unwrap_or_else(|_| "0.0.0.0:4000".to_string())
        .parse()
        .unwrap_or_else(|_| usage_and_exit());
    let mut ws_bind: Option<SocketAddr> = match std::env::var("PORTAL_WS_BIND") {
        Ok(v) if v.trim().is_empty() => None,
        Ok(v) => Some(v.parse().unwrap_or_else(|_| usage_and_exit())),
        Err(_) => Some(
            "0.0.0.0:4001"
                .parse()
                .unwrap_or_else(|_| usage_and_exit()),
        ),
    };
    let mut server_addr =
        std::env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:4005".to_string());
    let bridge_buffer: usize = std::env::var("PORTAL_BRIDGE_BUFFER")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1024)
        .max(1);
    let mut lockdown = std::env::var("PORTAL_LOCKDOWN")
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false);

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--telnet" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                telnet_bind = v.parse().unwrap_or_else(|_| usage_and_exit());
            }
            "--ws" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                ws_bind = if v.trim().is_empty() {
                    None
                } else {
                    Some(v.parse().unwrap_or_else(|_| usage_and_exit()))
                };
            }
            "--server" => {
                server_addr = it.next().unwrap_or_else(|| usage_and_exit());
            }
            "--lockdown" => lockdown = true,
            "-h" | "--help" => usage_and_exit(),
            _ => usage_and_exit(),
        }
    }

    Config {
        telnet_bind,
        ws_bind,
        server_addr,
        bridge_buffer,
        lockdown,
    }
}

fn admitted(cfg: &Config, peer: &SocketAddr) -> bool {
    !cfg.lockdown || peer.ip().is_loopback()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,portal=info".into()),
        )
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    let cfg = parse_args();
    let registry = Registry::new();

    let (bridge_tx, bridge_rx) = mpsc::channel::<PortalReq>(cfg.bridge_buffer);
    tokio::spawn(bridge::bridge_task(
        cfg.server_addr.clone(),
        registry.clone(),
        bridge_rx,
        cfg.bridge_buffer,
    ));

    let telnet = TcpListener::bind(cfg.telnet_bind).await?;
    info!(bind = %cfg.telnet_bind, server_addr = %cfg.server_addr, lockdown = cfg.lockdown, "telnet listening");

    if let Some(ws_bind) = cfg.ws_bind {
        let ws = TcpListener::bind(ws_bind).await?;
        info!(bind = %ws_bind, "websocket listening");
        let cfg = cfg.clone();
        let registry = registry.clone();
        let bridge_tx = bridge_tx.clone();
        tokio::spawn(async move {
            loop {
                let (stream, peer) = match ws.accept().await {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(err = %e, "websocket accept failed");
                        continue;
                    }
                };
                if !admitted(&cfg, &peer) {
                    info!(peer = %peer, "lockdown: refusing non-local websocket peer");
                    continue;
                }
                let registry = registry.clone();
                let bridge_tx = bridge_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        websocket::handle_ws(stream, peer.ip().to_string(), registry, bridge_tx)
                            .await
                    {
                        warn!(peer = %peer, err = %format!("{e:#}"), "websocket connection ended with error");
                    }
                });
            }
        });
    }

    loop {
        let (stream, peer) = telnet.accept().await?;
        if !admitted(&cfg, &peer) {
            info!(peer = %peer, "lockdown: refusing non-local telnet peer");
            drop(stream);
            continue;
        }
        let _ = stream.set_nodelay(true);
        let registry = registry.clone();
        let bridge_tx = bridge_tx.clone();
        tokio::spawn(async move {
            if let Err(e) =
                telnet::handle_telnet(stream, peer.ip().to_string(), registry, bridge_tx).await
            {
                warn!(peer = %peer, err = %format!("{e:#}"), "connection ended with error");
            }
        });
    }
}
