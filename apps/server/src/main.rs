//! The game server: owns the world and the command engine, and serves one
//! portal at a time over the bridge. Restarting it does not drop players;
//! the portal replays its sessions when asked.

mod auth;
mod commands;
mod store;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use mudcore::engine::Engine;
use mudcore::settings::{MultiSession, Settings};
use mudio::frame::{FrameReader, FrameWriter};
use mudproto::bridge::{ServerResp, parse_req};
use tokio::io::AsyncWrite;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{Level, debug, error, info, warn};

fn usage_and_exit() -> ! {
    eprintln!(
        "server\n\n\
USAGE:\n  server [--bind HOST:PORT] [--world PATH] [--multisession 0-3]\n\n\
ENV:\n  SERVER_BIND                default 127.0.0.1:4005\n  MUD_WORLD_PATH             default world.json\n  MUD_PERMISSION_HIERARCHY   default Developer,Admin,Builder,Helper,Player,Guest\n  MUD_LOCK_FUNC_MODULES      default core,world\n  MUD_MULTISESSION_MODE      default 0 (0 single, 1 shared puppet, 2 per session, 3 shared)\n  MUD_INPUT_QUEUE_MAX        default 32\n\nSIGHUP reloads command sets.\n"
    );
    std::process::exit(2);
}

#[derive(Clone, Debug)]
struct Config {
    bind: SocketAddr,
    world_path: PathBuf,
    settings: Settings,
}

/// Comma-separated, trimmed, empties dropped.
fn parse_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_multisession(s: &str) -> Option<MultiSession> {
    s.trim().parse::<u8>().ok().and_then(MultiSession::from_mode)
}

fn parse_args() -> Config {
    let mut bind: SocketAddr = std::env::var("SERVER_BIND")
        .unwrap_or_else(|_| "127.0.0.1:4005".to_string())
        .parse()
        .unwrap_or_else(|_| usage_and_exit());
    let mut world_path = PathBuf::from(
        std::env::var("MUD_WORLD_PATH").unwrap_or_else(|_| "world.json".to_string()),
    );

    let mut settings = Settings::default();
    if let Ok(v) = std::env::var("MUD_PERMISSION_HIERARCHY") {
        let names = parse_list(&v);
        if names.is_empty() {
            usage_and_exit();
        }
        settings.permission_hierarchy = names;
    }
    if let Ok(v) = std::env::var("MUD_LOCK_FUNC_MODULES") {
        settings.lock_func_modules = parse_list(&v);
    }
    if let Ok(v) = std::env::var("MUD_MULTISESSION_MODE") {
        settings.multisession = parse_multisession(&v).unwrap_or_else(|| usage_and_exit());
    }
    if let Some(n) = std::env::var("MUD_INPUT_QUEUE_MAX")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
    {
        settings.max_queued_inputs = n.max(1);
    }

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--bind" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                bind = v.parse().unwrap_or_else(|_| usage_and_exit());
            }
            "--world" => {
                world_path = PathBuf::from(it.next().unwrap_or_else(|| usage_and_exit()));
            }
            "--multisession" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                settings.multisession = parse_multisession(&v).unwrap_or_else(|| usage_and_exit());
            }
            "-h" | "--help" => usage_and_exit(),
            _ => usage_and_exit(),
        }
    }

    Config {
        bind,
        world_path,
        settings,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server=info".into()),
        )
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    let cfg = parse_args();
    let world = store::load_or_init(&cfg.world_path)?;
    let catalog = commands::catalog(&cfg.settings);
    let mut engine =
        Engine::new(cfg.settings.clone(), catalog, world).context("start command engine")?;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
        info!("shutdown signal received");
    });
    let mut hup = signal(SignalKind::hangup()).context("install SIGHUP handler")?;

    let listener = TcpListener::bind(cfg.bind).await?;
    info!(
        bind = %cfg.bind,
        world = %cfg.world_path.display(),
        multisession = cfg.settings.multisession.mode(),
        "server listening for portal"
    );

    let start = Instant::now();
    loop {
        let (stream, peer) = tokio::select! {
            res = listener.accept() => res?,
            _ = shutdown_rx.changed() => break,
        };
        let _ = stream.set_nodelay(true);
        info!(peer = %peer, "portal connected");

        let end = handle_portal(
            &mut engine,
            stream,
            &cfg,
            start,
            &mut hup,
            &mut shutdown_rx,
        )
        .await;
        match end {
            Ok(PortalEnd::Shutdown) => break,
            Ok(PortalEnd::Lost) => warn!(peer = %peer, "portal disconnected; waiting for it"),
            Err(e) => warn!(peer = %peer, err = %format!("{e:#}"), "portal link failed"),
        }
    }

    save_if_dirty(&mut engine, &cfg).await;
    engine.shutdown();
    info!("server stopped");
    Ok(())
}

enum PortalEnd {
    Lost,
    Shutdown,
}

fn now_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

async fn save_if_dirty(engine: &mut Engine, cfg: &Config) {
    if !engine.world_mut().take_dirty() {
        return;
    }
    if let Err(e) = store::save(&cfg.world_path, engine.world()).await {
        // Try again with the next change.
        engine.world_mut().mark_dirty();
        error!(path = %cfg.world_path.display(), err = %format!("{e:#}"), "saving world failed");
    }
}

async fn flush_output<W: AsyncWrite + Unpin>(
    engine: &mut Engine,
    fw: &mut FrameWriter<W>,
) -> anyhow::Result<()> {
    let out = engine.take_output();
    if out.is_empty() {
        return Ok(());
    }
    for resp in &out {
        match resp.encode() {
            Ok(enc) => fw.write_frame_parts(&enc.parts()).await?,
            Err(e) => warn!(session = %resp.session(), err = %e, "dropping unencodable response"),
        }
    }
    fw.flush().await?;
    Ok(())
}

async fn handle_portal(
    engine: &mut Engine,
    stream: TcpStream,
    cfg: &Config,
    start: Instant,
    hup: &mut Signal,
    shutdown: &mut watch::Receiver<bool>,
) -> anyhow::Result<PortalEnd> {
    let (rd, wr) = stream.into_split();
    let mut fr = FrameReader::new(rd);
    let mut fw = FrameWriter::new(wr);

    // Ask the portal for every session it holds before anything else.
    let enc = ServerResp::Resync.encode().context("encode resync")?;
    fw.write_frame_parts(&enc.parts()).await?;
    fw.flush().await?;

    loop {
        engine.run_due(now_ms(start));
        flush_output(engine, &mut fw).await?;
        save_if_dirty(engine, cfg).await;

        let sleep_ms = engine
            .next_due_ms()
            .map(|due| due.saturating_sub(now_ms(start)))
            .unwrap_or(86_400_000);

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(sleep_ms.min(86_400_000))) => {}
            res = fr.read_frame() => {
                let Some(frame) = res.context("read from portal")? else {
                    return Ok(PortalEnd::Lost);
                };
                match parse_req(frame) {
                    Ok(req) => engine.handle(req, now_ms(start)),
                    Err(e) => warn!(err = %e, "bad portal request"),
                }
            }
            _ = hup.recv() => {
                let catalog = commands::catalog(engine.settings());
                engine.reload(catalog);
            }
            _ = shutdown.changed() => {
                debug!("closing portal link for shutdown");
                flush_output(engine, &mut fw).await?;
                return Ok(PortalEnd::Shutdown);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mudproto::bridge::PortalReq;
    use mudproto::msg::Msg;
    use mudproto::session::{Capabilities, SessionId, SessionSnapshot, TransportKind};

    #[test]
    fn list_settings_parse() {
        assert_eq!(parse_list(" core, world ,,"), vec!["core", "world"]);
        assert!(parse_list(" , ").is_empty());
        assert_eq!(parse_multisession("2"), Some(MultiSession::PerSession));
        assert_eq!(parse_multisession("4"), None);
        assert_eq!(parse_multisession("x"), None);
    }

    fn scratch_cfg() -> Config {
        let dir = std::env::temp_dir().join(format!("mud-server-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        Config {
            bind: "127.0.0.1:0".parse().unwrap(),
            world_path: dir.join("world.json"),
            settings: Settings::default(),
        }
    }

    async fn send(fw: &mut FrameWriter<tokio::net::tcp::OwnedWriteHalf>, req: PortalReq) {
        let enc = req.encode().unwrap();
        fw.write_frame_parts(&enc.parts()).await.unwrap();
        fw.flush().await.unwrap();
    }

    #[tokio::test]
    async fn portal_link_resyncs_then_runs_commands() {
        let cfg = scratch_cfg();
        let world = store::load_or_init(&cfg.world_path).unwrap();
        let mut engine =
            Engine::new(cfg.settings.clone(), commands::catalog(&cfg.settings), world).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let portal = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (rd, wr) = stream.into_split();
            let mut fr = FrameReader::new(rd);
            let mut fw = FrameWriter::new(wr);

            let first = mudproto::bridge::parse_resp(fr.read_frame().await.unwrap().unwrap());
            assert!(matches!(first, Ok(ServerResp::Resync)));

            let snap = SessionSnapshot {
                session: SessionId(7),
                transport: TransportKind::Telnet,
                address: "127.0.0.1".into(),
                connected_unix: 0,
                caps: Capabilities::default(),
                state: Default::default(),
            };
            send(&mut fw, PortalReq::SyncAll(vec![])).await;
            send(&mut fw, PortalReq::Connect(snap)).await;
            send(
                &mut fw,
                PortalReq::Input {
                    session: SessionId(7),
                    msg: Msg::text("create alice long-enough"),
                },
            )
            .await;

            let mut texts = Vec::new();
            while texts.len() < 2 {
                let resp = mudproto::bridge::parse_resp(fr.read_frame().await.unwrap().unwrap());
                if let Ok(ServerResp::Output { msg, .. }) = resp {
                    texts.push(msg.joined_text());
                }
            }
            // Hanging up ends the link once the server is idle again.
            texts
        });

        let (stream, _) = listener.accept().await.unwrap();
        let (_tx, mut shutdown) = watch::channel(false);
        let mut hup = signal(SignalKind::hangup()).unwrap();
        let link = handle_portal(&mut engine, stream, &cfg, Instant::now(), &mut hup, &mut shutdown);

        let (texts, end) = tokio::join!(portal, link);
        let texts = texts.unwrap();
        assert!(matches!(end, Ok(PortalEnd::Lost)));
        assert!(texts[0].contains("connect <username> <password>"));
        assert!(texts[1].starts_with("A new account 'alice' was created."));

        // The new account reached disk.
        let saved = store::load_or_init(&cfg.world_path).unwrap();
        assert!(saved.account_by_name("alice").is_some());
        let _ = std::fs::remove_dir_all(cfg.world_path.parent().unwrap());
    }
}
