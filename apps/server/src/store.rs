//! The world file: accounts, characters, rooms and channels as one JSON document.

use std::path::{Path, PathBuf};

use anyhow::Context;
use mudcore::lock::LockHandler;
use mudcore::world::{EntityKind, World};
use tracing::info;

pub const START_ROOM: &str = "Limbo";
pub const PUBLIC_CHANNEL: &str = "Public";

pub fn load_or_init(path: &Path) -> anyhow::Result<World> {
    let mut world = match std::fs::read(path) {
        Ok(b) => serde_json::from_slice::<World>(&b)
            .with_context(|| format!("parse world file {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no world file; starting fresh");
            World::new()
        }
        Err(e) => {
            return Err(e).with_context(|| format!("read world file {}", path.display()));
        }
    };
    bootstrap(&mut world);
    info!(
        path = %path.display(),
        accounts = world.accounts().count(),
        entities = world.entities().count(),
        "world loaded"
    );
    Ok(world)
}

/// Make sure the minimum a new player needs exists.
pub fn bootstrap(world: &mut World) {
    if world.start_room.and_then(|r| world.entity(r)).is_none() {
        let room = world.create_entity(START_ROOM, EntityKind::Room, None);
        if let Some(r) = world.entity_mut(room) {
            r.desc = "A featureless grey expanse. Everyone starts here.".to_string();
        }
        world.start_room = Some(room);
    }
    if world.channels.get(PUBLIC_CHANNEL).is_none() {
        world.channels.create(
            PUBLIC_CHANNEL,
            &["pub"],
            "General chatter",
            LockHandler::from_storage("listen:all();send:all();control:perm(Admin)"),
        );
        world.mark_dirty();
    }
}

/// Write via a temp file and rename so a crash never leaves half a file.
pub async fn save(path: &Path, world: &World) -> anyhow::Result<()> {
    let body = serde_json::to_vec_pretty(world).context("serialize world")?;
    let tmp = tmp_path(path);
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("create {}", dir.display()))?;
    }
    tokio::fs::write(&tmp, &body)
        .await
        .with_context(|| format!("write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
