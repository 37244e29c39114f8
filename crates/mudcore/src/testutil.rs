use mudproto::session::{Capabilities, SessionId, SessionSnapshot, TransportKind};

use crate::error::IdentityError;
use crate::game::{Game, Outbox};
use crate::identity::ActingTriple;
use crate::lock::{LockEngine, Target};
use crate::sessions::ServerSession;
use crate::settings::{MultiSession, Settings};
use crate::world::{AccountId, EntityId, EntityKind, World};

pub fn snapshot(id: u64) -> SessionSnapshot {
    SessionSnapshot {
        session: SessionId(id),
        transport: TransportKind::Telnet,
        address: format!("127.0.0.1:{}", 40000 + id),
        connected_unix: 1_700_000_000 + id,
        caps: Capabilities::default(),
        state: Default::default(),
    }
}

/// A world with one room plus the default lock engine.
pub struct Fixture {
    pub settings: Settings,
    pub locks: LockEngine,
    pub game: Game,
    pub out: Outbox,
    pub room: EntityId,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_mode(MultiSession::Single)
    }

    pub fn with_mode(multisession: MultiSession) -> Self {
        let settings = Settings {
            multisession,
            ..Settings::default()
        };
        let locks = LockEngine::new(&settings).unwrap();
        let mut world = World::new();
        let room = world.create_entity("Limbo", EntityKind::Room, None);
        world.start_room = Some(room);
        Self {
            settings,
            locks,
            game: Game::new(world),
            out: Outbox::default(),
            room,
        }
    }

    pub fn character(&mut self, key: &str) -> EntityId {
        let room = self.room;
        self.game
            .world
            .create_entity(key, EntityKind::Character, Some(room))
    }

    pub fn object(&mut self, key: &str, location: Option<EntityId>) -> EntityId {
        let loc = location.unwrap_or(self.room);
        self.game
            .world
            .create_entity(key, EntityKind::Object, Some(loc))
    }

    /// An account plus one character of the same name.
    pub fn account(&mut self, name: &str, perms: &[&str]) -> (AccountId, EntityId) {
        let a = self
            .game
            .world
            .create_account(name, String::new(), perms, vec![], 0)
            .unwrap();
        let c = self.game.world.create_character(a, name, vec![]).unwrap();
        (a, c)
    }

    pub fn connect(&mut self, id: u64) -> SessionId {
        let s = ServerSession::from_snapshot(
            &snapshot(id),
            vec![self.settings.unloggedin_cmdset.clone()],
        );
        let sid = s.id;
        self.game.sessions.insert(s);
        sid
    }

    pub fn login(&mut self, s: SessionId, a: AccountId) {
        self.game
            .login(&self.settings, &self.locks, s, a, &mut self.out)
            .unwrap();
    }

    pub fn puppet(&mut self, s: SessionId, e: EntityId) -> Result<(), IdentityError> {
        self.game
            .puppet(&self.settings, &self.locks, s, e, &mut self.out)
    }

    pub fn check_perm(&self, t: &ActingTriple, perm: &str) -> bool {
        self.locks.evaluate_str(
            &format!("test:perm({perm})"),
            &self.game.world,
            t,
            &Target::None,
            &[],
        )
    }
}
