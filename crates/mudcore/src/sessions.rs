//! Server-side view of live sessions and the puppet relation.
//!
//! The portal owns connections; this registry mirrors them so the engine can
//! resolve who is acting. Puppeting is kept as a relation table in both
//! directions rather than as links on the session or the entity.

use std::collections::{BTreeMap, BTreeSet};

use mudproto::session::{Capabilities, SessionId, SessionSnapshot, SessionState, TransportKind};

use crate::world::{AccountId, EntityId, World};

#[derive(Debug, Clone)]
pub struct ServerSession {
    pub id: SessionId,
    pub transport: TransportKind,
    pub address: String,
    pub connected_unix: u64,
    pub caps: Capabilities,
    pub account: Option<AccountId>,
    /// Keys into the cmdset catalog.
    pub cmdsets: Vec<String>,
}

impl ServerSession {
    pub fn from_snapshot(s: &SessionSnapshot, cmdsets: Vec<String>) -> Self {
        Self {
            id: s.session,
            transport: s.transport,
            address: s.address.clone(),
            connected_unix: s.connected_unix,
            caps: s.caps.clone(),
            account: None,
            cmdsets,
        }
    }
}

#[derive(Debug, Default)]
pub struct PuppetTable {
    by_session: BTreeMap<SessionId, EntityId>,
    by_entity: BTreeMap<EntityId, BTreeSet<SessionId>>,
}

impl PuppetTable {
    /// Replaces any previous puppet of `session`.
    pub fn attach(&mut self, session: SessionId, entity: EntityId) {
        self.detach(session);
        self.by_session.insert(session, entity);
        self.by_entity.entry(entity).or_default().insert(session);
    }

    pub fn detach(&mut self, session: SessionId) -> Option<EntityId> {
        let e = self.by_session.remove(&session)?;
        if let Some(set) = self.by_entity.get_mut(&e) {
            set.remove(&session);
            if set.is_empty() {
                self.by_entity.remove(&e);
            }
        }
        Some(e)
    }

    pub fn puppet_of(&self, session: SessionId) -> Option<EntityId> {
        self.by_session.get(&session).copied()
    }

    pub fn sessions_of(&self, entity: EntityId) -> Vec<SessionId> {
        self.by_entity
            .get(&entity)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_puppeted(&self, entity: EntityId) -> bool {
        self.by_entity.contains_key(&entity)
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<SessionId, ServerSession>,
    pub puppets: PuppetTable,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, s: ServerSession) {
        self.sessions.insert(s.id, s);
    }

    /// Drops the session and its puppet link.
    pub fn remove(&mut self, id: SessionId) -> Option<ServerSession> {
        self.puppets.detach(id);
        self.sessions.remove(&id)
    }

    pub fn get(&self, id: SessionId) -> Option<&ServerSession> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut ServerSession> {
        self.sessions.get_mut(&id)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerSession> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn of_account(&self, acct: AccountId) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|s| s.account == Some(acct))
            .map(|s| s.id)
            .collect()
    }

    pub fn puppet_of(&self, id: SessionId) -> Option<EntityId> {
        self.puppets.puppet_of(id)
    }

    /// Login state as reported to the portal.
    pub fn state(&self, id: SessionId, world: &World) -> SessionState {
        let Some(s) = self.sessions.get(&id) else {
            return SessionState::default();
        };
        SessionState {
            account: s
                .account
                .and_then(|a| world.account(a))
                .map(|a| a.name.clone()),
            puppet: self.puppet_of(id).map(|e| e.0),
        }
    }
}
