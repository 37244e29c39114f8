use mudproto::bridge::ServerResp;
use mudproto::msg::Msg;
use mudproto::session::SessionId;

use crate::identity::{ActingTriple, Caller};
use crate::sessions::SessionRegistry;
use crate::world::{AccountId, EntityId, World};

/// Responses produced while handling one request, drained by the server loop.
#[derive(Debug, Default)]
pub struct Outbox {
    resps: Vec<ServerResp>,
}

impl Outbox {
    pub fn send(&mut self, session: SessionId, msg: Msg) {
        self.resps.push(ServerResp::Output { session, msg });
    }

    pub fn text(&mut self, session: SessionId, text: impl Into<String>) {
        self.send(session, Msg::text(text));
    }

    pub fn kick(&mut self, session: SessionId, reason: impl Into<String>) {
        self.resps.push(ServerResp::Kick {
            session,
            reason: reason.into(),
        });
    }

    pub fn push(&mut self, resp: ServerResp) {
        self.resps.push(resp);
    }

    pub fn take(&mut self) -> Vec<ServerResp> {
        std::mem::take(&mut self.resps)
    }

    pub fn is_empty(&self) -> bool {
        self.resps.is_empty()
    }
}

#[cfg(test)]
impl Outbox {
    /// Text outputs for one session, in order.
    pub fn texts_for(&self, session: SessionId) -> Vec<String> {
        self.resps
            .iter()
            .filter_map(|r| match r {
                ServerResp::Output { session: s, msg } if *s == session && msg.name == "text" => {
                    Some(msg.joined_text())
                }
                _ => None,
            })
            .collect()
    }

    pub fn resps(&self) -> &[ServerResp] {
        &self.resps
    }
}

/// The mutable state commands act on.
#[derive(Debug, Default)]
pub struct Game {
    pub world: World,
    pub sessions: SessionRegistry,
}

impl Game {
    pub fn new(world: World) -> Self {
        Self {
            world,
            sessions: SessionRegistry::new(),
        }
    }

    pub fn sessions_of_entity(&self, e: EntityId) -> Vec<SessionId> {
        self.sessions.puppets.sessions_of(e)
    }

    pub fn sessions_of_account(&self, a: AccountId) -> Vec<SessionId> {
        self.sessions.of_account(a)
    }

    /// Every session that should see output addressed to `caller`.
    pub fn sessions_of_caller(&self, caller: Caller) -> Vec<SessionId> {
        match caller {
            Caller::Session(s) => vec![s],
            Caller::Account(a) => self
                .sessions_of_account(a)
                .into_iter()
                .filter(|s| self.sessions.puppet_of(*s).is_none())
                .collect(),
            Caller::Entity(e) => self.sessions_of_entity(e),
        }
    }

    pub fn display_name(&self, t: &ActingTriple) -> String {
        match t.caller {
            Caller::Entity(e) => self.world.entity(e).map(|e| e.key.clone()),
            Caller::Account(a) => self.world.account(a).map(|a| a.name.clone()),
            Caller::Session(_) => None,
        }
        .unwrap_or_else(|| "Someone".to_string())
    }

    pub fn push_state(&self, session: SessionId, out: &mut Outbox) {
        out.push(ServerResp::State {
            session,
            state: self.sessions.state(session, &self.world),
        });
    }
}
