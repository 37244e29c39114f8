//! Who is acting: the (caller, session, account) triple, and the login and
//! puppet transitions that change it.

use mudproto::session::{SessionId, SessionSnapshot};
use tracing::{debug, info};

use crate::error::IdentityError;
use crate::game::{Game, Outbox};
use crate::lock::{CheckOpts, LockEngine, Target};
use crate::perm::{PermissionHierarchy, Rank};
use crate::sessions::{ServerSession, SessionRegistry};
use crate::settings::{MultiSession, Settings};
use crate::world::{AccountId, EntityId, World};

/// Whose permissions and commands apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    /// Not logged in yet.
    Session(SessionId),
    /// Logged in, not puppeting.
    Account(AccountId),
    Entity(EntityId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActingTriple {
    pub caller: Caller,
    pub session: Option<SessionId>,
    pub account: Option<AccountId>,
}

impl ActingTriple {
    /// An entity acting on its own, e.g. a scripted NPC.
    pub fn for_entity(e: EntityId) -> Self {
        Self {
            caller: Caller::Entity(e),
            session: None,
            account: None,
        }
    }

    pub fn for_account(a: AccountId, session: Option<SessionId>) -> Self {
        Self {
            caller: Caller::Account(a),
            session,
            account: Some(a),
        }
    }

    pub fn entity(&self) -> Option<EntityId> {
        match self.caller {
            Caller::Entity(e) => Some(e),
            _ => None,
        }
    }
}

/// Puppet, else account, else the bare session.
pub fn resolve(sessions: &SessionRegistry, id: SessionId) -> Result<ActingTriple, IdentityError> {
    let s = sessions.get(id).ok_or(IdentityError::NoSession(id))?;
    let caller = match (sessions.puppet_of(id), s.account) {
        (Some(e), _) => Caller::Entity(e),
        (None, Some(a)) => Caller::Account(a),
        (None, None) => Caller::Session(id),
    };
    Ok(ActingTriple {
        caller,
        session: Some(id),
        account: s.account,
    })
}

/// Rank used for hierarchy checks.
///
/// The account's rank wins over its puppet's; a quelled account gets the
/// lower of the two. An entity with no account uses its own rank.
pub fn hierarchy_rank(world: &World, h: &PermissionHierarchy, t: &ActingTriple) -> Option<Rank> {
    let account = t.account.and_then(|a| world.account(a));
    let entity = t.entity().and_then(|e| world.entity(e));
    let account_rank = account.and_then(|a| h.highest(a.permissions.iter()));
    let entity_rank = entity.and_then(|e| h.highest(e.permissions.iter()));
    match (account, entity) {
        (Some(a), Some(_)) if a.quelled => account_rank.min(entity_rank),
        (Some(_), _) => account_rank,
        (None, Some(_)) => entity_rank,
        (None, None) => None,
    }
}

/// Exact match on a non-hierarchical permission string. Quelling hides the
/// account's strings while puppeting.
pub fn holds_plain_perm(world: &World, t: &ActingTriple, perm: &str) -> bool {
    let account = t.account.and_then(|a| world.account(a));
    let entity = t.entity().and_then(|e| world.entity(e));
    if entity.is_some_and(|e| e.permissions.contains(perm)) {
        return true;
    }
    match account {
        Some(a) if a.quelled && entity.is_some() => false,
        Some(a) => a.permissions.contains(perm),
        None => false,
    }
}

impl Game {
    pub fn login(
        &mut self,
        settings: &Settings,
        locks: &LockEngine,
        session: SessionId,
        acct: AccountId,
        out: &mut Outbox,
    ) -> Result<(), IdentityError> {
        if !self.sessions.contains(session) {
            return Err(IdentityError::NoSession(session));
        }
        let last_puppet = self
            .world
            .account(acct)
            .ok_or(IdentityError::NoAccount(acct))?
            .last_puppet;

        if settings.multisession == MultiSession::Single {
            for other in self.sessions.of_account(acct) {
                if other != session {
                    info!(session = %other, account = acct.0, "login elsewhere; dropping old session");
                    self.sessions.remove(other);
                    out.kick(other, "You logged in from another session.");
                }
            }
        }

        let Some(s) = self.sessions.get_mut(session) else {
            return Err(IdentityError::NoSession(session));
        };
        s.account = Some(acct);
        s.cmdsets = vec![settings.session_cmdset.clone()];
        info!(session = %session, account = acct.0, "logged in");

        let auto = match settings.multisession {
            MultiSession::Single => last_puppet,
            MultiSession::SharedPuppet => self
                .sessions
                .of_account(acct)
                .into_iter()
                .find_map(|o| self.sessions.puppet_of(o))
                .or(last_puppet),
            MultiSession::PerSession | MultiSession::Shared => None,
        };
        if let Some(e) = auto {
            if let Err(err) = self.puppet(settings, locks, session, e, out) {
                debug!(session = %session, err = %err, "auto-puppet skipped");
            }
        }
        self.push_state(session, out);
        Ok(())
    }

    pub fn puppet(
        &mut self,
        settings: &Settings,
        locks: &LockEngine,
        session: SessionId,
        entity: EntityId,
        out: &mut Outbox,
    ) -> Result<(), IdentityError> {
        let acct = self
            .sessions
            .get(session)
            .ok_or(IdentityError::NoSession(session))?
            .account
            .ok_or(IdentityError::NotLoggedIn(session))?;
        let e = self
            .world
            .entity(entity)
            .ok_or(IdentityError::NoEntity(entity))?;

        let accessor = ActingTriple::for_account(acct, Some(session));
        let allowed = locks.check(
            &self.world,
            &accessor,
            &Target::Entity(entity),
            &e.locks,
            "puppet",
            CheckOpts::default(),
        );
        if !allowed {
            return Err(IdentityError::PuppetDenied(entity));
        }
        let key = e.key.clone();

        let holders: Vec<SessionId> = self
            .sessions
            .puppets
            .sessions_of(entity)
            .into_iter()
            .filter(|s| *s != session)
            .collect();
        let foreign = holders
            .iter()
            .any(|h| self.sessions.get(*h).and_then(|s| s.account) != Some(acct));
        if foreign {
            return Err(IdentityError::InUse(entity));
        }

        if settings.multisession == MultiSession::PerSession {
            for h in holders {
                self.sessions.puppets.detach(h);
                out.text(h, format!("{key} was taken over by another of your sessions."));
                self.push_state(h, out);
            }
        }

        let targets = if settings.multisession == MultiSession::SharedPuppet {
            self.sessions.of_account(acct)
        } else {
            vec![session]
        };
        for s in targets {
            self.sessions.puppets.attach(s, entity);
            self.push_state(s, out);
        }
        if let Some(a) = self.world.account_mut(acct) {
            a.last_puppet = Some(entity);
        }
        info!(session = %session, account = acct.0, puppet = %entity, "puppeted");
        Ok(())
    }

    pub fn unpuppet(
        &mut self,
        settings: &Settings,
        session: SessionId,
        out: &mut Outbox,
    ) -> Result<EntityId, IdentityError> {
        let acct = self
            .sessions
            .get(session)
            .ok_or(IdentityError::NoSession(session))?
            .account
            .ok_or(IdentityError::NotLoggedIn(session))?;
        let e = self
            .sessions
            .puppet_of(session)
            .ok_or(IdentityError::NotLoggedIn(session))?;

        let targets = if settings.multisession == MultiSession::SharedPuppet {
            self.sessions.of_account(acct)
        } else {
            vec![session]
        };
        for s in targets {
            if self.sessions.puppet_of(s) == Some(e) {
                self.sessions.puppets.detach(s);
                self.push_state(s, out);
            }
        }
        info!(session = %session, account = acct.0, puppet = %e, "unpuppeted");
        Ok(e)
    }

    /// Rebuild a session from a portal snapshot after a server restart.
    ///
    /// Login and puppet are restored only when still valid; no multisession
    /// kicks happen, since the portal already enforced them.
    pub fn restore(
        &mut self,
        settings: &Settings,
        locks: &LockEngine,
        snap: &SessionSnapshot,
        out: &mut Outbox,
    ) {
        let sid = snap.session;
        self.sessions.remove(sid);
        let mut s = ServerSession::from_snapshot(snap, vec![settings.unloggedin_cmdset.clone()]);

        let acct = snap
            .state
            .account
            .as_deref()
            .and_then(|name| self.world.account_by_name(name))
            .map(|a| a.id);
        if let Some(a) = acct {
            s.account = Some(a);
            s.cmdsets = vec![settings.session_cmdset.clone()];
        }
        self.sessions.insert(s);

        if let (Some(a), Some(p)) = (acct, snap.state.puppet) {
            let e = EntityId(p);
            let allowed = self.world.entity(e).is_some_and(|ent| {
                locks.check(
                    &self.world,
                    &ActingTriple::for_account(a, Some(sid)),
                    &Target::Entity(e),
                    &ent.locks,
                    "puppet",
                    CheckOpts::default(),
                )
            });
            let foreign = self
                .sessions
                .puppets
                .sessions_of(e)
                .iter()
                .any(|h| self.sessions.get(*h).and_then(|s| s.account) != Some(a));
            if allowed && !foreign {
                self.sessions.puppets.attach(sid, e);
            } else {
                info!(session = %sid, puppet = %e, "puppet not restored");
            }
        }
        self.push_state(sid, out);
    }
}
