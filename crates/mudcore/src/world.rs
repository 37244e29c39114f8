use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelRegistry;
use crate::error::IdentityError;
use crate::lock::LockHandler;
use crate::perm::Permissions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Character,
    Room,
    Object,
    Exit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub password_hash: String,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub locks: LockHandler,
    #[serde(default)]
    pub cmdsets: Vec<String>,
    #[serde(default)]
    pub superuser: bool,
    #[serde(default)]
    pub quelled: bool,
    #[serde(default)]
    pub characters: Vec<EntityId>,
    #[serde(default)]
    pub last_puppet: Option<EntityId>,
    #[serde(default)]
    pub created_unix: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub key: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub kind: EntityKind,
    #[serde(default)]
    pub location: Option<EntityId>,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub locks: LockHandler,
    /// Keys into the engine's cmdset catalog.
    #[serde(default)]
    pub cmdsets: Vec<String>,
    /// Owning account, for characters.
    #[serde(default)]
    pub owner: Option<AccountId>,
}

impl Entity {
    pub fn answers_to(&self, name: &str) -> bool {
        let name = name.trim();
        self.key.eq_ignore_ascii_case(name) || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }
}

/// Persistent game state: accounts, objects and channels.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct World {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    accounts: BTreeMap<AccountId, Account>,
    #[serde(default)]
    entities: BTreeMap<EntityId, Entity>,
    #[serde(default)]
    pub start_room: Option<EntityId>,
    #[serde(default)]
    pub channels: ChannelRegistry,
    #[serde(skip)]
    dirty: bool,
}

pub fn valid_name(name: &str) -> bool {
    let n = name.trim();
    (2..=24).contains(&n.len())
        && n.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        && n.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_id(&mut self) -> u64 {
        let used = self
            .accounts
            .keys()
            .map(|a| a.0)
            .chain(self.entities.keys().map(|e| e.0))
            .max()
            .unwrap_or(0);
        self.next_id = self.next_id.max(used) + 1;
        self.next_id
    }

    /// Set by every mutating helper; the server saves when it's set.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn account(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(&id)
    }

    pub fn account_mut(&mut self, id: AccountId) -> Option<&mut Account> {
        self.dirty = true;
        self.accounts.get_mut(&id)
    }

    pub fn account_by_name(&self, name: &str) -> Option<&Account> {
        let name = name.trim();
        self.accounts
            .values()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn create_account(
        &mut self,
        name: &str,
        password_hash: String,
        permissions: &[&str],
        cmdsets: Vec<String>,
        now_unix: u64,
    ) -> Result<AccountId, IdentityError> {
        let name = name.trim();
        if !valid_name(name) {
            return Err(IdentityError::BadName(name.to_string()));
        }
        if self.account_by_name(name).is_some() {
            return Err(IdentityError::NameTaken(name.to_string()));
        }
        let id = AccountId(self.alloc_id());
        self.accounts.insert(
            id,
            Account {
                id,
                name: name.to_string(),
                password_hash,
                permissions: permissions.iter().collect(),
                locks: LockHandler::from_storage(
                    "examine:perm(Admin);edit:false();delete:perm(Developer);msg:all();boot:perm(Admin)",
                ),
                cmdsets,
                superuser: false,
                quelled: false,
                characters: Vec::new(),
                last_puppet: None,
                created_unix: now_unix,
            },
        );
        self.dirty = true;
        Ok(id)
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.dirty = true;
        self.entities.get_mut(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn create_entity(
        &mut self,
        key: &str,
        kind: EntityKind,
        location: Option<EntityId>,
    ) -> EntityId {
        let id = EntityId(self.alloc_id());
        self.entities.insert(
            id,
            Entity {
                id,
                key: key.trim().to_string(),
                aliases: Vec::new(),
                kind,
                location,
                desc: String::new(),
                permissions: Permissions::default(),
                locks: LockHandler::new(),
                cmdsets: Vec::new(),
                owner: None,
            },
        );
        self.dirty = true;
        id
    }

    /// A character owned by `owner`, puppetable by that account.
    pub fn create_character(
        &mut self,
        owner: AccountId,
        key: &str,
        cmdsets: Vec<String>,
    ) -> Result<EntityId, IdentityError> {
        let key = key.trim();
        if !valid_name(key) {
            return Err(IdentityError::BadName(key.to_string()));
        }
        let taken = self
            .entities
            .values()
            .any(|e| e.kind == EntityKind::Character && e.key.eq_ignore_ascii_case(key));
        if taken {
            return Err(IdentityError::NameTaken(key.to_string()));
        }
        if !self.accounts.contains_key(&owner) {
            return Err(IdentityError::NoAccount(owner));
        }

        let start = self.start_room;
        let id = self.create_entity(key, EntityKind::Character, start);
        if let Some(e) = self.entities.get_mut(&id) {
            e.owner = Some(owner);
            e.cmdsets = cmdsets;
            e.permissions.add("Player");
            e.locks = LockHandler::from_storage(&format!(
                "puppet:pid({}) or perm(Developer);get:false();call:false();delete:pid({})",
                owner.0, owner.0
            ));
        }
        if let Some(a) = self.accounts.get_mut(&owner) {
            a.characters.push(id);
        }
        Ok(id)
    }

    pub fn move_to(&mut self, id: EntityId, dest: Option<EntityId>) -> bool {
        let Some(e) = self.entities.get_mut(&id) else {
            return false;
        };
        e.location = dest;
        self.dirty = true;
        true
    }

    pub fn contents(&self, container: EntityId) -> impl Iterator<Item = &Entity> {
        self.entities
            .values()
            .filter(move |e| e.location == Some(container))
    }

    /// First object at `location` answering to `name`.
    pub fn find_in(&self, location: EntityId, name: &str) -> Option<&Entity> {
        self.contents(location).find(|e| e.answers_to(name))
    }
}
