use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::cmdset::CmdSet;
use crate::command::{CmdContext, CmdMeta, CmdResult, Command, Flow};
use crate::lock::LockHandler;
use crate::world::AccountId;

pub const DEFAULT_CHANNEL_LOCKS: &str = "listen:all();send:all();control:perm(Admin)";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub key: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub locks: LockHandler,
    #[serde(default)]
    pub subscribers: BTreeSet<AccountId>,
}

impl Channel {
    pub fn answers_to(&self, name: &str) -> bool {
        self.key.eq_ignore_ascii_case(name) || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelRegistry {
    channels: BTreeMap<String, Channel>,
}

impl ChannelRegistry {
    /// Returns false if a channel already answers to `key`.
    pub fn create(&mut self, key: &str, aliases: &[&str], desc: &str, locks: LockHandler) -> bool {
        let key = key.trim();
        if key.is_empty() || self.get(key).is_some() {
            return false;
        }
        self.channels.insert(
            key.to_ascii_lowercase(),
            Channel {
                key: key.to_string(),
                aliases: aliases.iter().map(|a| a.to_string()).collect(),
                desc: desc.to_string(),
                locks,
                subscribers: BTreeSet::new(),
            },
        );
        true
    }

    /// By key or alias.
    pub fn get(&self, name: &str) -> Option<&Channel> {
        let name = name.trim();
        self.channels
            .get(&name.to_ascii_lowercase())
            .or_else(|| self.channels.values().find(|c| c.answers_to(name)))
    }

    fn key_of(&self, name: &str) -> Option<String> {
        self.get(name).map(|c| c.key.to_ascii_lowercase())
    }

    pub fn subscribe(&mut self, name: &str, acct: AccountId) -> bool {
        let Some(k) = self.key_of(name) else {
            return false;
        };
        self.channels
            .get_mut(&k)
            .is_some_and(|c| c.subscribers.insert(acct))
    }

    pub fn unsubscribe(&mut self, name: &str, acct: AccountId) -> bool {
        let Some(k) = self.key_of(name) else {
            return false;
        };
        self.channels
            .get_mut(&k)
            .is_some_and(|c| c.subscribers.remove(&acct))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn subscribed(&self, acct: AccountId) -> impl Iterator<Item = &Channel> {
        self.channels
            .values()
            .filter(move |c| c.subscribers.contains(&acct))
    }
}

/// Matched like any other command; the dispatcher relays instead of running it.
pub struct ChannelCmd {
    meta: CmdMeta,
}

impl ChannelCmd {
    pub fn new(ch: &Channel) -> Self {
        let aliases: Vec<&str> = ch.aliases.iter().map(String::as_str).collect();
        Self {
            meta: CmdMeta::new(&ch.key)
                .aliases(&aliases)
                .category("channels")
                .channel(&ch.key)
                .help(&ch.desc),
        }
    }
}

impl Command for ChannelCmd {
    fn meta(&self) -> &CmdMeta {
        &self.meta
    }

    fn func(&self, _cx: &mut CmdContext<'_>) -> CmdResult {
        Ok(Flow::Done)
    }
}

/// One command per channel `acct` listens to, or None when there are none.
pub fn channel_cmdset(channels: &ChannelRegistry, acct: AccountId, priority: i32) -> Option<CmdSet> {
    let mut set = CmdSet::new("channels").priority(priority);
    for ch in channels.subscribed(acct) {
        set.add(ChannelCmd::new(ch));
    }
    (!set.is_empty()).then_some(set)
}
