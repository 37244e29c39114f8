//! Command sets and how they combine.
//!
//! Sets from every source visible to the caller are merged top-down at
//! dispatch time: highest priority first, ties broken by [`CmdSetSource`]
//! order, then by the order the sets were gathered in. A command is
//! identified by all of its names, and a name claimed by a higher-ranked
//! command keeps every lower-ranked command that shares any name out.
//!
//! Policies, applied as each set is reached:
//! - `Union`: add commands whose names are all still free.
//! - `ExcludeDuplicates`: as `Union`, then block every name of every command
//!   in the set (including ones that lost a conflict) for lower sets.
//! - `Replace`: as `Union`, then stop; lower sets are discarded.
//! - `Remove`: add nothing; block the set's names for lower sets.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::command::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    #[default]
    Union,
    Replace,
    Remove,
    ExcludeDuplicates,
}

/// Where a gathered set came from. Declaration order is tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CmdSetSource {
    Entity,
    Session,
    /// Location, its contents, and the caller's inventory.
    Surroundings,
    Account,
    Channel,
    System,
}

#[derive(Clone)]
pub struct CmdEntry {
    pub cmd: Arc<dyn Command>,
    /// Set key the command came from; shown when listing ambiguous matches.
    pub origin: String,
}

impl CmdEntry {
    fn names_lower(&self) -> impl Iterator<Item = String> + '_ {
        self.cmd.meta().names().map(str::to_ascii_lowercase)
    }
}

#[derive(Clone)]
pub struct CmdSet {
    pub key: String,
    pub priority: i32,
    pub policy: MergePolicy,
    /// Suppress object and location sets while this set is active.
    pub no_objs: bool,
    /// Suppress channel sets while this set is active.
    pub no_channels: bool,
    entries: Vec<CmdEntry>,
}

impl std::fmt::Debug for CmdSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CmdSet")
            .field("key", &self.key)
            .field("priority", &self.priority)
            .field("policy", &self.policy)
            .field(
                "cmds",
                &self
                    .entries
                    .iter()
                    .map(|e| e.cmd.meta().key.as_str())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl CmdSet {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            priority: 0,
            policy: MergePolicy::Union,
            no_objs: false,
            no_channels: false,
            entries: Vec::new(),
        }
    }

    pub fn priority(mut self, p: i32) -> Self {
        self.priority = p;
        self
    }

    pub fn policy(mut self, p: MergePolicy) -> Self {
        self.policy = p;
        self
    }

    pub fn no_objs(mut self) -> Self {
        self.no_objs = true;
        self
    }

    pub fn no_channels(mut self) -> Self {
        self.no_channels = true;
        self
    }

    pub fn with(mut self, cmd: impl Command + 'static) -> Self {
        self.add(cmd);
        self
    }

    pub fn add(&mut self, cmd: impl Command + 'static) {
        self.add_arc(Arc::new(cmd));
    }

    /// A set holds at most one command per name: anything sharing a name
    /// with `cmd` is replaced.
    pub fn add_arc(&mut self, cmd: Arc<dyn Command>) {
        let origin = self.key.clone();
        self.insert(CmdEntry { cmd, origin });
    }

    fn insert(&mut self, entry: CmdEntry) {
        let names: HashSet<String> = entry.names_lower().collect();
        self.entries
            .retain(|e| !e.names_lower().any(|n| names.contains(&n)));
        self.entries.push(entry);
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !e.cmd.meta().has_name(name));
        self.entries.len() != before
    }

    pub fn entries(&self) -> &[CmdEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&CmdEntry> {
        self.entries.iter().find(|e| e.cmd.meta().has_name(name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All names (keys and aliases), lowercased and sorted.
    pub fn names(&self) -> BTreeSet<String> {
        self.entries.iter().flat_map(|e| e.names_lower()).collect()
    }
}

/// Registered sets by key, for sources that persist set keys.
#[derive(Clone, Default)]
pub struct CmdSetCatalog {
    sets: HashMap<String, Arc<CmdSet>>,
}

impl CmdSetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, set: CmdSet) {
        self.sets.insert(set.key.to_ascii_lowercase(), Arc::new(set));
    }

    pub fn get(&self, key: &str) -> Option<&Arc<CmdSet>> {
        self.sets.get(&key.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

/// Merge gathered sets into one. Deterministic for a given input order.
pub fn merge(sets: &[(CmdSetSource, Arc<CmdSet>)]) -> CmdSet {
    let mut order: Vec<&(CmdSetSource, Arc<CmdSet>)> = sets.iter().collect();
    // Stable: equal rank keeps gather order.
    order.sort_by_key(|(src, set)| (std::cmp::Reverse(set.priority), *src));

    let mut merged = CmdSet::new("merged").priority(order.first().map_or(0, |(_, s)| s.priority));
    let mut claimed: HashSet<String> = HashSet::new();
    let mut blocked: HashSet<String> = HashSet::new();

    for (_, set) in order {
        if set.policy != MergePolicy::Remove {
            for e in &set.entries {
                let free = e
                    .names_lower()
                    .all(|n| !claimed.contains(&n) && !blocked.contains(&n));
                if free {
                    claimed.extend(e.names_lower());
                    merged.entries.push(e.clone());
                }
            }
        }
        merged.no_objs |= set.no_objs;
        merged.no_channels |= set.no_channels;
        match set.policy {
            MergePolicy::ExcludeDuplicates | MergePolicy::Remove => {
                blocked.extend(set.entries.iter().flat_map(|e| e.names_lower()));
            }
            MergePolicy::Replace => break,
            MergePolicy::Union => {}
        }
    }
    merged
}
