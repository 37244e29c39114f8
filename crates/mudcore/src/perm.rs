use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Position in the permission hierarchy. Higher means more authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rank(u32);

/// Ordered list of rank names, highest authority first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionHierarchy {
    names: Vec<String>,
}

impl PermissionHierarchy {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for name in names {
            let name: String = name.into();
            let name = name.trim();
            if !name.is_empty() && seen.insert(name.to_ascii_lowercase()) {
                out.push(name.to_string());
            }
        }
        let names = out;
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Case-insensitive; a trailing plural `s` is tolerated (`Builders`).
    pub fn rank_of(&self, perm: &str) -> Option<Rank> {
        let perm = perm.trim();
        let idx = self
            .names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(perm))
            .or_else(|| {
                let singular = perm.strip_suffix(['s', 'S'])?;
                self.names
                    .iter()
                    .position(|n| n.eq_ignore_ascii_case(singular))
            })?;
        Some(Rank((self.names.len() - idx) as u32))
    }

    pub fn name_of(&self, rank: Rank) -> Option<&str> {
        let idx = self.names.len().checked_sub(rank.0 as usize)?;
        self.names.get(idx).map(String::as_str)
    }

    /// Highest hierarchy rank among `perms`, ignoring non-hierarchical strings.
    pub fn highest<'a>(&self, perms: impl IntoIterator<Item = &'a str>) -> Option<Rank> {
        perms.into_iter().filter_map(|p| self.rank_of(p)).max()
    }
}

impl Default for PermissionHierarchy {
    fn default() -> Self {
        Self::new(crate::settings::Settings::default().permission_hierarchy)
    }
}

/// Flat permission strings, compared case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Permissions(BTreeSet<String>);

impl From<Vec<String>> for Permissions {
    fn from(v: Vec<String>) -> Self {
        v.into_iter().collect()
    }
}

impl From<Permissions> for Vec<String> {
    fn from(p: Permissions) -> Self {
        p.0.into_iter().collect()
    }
}

impl<S: AsRef<str>> FromIterator<S> for Permissions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut p = Permissions::default();
        for s in iter {
            p.add(s.as_ref());
        }
        p
    }
}

impl Permissions {
    pub fn add(&mut self, perm: &str) -> bool {
        let p = perm.trim();
        if p.is_empty() {
            return false;
        }
        self.0.insert(p.to_ascii_lowercase())
    }

    pub fn remove(&mut self, perm: &str) -> bool {
        self.0.remove(&perm.trim().to_ascii_lowercase())
    }

    pub fn contains(&self, perm: &str) -> bool {
        self.0.contains(&perm.trim().to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_follow_list_order() {
        let h = PermissionHierarchy::default();
        let dev = h.rank_of("developer").unwrap();
        let builder = h.rank_of("Builder").unwrap();
        let guest = h.rank_of("GUEST").unwrap();
        assert!(dev > builder && builder > guest);
        assert_eq!(h.rank_of("Builders"), Some(builder));
        assert_eq!(h.rank_of("tinker"), None);
        assert_eq!(h.name_of(builder), Some("Builder"));
    }

    #[test]
    fn highest_ignores_plain_strings() {
        let h = PermissionHierarchy::default();
        let perms: Permissions = ["Player", "can_fly", "Helper"].into_iter().collect();
        assert_eq!(h.highest(perms.iter()), h.rank_of("Helper"));
        assert!(perms.contains("CAN_FLY"));
    }

    #[test]
    fn custom_hierarchy_drops_blank_and_duplicate_names() {
        let h = PermissionHierarchy::new(["Wizard", " ", "wizard", "Mortal"]);
        assert_eq!(h.names(), &["Wizard".to_string(), "Mortal".to_string()]);
    }
}
