//! Matching typed input against a merged command set.
//!
//! A name matches in full when the input starts with it and the remainder
//! satisfies the command's [`ArgRule`]; it matches as an abbreviation when
//! the first word of the input is a proper prefix of it. Candidates are
//! ranked by: full over abbreviation, then matched characters, then the
//! share of the name that was typed. Whatever is left tied is ambiguous.

use std::cmp::Ordering;

use crate::cmdset::{CmdEntry, CmdSet};
use crate::command::SYSTEM_PREFIX;

#[derive(Clone)]
pub struct Candidate {
    pub entry: CmdEntry,
    /// The command name that matched, as declared.
    pub name: String,
    /// Input after the matched part, original case.
    pub args: String,
    pub full: bool,
    matched: usize,
    name_len: usize,
}

impl std::fmt::Debug for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Candidate")
            .field("name", &self.name)
            .field("origin", &self.entry.origin)
            .field("args", &self.args)
            .field("full", &self.full)
            .finish()
    }
}

impl Candidate {
    fn rank(&self, other: &Candidate) -> Ordering {
        self.full
            .cmp(&other.full)
            .then(self.matched.cmp(&other.matched))
            .then((self.matched * other.name_len).cmp(&(other.matched * self.name_len)))
    }
}

#[derive(Debug)]
pub enum MatchResult {
    None,
    One(Candidate),
    Many(Vec<Candidate>),
}

pub fn match_input(raw: &str, set: &CmdSet) -> MatchResult {
    match_visible(raw, set, |_| true)
}

/// Like [`match_input`], over only the entries `visible` lets through.
/// Hidden entries never take part in ranking or in `N-name` indexing.
pub fn match_visible<F>(raw: &str, set: &CmdSet, visible: F) -> MatchResult
where
    F: Fn(&CmdEntry) -> bool,
{
    let raw = raw.trim_start();
    let mut found = candidates(raw, set, &visible);
    if found.is_empty() {
        if let Some((n, rest)) = split_index(raw) {
            let inner = candidates(rest, set, &visible);
            if let Some(c) = best(inner).into_iter().nth(n - 1) {
                return MatchResult::One(c);
            }
        }
        return MatchResult::None;
    }
    found = best(found);
    if found.len() == 1 {
        MatchResult::One(found.remove(0))
    } else {
        MatchResult::Many(found)
    }
}

/// Best candidate per command, in set order.
fn candidates<F>(raw: &str, set: &CmdSet, visible: &F) -> Vec<Candidate>
where
    F: Fn(&CmdEntry) -> bool,
{
    let lower = raw.to_ascii_lowercase();
    let first_word = lower.split_whitespace().next().unwrap_or("");
    let mut out = Vec::new();

    for entry in set.entries().iter().filter(|e| visible(*e)) {
        let meta = entry.cmd.meta();
        let mut top: Option<Candidate> = None;
        for name in meta.names().filter(|n| !n.starts_with(SYSTEM_PREFIX)) {
            let lname = name.to_ascii_lowercase();
            let c = if lower.starts_with(&lname) && meta.arg_rule.accepts(&raw[lname.len()..]) {
                Some((true, lname.len()))
            } else if !first_word.is_empty()
                && first_word.len() < lname.len()
                && lname.starts_with(first_word)
            {
                Some((false, first_word.len()))
            } else {
                None
            };
            let Some((full, matched)) = c else { continue };
            let cand = Candidate {
                entry: entry.clone(),
                name: name.to_string(),
                args: raw[matched..].to_string(),
                full,
                matched,
                name_len: lname.len().max(1),
            };
            if top.as_ref().is_none_or(|t| cand.rank(t) == Ordering::Greater) {
                top = Some(cand);
            }
        }
        out.extend(top);
    }
    out
}

fn best(mut found: Vec<Candidate>) -> Vec<Candidate> {
    let Some(top) = found
        .iter()
        .max_by(|a, b| a.rank(b))
        .cloned()
    else {
        return found;
    };
    found.retain(|c| c.rank(&top) == Ordering::Equal);
    found
}

/// `2-look here` -> (2, "look here").
fn split_index(raw: &str) -> Option<(usize, &str)> {
    let (n, rest) = raw.split_once('-')?;
    let n: usize = n.parse().ok()?;
    (n > 0 && !rest.is_empty()).then_some((n, rest))
}
