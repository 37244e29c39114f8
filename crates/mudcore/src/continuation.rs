//! Suspended commands, keyed by session.
//!
//! A continuation is a plain value: the command, its input, the merged set it
//! matched in, the stage to carry on with, and the boxed closure to call
//! first. Nothing here survives a process restart.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use mudproto::session::SessionId;

use crate::cmdset::CmdSet;
use crate::command::{CmdInput, Command, DelayFn, PromptFn};

/// Lifecycle stages that may suspend, plus the terminal marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Parse,
    Func,
    PostCmd,
    Finish,
}

impl Stage {
    pub fn after(self) -> Stage {
        match self {
            Stage::Parse => Stage::Func,
            Stage::Func => Stage::PostCmd,
            Stage::PostCmd | Stage::Finish => Stage::Finish,
        }
    }
}

pub enum Pending {
    Delay { due_ms: u64, then: DelayFn },
    Prompt { then: PromptFn },
}

pub struct Continuation {
    pub cmd: Arc<dyn Command>,
    pub input: CmdInput,
    pub cmdset: Arc<CmdSet>,
    /// Where the lifecycle picks up once `pending` has run.
    pub next: Stage,
    pub pending: Pending,
    seq: u64,
}

impl Continuation {
    pub fn new(
        cmd: Arc<dyn Command>,
        input: CmdInput,
        cmdset: Arc<CmdSet>,
        next: Stage,
        pending: Pending,
    ) -> Self {
        Self {
            cmd,
            input,
            cmdset,
            next,
            pending,
            seq: 0,
        }
    }

    pub fn is_delay(&self) -> bool {
        matches!(self.pending, Pending::Delay { .. })
    }
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = match &self.pending {
            Pending::Delay { due_ms, .. } => format!("delay until {due_ms}"),
            Pending::Prompt { .. } => "prompt".to_string(),
        };
        f.debug_struct("Continuation")
            .field("cmd", &self.cmd.meta().key)
            .field("next", &self.next)
            .field("pending", &pending)
            .finish()
    }
}

#[derive(Default)]
pub struct ContinuationTable {
    by_session: HashMap<SessionId, Continuation>,
    // Entries whose seq no longer matches are stale and skipped.
    timers: BinaryHeap<Reverse<(u64, u64, SessionId)>>,
    seq: u64,
}

impl ContinuationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// At most one per session; a new one replaces the old.
    pub fn park(&mut self, session: SessionId, mut c: Continuation) {
        self.seq += 1;
        c.seq = self.seq;
        if let Pending::Delay { due_ms, .. } = c.pending {
            self.timers.push(Reverse((due_ms, c.seq, session)));
        }
        self.by_session.insert(session, c);
    }

    pub fn is_pending(&self, session: SessionId) -> bool {
        self.by_session.contains_key(&session)
    }

    pub fn has_delay(&self, session: SessionId) -> bool {
        self.by_session.get(&session).is_some_and(Continuation::is_delay)
    }

    /// The pending prompt for `session`, if that is what it waits on.
    pub fn take_prompt(&mut self, session: SessionId) -> Option<Continuation> {
        if self.has_delay(session) {
            return None;
        }
        self.by_session.remove(&session)
    }

    /// Delays due at `now_ms`, earliest first.
    pub fn take_due(&mut self, now_ms: u64) -> Vec<(SessionId, Continuation)> {
        let mut due = Vec::new();
        while let Some(Reverse((at, seq, sid))) = self.timers.peek().copied() {
            if at > now_ms {
                break;
            }
            self.timers.pop();
            if self.by_session.get(&sid).is_some_and(|c| c.seq == seq) {
                if let Some(c) = self.by_session.remove(&sid) {
                    due.push((sid, c));
                }
            }
        }
        due
    }

    pub fn next_due_ms(&mut self) -> Option<u64> {
        while let Some(Reverse((at, seq, sid))) = self.timers.peek().copied() {
            if self.by_session.get(&sid).is_some_and(|c| c.seq == seq) {
                return Some(at);
            }
            self.timers.pop();
        }
        None
    }

    pub fn cancel(&mut self, session: SessionId) -> Option<Continuation> {
        self.by_session.remove(&session)
    }

    /// Drop everything; returns the sessions that lost a continuation.
    pub fn clear(&mut self) -> Vec<SessionId> {
        self.timers.clear();
        let mut sids: Vec<SessionId> = self.by_session.drain().map(|(s, _)| s).collect();
        sids.sort();
        sids
    }

    pub fn len(&self) -> usize {
        self.by_session.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_session.is_empty()
    }
}
