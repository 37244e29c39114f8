//! From a line of text to a running command.
//!
//! The dispatcher gathers every command set visible to the acting triple,
//! merges them, matches the input, checks the `cmd` lock and drives the
//! command lifecycle. Routing outcomes (no input, no match, ambiguous, no
//! permission, channel relay) run as hook commands looked up by reserved name
//! in the merged set, so any set can override them; the built-in fallbacks
//! below are used otherwise.

use std::borrow::Cow;
use std::sync::Arc;

use mudproto::msg::Msg;
use mudproto::session::SessionId;
use tracing::{debug, error, warn};

use crate::cmdset::{CmdEntry, CmdSet, CmdSetCatalog, CmdSetSource, merge};
use crate::command::{
    CMD_CHANNEL, CMD_MULTIMATCH, CMD_NOINPUT, CMD_NOMATCH, CMD_NOPERM, CandidateInfo, CmdContext,
    CmdError, CmdInput, CmdMeta, CmdResult, Command, Flow, Suspend,
};
use crate::continuation::{Continuation, ContinuationTable, Pending, Stage};
use crate::game::{Game, Outbox};
use crate::identity::{self, ActingTriple, Caller};
use crate::lock::{CheckOpts, LockEngine, Target};
use crate::matcher::{MatchResult, match_input, match_visible};
use crate::settings::Settings;
use crate::world::EntityId;

/// First words whose arguments never reach the logs.
const SENSITIVE: &[&str] = &["connect", "create", "password"];

pub fn redact_input_for_logs<'a>(line: &'a str, cmd: Option<&CmdMeta>) -> Cow<'a, str> {
    let line = line.trim();
    let Some(first) = line.split_whitespace().next() else {
        return Cow::Borrowed(line);
    };
    let sensitive = cmd.is_some_and(|m| m.redact_args)
        || SENSITIVE.iter().any(|s| s.eq_ignore_ascii_case(first));
    if sensitive && first.len() < line.len() {
        return Cow::Owned(format!("{first} <redacted>"));
    }
    Cow::Borrowed(line)
}

/// What to do with a continuation being resumed.
pub enum Resume {
    Timer,
    Line(String),
}

/// Borrowed view of the engine for one dispatch.
pub struct Dispatcher<'a> {
    pub game: &'a mut Game,
    pub locks: &'a LockEngine,
    pub settings: &'a Settings,
    pub catalog: &'a CmdSetCatalog,
    pub continuations: &'a mut ContinuationTable,
    pub out: &'a mut Outbox,
    pub now_ms: u64,
}

impl Dispatcher<'_> {
    /// Every set visible to `t`, tagged with its source.
    pub fn gather(&self, t: &ActingTriple) -> Vec<(CmdSetSource, Arc<CmdSet>)> {
        let world = &self.game.world;
        let mut sets = Vec::new();
        let mut push = |src: CmdSetSource, keys: &[String]| {
            for key in keys {
                match self.catalog.get(key) {
                    Some(s) => sets.push((src, s.clone())),
                    None => warn!(cmdset = %key, "unknown cmdset"),
                }
            }
        };

        if let Some(ent) = t.entity().and_then(|e| world.entity(e)) {
            push(CmdSetSource::Entity, &ent.cmdsets);
        }
        if let Some(s) = t.session.and_then(|s| self.game.sessions.get(s)) {
            push(CmdSetSource::Session, &s.cmdsets);
        }
        if let Some(e) = t.entity() {
            for id in self.surroundings(e) {
                let Some(obj) = world.entity(id) else { continue };
                if obj.cmdsets.is_empty() {
                    continue;
                }
                let callable = self.locks.check(
                    world,
                    t,
                    &Target::Entity(id),
                    &obj.locks,
                    "call",
                    CheckOpts::default_allow(),
                );
                if callable {
                    push(CmdSetSource::Surroundings, &obj.cmdsets);
                }
            }
        }
        if let Some(a) = t.account.and_then(|a| world.account(a)) {
            push(CmdSetSource::Account, &a.cmdsets);
        }
        push(CmdSetSource::System, &self.settings.system_cmdsets);

        if let Some(a) = t.account {
            let prio = self.settings.channel_cmdset_priority;
            if let Some(set) = crate::channel::channel_cmdset(&world.channels, a, prio) {
                sets.push((CmdSetSource::Channel, Arc::new(set)));
            }
        }

        let no_objs = sets
            .iter()
            .any(|(src, s)| *src != CmdSetSource::Surroundings && s.no_objs);
        let no_channels = sets
            .iter()
            .any(|(src, s)| *src != CmdSetSource::Channel && s.no_channels);
        sets.retain(|(src, _)| match src {
            CmdSetSource::Surroundings => !no_objs,
            CmdSetSource::Channel => !no_channels,
            _ => true,
        });
        sets
    }

    /// Location, the other things there, then what `e` carries.
    fn surroundings(&self, e: EntityId) -> Vec<EntityId> {
        let world = &self.game.world;
        let mut ids = Vec::new();
        if let Some(loc) = world.entity(e).and_then(|ent| ent.location) {
            ids.push(loc);
            ids.extend(world.contents(loc).map(|o| o.id).filter(|id| *id != e));
        }
        ids.extend(world.contents(e).map(|o| o.id));
        ids
    }

    pub fn merged_for(&self, session: SessionId) -> Option<(ActingTriple, Arc<CmdSet>)> {
        let t = identity::resolve(&self.game.sessions, session).ok()?;
        let merged = merge(&self.gather(&t));
        Some((t, Arc::new(merged)))
    }

    fn may_use(&self, t: &ActingTriple, cmd: &dyn Command) -> bool {
        self.locks.check(
            &self.game.world,
            t,
            &Target::None,
            &cmd.meta().locks,
            "cmd",
            CheckOpts::default(),
        )
    }

    /// One line of text from `session`, with no continuation in the way.
    pub fn execute(&mut self, session: SessionId, raw: &str) {
        let Some((t, merged)) = self.merged_for(session) else {
            warn!(session = %session, "input for unknown session");
            return;
        };
        debug!(session = %session, input = %redact_input_for_logs(raw, None), "dispatch");

        let line = raw.trim();
        let base = CmdInput {
            raw: line.to_string(),
            ..CmdInput::default()
        };
        if line.is_empty() {
            self.run_hook(session, t, merged, CMD_NOINPUT, base);
            return;
        }

        let visible = |e: &CmdEntry| self.may_use(&t, e.cmd.as_ref());
        let c = match match_visible(line, &merged, visible) {
            MatchResult::One(c) => c,
            MatchResult::Many(cands) => {
                let input = CmdInput {
                    args: line.to_string(),
                    candidates: cands
                        .iter()
                        .map(|c| CandidateInfo {
                            name: c.name.clone(),
                            key: c.entry.cmd.meta().key.clone(),
                            origin: c.entry.origin.clone(),
                        })
                        .collect(),
                    ..base
                };
                self.run_hook(session, t, merged, CMD_MULTIMATCH, input);
                return;
            }
            MatchResult::None => {
                // Refused only when a hidden command was named in full.
                let hook = match match_input(line, &merged) {
                    MatchResult::One(c) if c.full => {
                        debug!(session = %session, cmd = %c.entry.cmd.meta().key, "cmd lock denied");
                        CMD_NOPERM
                    }
                    _ => CMD_NOMATCH,
                };
                let input = CmdInput {
                    args: line.to_string(),
                    ..base
                };
                self.run_hook(session, t, merged, hook, input);
                return;
            }
        };

        let cmd = c.entry.cmd.clone();
        let input = CmdInput {
            cmdname: c.name.clone(),
            args: c.args.clone(),
            channel: cmd.meta().channel.clone(),
            ..base
        };
        if input.channel.is_some() {
            self.run_hook(session, t, merged, CMD_CHANNEL, input);
            return;
        }
        self.run(session, t, cmd, input, merged, None);
    }

    /// Run a reserved-name command, falling back to the built-in behavior.
    pub fn run_hook(
        &mut self,
        session: SessionId,
        t: ActingTriple,
        merged: Arc<CmdSet>,
        name: &str,
        mut input: CmdInput,
    ) {
        let cmd = match merged.get(name) {
            Some(e) => e.cmd.clone(),
            None => match fallback_hook(name) {
                Some(c) => c,
                None => return,
            },
        };
        input.cmdname = name.to_string();
        self.run(session, t, cmd, input, merged, None);
    }

    /// Carry on with a parked continuation.
    pub fn resume(&mut self, session: SessionId, cont: Continuation, how: Resume) {
        let Ok(t) = identity::resolve(&self.game.sessions, session) else {
            debug!(session = %session, cmd = %cont.cmd.meta().key, "continuation for gone session dropped");
            return;
        };
        let Continuation {
            cmd,
            input,
            cmdset,
            next,
            pending,
            ..
        } = cont;
        self.run(session, t, cmd, input, cmdset, Some((pending, how, next)));
    }

    fn run(
        &mut self,
        session: SessionId,
        t: ActingTriple,
        cmd: Arc<dyn Command>,
        input: CmdInput,
        cmdset: Arc<CmdSet>,
        resume: Option<(Pending, Resume, Stage)>,
    ) {
        let mut cx = CmdContext {
            game: &mut *self.game,
            locks: self.locks,
            settings: self.settings,
            out: &mut *self.out,
            caller: t,
            session,
            input,
            cmdset,
            now_ms: self.now_ms,
        };

        let (mut result, mut next): (CmdResult, Stage) = match resume {
            None => (
                cmd.at_pre_cmd(&mut cx).map(|()| Flow::Done),
                Stage::Parse,
            ),
            Some((Pending::Delay { then, .. }, _, next)) => (then(&mut cx), next),
            Some((Pending::Prompt { then }, how, next)) => {
                let line = match how {
                    Resume::Line(l) => l,
                    Resume::Timer => String::new(),
                };
                (then(&mut cx, line), next)
            }
        };

        loop {
            match result {
                Ok(Flow::Done) => {}
                Ok(Flow::Suspend(s)) => {
                    let input = std::mem::take(&mut cx.input);
                    let cmdset = cx.cmdset.clone();
                    let pending = match s {
                        Suspend::Delay { after, then } => {
                            let ms = u64::try_from(after.as_millis()).unwrap_or(u64::MAX);
                            Pending::Delay {
                                due_ms: self.now_ms.saturating_add(ms),
                                then,
                            }
                        }
                        Suspend::Prompt { text, then } => {
                            cx.send(Msg::prompt(text));
                            Pending::Prompt { then }
                        }
                    };
                    debug!(session = %session, cmd = %cmd.meta().key, ?next, "command suspended");
                    self.continuations
                        .park(session, Continuation::new(cmd, input, cmdset, next, pending));
                    return;
                }
                Err(CmdError::Interrupt) => {
                    debug!(session = %session, cmd = %cmd.meta().key, "command interrupted");
                    return;
                }
                Err(CmdError::Failed(e)) => {
                    error!(
                        session = %session,
                        caller = ?cx.caller.caller,
                        cmd = %cmd.meta().key,
                        input = %redact_input_for_logs(&cx.input.raw, Some(cmd.meta())),
                        err = %format!("{e:#}"),
                        "command failed"
                    );
                    cx.msg("Something went wrong running that command. It has been logged.");
                    return;
                }
            }
            let stage = next;
            result = match stage {
                Stage::Parse => cmd.parse(&mut cx),
                Stage::Func => cmd.func(&mut cx),
                Stage::PostCmd => cmd.at_post_cmd(&mut cx),
                Stage::Finish => return,
            };
            next = stage.after();
        }
    }
}

fn fallback_hook(name: &str) -> Option<Arc<dyn Command>> {
    let cmd: Arc<dyn Command> = match name {
        CMD_NOMATCH => Arc::new(NotFound::new(CMD_NOMATCH)),
        CMD_NOPERM => Arc::new(NotFound::new(CMD_NOPERM)),
        CMD_MULTIMATCH => Arc::new(Ambiguous::new()),
        CMD_CHANNEL => Arc::new(ChannelRelay::new()),
        _ => return None,
    };
    Some(cmd)
}

/// Also the no-permission fallback, so locked commands stay hidden.
pub struct NotFound {
    meta: CmdMeta,
}

impl NotFound {
    pub fn new(key: &str) -> Self {
        Self {
            meta: CmdMeta::new(key).no_auto_help(),
        }
    }
}

impl Command for NotFound {
    fn meta(&self) -> &CmdMeta {
        &self.meta
    }

    fn parse(&self, _cx: &mut CmdContext<'_>) -> CmdResult {
        Ok(Flow::Done)
    }

    fn func(&self, cx: &mut CmdContext<'_>) -> CmdResult {
        cx.msg("Huh?");
        Ok(Flow::Done)
    }
}

pub struct Ambiguous {
    meta: CmdMeta,
}

impl Ambiguous {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new(CMD_MULTIMATCH).no_auto_help(),
        }
    }
}

impl Default for Ambiguous {
    fn default() -> Self {
        Self::new()
    }
}

impl Command for Ambiguous {
    fn meta(&self) -> &CmdMeta {
        &self.meta
    }

    fn parse(&self, _cx: &mut CmdContext<'_>) -> CmdResult {
        Ok(Flow::Done)
    }

    fn func(&self, cx: &mut CmdContext<'_>) -> CmdResult {
        let mut text = String::from("Which do you mean?");
        for (i, c) in cx.input.candidates.iter().enumerate() {
            text.push_str(&format!("\n  {}-{} [{}]", i + 1, c.name, c.origin));
        }
        cx.msg(text);
        Ok(Flow::Done)
    }
}

/// `<channel> <text>` for a subscribed channel.
pub struct ChannelRelay {
    meta: CmdMeta,
}

impl ChannelRelay {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new(CMD_CHANNEL).no_auto_help(),
        }
    }
}

impl Default for ChannelRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl Command for ChannelRelay {
    fn meta(&self) -> &CmdMeta {
        &self.meta
    }

    fn func(&self, cx: &mut CmdContext<'_>) -> CmdResult {
        let Some(name) = cx.input.channel.clone() else {
            return Err(CmdError::Interrupt);
        };
        let Some(ch) = cx.game.world.channels.get(&name) else {
            cx.msg("Huh?");
            return Ok(Flow::Done);
        };
        let (key, locks) = (ch.key.clone(), ch.locks.clone());
        let subscribers: Vec<_> = ch.subscribers.iter().copied().collect();

        let text = cx.input.args.clone();
        if text.is_empty() {
            cx.msg("Say what?");
            return Ok(Flow::Done);
        }
        if !cx.check_lock(&Target::Channel(key.clone()), &locks, "send", CheckOpts::default()) {
            cx.msg(format!("You are not allowed to send to {key}."));
            return Ok(Flow::Done);
        }
        let speaker = match cx.caller.caller {
            Caller::Entity(_) | Caller::Account(_) => cx.caller_name(),
            Caller::Session(_) => return Err(CmdError::Interrupt),
        };
        let line = format!("[{key}] {speaker}: {text}");
        for a in subscribers {
            cx.msg_account(a, &line);
        }
        Ok(Flow::Done)
    }
}
