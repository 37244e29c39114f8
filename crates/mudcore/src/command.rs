//! The command trait, its metadata, and the context a command runs in.
//!
//! Lifecycle: `at_pre_cmd -> parse -> func -> at_post_cmd`. Any stage may
//! return `CmdError::Interrupt` to silently skip the rest. `parse`, `func`
//! and `at_post_cmd` may also suspend with `Flow::Suspend`: the dispatcher
//! parks the continuation and runs it after a delay or on the session's next
//! line of input, then carries on with the remaining stages.

use std::sync::Arc;
use std::time::Duration;

use mudproto::msg::Msg;
use mudproto::session::SessionId;
use thiserror::Error;

use crate::cmdset::CmdSet;
use crate::error::IdentityError;
use crate::game::{Game, Outbox};
use crate::identity::{self, ActingTriple};
use crate::lock::{CheckOpts, LockEngine, LockHandler, Target};
use crate::settings::Settings;
use crate::world::{AccountId, EntityId};

pub const CMD_NOINPUT: &str = "__noinput_command";
pub const CMD_NOMATCH: &str = "__nomatch_command";
pub const CMD_MULTIMATCH: &str = "__multimatch_command";
pub const CMD_NOPERM: &str = "__noperm_command";
pub const CMD_CHANNEL: &str = "__send_to_channel_command";
pub const CMD_LOGINSTART: &str = "__unloggedin_look_command";

/// Names starting with this are hooks and never match typed input.
pub const SYSTEM_PREFIX: &str = "__";

/// What may follow the command name for a full match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArgRule {
    /// Anything, including text glued to the name (`lookme`).
    #[default]
    Any,
    /// Nothing, whitespace, or a `/switch`.
    Spaced,
    /// Nothing but whitespace.
    NoArgs,
}

impl ArgRule {
    pub fn accepts(self, rest: &str) -> bool {
        match self {
            ArgRule::Any => true,
            ArgRule::Spaced => {
                rest.is_empty() || rest.starts_with(char::is_whitespace) || rest.starts_with('/')
            }
            ArgRule::NoArgs => rest.trim().is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CmdMeta {
    pub key: String,
    pub aliases: Vec<String>,
    pub locks: LockHandler,
    pub help_category: String,
    pub help: String,
    pub arg_rule: ArgRule,
    pub auto_help: bool,
    /// Set on generated channel commands.
    pub channel: Option<String>,
    /// Arguments are withheld from logs (passwords).
    pub redact_args: bool,
}

impl CmdMeta {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.trim().to_string(),
            aliases: Vec::new(),
            locks: LockHandler::from_storage("cmd:all()"),
            help_category: "general".to_string(),
            help: String::new(),
            arg_rule: ArgRule::Any,
            auto_help: true,
            channel: None,
            redact_args: false,
        }
    }

    pub fn aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.trim().to_string()).collect();
        self
    }

    /// Malformed definitions are dropped, which hides the command.
    pub fn locks(mut self, lockstring: &str) -> Self {
        self.locks = LockHandler::from_storage(lockstring);
        self
    }

    pub fn category(mut self, c: &str) -> Self {
        self.help_category = c.to_string();
        self
    }

    pub fn help(mut self, h: &str) -> Self {
        self.help = h.to_string();
        self
    }

    pub fn arg_rule(mut self, r: ArgRule) -> Self {
        self.arg_rule = r;
        self
    }

    pub fn no_auto_help(mut self) -> Self {
        self.auto_help = false;
        self
    }

    pub fn channel(mut self, key: &str) -> Self {
        self.channel = Some(key.to_string());
        self
    }

    pub fn redact_args(mut self) -> Self {
        self.redact_args = true;
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.key.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.names().any(|n| n.eq_ignore_ascii_case(name))
    }

    pub fn is_system(&self) -> bool {
        self.key.starts_with(SYSTEM_PREFIX)
    }
}

/// One candidate of an ambiguous match, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateInfo {
    pub name: String,
    pub key: String,
    pub origin: String,
}

/// The input a command is working on; survives suspension.
#[derive(Debug, Clone, Default)]
pub struct CmdInput {
    /// The name as typed (or the hook name for system commands).
    pub cmdname: String,
    pub raw: String,
    /// Everything after the command name. Trimmed by the default `parse`.
    pub args: String,
    pub switches: Vec<String>,
    pub lhs: String,
    pub rhs: Option<String>,
    /// Filled for the multiple-match hook.
    pub candidates: Vec<CandidateInfo>,
    /// Filled for the channel hook.
    pub channel: Option<String>,
}

impl CmdInput {
    /// `cmd/sw1/sw2 lhs = rhs`
    pub fn parse_default(&mut self) {
        let mut rest = self.args.trim_start();
        self.switches.clear();
        if let Some(sw) = rest.strip_prefix('/') {
            let end = sw.find(char::is_whitespace).unwrap_or(sw.len());
            self.switches = sw[..end]
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| s.to_ascii_lowercase())
                .collect();
            rest = &sw[end..];
        }
        let args = rest.trim().to_string();
        match args.split_once('=') {
            Some((l, r)) => {
                self.lhs = l.trim().to_string();
                self.rhs = Some(r.trim().to_string());
            }
            None => {
                self.lhs = args.clone();
                self.rhs = None;
            }
        }
        self.args = args;
    }
}

#[derive(Debug, Error)]
pub enum CmdError {
    /// Stop the remaining lifecycle stages without complaint.
    #[error("interrupted")]
    Interrupt,
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

pub type CmdResult = Result<Flow, CmdError>;

pub type DelayFn = Box<dyn FnOnce(&mut CmdContext<'_>) -> CmdResult + Send>;
pub type PromptFn = Box<dyn FnOnce(&mut CmdContext<'_>, String) -> CmdResult + Send>;

pub enum Suspend {
    Delay { after: Duration, then: DelayFn },
    Prompt { text: String, then: PromptFn },
}

pub enum Flow {
    Done,
    Suspend(Suspend),
}

impl Flow {
    pub fn delay<F>(after: Duration, then: F) -> Flow
    where
        F: FnOnce(&mut CmdContext<'_>) -> CmdResult + Send + 'static,
    {
        Flow::Suspend(Suspend::Delay {
            after,
            then: Box::new(then),
        })
    }

    pub fn prompt<F>(text: impl Into<String>, then: F) -> Flow
    where
        F: FnOnce(&mut CmdContext<'_>, String) -> CmdResult + Send + 'static,
    {
        Flow::Suspend(Suspend::Prompt {
            text: text.into(),
            then: Box::new(then),
        })
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Flow::Done)
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Flow::Done => f.write_str("Done"),
            Flow::Suspend(Suspend::Delay { after, .. }) => write!(f, "Delay({after:?})"),
            Flow::Suspend(Suspend::Prompt { text, .. }) => write!(f, "Prompt({text:?})"),
        }
    }
}

pub trait Command: Send + Sync {
    fn meta(&self) -> &CmdMeta;

    fn at_pre_cmd(&self, _cx: &mut CmdContext<'_>) -> Result<(), CmdError> {
        Ok(())
    }

    fn parse(&self, cx: &mut CmdContext<'_>) -> CmdResult {
        cx.input.parse_default();
        Ok(Flow::Done)
    }

    fn func(&self, cx: &mut CmdContext<'_>) -> CmdResult;

    fn at_post_cmd(&self, _cx: &mut CmdContext<'_>) -> CmdResult {
        Ok(Flow::Done)
    }
}

pub struct CmdContext<'a> {
    pub game: &'a mut Game,
    pub locks: &'a LockEngine,
    pub settings: &'a Settings,
    pub out: &'a mut Outbox,
    pub caller: ActingTriple,
    pub session: SessionId,
    pub input: CmdInput,
    /// The merged set this command was matched from.
    pub cmdset: Arc<CmdSet>,
    pub now_ms: u64,
}

impl CmdContext<'_> {
    /// To the session that typed the command.
    pub fn msg(&mut self, text: impl Into<String>) {
        self.out.text(self.session, text);
    }

    pub fn send(&mut self, msg: Msg) {
        self.out.send(self.session, msg);
    }

    pub fn msg_entity(&mut self, e: EntityId, text: &str) {
        for s in self.game.sessions_of_entity(e) {
            self.out.text(s, text);
        }
    }

    pub fn msg_account(&mut self, a: AccountId, text: &str) {
        for s in self.game.sessions_of_account(a) {
            self.out.text(s, text);
        }
    }

    /// Everyone puppeting something at `location`, except `exclude`.
    pub fn msg_location(&mut self, location: EntityId, text: &str, exclude: Option<EntityId>) {
        let ids: Vec<EntityId> = self
            .game
            .world
            .contents(location)
            .map(|e| e.id)
            .filter(|id| Some(*id) != exclude)
            .collect();
        for id in ids {
            self.msg_entity(id, text);
        }
    }

    pub fn caller_name(&self) -> String {
        self.game.display_name(&self.caller)
    }

    pub fn caller_location(&self) -> Option<EntityId> {
        let e = self.caller.entity()?;
        self.game.world.entity(e)?.location
    }

    pub fn check_lock(
        &self,
        target: &Target,
        locks: &LockHandler,
        access_type: &str,
        opts: CheckOpts,
    ) -> bool {
        self.locks
            .check(&self.game.world, &self.caller, target, locks, access_type, opts)
    }

    pub fn can_use(&self, cmd: &dyn Command) -> bool {
        self.check_lock(&Target::None, &cmd.meta().locks, "cmd", CheckOpts::default())
    }

    /// Commands the caller may see in help listings.
    pub fn visible_commands(&self) -> Vec<Arc<dyn Command>> {
        let mut cmds: Vec<Arc<dyn Command>> = self
            .cmdset
            .entries()
            .iter()
            .filter(|e| !e.cmd.meta().is_system() && e.cmd.meta().auto_help)
            .filter(|e| self.can_use(e.cmd.as_ref()))
            .map(|e| e.cmd.clone())
            .collect();
        cmds.sort_by(|a, b| {
            (&a.meta().help_category, &a.meta().key).cmp(&(&b.meta().help_category, &b.meta().key))
        });
        cmds
    }

    /// Re-resolve after a login or puppet change.
    pub fn refresh_caller(&mut self) {
        if let Ok(t) = identity::resolve(&self.game.sessions, self.session) {
            self.caller = t;
        }
    }

    pub fn login(&mut self, acct: AccountId) -> Result<(), IdentityError> {
        let r = self
            .game
            .login(self.settings, self.locks, self.session, acct, self.out);
        self.refresh_caller();
        r
    }

    pub fn puppet(&mut self, e: EntityId) -> Result<(), IdentityError> {
        let r = self
            .game
            .puppet(self.settings, self.locks, self.session, e, self.out);
        self.refresh_caller();
        r
    }

    pub fn unpuppet(&mut self) -> Result<EntityId, IdentityError> {
        let r = self.game.unpuppet(self.settings, self.session, self.out);
        self.refresh_caller();
        r
    }

    /// Ask the portal to close this session.
    pub fn disconnect(&mut self, reason: &str) {
        self.out.kick(self.session, reason);
    }
}
