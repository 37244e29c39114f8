//! The server-side service: one per process, owned by the bridge loop.
//!
//! Requests from the portal go in through [`Engine::handle`]; responses are
//! collected with [`Engine::take_output`]. Time is passed in as milliseconds
//! so timed continuations are driven by the caller's clock.

use std::collections::{HashMap, VecDeque};

use mudproto::bridge::{PortalReq, ServerResp};
use mudproto::msg::Msg;
use mudproto::session::{SessionId, SessionSnapshot};
use tracing::{debug, info, warn};

use crate::cmdset::CmdSetCatalog;
use crate::command::CMD_LOGINSTART;
use crate::continuation::ContinuationTable;
use crate::dispatch::{Dispatcher, Resume};
use crate::error::LockError;
use crate::game::{Game, Outbox};
use crate::lock::{CheckOpts, LockEngine, Target};
use crate::sessions::ServerSession;
use crate::settings::Settings;
use crate::world::World;

/// Handler for one inputcommand name.
pub type InputFunc = fn(&mut Engine, SessionId, Msg, u64);

pub struct Engine {
    settings: Settings,
    locks: LockEngine,
    catalog: CmdSetCatalog,
    game: Game,
    continuations: ContinuationTable,
    queued: HashMap<SessionId, VecDeque<String>>,
    inputfuncs: HashMap<String, InputFunc>,
    out: Outbox,
}

impl Engine {
    pub fn new(settings: Settings, catalog: CmdSetCatalog, world: World) -> Result<Self, LockError> {
        let locks = LockEngine::new(&settings)?;
        let mut e = Self {
            settings,
            locks,
            catalog,
            game: Game::new(world),
            continuations: ContinuationTable::new(),
            queued: HashMap::new(),
            inputfuncs: HashMap::new(),
            out: Outbox::default(),
        };
        e.register_inputfunc("text", input_text);
        e.register_inputfunc("echo", input_echo);
        e.register_inputfunc("client_options", input_client_options);
        e.register_inputfunc("default", input_default);
        Ok(e)
    }

    /// Drop in-memory state tied to live sessions. The world is left to the caller.
    pub fn shutdown(&mut self) {
        let dropped = self.continuations.clear();
        self.queued.clear();
        info!(sessions = self.game.sessions.len(), continuations = dropped.len(), "engine shutdown");
    }

    pub fn register_inputfunc(&mut self, name: &str, f: InputFunc) {
        self.inputfuncs.insert(name.to_string(), f);
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn locks(&self) -> &LockEngine {
        &self.locks
    }

    pub fn locks_mut(&mut self) -> &mut LockEngine {
        &mut self.locks
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn world(&self) -> &World {
        &self.game.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.game.world
    }

    pub fn take_output(&mut self) -> Vec<ServerResp> {
        self.out.take()
    }

    fn dispatcher(&mut self, now_ms: u64) -> Dispatcher<'_> {
        Dispatcher {
            game: &mut self.game,
            locks: &self.locks,
            settings: &self.settings,
            catalog: &self.catalog,
            continuations: &mut self.continuations,
            out: &mut self.out,
            now_ms,
        }
    }

    pub fn handle(&mut self, req: PortalReq, now_ms: u64) {
        match req {
            PortalReq::Connect(snap) => self.connect(&snap, now_ms),
            PortalReq::Disconnect { session } => self.disconnect(session),
            PortalReq::Input { session, msg } => self.input(session, msg, now_ms),
            PortalReq::Sync(snap) => self.sync(&snap),
            PortalReq::SyncAll(snaps) => self.sync_all(&snaps),
        }
    }

    /// A brand-new connection: register it and show the start screen.
    pub fn connect(&mut self, snap: &SessionSnapshot, now_ms: u64) {
        let sid = snap.session;
        if self.game.sessions.contains(sid) {
            warn!(session = %sid, "connect for known session; replacing");
            self.disconnect(sid);
        }
        let s = ServerSession::from_snapshot(snap, vec![self.settings.unloggedin_cmdset.clone()]);
        self.game.sessions.insert(s);
        info!(session = %sid, transport = snap.transport.as_str(), addr = %snap.address, "session connected");

        let mut d = self.dispatcher(now_ms);
        if let Some((t, merged)) = d.merged_for(sid) {
            d.run_hook(sid, t, merged, CMD_LOGINSTART, Default::default());
        }
    }

    pub fn disconnect(&mut self, session: SessionId) {
        if self.continuations.cancel(session).is_some() {
            debug!(session = %session, "pending continuation cancelled");
        }
        self.queued.remove(&session);
        if self.game.sessions.remove(session).is_some() {
            info!(session = %session, "session disconnected");
        }
    }

    /// Capability update for a live session.
    pub fn sync(&mut self, snap: &SessionSnapshot) {
        match self.game.sessions.get_mut(snap.session) {
            Some(s) => {
                s.caps = snap.caps.clone();
                s.address = snap.address.clone();
            }
            None => {
                self.game
                    .restore(&self.settings, &self.locks, snap, &mut self.out);
            }
        }
    }

    /// The portal's full session list after a (re)connect. Sessions it no
    /// longer has are dropped.
    pub fn sync_all(&mut self, snaps: &[SessionSnapshot]) {
        let live: std::collections::HashSet<SessionId> = snaps.iter().map(|s| s.session).collect();
        for sid in self.game.sessions.ids() {
            if !live.contains(&sid) {
                self.disconnect(sid);
            }
        }
        for snap in snaps {
            if self.game.sessions.contains(snap.session) {
                self.sync(snap);
                self.game.push_state(snap.session, &mut self.out);
            } else {
                self.game
                    .restore(&self.settings, &self.locks, snap, &mut self.out);
            }
        }
        info!(sessions = snaps.len(), "resynced sessions from portal");
    }

    pub fn input(&mut self, session: SessionId, msg: Msg, now_ms: u64) {
        if !self.game.sessions.contains(session) {
            warn!(session = %session, name = %msg.name, "input for unknown session");
            return;
        }
        let f = self
            .inputfuncs
            .get(&msg.name)
            .or_else(|| self.inputfuncs.get("default"))
            .copied();
        match f {
            Some(f) => f(self, session, msg, now_ms),
            None => debug!(session = %session, name = %msg.name, "no inputfunc"),
        }
    }

    /// A line of text, honoring any pending continuation.
    pub fn text(&mut self, session: SessionId, line: &str, now_ms: u64) {
        if self.continuations.has_delay(session) {
            let max = self.settings.max_queued_inputs;
            let q = self.queued.entry(session).or_default();
            if q.len() >= max {
                warn!(session = %session, queued = q.len(), "input queue full; dropping line");
                self.out
                    .text(session, "You are busy. That input was dropped.");
                return;
            }
            q.push_back(line.to_string());
            return;
        }
        if let Some(cont) = self.continuations.take_prompt(session) {
            self.dispatcher(now_ms)
                .resume(session, cont, Resume::Line(line.to_string()));
            return;
        }
        self.dispatcher(now_ms).execute(session, line);
    }

    /// Resume every delay due at `now_ms`, then replay input queued behind it.
    pub fn run_due(&mut self, now_ms: u64) {
        for (sid, cont) in self.continuations.take_due(now_ms) {
            self.dispatcher(now_ms).resume(sid, cont, Resume::Timer);
            self.drain_queue(sid, now_ms);
        }
    }

    fn drain_queue(&mut self, session: SessionId, now_ms: u64) {
        while !self.continuations.has_delay(session) {
            let Some(line) = self.queued.get_mut(&session).and_then(VecDeque::pop_front) else {
                break;
            };
            self.text(session, &line, now_ms);
        }
        if self.queued.get(&session).is_some_and(VecDeque::is_empty) {
            self.queued.remove(&session);
        }
    }

    pub fn next_due_ms(&mut self) -> Option<u64> {
        self.continuations.next_due_ms()
    }

    /// Swap in new command sets. Suspended commands are dropped, not resumed.
    pub fn reload(&mut self, catalog: CmdSetCatalog) {
        self.catalog = catalog;
        let dropped = self.continuations.clear();
        for sid in &dropped {
            self.queued.remove(sid);
            self.out
                .text(*sid, "The server reloaded; your unfinished command was cancelled.");
        }
        info!(cmdsets = self.catalog.len(), cancelled = dropped.len(), "reloaded");
    }

    /// Names of the commands `session` could type right now.
    pub fn available_commands(&mut self, session: SessionId) -> Vec<String> {
        let d = self.dispatcher(0);
        let Some((t, merged)) = d.merged_for(session) else {
            return Vec::new();
        };
        let mut keys: Vec<String> = merged
            .entries()
            .iter()
            .map(|e| e.cmd.meta())
            .filter(|m| !m.is_system())
            .filter(|m| {
                self.locks
                    .check(&self.game.world, &t, &Target::None, &m.locks, "cmd", CheckOpts::default())
            })
            .map(|m| m.key.clone())
            .collect();
        keys.sort();
        keys
    }
}

fn input_text(e: &mut Engine, session: SessionId, msg: Msg, now_ms: u64) {
    let line = msg.joined_text();
    e.text(session, &line, now_ms);
}

fn input_echo(e: &mut Engine, session: SessionId, msg: Msg, _now_ms: u64) {
    e.out.text(session, format!("Echo returns: {}", msg.joined_text()));
}

/// With no options, report the current ones.
fn input_client_options(e: &mut Engine, session: SessionId, msg: Msg, _now_ms: u64) {
    let Some(s) = e.game.sessions.get_mut(session) else {
        return;
    };
    if s.caps.apply_options(&msg.kwargs) {
        debug!(session = %session, caps = ?s.caps, "client options updated");
    }
    // Always answer with the full set; the portal mirrors it.
    let mut reply = Msg::new("client_options");
    if let Ok(serde_json::Value::Object(m)) = serde_json::to_value(&s.caps) {
        reply.kwargs = m;
    }
    e.out.send(session, reply);
}

fn input_default(_e: &mut Engine, session: SessionId, msg: Msg, _now_ms: u64) {
    debug!(session = %session, name = %msg.name, "unhandled inputcommand");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::anyhow;
    use mudproto::session::SessionState;

    use super::*;
    use crate::cmdset::{CmdSet, MergePolicy};
    use crate::cmdset::tests::Stub;
    use crate::command::{
        CMD_NOMATCH, CmdContext, CmdError, CmdMeta, CmdResult, Command, Flow,
    };
    use crate::lock::LockHandler;
    use crate::testutil::snapshot;
    use crate::world::{AccountId, EntityKind};

    struct Login {
        meta: CmdMeta,
    }

    impl Command for Login {
        fn meta(&self) -> &CmdMeta {
            &self.meta
        }

        fn func(&self, cx: &mut CmdContext<'_>) -> CmdResult {
            let id = cx
                .game
                .world
                .account_by_name(&cx.input.args)
                .map(|a| a.id)
                .ok_or_else(|| anyhow!("no account {}", cx.input.args))?;
            cx.login(id).map_err(anyhow::Error::from)?;
            cx.msg("welcome");
            Ok(Flow::Done)
        }
    }

    struct Banner {
        meta: CmdMeta,
    }

    impl Command for Banner {
        fn meta(&self) -> &CmdMeta {
            &self.meta
        }

        fn func(&self, cx: &mut CmdContext<'_>) -> CmdResult {
            cx.msg("Welcome. Type connect <name>.");
            Ok(Flow::Done)
        }
    }

    struct Wait;

    impl Command for Wait {
        fn meta(&self) -> &CmdMeta {
            static META: std::sync::OnceLock<CmdMeta> = std::sync::OnceLock::new();
            META.get_or_init(|| CmdMeta::new("wait"))
        }

        fn func(&self, cx: &mut CmdContext<'_>) -> CmdResult {
            cx.msg("waiting");
            Ok(Flow::delay(Duration::from_millis(500), |cx: &mut CmdContext<'_>| {
                cx.msg("done waiting");
                Ok(Flow::Done)
            }))
        }

        fn at_post_cmd(&self, cx: &mut CmdContext<'_>) -> CmdResult {
            cx.msg("post");
            Ok(Flow::Done)
        }
    }

    struct Ask {
        meta: CmdMeta,
    }

    impl Command for Ask {
        fn meta(&self) -> &CmdMeta {
            &self.meta
        }

        fn func(&self, _cx: &mut CmdContext<'_>) -> CmdResult {
            Ok(Flow::prompt("Really?", |cx: &mut CmdContext<'_>, answer: String| {
                if answer.eq_ignore_ascii_case("yes") {
                    cx.msg("confirmed");
                } else {
                    cx.msg("aborted");
                }
                Ok(Flow::Done)
            }))
        }
    }

    struct Boom {
        meta: CmdMeta,
        interrupt: bool,
    }

    impl Command for Boom {
        fn meta(&self) -> &CmdMeta {
            &self.meta
        }

        fn at_pre_cmd(&self, _cx: &mut CmdContext<'_>) -> Result<(), CmdError> {
            if self.interrupt {
                return Err(CmdError::Interrupt);
            }
            Ok(())
        }

        fn func(&self, _cx: &mut CmdContext<'_>) -> CmdResult {
            Err(anyhow!("exploded").into())
        }

        fn at_post_cmd(&self, cx: &mut CmdContext<'_>) -> CmdResult {
            cx.msg("never");
            Ok(Flow::Done)
        }
    }

    fn catalog() -> CmdSetCatalog {
        let mut c = CmdSetCatalog::new();
        c.register(
            CmdSet::new("unloggedin")
                .with(Banner {
                    meta: CmdMeta::new(CMD_LOGINSTART).aliases(&["look", "l"]),
                })
                .with(Login {
                    meta: CmdMeta::new("connect").redact_args(),
                }),
        );
        c.register(CmdSet::new("session"));
        c.register(
            CmdSet::new("account")
                .priority(-10)
                .with(Stub::new("who", &[]))
                .with(Stub::with_meta(CmdMeta::new("shutdown").locks("cmd:perm(Developer)")))
                .with(Stub::with_meta(CmdMeta::new("shout").locks("cmd:perm(Admin)")))
                .with(Stub::new("shutup", &[])),
        );
        c.register(
            CmdSet::new("character")
                .with(Stub::new("look", &["l"]))
                .with(Stub::new("say", &["'"]))
                .with(Stub::with_meta(CmdMeta::new("shack").locks("cmd:perm(Admin)")))
                .with(Stub::new("shake", &[]))
                .with(Stub::new("shove", &[]))
                .with(Wait)
                .with(Ask {
                    meta: CmdMeta::new("quit"),
                })
                .with(Boom {
                    meta: CmdMeta::new("boom"),
                    interrupt: false,
                })
                .with(Boom {
                    meta: CmdMeta::new("fizzle"),
                    interrupt: true,
                }),
        );
        c.register(CmdSet::new("system"));
        c
    }

    struct T {
        e: Engine,
    }

    impl T {
        fn new() -> Self {
            let mut world = World::new();
            let room = world.create_entity("Limbo", EntityKind::Room, None);
            world.start_room = Some(room);
            for (name, perms) in [("alice", &["Player"][..]), ("bob", &["Admin"][..])] {
                let a = world
                    .create_account(name, String::new(), perms, vec!["account".to_string()], 0)
                    .unwrap();
                world
                    .create_character(a, name, vec!["character".to_string()])
                    .unwrap();
            }
            Self {
                e: Engine::new(Settings::default(), catalog(), world).unwrap(),
            }
        }

        fn connect(&mut self, id: u64) -> SessionId {
            self.e.handle(PortalReq::Connect(snapshot(id)), 0);
            SessionId(id)
        }

        fn say(&mut self, s: SessionId, line: &str, now: u64) {
            self.e.handle(
                PortalReq::Input {
                    session: s,
                    msg: Msg::text(line),
                },
                now,
            );
        }

        fn texts(&mut self, s: SessionId) -> Vec<String> {
            self.e
                .take_output()
                .into_iter()
                .filter_map(|r| match r {
                    ServerResp::Output { session, msg } if session == s && msg.name == "text" => {
                        Some(msg.joined_text())
                    }
                    _ => None,
                })
                .collect()
        }

        fn account(&self, name: &str) -> AccountId {
            self.e.world().account_by_name(name).unwrap().id
        }

        fn logged_in(&mut self, id: u64, name: &str) -> SessionId {
            let s = self.connect(id);
            self.say(s, &format!("connect {name}"), 0);
            self.e.take_output();
            s
        }
    }

    #[test]
    fn new_connection_gets_the_start_screen() {
        let mut t = T::new();
        let s = t.connect(1);
        assert_eq!(t.texts(s), vec!["Welcome. Type connect <name>."]);

        t.say(s, "l", 0);
        assert_eq!(t.texts(s), vec!["Welcome. Type connect <name>."]);
        t.say(s, "dance", 0);
        assert_eq!(t.texts(s), vec!["Huh?"]);
    }

    #[test]
    fn login_auto_puppets_and_changes_the_command_surface() {
        let mut t = T::new();
        let s = t.logged_in(1, "alice");
        let state = t.e.game().sessions.state(s, t.e.world());
        assert_eq!(state.account.as_deref(), Some("alice"));
        assert!(state.puppet.is_none());

        let acct = t.account("alice");
        let c = t.e.world().account(acct).unwrap().characters[0];
        t.e.world_mut().account_mut(acct).unwrap().last_puppet = Some(c);
        let s2 = t.logged_in(2, "alice");
        assert!(t.e.game().sessions.puppet_of(s2).is_some());
        assert!(!t.e.game().sessions.contains(s));

        t.say(s2, "look here", 0);
        assert_eq!(t.texts(s2), vec!["look:here"]);
    }

    #[test]
    fn locked_commands_are_invisible() {
        let mut t = T::new();
        let s = t.logged_in(1, "alice");
        let cmds = t.e.available_commands(s);
        assert!(cmds.contains(&"who".to_string()));
        assert!(!cmds.contains(&"shutdown".to_string()));
        assert!(!cmds.contains(&"shout".to_string()));

        t.say(s, "sh", 0);
        assert_eq!(t.texts(s), vec!["shutup:"]);
        t.say(s, "shou", 0);
        assert_eq!(t.texts(s), vec!["Huh?"]);
        t.say(s, "shutdown", 0);
        assert_eq!(t.texts(s), vec!["Huh?"]);

        let b = t.logged_in(2, "bob");
        t.say(b, "shout hi", 0);
        assert_eq!(t.texts(b), vec!["shout:hi"]);
        t.say(b, "shutdown", 0);
        assert_eq!(t.texts(b), vec!["Huh?"]);
    }

    #[test]
    fn ambiguity_lists_only_usable_candidates() {
        let mut t = T::new();
        let s = t.logged_in(1, "alice");
        let c = t.e.world().account_by_name("alice").unwrap().characters[0];
        t.e.game.puppet(&t.e.settings, &t.e.locks, s, c, &mut t.e.out).unwrap();
        t.e.take_output();

        t.say(s, "sh", 0);
        let out = t.texts(s);
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with("Which do you mean?"));
        assert!(out[0].contains("1-shake [character]"));
        assert!(out[0].contains("2-shove [character]"));
        assert!(!out[0].contains("shout"));
        assert!(!out[0].contains("shutdown"));
    }

    #[test]
    fn numbered_choice_counts_only_usable_commands() {
        let mut t = T::new();
        let s = t.logged_in(1, "alice");
        let c = t.e.world().account_by_name("alice").unwrap().characters[0];
        t.e.game.puppet(&t.e.settings, &t.e.locks, s, c, &mut t.e.out).unwrap();
        t.e.take_output();

        t.say(s, "sha", 0);
        assert_eq!(t.texts(s), vec!["shake:"]);
        t.say(s, "1-sha", 0);
        assert_eq!(t.texts(s), vec!["shake:"]);
        t.say(s, "2-sha", 0);
        assert_eq!(t.texts(s), vec!["Huh?"]);

        let b = t.logged_in(2, "bob");
        let c = t.e.world().account_by_name("bob").unwrap().characters[0];
        t.e.game.puppet(&t.e.settings, &t.e.locks, b, c, &mut t.e.out).unwrap();
        t.e.take_output();
        t.say(b, "1-sha", 0);
        assert_eq!(t.texts(b), vec!["shack:"]);
    }

    #[test]
    fn delay_holds_input_until_it_fires() {
        let mut t = T::new();
        let s = t.logged_in(1, "alice");
        let c = t.e.world().account_by_name("alice").unwrap().characters[0];
        t.e.game.puppet(&t.e.settings, &t.e.locks, s, c, &mut t.e.out).unwrap();
        t.e.take_output();

        t.say(s, "wait", 1_000);
        assert_eq!(t.texts(s), vec!["waiting"]);
        assert_eq!(t.e.next_due_ms(), Some(1_500));

        t.say(s, "look", 1_100);
        assert!(t.texts(s).is_empty());

        t.e.run_due(1_499);
        assert!(t.texts(s).is_empty());
        t.e.run_due(1_500);
        assert_eq!(t.texts(s), vec!["done waiting", "post", "look:"]);
        assert_eq!(t.e.next_due_ms(), None);
    }

    #[test]
    fn input_queue_is_bounded() {
        let mut t = T::new();
        t.e.settings.max_queued_inputs = 2;
        let s = t.logged_in(1, "alice");
        let c = t.e.world().account_by_name("alice").unwrap().characters[0];
        t.e.game.puppet(&t.e.settings, &t.e.locks, s, c, &mut t.e.out).unwrap();
        t.say(s, "wait", 0);
        t.e.take_output();

        for line in ["say a", "say b", "say c"] {
            t.say(s, line, 10);
        }
        assert_eq!(t.texts(s), vec!["You are busy. That input was dropped."]);
        t.e.run_due(500);
        assert_eq!(t.texts(s), vec!["done waiting", "post", "say:a", "say:b"]);
    }

    #[test]
    fn prompt_takes_the_next_line() {
        let mut t = T::new();
        let s = t.logged_in(1, "alice");
        let c = t.e.world().account_by_name("alice").unwrap().characters[0];
        t.e.game.puppet(&t.e.settings, &t.e.locks, s, c, &mut t.e.out).unwrap();
        t.e.take_output();

        t.say(s, "quit", 0);
        let out = t.e.take_output();
        assert!(out.iter().any(|r| matches!(
            r,
            ServerResp::Output { msg, .. } if msg.name == "prompt" && msg.joined_text() == "Really?"
        )));
        t.say(s, "yes", 0);
        assert_eq!(t.texts(s), vec!["confirmed"]);
        t.say(s, "look", 0);
        assert_eq!(t.texts(s), vec!["look:"]);
    }

    #[test]
    fn disconnect_and_reload_cancel_continuations() {
        let mut t = T::new();
        let s = t.logged_in(1, "alice");
        let c = t.e.world().account_by_name("alice").unwrap().characters[0];
        t.e.game.puppet(&t.e.settings, &t.e.locks, s, c, &mut t.e.out).unwrap();
        t.say(s, "wait", 0);
        t.e.handle(PortalReq::Disconnect { session: s }, 10);
        t.e.take_output();
        t.e.run_due(10_000);
        assert!(t.e.take_output().is_empty());

        let s = t.logged_in(2, "alice");
        t.e.game.puppet(&t.e.settings, &t.e.locks, s, c, &mut t.e.out).unwrap();
        t.say(s, "wait", 0);
        t.e.take_output();
        t.e.reload(catalog());
        assert_eq!(
            t.texts(s),
            vec!["The server reloaded; your unfinished command was cancelled."]
        );
        t.e.run_due(10_000);
        assert!(t.e.take_output().is_empty());
    }

    #[test]
    fn failures_are_summarized_and_interrupts_are_silent() {
        let mut t = T::new();
        let s = t.logged_in(1, "alice");
        let c = t.e.world().account_by_name("alice").unwrap().characters[0];
        t.e.game.puppet(&t.e.settings, &t.e.locks, s, c, &mut t.e.out).unwrap();
        t.e.take_output();

        t.say(s, "boom", 0);
        assert_eq!(
            t.texts(s),
            vec!["Something went wrong running that command. It has been logged."]
        );
        t.say(s, "fizzle", 0);
        assert!(t.texts(s).is_empty());
        t.say(s, "look", 0);
        assert_eq!(t.texts(s), vec!["look:"]);
    }

    #[test]
    fn session_survives_a_server_restart() {
        let mut t = T::new();
        let s = t.logged_in(1, "alice");
        let c = t.e.world().account_by_name("alice").unwrap().characters[0];
        t.e.game.puppet(&t.e.settings, &t.e.locks, s, c, &mut t.e.out).unwrap();
        t.say(s, "wait", 0);
        t.e.handle(
            PortalReq::Input {
                session: s,
                msg: Msg::new("client_options").with_kwarg("screenwidth", 120),
            },
            0,
        );
        let before_caps = t.e.game().sessions.get(s).unwrap().caps.clone();
        let before_state = t.e.game().sessions.state(s, t.e.world());
        assert_eq!(before_caps.screen_width, 120);

        // New process, same world. The portal replays what it knows.
        let saved = serde_json::to_string(t.e.world()).unwrap();
        let world: World = serde_json::from_str(&saved).unwrap();
        let mut e2 = Engine::new(Settings::default(), catalog(), world).unwrap();
        let mut snap = snapshot(1);
        snap.caps = before_caps.clone();
        snap.state = before_state.clone();
        e2.handle(PortalReq::SyncAll(vec![snap]), 0);

        assert_eq!(e2.game().sessions.get(s).unwrap().caps, before_caps);
        assert_eq!(e2.game().sessions.state(s, e2.world()), before_state);
        assert!(
            e2.take_output()
                .iter()
                .any(|r| matches!(r, ServerResp::State { session, .. } if *session == s))
        );
        e2.run_due(u64::MAX);
        assert!(e2.take_output().is_empty());
        assert_eq!(e2.next_due_ms(), None);
    }

    #[test]
    fn sync_all_drops_sessions_the_portal_lost() {
        let mut t = T::new();
        let a = t.connect(1);
        let b = t.connect(2);
        t.e.handle(PortalReq::SyncAll(vec![snapshot(2)]), 0);
        assert!(!t.e.game().sessions.contains(a));
        assert!(t.e.game().sessions.contains(b));
        assert_eq!(t.e.game().sessions.state(b, t.e.world()), SessionState::default());
    }

    #[test]
    fn surroundings_and_channels_join_the_merge() {
        let mut t = T::new();
        let mut cat = catalog();
        cat.register(CmdSet::new("button").with(Stub::new("push", &[])));
        cat.register(
            CmdSet::new("busy")
                .priority(50)
                .policy(MergePolicy::Union)
                .no_objs()
                .no_channels(),
        );
        t.e.reload(cat);

        let s = t.logged_in(1, "alice");
        let c = t.e.world().account_by_name("alice").unwrap().characters[0];
        t.e.game.puppet(&t.e.settings, &t.e.locks, s, c, &mut t.e.out).unwrap();
        let room = t.e.world().start_room.unwrap();
        let button = t.e.world_mut().create_entity("button", EntityKind::Object, Some(room));
        t.e.world_mut().entity_mut(button).unwrap().cmdsets = vec!["button".to_string()];
        let acct = t.account("alice");
        t.e.world_mut()
            .channels
            .create("Public", &["pub"], "", LockHandler::from_storage("send:all()"));
        t.e.world_mut().channels.subscribe("public", acct);
        t.e.take_output();

        t.say(s, "push", 0);
        assert_eq!(t.texts(s), vec!["push:"]);
        t.say(s, "pub hello all", 0);
        assert_eq!(t.texts(s), vec!["[Public] alice: hello all"]);
        t.say(s, "pub", 0);
        assert_eq!(t.texts(s), vec!["Say what?"]);

        // A call lock hides the object's commands.
        t.e.world_mut()
            .entity_mut(button)
            .unwrap()
            .locks
            .add("call:false()")
            .unwrap();
        t.say(s, "push", 0);
        assert_eq!(t.texts(s), vec!["Huh?"]);

        t.e.world_mut().entity_mut(c).unwrap().cmdsets.push("busy".to_string());
        t.e.world_mut().entity_mut(button).unwrap().locks = LockHandler::new();
        t.say(s, "push", 0);
        assert_eq!(t.texts(s), vec!["Huh?"]);
        t.say(s, "pub hi", 0);
        assert_eq!(t.texts(s), vec!["Huh?"]);
    }

    #[test]
    fn hooks_can_be_overridden_by_any_set() {
        let mut t = T::new();
        let mut cat = catalog();
        cat.register(CmdSet::new("system").with(Stub::new(CMD_NOMATCH, &[])));
        t.e.reload(cat);
        let s = t.connect(1);
        t.e.take_output();
        t.say(s, "xyzzy", 0);
        assert_eq!(t.texts(s), vec![format!("{CMD_NOMATCH}:xyzzy")]);
    }

    #[test]
    fn echo_and_unknown_inputcommands() {
        let mut t = T::new();
        let s = t.connect(1);
        t.e.take_output();
        t.e.handle(
            PortalReq::Input {
                session: s,
                msg: Msg::new("echo").with_arg("ping"),
            },
            0,
        );
        assert_eq!(t.texts(s), vec!["Echo returns: ping"]);
        t.e.handle(
            PortalReq::Input {
                session: s,
                msg: Msg::new("gmcp.core.hello"),
            },
            0,
        );
        assert!(t.e.take_output().is_empty());

        t.e.handle(
            PortalReq::Input {
                session: s,
                msg: Msg::new("client_options").with_kwarg("ansi", true),
            },
            0,
        );
        let out = t.e.take_output();
        match out.as_slice() {
            [ServerResp::Output { msg, .. }] => {
                assert_eq!(msg.name, "client_options");
                assert_eq!(msg.kwargs.get("ansi"), Some(&serde_json::Value::Bool(true)));
            }
            other => panic!("{other:?}"),
        }
    }
}
