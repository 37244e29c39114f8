use anyhow::anyhow;
use mudcore::cmdset::CmdSet;
use mudcore::command::{ArgRule, CmdContext, CmdMeta, CmdResult, Command, Flow};
use mudcore::error::IdentityError;
use mudcore::lock::{CheckOpts, LockHandler, Target};
use mudcore::world::{EntityId, EntityKind};
use tracing::info;

use super::{Help, split_word};

pub fn cmdset(key: &str) -> CmdSet {
    CmdSet::new(key)
        .priority(-10)
        .with(OocLook::new())
        .with(Ic::new())
        .with(Ooc::new())
        .with(CharCreate::new())
        .with(Quell::new(true))
        .with(Quell::new(false))
        .with(Who::new())
        .with(Channels::new())
        .with(Quit::new())
        .with(Help::new())
}

/// Account summary: characters and what to do with them.
pub fn ooc_look(cx: &mut CmdContext<'_>) {
    let Some(acct) = cx.caller.account else {
        return;
    };
    let Some(a) = cx.game.world.account(acct) else {
        return;
    };
    let mut out = format!("Account {}", a.name);
    if a.superuser {
        out.push_str(if a.quelled {
            " (superuser, quelled)"
        } else {
            " (superuser)"
        });
    }
    if a.characters.is_empty() {
        out.push_str("\nYou have no characters yet.");
    } else {
        out.push_str("\nCharacters:");
        for id in &a.characters {
            let Some(e) = cx.game.world.entity(*id) else {
                continue;
            };
            let played = cx.game.sessions.puppets.is_puppeted(*id);
            out.push_str(&format!(
                "\n  {}{}",
                e.key,
                if played { " (played)" } else { "" }
            ));
        }
    }
    out.push_str("\nUse ic <character> to play, charcreate <name> to make another.");
    cx.msg(out);
}

pub struct OocLook {
    meta: CmdMeta,
}

impl OocLook {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new("look")
                .aliases(&["l", "ls"])
                .category("general")
                .help("look: show your account and characters."),
        }
    }
}

impl Command for OocLook {
    fn meta(&self) -> &CmdMeta {
        &self.meta
    }

    fn func(&self, cx: &mut CmdContext<'_>) -> CmdResult {
        ooc_look(cx);
        Ok(Flow::Done)
    }
}

pub struct Ic {
    meta: CmdMeta,
}

impl Ic {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new("ic")
                .aliases(&["puppet"])
                .arg_rule(ArgRule::Spaced)
                .category("general")
                .help("ic [character]: play a character. Without a name, the last one played."),
        }
    }
}

impl Command for Ic {
    fn meta(&self) -> &CmdMeta {
        &self.meta
    }

    fn func(&self, cx: &mut CmdContext<'_>) -> CmdResult {
        let Some(acct) = cx.caller.account else {
            return Err(anyhow!("ic without an account").into());
        };
        let name = cx.input.args.trim().to_string();
        let target: Option<EntityId> = if name.is_empty() {
            cx.game.world.account(acct).and_then(|a| a.last_puppet)
        } else {
            let own = cx.game.world.account(acct).and_then(|a| {
                a.characters.iter().copied().find(|id| {
                    cx.game.world.entity(*id).is_some_and(|e| e.answers_to(&name))
                })
            });
            // Staff may take over characters they don't own.
            own.or_else(|| {
                cx.game
                    .world
                    .entities()
                    .find(|e| e.kind == EntityKind::Character && e.answers_to(&name))
                    .map(|e| e.id)
            })
        };
        let Some(e) = target else {
            cx.msg(if name.is_empty() {
                "Usage: ic <character>".to_string()
            } else {
                format!("You have no character called '{name}'.")
            });
            return Ok(Flow::Done);
        };
        if cx.caller.entity() == Some(e) {
            cx.msg("You are already playing that character.");
            return Ok(Flow::Done);
        }
        let key = cx
            .game
            .world
            .entity(e)
            .map(|ent| ent.key.clone())
            .unwrap_or_default();

        match cx.puppet(e) {
            Ok(()) => {
                cx.msg(format!("You become {key}."));
                super::character::look_here(cx);
            }
            Err(IdentityError::InUse(_)) => {
                cx.msg(format!("{key} is already being played by someone else."));
            }
            Err(IdentityError::PuppetDenied(_)) => {
                cx.msg(format!("You cannot become {key}."));
            }
            Err(err) => return Err(anyhow::Error::from(err).into()),
        }
        Ok(Flow::Done)
    }
}

pub struct Ooc {
    meta: CmdMeta,
}

impl Ooc {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new("ooc")
                .aliases(&["unpuppet"])
                .arg_rule(ArgRule::NoArgs)
                .category("general")
                .help("ooc: stop playing your character."),
        }
    }
}

impl Command for Ooc {
    fn meta(&self) -> &CmdMeta {
        &self.meta
    }

    fn func(&self, cx: &mut CmdContext<'_>) -> CmdResult {
        if cx.caller.entity().is_none() {
            cx.msg("You are already out of character.");
            return Ok(Flow::Done);
        }
        let e = cx.unpuppet().map_err(anyhow::Error::from)?;
        let key = cx
            .game
            .world
            .entity(e)
            .map(|ent| ent.key.clone())
            .unwrap_or_default();
        cx.msg(format!("You stop playing {key}."));
        ooc_look(cx);
        Ok(Flow::Done)
    }
}

pub struct CharCreate {
    meta: CmdMeta,
}

impl CharCreate {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new("charcreate")
                .arg_rule(ArgRule::Spaced)
                .category("general")
                .help("charcreate <name>: make a new character for this account."),
        }
    }
}

impl Command for CharCreate {
    fn meta(&self) -> &CmdMeta {
        &self.meta
    }

    fn func(&self, cx: &mut CmdContext<'_>) -> CmdResult {
        let Some(acct) = cx.caller.account else {
            return Err(anyhow!("charcreate without an account").into());
        };
        let name = cx.input.args.trim().to_string();
        if name.is_empty() {
            cx.msg("Usage: charcreate <name>");
            return Ok(Flow::Done);
        }
        let have = cx
            .game
            .world
            .account(acct)
            .map_or(0, |a| a.characters.len());
        let max = cx.settings.max_characters_per_account;
        if have >= max {
            cx.msg(format!("You may only have {max} characters."));
            return Ok(Flow::Done);
        }
        let sets = vec![cx.settings.character_cmdset.clone()];
        match cx.game.world.create_character(acct, &name, sets) {
            Ok(id) => {
                info!(account = acct.0, character = %id, name = %name, "character created");
                cx.msg(format!("Created {name}. Use ic {name} to play."));
            }
            Err(IdentityError::NameTaken(_)) => {
                cx.msg(format!("There is already a character called {name}."));
            }
            Err(IdentityError::BadName(_)) => {
                cx.msg("Names are 2-24 letters, digits, - or _, and start with a letter.");
            }
            Err(e) => return Err(anyhow::Error::from(e).into()),
        }
        Ok(Flow::Done)
    }
}

/// `quell` drops to your character's permissions; `unquell` restores yours.
pub struct Quell {
    meta: CmdMeta,
    on: bool,
}

impl Quell {
    pub fn new(on: bool) -> Self {
        let meta = if on {
            CmdMeta::new("quell")
                .arg_rule(ArgRule::NoArgs)
                .help("quell: use your character's permissions instead of your account's.")
        } else {
            CmdMeta::new("unquell")
                .arg_rule(ArgRule::NoArgs)
                .help("unquell: use your account's permissions again.")
        };
        Self {
            meta: meta.category("general"),
            on,
        }
    }
}

impl Command for Quell {
    fn meta(&self) -> &CmdMeta {
        &self.meta
    }

    fn func(&self, cx: &mut CmdContext<'_>) -> CmdResult {
        let Some(acct) = cx.caller.account else {
            return Err(anyhow!("quell without an account").into());
        };
        let Some(a) = cx.game.world.account_mut(acct) else {
            return Err(anyhow!("no account {acct:?}").into());
        };
        if a.quelled == self.on {
            cx.msg(if self.on {
                "You are already quelled."
            } else {
                "You are not quelled."
            });
            return Ok(Flow::Done);
        }
        a.quelled = self.on;
        info!(account = acct.0, quelled = self.on, "quell changed");
        cx.msg(if self.on {
            "Your account permissions are now quelled."
        } else {
            "Your account permissions are restored."
        });
        Ok(Flow::Done)
    }
}

pub struct Who {
    meta: CmdMeta,
}

impl Who {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new("who")
                .aliases(&["doing"])
                .arg_rule(ArgRule::NoArgs)
                .category("general")
                .help("who: list everyone who is logged in."),
        }
    }
}

impl Command for Who {
    fn meta(&self) -> &CmdMeta {
        &self.meta
    }

    fn func(&self, cx: &mut CmdContext<'_>) -> CmdResult {
        let staff = cx.check_lock(
            &Target::None,
            &LockHandler::from_storage("view:perm(Admin)"),
            "view",
            CheckOpts::default(),
        );
        let mut rows: Vec<String> = Vec::new();
        for s in cx.game.sessions.iter() {
            let Some(a) = s.account.and_then(|a| cx.game.world.account(a)) else {
                continue;
            };
            let puppet = cx
                .game
                .sessions
                .puppet_of(s.id)
                .and_then(|e| cx.game.world.entity(e))
                .map(|e| e.key.clone());
            let mut row = match puppet {
                Some(p) => format!("  {} as {p}", a.name),
                None => format!("  {} (ooc)", a.name),
            };
            if staff {
                row.push_str(&format!(" [{} {}]", s.transport.as_str(), s.address));
            }
            rows.push(row);
        }
        rows.sort();
        let n = rows.len();
        let mut out = String::from("Who is online:");
        for r in rows {
            out.push('\n');
            out.push_str(&r);
        }
        out.push_str(&format!(
            "\n{n} session{} logged in.",
            if n == 1 { "" } else { "s" }
        ));
        cx.msg(out);
        Ok(Flow::Done)
    }
}

pub struct Channels {
    meta: CmdMeta,
}

impl Channels {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new("channels")
                .aliases(&["chan"])
                .arg_rule(ArgRule::Spaced)
                .category("comms")
                .help(
                    "channels: list channels.\nchannels join <channel>\nchannels leave <channel>\nTalk on a channel you are in with: <channel> <message>",
                ),
        }
    }
}

impl Command for Channels {
    fn meta(&self) -> &CmdMeta {
        &self.meta
    }

    fn func(&self, cx: &mut CmdContext<'_>) -> CmdResult {
        let Some(acct) = cx.caller.account else {
            return Err(anyhow!("channels without an account").into());
        };
        let args = cx.input.args.clone();
        match split_word(&args) {
            None | Some(("list", _)) => {
                let mut out = String::from("Channels:");
                for ch in cx.game.world.channels.iter() {
                    let mark = if ch.subscribers.contains(&acct) { "*" } else { " " };
                    let aliases = if ch.aliases.is_empty() {
                        String::new()
                    } else {
                        format!(" ({})", ch.aliases.join(", "))
                    };
                    out.push_str(&format!("\n {mark} {}{aliases}: {}", ch.key, ch.desc));
                }
                out.push_str("\n* = joined");
                cx.msg(out);
            }
            Some(("join", name)) if !name.is_empty() => {
                let Some(ch) = cx.game.world.channels.get(name) else {
                    cx.msg(format!("No channel called '{name}'."));
                    return Ok(Flow::Done);
                };
                let (key, locks) = (ch.key.clone(), ch.locks.clone());
                if ch.subscribers.contains(&acct) {
                    cx.msg(format!("You are already on {key}."));
                    return Ok(Flow::Done);
                }
                if !cx.check_lock(&Target::Channel(key.clone()), &locks, "listen", CheckOpts::default()) {
                    cx.msg(format!("You are not allowed to join {key}."));
                    return Ok(Flow::Done);
                }
                cx.game.world.channels.subscribe(&key, acct);
                cx.game.world.mark_dirty();
                cx.msg(format!("You join {key}."));
            }
            Some(("leave", name)) if !name.is_empty() => {
                let key = cx.game.world.channels.get(name).map(|c| c.key.clone());
                match key {
                    Some(key) if cx.game.world.channels.unsubscribe(&key, acct) => {
                        cx.game.world.mark_dirty();
                        cx.msg(format!("You leave {key}."));
                    }
                    Some(key) => cx.msg(format!("You are not on {key}.")),
                    None => cx.msg(format!("No channel called '{name}'.")),
                }
            }
            Some(_) => cx.msg("Usage: channels [list | join <channel> | leave <channel>]"),
        }
        Ok(Flow::Done)
    }
}

pub struct Quit {
    meta: CmdMeta,
}

impl Quit {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new("quit")
                .aliases(&["q"])
                .arg_rule(ArgRule::Spaced)
                .category("general")
                .help("quit: disconnect, after asking."),
        }
    }
}

impl Command for Quit {
    fn meta(&self) -> &CmdMeta {
        &self.meta
    }

    fn func(&self, _cx: &mut CmdContext<'_>) -> CmdResult {
        Ok(Flow::prompt("Really quit? [y/N] ", |cx, answer| {
            if matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
                cx.disconnect("Good bye! Disconnecting.");
            } else {
                cx.msg("Ok.");
            }
            Ok(Flow::Done)
        }))
    }
}
