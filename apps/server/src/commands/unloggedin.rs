use anyhow::Context;
use chrono::Utc;
use mudcore::cmdset::CmdSet;
use mudcore::command::{ArgRule, CMD_LOGINSTART, CmdContext, CmdMeta, CmdResult, Command, Flow};
use mudcore::error::IdentityError;
use mudcore::settings::MultiSession;
use tracing::{debug, info};
use zeroize::Zeroize;

use super::{Help, account, split_word};
use crate::auth;
use crate::store::PUBLIC_CHANNEL;

const BANNER: &str = "\
==============================================================
 Welcome!

 If you have an existing account, connect to it by typing:
      connect <username> <password>
 If you need to create an account, type (without the <>'s):
      create <username> <password>

 Enter help for more info. look will re-show this screen.
==============================================================";

pub fn cmdset(key: &str) -> CmdSet {
    CmdSet::new(key)
        .with(StartScreen::new())
        .with(Connect::new())
        .with(Create::new())
        .with(Quit::new())
        .with(Help::new())
}

/// Shown on every new connection, and on `look` before logging in.
pub struct StartScreen {
    meta: CmdMeta,
}

impl StartScreen {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new(CMD_LOGINSTART).aliases(&["look", "l"]),
        }
    }
}

impl Command for StartScreen {
    fn meta(&self) -> &CmdMeta {
        &self.meta
    }

    fn func(&self, cx: &mut CmdContext<'_>) -> CmdResult {
        cx.msg(BANNER);
        Ok(Flow::Done)
    }
}

/// `name password`, with the password wiped from the input afterwards.
fn take_credentials(cx: &mut CmdContext<'_>) -> Option<(String, String)> {
    let creds = split_word(&cx.input.args)
        .filter(|(_, pw)| !pw.is_empty())
        .map(|(n, pw)| (n.to_string(), pw.to_string()));
    cx.input.args.zeroize();
    cx.input.lhs.zeroize();
    creds
}

pub struct Connect {
    meta: CmdMeta,
}

impl Connect {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new("connect")
                .aliases(&["conn", "con"])
                .arg_rule(ArgRule::Spaced)
                .redact_args()
                .help("connect <name> <password>: log in to an existing account."),
        }
    }
}

impl Command for Connect {
    fn meta(&self) -> &CmdMeta {
        &self.meta
    }

    fn func(&self, cx: &mut CmdContext<'_>) -> CmdResult {
        let Some((name, mut pw)) = take_credentials(cx) else {
            cx.msg("Usage: connect <name> <password>");
            return Ok(Flow::Done);
        };

        let found = cx
            .game
            .world
            .account_by_name(&name)
            .map(|a| (a.id, a.name.clone(), auth::verify_password(&a.password_hash, &pw)));
        pw.zeroize();

        let Some((acct, name, true)) = found else {
            info!(session = %cx.session, name = %name, "failed login");
            cx.msg("Incorrect login information given.");
            return Ok(Flow::Done);
        };

        cx.login(acct).context("login")?;
        cx.msg(format!("Welcome, {name}!"));
        if cx.caller.entity().is_some() {
            super::character::look_here(cx);
        } else {
            account::ooc_look(cx);
        }
        Ok(Flow::Done)
    }
}

pub struct Create {
    meta: CmdMeta,
}

impl Create {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new("create")
                .aliases(&["cre", "cr"])
                .arg_rule(ArgRule::Spaced)
                .redact_args()
                .help("create <name> <password>: make a new account."),
        }
    }
}

impl Command for Create {
    fn meta(&self) -> &CmdMeta {
        &self.meta
    }

    fn func(&self, cx: &mut CmdContext<'_>) -> CmdResult {
        let Some((name, mut pw)) = take_credentials(cx) else {
            cx.msg("Usage: create <name> <password>");
            return Ok(Flow::Done);
        };
        if pw.chars().count() < auth::MIN_PASSWORD_LEN {
            pw.zeroize();
            cx.msg(format!(
                "Passwords must be at least {} characters long.",
                auth::MIN_PASSWORD_LEN
            ));
            return Ok(Flow::Done);
        }
        let hash = auth::hash_password(&pw);
        pw.zeroize();
        let hash = hash?;

        // The very first account runs the place.
        let first = cx.game.world.accounts().next().is_none();
        let perms: &[&str] = if first { &["Developer"] } else { &["Player"] };
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
        let created = cx.game.world.create_account(
            &name,
            hash,
            perms,
            vec![cx.settings.account_cmdset.clone()],
            now,
        );
        let acct = match created {
            Ok(a) => a,
            Err(IdentityError::NameTaken(_)) => {
                cx.msg("Sorry, there is already an account with that name.");
                return Ok(Flow::Done);
            }
            Err(IdentityError::BadName(_)) => {
                cx.msg("Names are 2-24 letters, digits, - or _, and start with a letter.");
                return Ok(Flow::Done);
            }
            Err(e) => return Err(anyhow::Error::from(e).into()),
        };
        if first {
            if let Some(a) = cx.game.world.account_mut(acct) {
                a.superuser = true;
            }
        }
        cx.game.world.channels.subscribe(PUBLIC_CHANNEL, acct);

        if matches!(
            cx.settings.multisession,
            MultiSession::Single | MultiSession::SharedPuppet
        ) {
            let sets = vec![cx.settings.character_cmdset.clone()];
            if let Err(e) = cx.game.world.create_character(acct, &name, sets) {
                debug!(account = acct.0, err = %e, "no starting character");
            }
        }
        info!(session = %cx.session, account = acct.0, name = %name, superuser = first, "account created");
        cx.msg(format!(
            "A new account '{name}' was created. Welcome!\nYou can now log in with: connect {name} <password>"
        ));
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
                .aliases(&["qu", "q"])
                .arg_rule(ArgRule::Spaced)
                .help("quit: disconnect."),
        }
    }
}

impl Command for Quit {
    fn meta(&self) -> &CmdMeta {
        &self.meta
    }

    fn func(&self, cx: &mut CmdContext<'_>) -> CmdResult {
        cx.disconnect("Good bye! Disconnecting.");
        Ok(Flow::Done)
    }
}
