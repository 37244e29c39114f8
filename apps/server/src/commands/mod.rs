//! The command sets this server ships with.
//!
//! - `unloggedin`: the start screen plus `connect`, `create`, `quit`, `help`.
//! - `account`: out-of-character commands, available whenever logged in.
//! - `character`: in-character commands, carried by every character.

pub mod account;
pub mod character;
pub mod unloggedin;

use mudcore::cmdset::{CmdSet, CmdSetCatalog};
use mudcore::command::{CmdContext, CmdMeta, CmdResult, Command, Flow};
use mudcore::settings::Settings;

pub fn catalog(settings: &Settings) -> CmdSetCatalog {
    let mut c = CmdSetCatalog::new();
    c.register(unloggedin::cmdset(&settings.unloggedin_cmdset));
    c.register(CmdSet::new(&settings.session_cmdset));
    c.register(account::cmdset(&settings.account_cmdset));
    c.register(character::cmdset(&settings.character_cmdset));
    for key in &settings.system_cmdsets {
        c.register(CmdSet::new(key));
    }
    c
}

/// Lists what the caller can use, or shows one command's help.
pub struct Help {
    meta: CmdMeta,
}

impl Help {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new("help")
                .aliases(&["?"])
                .category("general")
                .help("help [command]: list commands, or explain one."),
        }
    }
}

impl Command for Help {
    fn meta(&self) -> &CmdMeta {
        &self.meta
    }

    fn func(&self, cx: &mut CmdContext<'_>) -> CmdResult {
        let visible = cx.visible_commands();
        let topic = cx.input.args.trim().to_string();

        if topic.is_empty() {
            let mut out = String::from("Commands:");
            let mut category = "";
            for cmd in &visible {
                let m = cmd.meta();
                if m.help_category != category {
                    category = &m.help_category;
                    out.push_str(&format!("\n  {category}:"));
                }
                out.push_str(&format!(" {}", m.key));
            }
            out.push_str("\nType help <command> for more.");
            cx.msg(out);
            return Ok(Flow::Done);
        }

        match visible.iter().find(|c| c.meta().has_name(&topic)) {
            Some(cmd) => {
                let m = cmd.meta();
                let mut out = m.key.clone();
                if !m.aliases.is_empty() {
                    out.push_str(&format!(" (aliases: {})", m.aliases.join(", ")));
                }
                out.push('\n');
                out.push_str(if m.help.is_empty() {
                    "No help text."
                } else {
                    &m.help
                });
                cx.msg(out);
            }
            None => cx.msg(format!("No help found for '{topic}'.")),
        }
        Ok(Flow::Done)
    }
}

/// `Some(first word, rest)` of trimmed args.
pub fn split_word(args: &str) -> Option<(&str, &str)> {
    let args = args.trim();
    if args.is_empty() {
        return None;
    }
    Some(match args.split_once(char::is_whitespace) {
        Some((w, rest)) => (w, rest.trim()),
        None => (args, ""),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use mudcore::engine::Engine;
    use mudcore::world::World;
    use mudproto::bridge::{PortalReq, ServerResp};
    use mudproto::msg::Msg;
    use mudproto::session::{Capabilities, SessionId, SessionSnapshot, TransportKind};

    use super::*;
    use crate::auth::cheap_hash;
    use crate::store::bootstrap;

    /// An engine over a bootstrapped world with these accounts, each with
    /// password `secret-pw` and a same-named character.
    pub struct Harness {
        pub e: Engine,
    }

    impl Harness {
        pub fn new(accounts: &[(&str, &[&str])]) -> Self {
            Self::with_settings(Settings::default(), accounts)
        }

        pub fn with_settings(settings: Settings, accounts: &[(&str, &[&str])]) -> Self {
            let mut world = World::new();
            bootstrap(&mut world);
            for (name, perms) in accounts {
                let a = world
                    .create_account(
                        name,
                        cheap_hash("secret-pw"),
                        perms,
                        vec![settings.account_cmdset.clone()],
                        0,
                    )
                    .unwrap();
                world
                    .create_character(a, name, vec![settings.character_cmdset.clone()])
                    .unwrap();
            }
            let cat = catalog(&settings);
            Self {
                e: Engine::new(settings, cat, world).unwrap(),
            }
        }

        pub fn connect(&mut self, id: u64) -> SessionId {
            let snap = SessionSnapshot {
                session: SessionId(id),
                transport: TransportKind::Telnet,
                address: "127.0.0.1".into(),
                connected_unix: 0,
                caps: Capabilities::default(),
                state: Default::default(),
            };
            self.e.handle(PortalReq::Connect(snap), 0);
            SessionId(id)
        }

        pub fn login(&mut self, id: u64, name: &str) -> SessionId {
            let s = self.connect(id);
            self.line(s, &format!("connect {name} secret-pw"), 0);
            self.e.take_output();
            s
        }

        pub fn line(&mut self, s: SessionId, line: &str, now: u64) {
            self.e.handle(
                PortalReq::Input {
                    session: s,
                    msg: Msg::text(line),
                },
                now,
            );
        }

        /// Everything sent to `s` since the last call, prompts included.
        pub fn out(&mut self, s: SessionId) -> String {
            self.e
                .take_output()
                .into_iter()
                .filter_map(|r| match r {
                    ServerResp::Output { session, msg } if session == s => Some(msg.joined_text()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n")
        }

        pub fn all(&mut self) -> Vec<ServerResp> {
            self.e.take_output()
        }
    }

    #[test]
    fn help_lists_only_usable_commands() {
        let mut h = Harness::new(&[("alice", &["Player"][..])]);
        let s = h.connect(1);
        h.out(s);
        h.line(s, "help", 0);
        let text = h.out(s);
        assert!(text.contains("connect"));
        assert!(text.contains("create"));
        assert!(!text.contains("charcreate"));

        h.line(s, "help xyzzy", 0);
        assert!(h.out(s).contains("No help found"));
        h.line(s, "help connect", 0);
        assert!(h.out(s).starts_with("connect (aliases: conn, con)"));
    }

    #[test]
    fn split_word_trims() {
        assert_eq!(split_word("  join   Public "), Some(("join", "Public")));
        assert_eq!(split_word("list"), Some(("list", "")));
        assert_eq!(split_word("   "), None);
    }
}
