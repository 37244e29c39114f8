use std::time::Duration;

use mudcore::cmdset::CmdSet;
use mudcore::command::{ArgRule, CmdContext, CmdMeta, CmdResult, Command, Flow};
use mudcore::world::{EntityId, EntityKind};

pub fn cmdset(key: &str) -> CmdSet {
    CmdSet::new(key)
        .with(Look::new())
        .with(Say::new())
        .with(Meditate::new())
}

fn describe(cx: &CmdContext<'_>, target: EntityId, viewer: Option<EntityId>) -> Option<String> {
    let world = &cx.game.world;
    let t = world.entity(target)?;
    let mut out = t.key.clone();
    if !t.desc.is_empty() {
        out.push('\n');
        out.push_str(&t.desc);
    }
    if t.kind != EntityKind::Room {
        return Some(out);
    }

    let mut exits: Vec<&str> = Vec::new();
    let mut people: Vec<&str> = Vec::new();
    let mut things: Vec<&str> = Vec::new();
    for e in world.contents(target) {
        if Some(e.id) == viewer {
            continue;
        }
        match e.kind {
            EntityKind::Exit => exits.push(&e.key),
            EntityKind::Character => people.push(&e.key),
            EntityKind::Object | EntityKind::Room => things.push(&e.key),
        }
    }
    for (label, list) in [("Exits", exits), ("Characters", people), ("You see", things)] {
        if !list.is_empty() {
            out.push_str(&format!("\n{label}: {}", list.join(", ")));
        }
    }
    Some(out)
}

/// Show the caller's surroundings.
pub fn look_here(cx: &mut CmdContext<'_>) {
    let me = cx.caller.entity();
    let text = match cx.caller_location() {
        Some(room) => describe(cx, room, me),
        None => None,
    };
    cx.msg(text.unwrap_or_else(|| "You are nowhere.".to_string()));
}

pub struct Look {
    meta: CmdMeta,
}

impl Look {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new("look")
                .aliases(&["l", "ls"])
                .arg_rule(ArgRule::Spaced)
                .category("general")
                .help("look [thing]: look around, or at something here."),
        }
    }
}

impl Command for Look {
    fn meta(&self) -> &CmdMeta {
        &self.meta
    }

    fn func(&self, cx: &mut CmdContext<'_>) -> CmdResult {
        let name = cx.input.args.trim().to_string();
        if name.is_empty() {
            look_here(cx);
            return Ok(Flow::Done);
        }
        let me = cx.caller.entity();
        let found = cx.caller_location().and_then(|room| {
            if me.is_some_and(|m| cx.game.world.entity(m).is_some_and(|e| e.answers_to(&name))) {
                me
            } else {
                cx.game.world.find_in(room, &name).map(|e| e.id)
            }
        });
        let text = found.and_then(|id| describe(cx, id, me));
        cx.msg(text.unwrap_or_else(|| format!("You don't see '{name}' here.")));
        Ok(Flow::Done)
    }
}

pub struct Say {
    meta: CmdMeta,
}

impl Say {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new("say")
                .aliases(&["'", "\""])
                .category("comms")
                .help("say <message>: speak to everyone in the room."),
        }
    }
}

impl Command for Say {
    fn meta(&self) -> &CmdMeta {
        &self.meta
    }

    fn func(&self, cx: &mut CmdContext<'_>) -> CmdResult {
        let text = cx.input.args.trim().to_string();
        if text.is_empty() {
            cx.msg("Say what?");
            return Ok(Flow::Done);
        }
        let me = cx.caller.entity();
        let name = cx.caller_name();
        if let Some(room) = cx.caller_location() {
            cx.msg_location(room, &format!("{name} says, \"{text}\""), me);
        }
        cx.msg(format!("You say, \"{text}\""));
        Ok(Flow::Done)
    }
}

/// Sits still for a few seconds. Input typed meanwhile waits its turn.
pub struct Meditate {
    meta: CmdMeta,
}

impl Meditate {
    pub fn new() -> Self {
        Self {
            meta: CmdMeta::new("meditate")
                .aliases(&["med"])
                .arg_rule(ArgRule::NoArgs)
                .category("general")
                .help("meditate: rest for a moment."),
        }
    }
}

const MEDITATE_FOR: Duration = Duration::from_secs(3);

impl Command for Meditate {
    fn meta(&self) -> &CmdMeta {
        &self.meta
    }

    fn func(&self, cx: &mut CmdContext<'_>) -> CmdResult {
        cx.msg("You sit down and close your eyes.");
        Ok(Flow::delay(MEDITATE_FOR, |cx: &mut CmdContext<'_>| {
            cx.msg("You feel refreshed.");
            Ok(Flow::Done)
        }))
    }

    fn at_post_cmd(&self, cx: &mut CmdContext<'_>) -> CmdResult {
        cx.msg("You stand up.");
        Ok(Flow::Done)
    }
}

#[cfg(test)]
mod tests {
    use mudcore::world::EntityKind;

    use crate::commands::tests::Harness;

    fn two_in_limbo() -> Harness {
        let mut h = Harness::new(&[("alice", &["Player"][..]), ("bob", &["Player"][..])]);
        let w = h.e.world_mut();
        let limbo = w.start_room.unwrap();
        let rock = w.create_entity("rock", EntityKind::Object, Some(limbo));
        w.entity_mut(rock).unwrap().desc = "Grey and heavy.".into();
        w.create_entity("north", EntityKind::Exit, Some(limbo));
        h
    }

    #[test]
    fn look_describes_the_room_and_things_in_it() {
        let mut h = two_in_limbo();
        let a = h.login(1, "alice");
        h.line(a, "ic alice", 0);
        h.out(a);

        h.line(a, "look", 0);
        let out = h.out(a);
        assert!(out.starts_with("Limbo\nA featureless grey expanse."));
        assert!(out.contains("\nExits: north"));
        assert!(out.contains("\nCharacters: bob"));
        assert!(out.contains("\nYou see: rock"));

        h.line(a, "l rock", 0);
        assert_eq!(h.out(a), "rock\nGrey and heavy.");
        h.line(a, "l unicorn", 0);
        assert_eq!(h.out(a), "You don't see 'unicorn' here.");
        h.line(a, "l alice", 0);
        assert_eq!(h.out(a), "alice");
    }

    #[test]
    fn say_reaches_the_room() {
        let mut h = two_in_limbo();
        let a = h.login(1, "alice");
        let b = h.login(2, "bob");
        h.line(a, "ic alice", 0);
        h.line(b, "ic bob", 0);
        h.all();

        h.line(a, "say hello there", 0);
        let out = h.all();
        let text_for = |s: mudproto::session::SessionId| {
            out.iter()
                .filter_map(|r| match r {
                    mudproto::bridge::ServerResp::Output { session, msg } if *session == s => {
                        Some(msg.joined_text())
                    }
                    _ => None,
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(text_for(a), vec!["You say, \"hello there\""]);
        assert_eq!(text_for(b), vec!["alice says, \"hello there\""]);

        h.line(a, "'", 0);
        assert_eq!(h.out(a), "Say what?");
    }

    #[test]
    fn meditate_holds_input_until_done() {
        let mut h = two_in_limbo();
        let a = h.login(1, "alice");
        h.line(a, "ic alice", 0);
        h.out(a);

        h.line(a, "med", 1_000);
        assert_eq!(h.out(a), "You sit down and close your eyes.");
        assert_eq!(h.e.next_due_ms(), Some(4_000));

        h.line(a, "say done", 2_000);
        assert_eq!(h.out(a), "");

        h.e.run_due(3_999);
        assert_eq!(h.out(a), "");
        h.e.run_due(4_000);
        assert_eq!(
            h.out(a),
            "You feel refreshed.\nYou stand up.\nYou say, \"done\""
        );
        assert_eq!(h.e.next_due_ms(), None);
    }
}
