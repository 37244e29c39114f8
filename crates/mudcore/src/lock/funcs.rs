//! Lock function registry and the built-in function modules.
//!
//! Functions are registered by name; a module is just a named table of
//! functions. The engine loads the modules listed in `Settings` at startup
//! and callers may register more afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{FuncError, LockError};
use crate::identity::Caller;
use crate::lock::{LockContext, Target};
use crate::world::EntityId;

pub trait LockFunc: Send + Sync {
    fn call(&self, cx: &LockContext<'_>, args: &[String]) -> Result<bool, FuncError>;
}

impl<F> LockFunc for F
where
    F: Fn(&LockContext<'_>, &[String]) -> Result<bool, FuncError> + Send + Sync,
{
    fn call(&self, cx: &LockContext<'_>, args: &[String]) -> Result<bool, FuncError> {
        self(cx, args)
    }
}

pub type LockFn = fn(&LockContext<'_>, &[String]) -> Result<bool, FuncError>;

#[derive(Clone, Default)]
pub struct LockFuncRegistry {
    funcs: HashMap<String, Arc<dyn LockFunc>>,
}

impl std::fmt::Debug for LockFuncRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

impl LockFuncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_modules<S: AsRef<str>>(modules: &[S]) -> Result<Self, LockError> {
        let mut r = Self::new();
        for m in modules {
            r.load_module(m.as_ref())?;
        }
        Ok(r)
    }

    pub fn load_module(&mut self, name: &str) -> Result<(), LockError> {
        let table = module(name).ok_or_else(|| LockError::UnknownModule(name.to_string()))?;
        for (fname, f) in table {
            self.register(fname, *f);
        }
        Ok(())
    }

    /// Later registrations replace earlier ones with the same name.
    pub fn register(&mut self, name: &str, f: impl LockFunc + 'static) {
        self.funcs.insert(name.to_ascii_lowercase(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn LockFunc>> {
        self.funcs.get(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.funcs.keys().map(String::as_str).collect();
        v.sort_unstable();
        v
    }
}

pub fn module(name: &str) -> Option<&'static [(&'static str, LockFn)]> {
    match name.trim().to_ascii_lowercase().as_str() {
        "core" => Some(CORE),
        "world" => Some(WORLD),
        _ => None,
    }
}

const CORE: &[(&str, LockFn)] = &[
    ("true", always),
    ("all", always),
    ("false", never),
    ("none", never),
    ("perm", perm),
    ("perm_above", perm_above),
    ("pperm", pperm),
    ("id", id),
    ("dbref", id),
    ("pid", pid),
    ("self", is_self),
    ("superuser", superuser),
    ("is_ooc", is_ooc),
];

const WORLD: &[(&str, LockFn)] = &[
    ("holds", holds),
    ("inside", inside),
    ("has_account", has_account),
];

fn one_arg<'a>(func: &'static str, args: &'a [String]) -> Result<&'a str, FuncError> {
    match args {
        [a] => Ok(a.trim()),
        _ => Err(FuncError::new(
            func,
            format!("expected 1 argument, got {}", args.len()),
        )),
    }
}

fn parse_id(func: &'static str, s: &str) -> Result<u64, FuncError> {
    s.trim()
        .trim_start_matches('#')
        .parse()
        .map_err(|_| FuncError::new(func, format!("not an id: {s:?}")))
}

fn always(_: &LockContext<'_>, _: &[String]) -> Result<bool, FuncError> {
    Ok(true)
}

fn never(_: &LockContext<'_>, _: &[String]) -> Result<bool, FuncError> {
    Ok(false)
}

/// Hierarchy names pass at that rank or above; anything else needs an exact match.
fn perm(cx: &LockContext<'_>, args: &[String]) -> Result<bool, FuncError> {
    let p = one_arg("perm", args)?;
    match cx.hierarchy.rank_of(p) {
        Some(needed) => Ok(cx.rank().is_some_and(|r| r >= needed)),
        None => Ok(cx.holds_plain_perm(p)),
    }
}

fn perm_above(cx: &LockContext<'_>, args: &[String]) -> Result<bool, FuncError> {
    let p = one_arg("perm_above", args)?;
    let needed = cx
        .hierarchy
        .rank_of(p)
        .ok_or_else(|| FuncError::new("perm_above", format!("{p:?} is not a hierarchy level")))?;
    Ok(cx.rank().is_some_and(|r| r > needed))
}

/// Account permissions only; ignores the puppet and quelling.
fn pperm(cx: &LockContext<'_>, args: &[String]) -> Result<bool, FuncError> {
    let p = one_arg("pperm", args)?;
    let Some(acct) = cx.account() else {
        return Ok(false);
    };
    match cx.hierarchy.rank_of(p) {
        Some(needed) => Ok(cx
            .hierarchy
            .highest(acct.permissions.iter())
            .is_some_and(|r| r >= needed)),
        None => Ok(acct.permissions.contains(p)),
    }
}

fn id(cx: &LockContext<'_>, args: &[String]) -> Result<bool, FuncError> {
    let want = parse_id("id", one_arg("id", args)?)?;
    Ok(match cx.accessor.caller {
        Caller::Entity(e) => e.0 == want,
        Caller::Account(a) => a.0 == want,
        Caller::Session(_) => false,
    })
}

fn pid(cx: &LockContext<'_>, args: &[String]) -> Result<bool, FuncError> {
    let want = parse_id("pid", one_arg("pid", args)?)?;
    Ok(cx.accessor.account.is_some_and(|a| a.0 == want))
}

fn is_self(cx: &LockContext<'_>, _: &[String]) -> Result<bool, FuncError> {
    Ok(match (cx.accessor.caller, cx.accessed) {
        (Caller::Entity(e), Target::Entity(t)) => e == *t,
        (Caller::Account(a), Target::Account(t)) => a == *t,
        (Caller::Session(s), Target::Session(t)) => s == *t,
        _ => false,
    })
}

/// Superusers never reach lock functions, so this only ever sees mortals.
fn superuser(_: &LockContext<'_>, _: &[String]) -> Result<bool, FuncError> {
    Ok(false)
}

fn is_ooc(cx: &LockContext<'_>, _: &[String]) -> Result<bool, FuncError> {
    Ok(matches!(cx.accessor.caller, Caller::Account(_)))
}

/// `holds()`: the accessed object is carried by the caller.
/// `holds(name)` / `holds(#id)`: the caller carries a matching object.
fn holds(cx: &LockContext<'_>, args: &[String]) -> Result<bool, FuncError> {
    let Some(me) = cx.accessor.entity() else {
        return Ok(false);
    };
    match args {
        [] => Ok(match cx.accessed {
            Target::Entity(t) => cx.world.entity(*t).is_some_and(|o| o.location == Some(me)),
            _ => false,
        }),
        [what] => {
            let what = what.trim();
            if let Some(n) = what.strip_prefix('#') {
                let want = EntityId(parse_id("holds", n)?);
                return Ok(cx.world.entity(want).is_some_and(|o| o.location == Some(me)));
            }
            Ok(cx
                .world
                .contents(me)
                .any(|o| o.answers_to(what)))
        }
        _ => Err(FuncError::new("holds", "expected at most 1 argument")),
    }
}

/// The caller is located inside the accessed object.
fn inside(cx: &LockContext<'_>, _: &[String]) -> Result<bool, FuncError> {
    let (Some(me), Target::Entity(t)) = (cx.accessor.entity(), cx.accessed) else {
        return Ok(false);
    };
    Ok(cx.world.entity(me).is_some_and(|e| e.location == Some(*t)))
}

fn has_account(cx: &LockContext<'_>, _: &[String]) -> Result<bool, FuncError> {
    Ok(cx.accessor.account.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_named_modules() {
        let r = LockFuncRegistry::with_modules(&["core"]).unwrap();
        assert!(r.contains("perm"));
        assert!(r.contains("PERM"));
        assert!(!r.contains("holds"));

        let r = LockFuncRegistry::with_modules(&["core", "world"]).unwrap();
        assert!(r.contains("holds"));
        assert_eq!(r.names().len(), CORE.len() + WORLD.len());
    }

    #[test]
    fn unknown_module_is_an_error() {
        assert_eq!(
            LockFuncRegistry::with_modules(&["core", "magic"]).unwrap_err(),
            LockError::UnknownModule("magic".to_string())
        );
    }

    #[test]
    fn id_accepts_hash_prefix() {
        assert_eq!(parse_id("id", "#34"), Ok(34));
        assert!(parse_id("id", "x").is_err());
    }
}
