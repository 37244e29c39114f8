//! Lock strings and their evaluation.
//!
//! A lock string maps access types to boolean expressions over registered
//! lock functions, e.g. `"edit: perm(Builder) or id(12); delete: id(34)"`.
//! Evaluation fails closed: unknown functions and function errors count as
//! false and are logged, and a missing access type denies unless the caller
//! supplies a default.

pub mod funcs;
pub mod parse;

use std::collections::BTreeMap;

use mudproto::session::SessionId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, warn};

use crate::error::LockError;
use crate::identity::{self, ActingTriple};
use crate::perm::{PermissionHierarchy, Rank};
use crate::settings::Settings;
use crate::world::{Account, AccountId, EntityId, World};

pub use funcs::{LockFunc, LockFuncRegistry};
pub use parse::Expr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockDef {
    pub source: String,
    pub expr: Expr,
}

/// The locks on one object, keyed by access type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockHandler {
    locks: BTreeMap<String, LockDef>,
}

impl LockHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strict: any malformed definition rejects the whole string.
    pub fn parse(s: &str) -> Result<Self, LockError> {
        let mut h = Self::new();
        h.add(s)?;
        Ok(h)
    }

    /// Strict, and every function must exist in `registry`.
    pub fn parse_checked(s: &str, registry: &LockFuncRegistry) -> Result<Self, LockError> {
        let h = Self::parse(s)?;
        h.validate(registry)?;
        Ok(h)
    }

    /// Lenient: malformed definitions are dropped with a warning, which
    /// leaves their access types denied.
    pub fn from_storage(s: &str) -> Self {
        let mut h = Self::new();
        for part in parse::split_defs(s).into_iter().map(str::trim).filter(|p| !p.is_empty()) {
            if let Err(e) = h.add(part) {
                warn!(lock = %part, err = %e, "dropping malformed stored lock");
            }
        }
        h
    }

    /// Re-adding an access type overwrites the old definition.
    pub fn add(&mut self, s: &str) -> Result<(), LockError> {
        for def in parse::parse_lockstring(s)? {
            self.locks.insert(
                def.access_type,
                LockDef {
                    source: def.source,
                    expr: def.expr,
                },
            );
        }
        Ok(())
    }

    pub fn remove(&mut self, access_type: &str) -> bool {
        self.locks
            .remove(&access_type.trim().to_ascii_lowercase())
            .is_some()
    }

    pub fn get(&self, access_type: &str) -> Option<&LockDef> {
        self.locks.get(&access_type.trim().to_ascii_lowercase())
    }

    pub fn access_types(&self) -> impl Iterator<Item = &str> {
        self.locks.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub fn validate(&self, registry: &LockFuncRegistry) -> Result<(), LockError> {
        for def in self.locks.values() {
            if let Some(f) = def.expr.func_names().into_iter().find(|f| !registry.contains(f)) {
                return Err(LockError::UnknownFunc(f.to_string()));
            }
        }
        Ok(())
    }

    pub fn to_storage(&self) -> String {
        self.locks
            .iter()
            .map(|(k, d)| format!("{k}:{}", d.source))
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl Serialize for LockHandler {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_storage())
    }
}

impl<'de> Deserialize<'de> for LockHandler {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Ok(LockHandler::from_storage(&s))
    }
}

/// The object a lock is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    None,
    Session(SessionId),
    Account(AccountId),
    Entity(EntityId),
    Channel(String),
}

/// Everything a lock function may look at.
pub struct LockContext<'a> {
    pub world: &'a World,
    pub hierarchy: &'a PermissionHierarchy,
    pub accessor: &'a ActingTriple,
    pub accessed: &'a Target,
    /// Call-site values for custom lock functions.
    pub extra: &'a [(&'a str, &'a str)],
}

impl LockContext<'_> {
    pub fn account(&self) -> Option<&Account> {
        self.accessor.account.and_then(|a| self.world.account(a))
    }

    pub fn rank(&self) -> Option<Rank> {
        identity::hierarchy_rank(self.world, self.hierarchy, self.accessor)
    }

    pub fn holds_plain_perm(&self, perm: &str) -> bool {
        identity::holds_plain_perm(self.world, self.accessor, perm)
    }

    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extra.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CheckOpts {
    /// Result for an access type with no lock at all.
    pub default: bool,
    pub no_superuser_bypass: bool,
}

impl CheckOpts {
    pub fn default_allow() -> Self {
        Self {
            default: true,
            ..Self::default()
        }
    }
}

/// Diagnostic result: what happened, and what would have happened to a mortal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub allowed: bool,
    pub bypassed: bool,
    pub without_bypass: bool,
}

#[derive(Debug, Clone)]
pub struct LockEngine {
    registry: LockFuncRegistry,
    hierarchy: PermissionHierarchy,
}

impl LockEngine {
    pub fn new(settings: &Settings) -> Result<Self, LockError> {
        Ok(Self {
            registry: LockFuncRegistry::with_modules(&settings.lock_func_modules)?,
            hierarchy: PermissionHierarchy::new(settings.permission_hierarchy.iter().cloned()),
        })
    }

    pub fn with_registry(registry: LockFuncRegistry, hierarchy: PermissionHierarchy) -> Self {
        Self {
            registry,
            hierarchy,
        }
    }

    pub fn registry(&self) -> &LockFuncRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut LockFuncRegistry {
        &mut self.registry
    }

    pub fn hierarchy(&self) -> &PermissionHierarchy {
        &self.hierarchy
    }

    /// An unquelled superuser account passes every lock.
    pub fn bypasses(&self, world: &World, accessor: &ActingTriple) -> bool {
        accessor
            .account
            .and_then(|a| world.account(a))
            .is_some_and(|a| a.superuser && !a.quelled)
    }

    pub fn check(
        &self,
        world: &World,
        accessor: &ActingTriple,
        accessed: &Target,
        locks: &LockHandler,
        access_type: &str,
        opts: CheckOpts,
    ) -> bool {
        if !opts.no_superuser_bypass && self.bypasses(world, accessor) {
            debug!(caller = ?accessor.caller, access_type, "superuser lock bypass");
            return true;
        }
        self.check_without_bypass(world, accessor, accessed, locks, access_type, opts.default, &[])
    }

    /// Like `check`, but always evaluates so the result without bypass is known.
    pub fn verdict(
        &self,
        world: &World,
        accessor: &ActingTriple,
        accessed: &Target,
        locks: &LockHandler,
        access_type: &str,
        opts: CheckOpts,
    ) -> Verdict {
        let without_bypass =
            self.check_without_bypass(world, accessor, accessed, locks, access_type, opts.default, &[]);
        let bypassed = !opts.no_superuser_bypass && self.bypasses(world, accessor);
        Verdict {
            allowed: bypassed || without_bypass,
            bypassed,
            without_bypass,
        }
    }

    pub fn check_without_bypass(
        &self,
        world: &World,
        accessor: &ActingTriple,
        accessed: &Target,
        locks: &LockHandler,
        access_type: &str,
        default: bool,
        extra: &[(&str, &str)],
    ) -> bool {
        let Some(def) = locks.get(access_type) else {
            return default;
        };
        let cx = LockContext {
            world,
            hierarchy: &self.hierarchy,
            accessor,
            accessed,
            extra,
        };
        self.eval(&def.expr, &cx)
    }

    /// Evaluate one `access_type: expr` string directly. Malformed strings deny.
    pub fn evaluate_str(
        &self,
        lockstring: &str,
        world: &World,
        accessor: &ActingTriple,
        accessed: &Target,
        extra: &[(&str, &str)],
    ) -> bool {
        if self.bypasses(world, accessor) {
            debug!(caller = ?accessor.caller, lock = %lockstring, "superuser lock bypass");
            return true;
        }
        let defs = match parse::parse_lockstring(lockstring) {
            Ok(d) => d,
            Err(e) => {
                warn!(lock = %lockstring, err = %e, "malformed lock denies access");
                return false;
            }
        };
        let cx = LockContext {
            world,
            hierarchy: &self.hierarchy,
            accessor,
            accessed,
            extra,
        };
        defs.iter().all(|d| self.eval(&d.expr, &cx))
    }

    pub fn eval(&self, expr: &Expr, cx: &LockContext<'_>) -> bool {
        match expr {
            Expr::Call { name, args } => {
                let Some(f) = self.registry.get(name) else {
                    warn!(func = %name, "unknown lock function");
                    return false;
                };
                match f.call(cx, args) {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(err = %e, caller = ?cx.accessor.caller, "lock function failed");
                        false
                    }
                }
            }
            Expr::Not(e) => !self.eval(e, cx),
            Expr::And(a, b) => self.eval(a, cx) && self.eval(b, cx),
            Expr::Or(a, b) => self.eval(a, cx) || self.eval(b, cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::FuncError;
    use crate::testutil::Fixture;

    struct Counted {
        calls: Arc<AtomicUsize>,
        result: bool,
    }

    impl LockFunc for Counted {
        fn call(&self, _: &LockContext<'_>, _: &[String]) -> Result<bool, FuncError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.result)
        }
    }

    fn weather(cx: &LockContext<'_>, args: &[String]) -> Result<bool, FuncError> {
        Ok(cx.extra("weather") == args.first().map(String::as_str))
    }

    #[test]
    fn delete_lock_matches_caller_id() {
        let mut f = Fixture::new();
        let a = f.character("Alpha");
        let b = f.character("Beta");

        let lock = format!("delete:id({})", a.0);
        let target = Target::None;
        let ta = ActingTriple::for_entity(a);
        let tb = ActingTriple::for_entity(b);
        assert!(f.locks.evaluate_str(&lock, &f.game.world, &ta, &target, &[]));
        assert!(!f.locks.evaluate_str(&lock, &f.game.world, &tb, &target, &[]));
    }

    #[test]
    fn id_34_passes_and_35_fails() {
        let f = Fixture::new();
        let h = LockHandler::parse("delete:id(34)").unwrap();
        let t34 = ActingTriple::for_entity(EntityId(34));
        let t35 = ActingTriple::for_entity(EntityId(35));
        let opts = CheckOpts::default();
        assert!(f.locks.check(&f.game.world, &t34, &Target::None, &h, "delete", opts));
        assert!(!f.locks.check(&f.game.world, &t35, &Target::None, &h, "delete", opts));
    }

    #[test]
    fn holds_key_or_builder() {
        let mut f = Fixture::new();
        let door = f.object("door", None);
        let c = f.character("Carl");
        let h = LockHandler::parse("open: holds('key') or perm(Builder)").unwrap();
        let t = ActingTriple::for_entity(c);
        let opts = CheckOpts::default();
        let on_door = Target::Entity(door);

        assert!(!f.locks.check(&f.game.world, &t, &on_door, &h, "open", opts));

        f.game.world.entity_mut(c).unwrap().permissions.add("Builder");
        assert!(f.locks.check(&f.game.world, &t, &on_door, &h, "open", opts));

        f.game.world.entity_mut(c).unwrap().permissions.remove("Builder");
        f.object("Key", Some(c));
        assert!(f.locks.check(&f.game.world, &t, &on_door, &h, "open", opts));
    }

    #[test]
    fn missing_access_type_uses_caller_default() {
        let mut f = Fixture::new();
        let (acct, _) = f.account("root", &["Developer"]);
        let t = ActingTriple::for_account(acct, None);
        let h = LockHandler::parse("edit:all()").unwrap();
        assert!(!f.locks.check(&f.game.world, &t, &Target::None, &h, "delete", CheckOpts::default()));
        assert!(f.locks.check(
            &f.game.world,
            &t,
            &Target::None,
            &h,
            "delete",
            CheckOpts::default_allow()
        ));
    }

    #[test]
    fn readding_access_type_overwrites() {
        let mut h = LockHandler::parse("edit:false()").unwrap();
        h.add("EDIT: true() ; get:all()").unwrap();
        assert_eq!(h.access_types().collect::<Vec<_>>(), vec!["edit", "get"]);
        assert_eq!(h.get("edit").unwrap().source, "true()");
        assert_eq!(h.to_storage(), "edit:true();get:all()");
    }

    #[test]
    fn stored_garbage_is_dropped_and_denies() {
        let h = LockHandler::from_storage("get:all();edit perm(Admin);call:holds(");
        assert_eq!(h.access_types().collect::<Vec<_>>(), vec!["get"]);

        let f = Fixture::new();
        let t = ActingTriple::for_entity(EntityId(1));
        assert!(!f.locks.check(&f.game.world, &t, &Target::None, &h, "edit", CheckOpts::default()));
    }

    #[test]
    fn checked_parse_rejects_unknown_functions() {
        let f = Fixture::new();
        assert_eq!(
            LockHandler::parse_checked("get:levitate()", f.locks.registry()).unwrap_err(),
            LockError::UnknownFunc("levitate".to_string())
        );
        assert!(LockHandler::parse_checked("get:not holds()", f.locks.registry()).is_ok());
    }

    #[test]
    fn unknown_function_and_errors_fail_closed() {
        let f = Fixture::new();
        let t = ActingTriple::for_entity(EntityId(1));
        let h = LockHandler::parse("a:levitate();b:id(banana);c:not id(banana)").unwrap();
        let opts = CheckOpts::default();
        assert!(!f.locks.check(&f.game.world, &t, &Target::None, &h, "a", opts));
        assert!(!f.locks.check(&f.game.world, &t, &Target::None, &h, "b", opts));
        // The failing term is false, so its negation passes.
        assert!(f.locks.check(&f.game.world, &t, &Target::None, &h, "c", opts));
    }

    #[test]
    fn superuser_bypass_skips_functions_but_verdict_reports_truth() {
        let mut f = Fixture::new();
        let calls = Arc::new(AtomicUsize::new(0));
        f.locks.registry_mut().register(
            "counted",
            Counted {
                calls: calls.clone(),
                result: false,
            },
        );
        let (root, _) = f.account("root", &[]);
        f.game.world.account_mut(root).unwrap().superuser = true;
        let t = ActingTriple::for_account(root, None);
        let h = LockHandler::parse("edit:counted()").unwrap();
        let opts = CheckOpts::default();

        assert!(f.locks.check(&f.game.world, &t, &Target::None, &h, "edit", opts));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let v = f.locks.verdict(&f.game.world, &t, &Target::None, &h, "edit", opts);
        assert_eq!(
            v,
            Verdict {
                allowed: true,
                bypassed: true,
                without_bypass: false
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        f.game.world.account_mut(root).unwrap().quelled = true;
        assert!(!f.locks.check(&f.game.world, &t, &Target::None, &h, "edit", opts));
    }

    #[test]
    fn short_circuit_skips_right_hand_side() {
        let mut f = Fixture::new();
        let calls = Arc::new(AtomicUsize::new(0));
        f.locks.registry_mut().register(
            "counted",
            Counted {
                calls: calls.clone(),
                result: true,
            },
        );
        let t = ActingTriple::for_entity(EntityId(1));
        let h = LockHandler::parse("a:true() or counted();b:false() and counted()").unwrap();
        let opts = CheckOpts::default();
        assert!(f.locks.check(&f.game.world, &t, &Target::None, &h, "a", opts));
        assert!(!f.locks.check(&f.game.world, &t, &Target::None, &h, "b", opts));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn extra_values_reach_custom_functions() {
        let mut f = Fixture::new();
        f.locks.registry_mut().register("weather", weather);
        let t = ActingTriple::for_entity(EntityId(1));
        let lock = "fly:weather(clear)";
        assert!(f.locks.evaluate_str(lock, &f.game.world, &t, &Target::None, &[("weather", "clear")]));
        assert!(!f.locks.evaluate_str(lock, &f.game.world, &t, &Target::None, &[("weather", "storm")]));
    }

    #[test]
    fn serde_uses_storage_form() {
        let h = LockHandler::parse("get:all();edit:perm(Builder)").unwrap();
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, r#""edit:perm(Builder);get:all()""#);
        let back: LockHandler = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }
}
