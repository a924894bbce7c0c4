/// Namespace access guards
///
/// For the duration of a call an interception layer sits on the function's
/// defining namespace. Covered module bindings fail on access; locals,
/// parameters and built-ins resolve as usual. The guarded function's own name
/// stays readable so it can recurse.
use super::wrapper::{settle, CallScope};
use super::Guard;
use crate::config::settings::PurityConfig;
use crate::config::types::{Enforcement, GuardKind, Result, Violation, ViolationKind};
use crate::runtime::{Access, AccessHook, Args, Function, Namespace};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

/// Which module bindings a guard covers
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NameScope {
    All,
    Only(BTreeSet<String>),
}

impl NameScope {
    /// `None` and the empty set both mean every binding
    pub fn from_names(names: Option<BTreeSet<String>>) -> Self {
        match names {
            Some(names) if !names.is_empty() => NameScope::Only(names),
            _ => NameScope::All,
        }
    }

    pub fn covers(&self, name: &str) -> bool {
        match self {
            NameScope::All => true,
            NameScope::Only(names) => names.contains(name),
        }
    }
}

/// Forbids reads (and, for `forbid_globals`, writes) of module bindings
#[derive(Clone, Debug)]
pub struct ForbidGlobalNames {
    kind: GuardKind,
    scope: NameScope,
    allow: BTreeSet<String>,
    forbid_writes: bool,
    reject_aliased: bool,
    enabled: bool,
}

impl ForbidGlobalNames {
    /// Reads of `names` (every binding when `None`) are violations
    pub fn new(names: Option<BTreeSet<String>>) -> Self {
        Self {
            kind: GuardKind::ForbidGlobalNames,
            scope: NameScope::from_names(names),
            allow: BTreeSet::new(),
            forbid_writes: false,
            reject_aliased: false,
            enabled: true,
        }
    }

    /// Every binding; reads, writes and deletes
    pub fn lockdown() -> Self {
        Self {
            kind: GuardKind::ForbidGlobals,
            scope: NameScope::All,
            allow: BTreeSet::new(),
            forbid_writes: true,
            reject_aliased: false,
            enabled: true,
        }
    }

    pub fn from_config(config: &PurityConfig, names: Option<BTreeSet<String>>) -> Self {
        Self::new(names).enabled(config.enabled)
    }

    /// Exempt `names` from the guard
    pub fn allow<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow.extend(names.into_iter().map(Into::into));
        self
    }

    /// Also fail when an argument is the very container bound to a covered
    /// name. Off by default: passing such a value is not itself a lookup.
    pub fn reject_aliased_arguments(mut self, reject: bool) -> Self {
        self.reject_aliased = reject;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn scope(&self) -> &NameScope {
        &self.scope
    }

    fn covers(&self, function: &str, name: &str) -> bool {
        name != function && self.scope.covers(name) && !self.allow.contains(name)
    }

    /// Arguments that are the very container bound to a covered name
    fn aliased_arguments(&self, function: &str, namespace: &Namespace, args: &Args) -> Vec<Violation> {
        let mut violations = Vec::new();
        if !self.reject_aliased {
            return violations;
        }
        for (label, value) in args.labeled() {
            if value.identity().is_none() {
                continue;
            }
            let aliased = namespace.names().into_iter().find(|name| {
                self.covers(function, name)
                    && namespace
                        .get(name)
                        .map(|bound| bound.same_identity(value))
                        .unwrap_or(false)
            });
            if let Some(name) = aliased {
                violations.push(Violation::new(
                    ViolationKind::NamespaceAccess,
                    function,
                    name.as_str(),
                    format!("{} is the object bound to module name '{}'", label, name),
                ));
            }
        }
        violations
    }
}

/// `forbid_global_names(None)`: reads of every module binding
impl Default for ForbidGlobalNames {
    fn default() -> Self {
        Self::new(None)
    }
}

struct NamespaceLayer {
    guard: ForbidGlobalNames,
    function: String,
    recorded: RefCell<Vec<Violation>>,
}

impl AccessHook for NamespaceLayer {
    fn check(&self, namespace: &str, name: &str, access: Access) -> Result<()> {
        let watched = access == Access::Read || self.guard.forbid_writes;
        if !watched || !self.guard.covers(&self.function, name) {
            return Ok(());
        }
        let violation = Violation::new(
            ViolationKind::NamespaceAccess,
            self.function.as_str(),
            name,
            format!("Global name '{}' {} in module '{}'", name, verb(access), namespace),
        );
        self.recorded.borrow_mut().push(violation.clone());
        Err(violation.into_error())
    }
}

fn verb(access: Access) -> &'static str {
    match access {
        Access::Read => "read",
        Access::Write => "assigned",
        Access::Delete => "deleted",
    }
}

impl Guard for ForbidGlobalNames {
    fn kind(&self) -> GuardKind {
        self.kind
    }

    fn apply(&self, function: &Function) -> Function {
        if !self.enabled {
            return function.clone();
        }
        let guard = self.clone();
        let inner = function.clone();
        Function::wrap(function, move |args| {
            let _scope = CallScope::enter(guard.kind);
            let namespace = inner.namespace();
            let mut violations = guard.aliased_arguments(inner.name(), namespace, args);

            let layer = Rc::new(NamespaceLayer {
                guard: guard.clone(),
                function: inner.name().to_string(),
                recorded: RefCell::new(Vec::new()),
            });
            let outcome = {
                let _handle = namespace.install(layer.clone());
                inner.call(args)
            };
            violations.extend(layer.recorded.borrow_mut().drain(..));
            settle(guard.kind, Enforcement::Raise, outcome, violations)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::PurityError;
    use crate::value::Value;

    fn module() -> Namespace {
        let ns = Namespace::new("config_module");
        ns.define("CONST", 10);
        ns.define("OTHER", 1);
        ns.define_builtin("len", "builtin");
        ns
    }

    fn bad(ns: &Namespace) -> Function {
        Function::new("bad", ns, &["x"], |frame| frame.load("x")?.add(&frame.load("CONST")?))
    }

    fn names(items: &[&str]) -> Option<BTreeSet<String>> {
        Some(items.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_read_of_any_global_raises() {
        let ns = module();
        let err = bad(&ns).guard(&ForbidGlobalNames::new(None)).call_with([1]).unwrap_err();
        let violation = err.violation().unwrap();
        assert_eq!(violation.kind, ViolationKind::NamespaceAccess);
        assert_eq!(violation.subject, "CONST");
        assert_eq!(ns.active_layers(), 0);
    }

    #[test]
    fn test_restricted_scope_allows_other_names() {
        let ns = module();
        let guarded = bad(&ns).guard(&ForbidGlobalNames::new(names(&["OTHER"])));
        assert_eq!(guarded.call_with([1]).unwrap(), Value::from(11));
        let guarded = bad(&ns).guard(&ForbidGlobalNames::new(names(&[])));
        assert!(guarded.call_with([1]).is_err());
    }

    #[test]
    fn test_allow_list_exempts_names() {
        let ns = module();
        let guarded = bad(&ns).guard(&ForbidGlobalNames::new(None).allow(["CONST"]));
        assert_eq!(guarded.call_with([1]).unwrap(), Value::from(11));
    }

    #[test]
    fn test_locals_and_builtins_not_intercepted() {
        let ns = module();
        let f = Function::new("uses_locals", &ns, &["CONST"], |frame| {
            frame.load("len")?;
            frame.load("CONST")
        });
        let guarded = f.guard(&ForbidGlobalNames::lockdown());
        assert_eq!(guarded.call_with([5]).unwrap(), Value::from(5));
    }

    #[test]
    fn test_swallowed_violation_is_reraised() {
        let ns = module();
        let f = Function::new("sneaky", &ns, &[], |frame| {
            let _ = frame.load("CONST");
            Ok(Value::from(0))
        });
        let err = f.guard(&ForbidGlobalNames::default()).call(&Args::new()).unwrap_err();
        assert!(matches!(err, PurityError::NamespaceAccess(_)));
    }

    #[test]
    fn test_write_checks_only_under_lockdown() {
        let ns = module();
        let f = Function::new("writer", &ns, &[], |frame| {
            frame.store_global("OTHER", Value::from(2))?;
            Ok(Value::None)
        });
        assert!(f.guard(&ForbidGlobalNames::new(None)).call(&Args::new()).is_ok());
        assert_eq!(ns.get("OTHER"), Some(Value::from(2)));

        let err = f.guard(&ForbidGlobalNames::lockdown()).call(&Args::new()).unwrap_err();
        assert!(err.violation().unwrap().description.contains("assigned"));
    }

    #[test]
    fn test_argument_aliasing_a_global_is_reported() {
        let ns = module();
        let shared = Value::list([]);
        ns.define("CACHE", shared.clone());
        let f = Function::new("length", &ns, &["xs"], |frame| {
            Ok(Value::from(frame.load("xs")?.len()? as i64))
        });
        let guarded = f.guard(&ForbidGlobalNames::new(names(&["CACHE"])).reject_aliased_arguments(true));
        let err = guarded.call_with([shared]).unwrap_err();
        assert_eq!(err.violation().unwrap().subject, "CACHE");
        assert!(guarded.call_with([Value::list([])]).is_ok());
    }

    #[test]
    fn test_module_value_passed_as_argument_is_allowed() {
        let ns = module();
        let data = Value::list([Value::from(1), Value::from(2)]);
        ns.define("DATA", data.clone());
        let length = Function::new("length", &ns, &["xs"], |frame| {
            Ok(Value::from(frame.load("xs")?.len()? as i64))
        });
        assert_eq!(length.call_with([data.clone()]).unwrap(), Value::from(2));
        let guarded = length.guard(&ForbidGlobalNames::lockdown());
        assert_eq!(guarded.call_with([data.clone()]).unwrap(), Value::from(2));
        let guarded = length.guard(&ForbidGlobalNames::new(None));
        assert_eq!(guarded.call_with([data]).unwrap(), Value::from(2));
    }

    #[test]
    fn test_own_name_stays_readable() {
        let ns = module();
        ns.define("recurse", "self-reference");
        let f = Function::new("recurse", &ns, &[], |frame| frame.load("recurse"));
        assert!(f.guard(&ForbidGlobalNames::lockdown()).call(&Args::new()).is_ok());
    }
}
