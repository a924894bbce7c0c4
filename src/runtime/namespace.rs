/// Module-level namespaces with interposable name resolution
///
/// A namespace holds user bindings and a separate built-ins layer. Reads and
/// writes made by guarded code go through [`Namespace::lookup`],
/// [`Namespace::assign`] and [`Namespace::delete`], which consult every installed
/// interception layer, innermost first. Built-ins are never intercepted.
use crate::config::types::{PurityError, Result};
use crate::observability::metrics::get_metrics;
use crate::value::Value;
use log::debug;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Kind of access made to a module binding
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Delete,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Access::Read => "read",
            Access::Write => "write",
            Access::Delete => "delete",
        })
    }
}

/// Interception layer over name resolution
pub trait AccessHook {
    /// Return an error to refuse the access
    fn check(&self, namespace: &str, name: &str, access: Access) -> Result<()>;
}

struct NamespaceInner {
    name: String,
    bindings: RefCell<BTreeMap<String, Value>>,
    builtins: RefCell<BTreeMap<String, Value>>,
    layers: RefCell<Vec<(u64, Rc<dyn AccessHook>)>>,
    next_layer: Cell<u64>,
}

/// Shared handle to a module namespace
#[derive(Clone)]
pub struct Namespace {
    inner: Rc<NamespaceInner>,
}

impl Namespace {
    pub fn new(name: &str) -> Self {
        Self {
            inner: Rc::new(NamespaceInner {
                name: name.to_string(),
                bindings: RefCell::new(BTreeMap::new()),
                builtins: RefCell::new(BTreeMap::new()),
                layers: RefCell::new(Vec::new()),
                next_layer: Cell::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Bind a module-level name from host code. Not intercepted.
    pub fn define(&self, name: &str, value: impl Into<Value>) -> Option<Value> {
        self.inner
            .bindings
            .borrow_mut()
            .insert(name.to_string(), value.into())
    }

    /// Register a language-provided name
    pub fn define_builtin(&self, name: &str, value: impl Into<Value>) {
        self.inner
            .builtins
            .borrow_mut()
            .insert(name.to_string(), value.into());
    }

    /// Read a module binding from host code. Not intercepted.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner.bindings.borrow().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.bindings.borrow().contains_key(name)
    }

    /// Names of all module bindings (built-ins excluded)
    pub fn names(&self) -> Vec<String> {
        self.inner.bindings.borrow().keys().cloned().collect()
    }

    /// True when `name` resolves to a built-in rather than a module binding
    pub fn is_builtin(&self, name: &str) -> bool {
        !self.contains(name) && self.inner.builtins.borrow().contains_key(name)
    }

    /// Resolve `name` as guarded code would: module bindings, then built-ins
    pub fn lookup(&self, name: &str) -> Result<Value> {
        let bound = self.inner.bindings.borrow().get(name).cloned();
        match bound {
            Some(value) => {
                self.check(name, Access::Read)?;
                Ok(value)
            }
            None => self
                .inner
                .builtins
                .borrow()
                .get(name)
                .cloned()
                .ok_or_else(|| PurityError::name_error(name)),
        }
    }

    /// Rebind a module-level name from guarded code
    pub fn assign(&self, name: &str, value: Value) -> Result<()> {
        self.check(name, Access::Write)?;
        self.inner
            .bindings
            .borrow_mut()
            .insert(name.to_string(), value);
        Ok(())
    }

    /// Remove a module-level name from guarded code
    pub fn delete(&self, name: &str) -> Result<()> {
        if !self.contains(name) {
            return Err(PurityError::name_error(name));
        }
        self.check(name, Access::Delete)?;
        self.inner.bindings.borrow_mut().remove(name);
        Ok(())
    }

    /// Install an interception layer until the returned handle is dropped
    pub fn install(&self, hook: Rc<dyn AccessHook>) -> InterceptionHandle {
        let id = self.inner.next_layer.get();
        self.inner.next_layer.set(id + 1);
        self.inner.layers.borrow_mut().push((id, hook));
        get_metrics().interceptions_installed.inc();
        debug!("Installed name interception layer {} on namespace {}", id, self.name());
        InterceptionHandle {
            namespace: self.clone(),
            id,
        }
    }

    /// Number of interception layers currently installed
    pub fn active_layers(&self) -> usize {
        self.inner.layers.borrow().len()
    }

    pub fn same_as(&self, other: &Namespace) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn check(&self, name: &str, access: Access) -> Result<()> {
        // Hooks may touch the namespace themselves; do not hold the borrow while they run
        let layers: Vec<Rc<dyn AccessHook>> = self
            .inner
            .layers
            .borrow()
            .iter()
            .rev()
            .map(|(_, hook)| Rc::clone(hook))
            .collect();
        for hook in layers {
            hook.check(self.name(), name, access)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.inner.name)
            .field("bindings", &self.names())
            .field("layers", &self.active_layers())
            .finish()
    }
}

/// Removes its interception layer on drop, on every exit path
pub struct InterceptionHandle {
    namespace: Namespace,
    id: u64,
}

impl Drop for InterceptionHandle {
    fn drop(&mut self) {
        let Ok(mut layers) = self.namespace.inner.layers.try_borrow_mut() else {
            log::error!(
                "Namespace {} layers busy; interception layer {} could not be removed",
                self.namespace.name(),
                self.id
            );
            return;
        };
        layers.retain(|(id, _)| *id != self.id);
        get_metrics().interceptions_restored.inc();
        debug!(
            "Removed name interception layer {} from namespace {}",
            self.id,
            self.namespace.name()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DenyName(&'static str);

    impl AccessHook for DenyName {
        fn check(&self, _namespace: &str, name: &str, access: Access) -> Result<()> {
            if name == self.0 {
                return Err(PurityError::raised("Denied", format!("{} {}", access, name)));
            }
            Ok(())
        }
    }

    #[test]
    fn test_lookup_prefers_module_binding_over_builtin() {
        let ns = Namespace::new("mod");
        ns.define_builtin("len", "builtin-len");
        assert!(ns.is_builtin("len"));
        ns.define("len", "shadow");
        assert!(!ns.is_builtin("len"));
        assert_eq!(ns.lookup("len").unwrap(), Value::from("shadow"));
    }

    #[test]
    fn test_unknown_name_is_name_error() {
        let ns = Namespace::new("mod");
        let err = ns.lookup("missing").unwrap_err();
        assert_eq!(err.label(), "NameError");
    }

    #[test]
    fn test_layer_removed_when_handle_dropped() {
        let ns = Namespace::new("mod");
        ns.define("SECRET", 1);
        {
            let _handle = ns.install(Rc::new(DenyName("SECRET")));
            assert_eq!(ns.active_layers(), 1);
            assert!(ns.lookup("SECRET").is_err());
            assert!(ns.assign("SECRET", Value::from(2)).is_err());
        }
        assert_eq!(ns.active_layers(), 0);
        assert_eq!(ns.lookup("SECRET").unwrap(), Value::from(1));
    }

    #[test]
    fn test_builtins_bypass_layers() {
        let ns = Namespace::new("mod");
        ns.define_builtin("SECRET", 7);
        let _handle = ns.install(Rc::new(DenyName("SECRET")));
        assert_eq!(ns.lookup("SECRET").unwrap(), Value::from(7));
    }

    #[test]
    fn test_layers_removed_out_of_order() {
        let ns = Namespace::new("mod");
        let first = ns.install(Rc::new(DenyName("A")));
        let second = ns.install(Rc::new(DenyName("B")));
        drop(first);
        assert_eq!(ns.active_layers(), 1);
        drop(second);
        assert_eq!(ns.active_layers(), 0);
    }
}
