/// Side-effect guard
///
/// Pushes a layer onto the process-wide operation stack for the duration of the
/// call. Watched operations are recorded, including those performed by threads
/// the call starts; in raise mode they are refused, in warn mode they go through
/// and are reported after the call.
use super::wrapper::{settle, CallScope};
use super::Guard;
use crate::config::settings::PurityConfig;
use crate::config::types::{Enforcement, GuardKind, Result, Violation, ViolationKind};
use crate::runtime::effects::{self, Interception, Invocation, OperationHook, OperationTable};
use crate::runtime::Function;
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;

/// Blocks process-affecting operations during the call
#[derive(Clone, Debug)]
pub struct ForbidSideEffects {
    table: OperationTable,
    enforcement: Enforcement,
    enabled: bool,
}

impl ForbidSideEffects {
    /// `None` watches [`OperationTable::default`]
    pub fn new(operations: Option<OperationTable>, warn_only: bool) -> Self {
        Self {
            table: operations.unwrap_or_default(),
            enforcement: Enforcement::from_warn_only(warn_only),
            enabled: true,
        }
    }

    pub fn from_config(config: &PurityConfig) -> Result<Self> {
        Ok(Self {
            table: config.operation_table()?,
            enforcement: config.enforcement(),
            enabled: config.enabled,
        })
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn table(&self) -> &OperationTable {
        &self.table
    }
}

impl Default for ForbidSideEffects {
    fn default() -> Self {
        Self::new(None, false)
    }
}

struct EffectLayer {
    function: String,
    table: OperationTable,
    enforcement: Enforcement,
    attempts: Mutex<Vec<Violation>>,
}

impl OperationHook for EffectLayer {
    fn on_operation(&self, invocation: &Invocation) -> Result<()> {
        let description = match self.table.get(invocation.operation) {
            None => return Ok(()),
            Some(Interception::Deny) => format!("Side effect blocked: {}", invocation),
            Some(Interception::Inspect(hook)) => match hook(invocation) {
                Ok(()) => return Ok(()),
                Err(e) => format!("Side effect blocked: {} ({})", invocation, e),
            },
        };
        let violation = Violation::new(
            ViolationKind::SideEffect,
            self.function.as_str(),
            invocation.operation.id(),
            description,
        );
        self.attempts.lock().push(violation.clone());
        if self.enforcement.is_warn() {
            debug!("Forwarding {} from {} under warn_only", invocation, self.function);
            return Ok(());
        }
        Err(violation.into_error())
    }
}

impl Guard for ForbidSideEffects {
    fn kind(&self) -> GuardKind {
        GuardKind::ForbidSideEffects
    }

    fn apply(&self, function: &Function) -> Function {
        if !self.enabled {
            return function.clone();
        }
        let guard = self.clone();
        let inner = function.clone();
        Function::wrap(function, move |args| {
            let _scope = CallScope::enter(GuardKind::ForbidSideEffects);
            let layer = Arc::new(EffectLayer {
                function: inner.name().to_string(),
                table: guard.table.clone(),
                enforcement: guard.enforcement,
                attempts: Mutex::new(Vec::new()),
            });
            let outcome = {
                let _handle = effects::install(layer.clone());
                inner.call(args)
            };
            let attempts = std::mem::take(&mut *layer.attempts.lock());
            settle(GuardKind::ForbidSideEffects, guard.enforcement, outcome, attempts)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::PurityError;
    use crate::runtime::effects::Operation;
    use crate::runtime::{Args, Namespace};
    use crate::value::Value;
    use std::path::PathBuf;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("pureguard-side-effects-{}.txt", uuid::Uuid::new_v4()))
    }

    fn writer(ns: &Namespace, path: PathBuf) -> Function {
        Function::new("writer", ns, &[], move |_| {
            effects::write_file(&path, "x")?;
            Ok(Value::from("written"))
        })
    }

    #[test]
    fn test_file_write_blocked_and_restored() {
        let _exclusive = effects::exclusive();
        let ns = Namespace::new("m");
        let path = temp_path();
        let err = writer(&ns, path.clone())
            .guard(&ForbidSideEffects::default())
            .call(&Args::new())
            .unwrap_err();
        let violation = err.violation().unwrap();
        assert_eq!(violation.subject, "open-file-for-write");
        assert!(!path.exists());
        assert_eq!(effects::active_layers(), 0);

        effects::write_file(&path, "after").unwrap();
        assert!(path.exists());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_warn_only_forwards_operation() {
        let ns = Namespace::new("m");
        let path = temp_path();
        let out = writer(&ns, path.clone())
            .guard(&ForbidSideEffects::new(None, true))
            .call(&Args::new())
            .unwrap();
        assert_eq!(out, Value::from("written"));
        assert!(path.exists());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_swallowed_block_is_reraised() {
        let ns = Namespace::new("m");
        let f = Function::new("quiet", &ns, &[], |_| {
            let _ = effects::run_process("true", &[]);
            Ok(Value::None)
        });
        let err = f.guard(&ForbidSideEffects::default()).call(&Args::new()).unwrap_err();
        assert!(matches!(err, PurityError::SideEffect(_)));
    }

    #[test]
    fn test_unwatched_operations_allowed() {
        let ns = Namespace::new("m");
        let f = Function::new("clock", &ns, &[], |_| {
            effects::now()?;
            Ok(Value::None)
        });
        assert!(f.guard(&ForbidSideEffects::default()).call(&Args::new()).is_ok());
        let err = f
            .guard(&ForbidSideEffects::new(Some(OperationTable::all()), false))
            .call(&Args::new())
            .unwrap_err();
        assert_eq!(err.violation().unwrap().subject, "clock-read");
    }

    #[test]
    fn test_transitive_through_helpers() {
        let ns = Namespace::new("m");
        let helper = Function::new("log_line", &ns, &["msg"], |frame| {
            effects::write_stdout(frame.load("msg")?.as_str().unwrap_or_default())?;
            Ok(Value::None)
        });
        let outer = Function::new("outer", &ns, &[], move |_| helper.call(&Args::from(vec![Value::from("hi\n")])));
        let err = outer.guard(&ForbidSideEffects::default()).call(&Args::new()).unwrap_err();
        assert_eq!(err.violation().unwrap().subject, "stdout-write");
    }

    #[test]
    fn test_inspect_hook_can_allow_or_veto() {
        let ns = Namespace::new("m");
        let f = Function::new("env_writer", &ns, &["name"], |frame| {
            let name = frame.load("name")?;
            effects::set_env_var(name.as_str().unwrap_or_default(), "1")?;
            Ok(Value::None)
        });
        let table = OperationTable::empty().inspect(Operation::EnvWrite, |invocation| {
            if invocation.detail.starts_with("PUREGUARD_TEST_") {
                Ok(())
            } else {
                Err(PurityError::raised("PermissionError", "outside test prefix"))
            }
        });
        let guarded = f.guard(&ForbidSideEffects::new(Some(table), false));
        let allowed = format!("PUREGUARD_TEST_{}", uuid::Uuid::new_v4().simple());
        assert!(guarded.call_with([Value::from(allowed.as_str())]).is_ok());
        std::env::remove_var(&allowed);

        let err = guarded.call_with([Value::from("HOME_OVERRIDE")]).unwrap_err();
        assert!(err.violation().unwrap().description.contains("outside test prefix"));
    }

    #[test]
    fn test_write_on_spawned_thread_is_caught() {
        let ns = Namespace::new("m");
        let path = temp_path();
        let target = path.clone();
        let f = Function::new("background_writer", &ns, &[], move |_| {
            let target = target.clone();
            let worker = effects::spawn_thread("writer", move || {
                let _ = effects::write_file(&target, "x");
            })?;
            worker
                .join()
                .map_err(|_| PurityError::raised("RuntimeError", "worker panicked"))?;
            Ok(Value::None)
        });
        let only_writes = OperationTable::denying([Operation::OpenFileForWrite]);
        let err = f
            .guard(&ForbidSideEffects::new(Some(only_writes), false))
            .call(&Args::new())
            .unwrap_err();
        let violation = err.violation().unwrap();
        assert_eq!(violation.subject, "open-file-for-write");
        assert_eq!(violation.function, "background_writer");
        assert!(!path.exists());
    }

    #[test]
    fn test_layer_removed_after_panic() {
        let _exclusive = effects::exclusive();
        let ns = Namespace::new("m");
        let f = Function::new("boom", &ns, &[], |_| panic!("boom"));
        let guarded = f.guard(&ForbidSideEffects::default());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| guarded.call(&Args::new())));
        assert!(result.is_err());
        assert_eq!(effects::active_layers(), 0);
    }
}
