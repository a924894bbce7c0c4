/// Process-affecting operations and their interception table
///
/// Every entry point here dispatches through a process-wide stack of operation
/// hooks before performing the real operation. Hooks are consulted innermost
/// first; any hook may refuse the operation by returning an error. Code that
/// performs file, process, network, console, environment, clock, entropy or
/// thread operations through these entry points is therefore interceptable no
/// matter how deep in the call stack, or on which thread, it runs.
///
/// Installing a layer holds the [`exclusive`] section until the layer is
/// removed, so guarded calls from different threads never interleave.
use crate::config::types::{PurityError, Result};
use crate::observability::metrics::get_metrics;
use chrono::{DateTime, Utc};
use log::debug;
use once_cell::sync::Lazy;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::io::Write;
use std::net::TcpStream;
use std::path::Path;
use std::process::{Command, Output};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Catalogue of interceptable operations
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    OpenFileForWrite,
    RemoveFile,
    SpawnProcess,
    NetworkConnect,
    StdoutWrite,
    StderrWrite,
    EnvWrite,
    SpawnThread,
    ExitProcess,
    EnvRead,
    ClockRead,
    Sleep,
    EntropyRead,
    ReadFile,
}

impl Operation {
    pub const ALL: [Operation; 14] = [
        Operation::OpenFileForWrite,
        Operation::RemoveFile,
        Operation::SpawnProcess,
        Operation::NetworkConnect,
        Operation::StdoutWrite,
        Operation::StderrWrite,
        Operation::EnvWrite,
        Operation::SpawnThread,
        Operation::ExitProcess,
        Operation::EnvRead,
        Operation::ClockRead,
        Operation::Sleep,
        Operation::EntropyRead,
        Operation::ReadFile,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Operation::OpenFileForWrite => "open-file-for-write",
            Operation::RemoveFile => "remove-file",
            Operation::SpawnProcess => "spawn-process",
            Operation::NetworkConnect => "network-connect",
            Operation::StdoutWrite => "stdout-write",
            Operation::StderrWrite => "stderr-write",
            Operation::EnvWrite => "env-write",
            Operation::SpawnThread => "spawn-thread",
            Operation::ExitProcess => "exit-process",
            Operation::EnvRead => "env-read",
            Operation::ClockRead => "clock-read",
            Operation::Sleep => "sleep",
            Operation::EntropyRead => "entropy-read",
            Operation::ReadFile => "read-file",
        }
    }

    /// Operations that change state outside the process's own memory.
    /// These make up the default table.
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Operation::EnvRead
                | Operation::ClockRead
                | Operation::Sleep
                | Operation::EntropyRead
                | Operation::ReadFile
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            Operation::OpenFileForWrite => "open a file for writing or appending",
            Operation::RemoveFile => "delete a file",
            Operation::SpawnProcess => "start a child process",
            Operation::NetworkConnect => "open a network connection",
            Operation::StdoutWrite => "write to standard output",
            Operation::StderrWrite => "write to standard error",
            Operation::EnvWrite => "set or remove an environment variable",
            Operation::SpawnThread => "start a thread",
            Operation::ExitProcess => "terminate the process",
            Operation::EnvRead => "read an environment variable",
            Operation::ClockRead => "read the wall clock",
            Operation::Sleep => "suspend the calling thread",
            Operation::EntropyRead => "draw random bits",
            Operation::ReadFile => "read a file",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Operation {
    type Err = PurityError;

    fn from_str(s: &str) -> Result<Self> {
        Operation::ALL
            .iter()
            .copied()
            .find(|op| op.id() == s)
            .ok_or_else(|| PurityError::Config(format!("unknown operation '{}'", s)))
    }
}

/// One attempted operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub operation: Operation,
    /// Description of the arguments, e.g. the path or program
    pub detail: String,
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.operation, self.detail)
    }
}

pub type InspectFn = dyn Fn(&Invocation) -> Result<()> + Send + Sync;

/// What happens to a watched operation
#[derive(Clone)]
pub enum Interception {
    /// Refuse the operation
    Deny,
    /// Run a hook that may veto the operation by returning an error
    Inspect(Arc<InspectFn>),
}

impl fmt::Debug for Interception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interception::Deny => f.write_str("Deny"),
            Interception::Inspect(_) => f.write_str("Inspect(..)"),
        }
    }
}

/// Operations watched by a side-effect guard
#[derive(Clone, Debug)]
pub struct OperationTable {
    entries: BTreeMap<Operation, Interception>,
}

impl Default for OperationTable {
    /// The common mutating operations, all denied
    fn default() -> Self {
        Self::denying(Operation::ALL.iter().copied().filter(Operation::is_mutating))
    }
}

impl OperationTable {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Every operation in the catalogue, including reads of ambient state
    pub fn all() -> Self {
        Self::denying(Operation::ALL)
    }

    pub fn denying(operations: impl IntoIterator<Item = Operation>) -> Self {
        Self {
            entries: operations
                .into_iter()
                .map(|op| (op, Interception::Deny))
                .collect(),
        }
    }

    /// Parse operation ids such as `spawn-process`
    pub fn from_ids<S: AsRef<str>>(ids: &[S]) -> Result<Self> {
        let operations = ids
            .iter()
            .map(|id| id.as_ref().parse::<Operation>())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::denying(operations))
    }

    pub fn with(mut self, operation: Operation, interception: Interception) -> Self {
        self.entries.insert(operation, interception);
        self
    }

    pub fn deny(self, operation: Operation) -> Self {
        self.with(operation, Interception::Deny)
    }

    pub fn inspect<F>(self, operation: Operation, hook: F) -> Self
    where
        F: Fn(&Invocation) -> Result<()> + Send + Sync + 'static,
    {
        self.with(operation, Interception::Inspect(Arc::new(hook)))
    }

    pub fn without(mut self, operation: Operation) -> Self {
        self.entries.remove(&operation);
        self
    }

    pub fn get(&self, operation: Operation) -> Option<&Interception> {
        self.entries.get(&operation)
    }

    pub fn contains(&self, operation: Operation) -> bool {
        self.entries.contains_key(&operation)
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A layer on the operation stack. Hooks run on whichever thread performs
/// the operation.
pub trait OperationHook: Send + Sync {
    /// Called before the real operation; an error blocks it
    fn on_operation(&self, invocation: &Invocation) -> Result<()>;
}

type Layers = Vec<(u64, Arc<dyn OperationHook>)>;

static LAYERS: Lazy<RwLock<Layers>> = Lazy::new(|| RwLock::new(Vec::new()));
static NEXT_LAYER: AtomicU64 = AtomicU64::new(0);
static EXCLUSIVE: Lazy<ReentrantMutex<()>> = Lazy::new(|| ReentrantMutex::new(()));

/// Holds the process-wide interception section. Re-entrant on the owning thread.
pub struct ExclusiveSection {
    _guard: ReentrantMutexGuard<'static, ()>,
}

/// Wait until no other thread has operation layers installed, then keep it
/// that way until the returned section is dropped
pub fn exclusive() -> ExclusiveSection {
    ExclusiveSection {
        _guard: EXCLUSIVE.lock(),
    }
}

/// Push `hook` onto the operation stack until the handle is dropped
pub fn install(hook: Arc<dyn OperationHook>) -> LayerHandle {
    let section = exclusive();
    let id = NEXT_LAYER.fetch_add(1, Ordering::Relaxed);
    LAYERS.write().push((id, hook));
    get_metrics().interceptions_installed.inc();
    debug!("Installed operation layer {}", id);
    LayerHandle {
        id,
        _section: section,
    }
}

/// Number of operation layers currently installed
pub fn active_layers() -> usize {
    LAYERS.read().len()
}

/// Removes its operation layer on drop, on every exit path
pub struct LayerHandle {
    id: u64,
    // Released after the layer is gone; the handle stays on its thread
    _section: ExclusiveSection,
}

impl Drop for LayerHandle {
    fn drop(&mut self) {
        let id = self.id;
        LAYERS.write().retain(|(layer, _)| *layer != id);
        get_metrics().interceptions_restored.inc();
        debug!("Removed operation layer {}", id);
    }
}

fn dispatch<T>(
    operation: Operation,
    detail: impl FnOnce() -> String,
    real: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let layers: Vec<Arc<dyn OperationHook>> = LAYERS
        .read()
        .iter()
        .rev()
        .map(|(_, hook)| Arc::clone(hook))
        .collect();
    if !layers.is_empty() {
        let invocation = Invocation {
            operation,
            detail: detail(),
        };
        for hook in layers {
            hook.on_operation(&invocation)?;
        }
    }
    real()
}

/// Create or truncate `path` and write `contents`
pub fn write_file(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<()> {
    let path = path.as_ref();
    dispatch(
        Operation::OpenFileForWrite,
        || path.display().to_string(),
        || Ok(std::fs::write(path, contents)?),
    )
}

pub fn append_file(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<()> {
    let path = path.as_ref();
    dispatch(
        Operation::OpenFileForWrite,
        || format!("{} (append)", path.display()),
        || {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            file.write_all(contents.as_ref())?;
            Ok(())
        },
    )
}

pub fn read_file(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    dispatch(
        Operation::ReadFile,
        || path.display().to_string(),
        || Ok(std::fs::read_to_string(path)?),
    )
}

pub fn remove_file(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    dispatch(
        Operation::RemoveFile,
        || path.display().to_string(),
        || Ok(std::fs::remove_file(path)?),
    )
}

/// Run `program` to completion and collect its output
pub fn run_process(program: &str, args: &[&str]) -> Result<Output> {
    dispatch(
        Operation::SpawnProcess,
        || {
            let mut command = vec![program];
            command.extend_from_slice(args);
            command.join(" ")
        },
        || Ok(Command::new(program).args(args).output()?),
    )
}

pub fn connect(address: &str) -> Result<TcpStream> {
    dispatch(
        Operation::NetworkConnect,
        || address.to_string(),
        || Ok(TcpStream::connect(address)?),
    )
}

pub fn write_stdout(text: &str) -> Result<()> {
    dispatch(
        Operation::StdoutWrite,
        || format!("{} bytes", text.len()),
        || {
            let mut out = std::io::stdout().lock();
            out.write_all(text.as_bytes())?;
            out.flush()?;
            Ok(())
        },
    )
}

pub fn write_stderr(text: &str) -> Result<()> {
    dispatch(
        Operation::StderrWrite,
        || format!("{} bytes", text.len()),
        || {
            let mut err = std::io::stderr().lock();
            err.write_all(text.as_bytes())?;
            Ok(())
        },
    )
}

pub fn env_var(name: &str) -> Result<Option<String>> {
    dispatch(
        Operation::EnvRead,
        || name.to_string(),
        || Ok(std::env::var(name).ok()),
    )
}

pub fn set_env_var(name: &str, value: &str) -> Result<()> {
    dispatch(
        Operation::EnvWrite,
        || name.to_string(),
        || {
            std::env::set_var(name, value);
            Ok(())
        },
    )
}

pub fn remove_env_var(name: &str) -> Result<()> {
    dispatch(
        Operation::EnvWrite,
        || format!("{} (remove)", name),
        || {
            std::env::remove_var(name);
            Ok(())
        },
    )
}

pub fn now() -> Result<DateTime<Utc>> {
    dispatch(Operation::ClockRead, || "utc".to_string(), || Ok(Utc::now()))
}

pub fn sleep(duration: Duration) -> Result<()> {
    dispatch(
        Operation::Sleep,
        || format!("{:?}", duration),
        || {
            std::thread::sleep(duration);
            Ok(())
        },
    )
}

/// 64 random bits from the v4 UUID generator
pub fn random_u64() -> Result<u64> {
    dispatch(
        Operation::EntropyRead,
        || "64 bits".to_string(),
        || Ok(uuid::Uuid::new_v4().as_u128() as u64),
    )
}

pub fn spawn_thread<F>(name: &str, work: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    dispatch(
        Operation::SpawnThread,
        || name.to_string(),
        || {
            Ok(std::thread::Builder::new()
                .name(name.to_string())
                .spawn(work)?)
        },
    )
}

/// Terminate the process; returns only when refused
pub fn exit(code: i32) -> Result<Infallible> {
    dispatch(
        Operation::ExitProcess,
        || format!("code {}", code),
        || -> Result<Infallible> { std::process::exit(code) },
    )
}
