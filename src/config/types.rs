/// Core types shared by every guard: violation records, enforcement modes and the error type
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Purity dimension a violation belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ViolationKind {
    /// An argument differed from its pre-call snapshot
    Mutation,
    /// Replayed invocations disagreed
    Determinism,
    /// A forbidden ambient binding was read or written
    NamespaceAccess,
    /// A watched process-affecting operation was invoked
    SideEffect,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::Mutation => "mutation",
            ViolationKind::Determinism => "determinism",
            ViolationKind::NamespaceAccess => "namespace-access",
            ViolationKind::SideEffect => "side-effect",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guard families exposed by the crate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GuardKind {
    ImmutableArguments,
    EnforceImmutable,
    EnforceDeterministic,
    ForbidGlobalNames,
    ForbidGlobals,
    ForbidSideEffects,
}

impl GuardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardKind::ImmutableArguments => "immutable_arguments",
            GuardKind::EnforceImmutable => "enforce_immutable",
            GuardKind::EnforceDeterministic => "enforce_deterministic",
            GuardKind::ForbidGlobalNames => "forbid_global_names",
            GuardKind::ForbidGlobals => "forbid_globals",
            GuardKind::ForbidSideEffects => "forbid_side_effects",
        }
    }
}

impl fmt::Display for GuardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a guard does once it has found a violation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Enforcement {
    /// Replace the call outcome with a violation error
    #[default]
    Raise,
    /// Log the violation and hand back the original outcome
    Warn,
}

impl Enforcement {
    pub fn from_warn_only(warn_only: bool) -> Self {
        if warn_only {
            Enforcement::Warn
        } else {
            Enforcement::Raise
        }
    }

    pub fn is_warn(&self) -> bool {
        matches!(self, Enforcement::Warn)
    }
}

/// A single detected breach of one purity dimension.
///
/// Created at detection time, then either raised inside a [`PurityError`] or
/// rendered into a warning. Never persisted by the guards themselves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    /// Offending argument position, identifier or operation
    pub subject: String,
    /// Human-readable description
    pub description: String,
    /// Name of the guarded function
    pub function: String,
}

impl Violation {
    pub fn new(
        kind: ViolationKind,
        function: impl Into<String>,
        subject: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            subject: subject.into(),
            description: description.into(),
            function: function.into(),
        }
    }

    /// Wrap the violation into the error variant matching its kind
    pub fn into_error(self) -> PurityError {
        match self.kind {
            ViolationKind::Mutation => PurityError::Mutation(self),
            ViolationKind::Determinism => PurityError::Determinism(self),
            ViolationKind::NamespaceAccess => PurityError::NamespaceAccess(self),
            ViolationKind::SideEffect => PurityError::SideEffect(self),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in `{}` at {}: {}", self.kind, self.function, self.subject, self.description)
    }
}

/// Errors surfaced by guarded calls
#[derive(Error, Debug)]
pub enum PurityError {
    #[error("Mutation violation: {0}")]
    Mutation(Violation),

    #[error("Determinism violation: {0}")]
    Determinism(Violation),

    #[error("Namespace access violation: {0}")]
    NamespaceAccess(Violation),

    #[error("Side-effect violation: {0}")]
    SideEffect(Violation),

    /// The wrapped call failed and a violation was found during the same call
    #[error("{source} [{violation}]")]
    Annotated {
        source: Box<PurityError>,
        violation: Violation,
    },

    /// Error raised by guarded code itself
    #[error("{kind}: {message}")]
    Raised { kind: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PurityError {
    /// Convenience constructor for errors raised by guarded code
    pub fn raised(kind: impl Into<String>, message: impl Into<String>) -> Self {
        PurityError::Raised {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::raised("TypeError", message)
    }

    pub fn name_error(name: &str) -> Self {
        Self::raised("NameError", format!("name '{}' is not defined", name))
    }

    /// The violation carried by this error, if any
    pub fn violation(&self) -> Option<&Violation> {
        match self {
            PurityError::Mutation(v)
            | PurityError::Determinism(v)
            | PurityError::NamespaceAccess(v)
            | PurityError::SideEffect(v) => Some(v),
            PurityError::Annotated { violation, .. } => Some(violation),
            _ => None,
        }
    }

    pub fn violation_kind(&self) -> Option<ViolationKind> {
        self.violation().map(|v| v.kind)
    }

    pub fn is_violation(&self) -> bool {
        self.violation().is_some()
    }

    /// Stable label used when comparing failed runs
    pub fn label(&self) -> String {
        match self {
            PurityError::Mutation(_) => "Mutation".to_string(),
            PurityError::Determinism(_) => "Determinism".to_string(),
            PurityError::NamespaceAccess(_) => "NamespaceAccess".to_string(),
            PurityError::SideEffect(_) => "SideEffect".to_string(),
            PurityError::Annotated { source, .. } => source.label(),
            PurityError::Raised { kind, .. } => kind.clone(),
            PurityError::Config(_) => "Config".to_string(),
            PurityError::Io(e) => format!("Io({:?})", e.kind()),
            PurityError::Json(_) => "Json".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PurityError>;
