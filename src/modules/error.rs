use crate::modules::types::SourceKind;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A single problem found while validating a descriptor or an invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: String,
    pub message: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Umbrella error for manager and dispatcher operations
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Trust(#[from] TrustError),

    #[error(transparent)]
    Argument(#[from] ArgumentError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Scaffold(#[from] ScaffoldError),

    #[error("modules have already been loaded for this invocation")]
    AlreadyLoaded,
}

/// Non-fatal failure of one discovery source
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiscoveryError {
    #[error("{kind} module directory {} does not exist", path.display())]
    MissingDirectory { kind: SourceKind, path: PathBuf },

    #[error("cannot read {kind} module directory {}: {error}", path.display())]
    Unreadable {
        kind: SourceKind,
        path: PathBuf,
        error: String,
    },

    #[error("cannot determine home directory for user modules")]
    HomeUnavailable,

    #[error("invalid git repository reference {url:?}: {reason}")]
    InvalidGitReference { url: String, reason: String },

    #[error("git {operation} failed for {url}: {error}")]
    Git {
        url: String,
        operation: String,
        error: String,
    },
}

impl DiscoveryError {
    pub fn kind(&self) -> SourceKind {
        match self {
            DiscoveryError::MissingDirectory { kind, .. }
            | DiscoveryError::Unreadable { kind, .. } => *kind,
            DiscoveryError::HomeUnavailable => SourceKind::User,
            DiscoveryError::InvalidGitReference { .. } | DiscoveryError::Git { .. } => {
                SourceKind::Git
            }
        }
    }
}

/// Every violation found in one descriptor
#[derive(Error, Debug, Clone, PartialEq)]
#[error("descriptor {descriptor} is invalid: {}", join_violations(violations))]
pub struct ValidationError {
    pub descriptor: String,
    pub violations: Vec<Violation>,
}

impl ValidationError {
    pub fn mentions(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotFoundError {
    #[error("module not found: {name}")]
    Module { name: String },

    #[error("command '{command}' not found in module '{module}'")]
    Command { module: String, command: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error(
    "module '{module}' from {kind} source is not trusted; allow it with --allow-untrusted or list it under trusted_modules"
)]
pub struct TrustError {
    pub module: String,
    pub kind: SourceKind,
}

/// Every violation found in one set of invocation arguments
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid arguments for {module} {command}: {}", join_violations(violations))]
pub struct ArgumentError {
    pub module: String,
    pub command: String,
    pub violations: Vec<Violation>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("{module} {command} exited with code {exit_code}: {stderr}")]
    NonZeroExit {
        module: String,
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("{backend} backend failed for {module} {command}: {cause}")]
    Backend {
        module: String,
        command: String,
        backend: String,
        cause: BackendError,
    },

    #[error("{module} is not allowed to {action} while sandboxed")]
    Sandbox { module: String, action: String },
}

impl ExecutionError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecutionError::NonZeroExit { exit_code, .. } => Some(*exit_code),
            ExecutionError::Backend { .. } | ExecutionError::Sandbox { .. } => None,
        }
    }
}

/// Failure reported by a container runtime or pipeline engine collaborator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("{binary} is not installed or not on PATH")]
    NotInstalled { binary: String },

    #[error("failed to start {binary}: {error}")]
    Spawn { binary: String, error: String },

    #[error("I/O error while waiting for {binary}: {error}")]
    Io { binary: String, error: String },

    #[error("cancelled")]
    Cancelled,

    #[error("timed out after {}s", after.as_secs())]
    TimedOut { after: Duration },
}

#[derive(Error, Debug)]
pub enum ScaffoldError {
    #[error("invalid module name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("module descriptor already exists at {}", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("I/O error during {operation}: {error}")]
    Io { operation: String, error: String },

    #[error("template error: {0}")]
    Template(String),
}

impl From<handlebars::RenderError> for ScaffoldError {
    fn from(err: handlebars::RenderError) -> Self {
        ScaffoldError::Template(err.to_string())
    }
}

impl From<handlebars::TemplateError> for ScaffoldError {
    fn from(err: handlebars::TemplateError) -> Self {
        ScaffoldError::Template(err.to_string())
    }
}
