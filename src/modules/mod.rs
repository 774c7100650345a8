//! Module discovery, loading, trust and execution

pub mod arguments;
pub mod backends;
pub mod builtin;
pub mod descriptor;
pub mod dispatcher;
pub mod error;
pub mod git;
pub mod loader;
pub mod manager;
pub mod registry;
pub mod resolver;
pub mod scaffold;
pub mod trust;
pub mod types;
pub mod validator;

// Re-export commonly used types
pub use arguments::{validate_arguments, ArgValue, ModuleArgs, ValidatedArgs};
pub use builtin::BuiltinTable;
pub use dispatcher::{ExecutionDispatcher, ExecutionOutput, RunContext, RunRequest, RunState};
pub use error::*;
pub use loader::MetadataLoader;
pub use manager::{Diagnostic, LoadReport, Manager};
pub use registry::{ModuleFilter, ModuleRegistry, Precedence, ShadowedModule};
pub use resolver::{Candidate, CandidateSource, SourceResolver};
pub use trust::{TrustEvaluator, TrustPolicy};
pub use types::*;
