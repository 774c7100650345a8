//! Owns discovery, loading and the registry for one invocation

use crate::config::ModuleConfig;
use crate::modules::builtin::BuiltinTable;
use crate::modules::error::{DiscoveryError, ModuleError, NotFoundError, ValidationError};
use crate::modules::loader::MetadataLoader;
use crate::modules::registry::{ModuleFilter, ModuleRegistry, Precedence, ShadowedModule};
use crate::modules::resolver::SourceResolver;
use crate::modules::trust::{TrustEvaluator, TrustPolicy};
use crate::modules::types::Module;
use futures::future::join_all;
use std::fmt;
use tracing::{debug, info, warn};

/// Something worth telling the user about a load, none of it fatal
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    Discovery(DiscoveryError),
    Invalid(ValidationError),
    Warning { location: String, message: String },
    Shadowed(ShadowedModule),
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Discovery(e) => write!(f, "{e}"),
            Diagnostic::Invalid(e) => write!(f, "{e}"),
            Diagnostic::Warning { location, message } => write!(f, "{location}: {message}"),
            Diagnostic::Shadowed(s) => write!(
                f,
                "module '{}' from {} is shadowed by {}",
                s.name, s.loser_location, s.winner_location
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub diagnostics: Vec<Diagnostic>,
    pub loaded: usize,
}

impl LoadReport {
    pub fn discovery_errors(&self) -> impl Iterator<Item = &DiscoveryError> {
        self.diagnostics.iter().filter_map(|d| match d {
            Diagnostic::Discovery(e) => Some(e),
            _ => None,
        })
    }

    pub fn validation_errors(&self) -> impl Iterator<Item = &ValidationError> {
        self.diagnostics.iter().filter_map(|d| match d {
            Diagnostic::Invalid(e) => Some(e),
            _ => None,
        })
    }

    pub fn shadowed(&self) -> impl Iterator<Item = &ShadowedModule> {
        self.diagnostics.iter().filter_map(|d| match d {
            Diagnostic::Shadowed(s) => Some(s),
            _ => None,
        })
    }

    pub fn shadowed_for<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ShadowedModule> {
        self.shadowed().filter(move |s| s.name == name)
    }

    /// Discovery failures other than absent optional directories
    pub fn has_problems(&self) -> bool {
        self.diagnostics.iter().any(|d| match d {
            Diagnostic::Discovery(DiscoveryError::MissingDirectory { .. }) => false,
            Diagnostic::Discovery(_) | Diagnostic::Invalid(_) => true,
            _ => false,
        })
    }
}

pub struct Manager {
    resolver: SourceResolver,
    loader: MetadataLoader,
    trust: TrustEvaluator,
    precedence: Precedence,
    registry: ModuleRegistry,
    report: Option<LoadReport>,
}

impl Manager {
    pub fn new(config: &ModuleConfig) -> Self {
        Self::with_builtins(config, BuiltinTable::standard())
    }

    pub fn with_builtins(config: &ModuleConfig, builtins: BuiltinTable) -> Self {
        Self::with_resolver(config, SourceResolver::from_config(config, builtins))
    }

    /// Use caller-supplied sources; trust and precedence still come from `config`
    pub fn with_resolver(config: &ModuleConfig, resolver: SourceResolver) -> Self {
        Self {
            resolver,
            loader: MetadataLoader::new(),
            trust: TrustEvaluator::new(TrustPolicy::from_config(config)),
            precedence: Precedence::new(&config.precedence),
            registry: ModuleRegistry::new(),
            report: None,
        }
    }

    /// Discover, parse, classify and register every module
    ///
    /// Bad sources and bad descriptors end up in the report; only a second
    /// call fails.
    pub async fn load_modules(&mut self) -> Result<&LoadReport, ModuleError> {
        if self.report.is_some() {
            return Err(ModuleError::AlreadyLoaded);
        }

        let resolution = self.resolver.resolve().await;
        let mut diagnostics: Vec<Diagnostic> = resolution
            .diagnostics
            .into_iter()
            .map(Diagnostic::Discovery)
            .collect();

        let loader = &self.loader;
        let results = join_all(resolution.candidates.iter().map(|candidate| async move {
            (candidate.sequence, loader.load_candidate(candidate).await)
        }))
        .await;

        let mut loaded = Vec::with_capacity(results.len());
        for ((sequence, result), candidate) in results.into_iter().zip(&resolution.candidates) {
            match result {
                Ok(mut module) => {
                    for message in module.warnings.drain(..) {
                        diagnostics.push(Diagnostic::Warning {
                            location: candidate.location(),
                            message,
                        });
                    }
                    self.trust.classify(&mut module.module);
                    loaded.push((sequence, module.module));
                }
                Err(e) => {
                    warn!("Skipping invalid module: {}", e);
                    diagnostics.push(Diagnostic::Invalid(e));
                }
            }
        }

        let (registry, shadowed) = ModuleRegistry::merge(loaded, &self.precedence);
        for entry in shadowed {
            debug!(
                "Module {} from {} shadowed by {}",
                entry.name, entry.loser_location, entry.winner_location
            );
            diagnostics.push(Diagnostic::Shadowed(entry));
        }

        info!(
            "Loaded {} modules ({} diagnostics)",
            registry.len(),
            diagnostics.len()
        );

        self.registry = registry;
        let report = self.report.insert(LoadReport {
            diagnostics,
            loaded: self.registry.len(),
        });
        Ok(report)
    }

    pub fn get_module(&self, name: &str) -> Result<&Module, NotFoundError> {
        self.registry.get_module(name)
    }

    pub fn list_modules(&self, filter: &ModuleFilter) -> Vec<&Module> {
        self.registry.list_modules(filter)
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// `None` until `load_modules` has run
    pub fn report(&self) -> Option<&LoadReport> {
        self.report.as_ref()
    }

    pub fn trust_policy(&self) -> &TrustPolicy {
        self.trust.policy()
    }
}
