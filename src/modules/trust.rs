use crate::config::ModuleConfig;
use crate::modules::types::{Module, SourceKind};
use std::collections::BTreeSet;

/// Which non-builtin modules may run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustPolicy {
    pub allow_untrusted: bool,
    pub allowed_modules: BTreeSet<String>,
}

impl TrustPolicy {
    pub fn from_config(config: &ModuleConfig) -> Self {
        Self {
            allow_untrusted: config.allow_untrusted,
            allowed_modules: config.trusted_modules.iter().cloned().collect(),
        }
    }

    pub fn allow(mut self, name: impl Into<String>) -> Self {
        self.allowed_modules.insert(name.into());
        self
    }

    /// Whether the policy alone lets a module with this name run
    pub fn permits(&self, name: &str) -> bool {
        self.allow_untrusted || self.allowed_modules.contains(name)
    }
}

/// Computes the derived `trusted` flag of loaded modules
#[derive(Debug, Clone, Default)]
pub struct TrustEvaluator {
    policy: TrustPolicy,
}

impl TrustEvaluator {
    pub fn new(policy: TrustPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &TrustPolicy {
        &self.policy
    }

    /// Builtin modules are trusted unconditionally; everything else needs the policy
    pub fn evaluate(&self, module: &Module) -> bool {
        module.source == SourceKind::Builtin || self.policy.permits(module.name())
    }

    pub fn classify(&self, module: &mut Module) {
        module.trusted = self.evaluate(module);
    }
}
