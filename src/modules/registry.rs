//! Name-unique collection of the modules that survived loading

use crate::modules::error::NotFoundError;
use crate::modules::types::{Module, ModuleType, SourceKind};
use serde::Serialize;
use std::collections::BTreeMap;

/// Ranking of sources when two of them provide the same module name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precedence {
    order: Vec<SourceKind>,
}

impl Precedence {
    /// Listed sources win in order; unlisted ones follow in default order
    pub fn new(preferred: &[SourceKind]) -> Self {
        let mut order = Vec::with_capacity(SourceKind::ALL.len());
        for kind in preferred.iter().chain(SourceKind::ALL.iter()) {
            if !order.contains(kind) {
                order.push(*kind);
            }
        }
        Self { order }
    }

    pub fn rank(&self, kind: SourceKind) -> usize {
        self.order
            .iter()
            .position(|k| *k == kind)
            .unwrap_or(self.order.len())
    }

    pub fn order(&self) -> &[SourceKind] {
        &self.order
    }
}

impl Default for Precedence {
    fn default() -> Self {
        Self::new(&SourceKind::ALL)
    }
}

/// A module that lost a name collision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShadowedModule {
    pub name: String,
    pub winner: SourceKind,
    pub winner_location: String,
    pub loser: SourceKind,
    pub loser_location: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleFilter {
    pub module_type: Option<ModuleType>,
    pub source: Option<SourceKind>,
    pub trusted: Option<bool>,
}

impl ModuleFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, module_type: ModuleType) -> Self {
        self.module_type = Some(module_type);
        self
    }

    pub fn with_source(mut self, source: SourceKind) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_trusted(mut self, trusted: bool) -> Self {
        self.trusted = Some(trusted);
        self
    }

    pub fn matches(&self, module: &Module) -> bool {
        self.module_type.map_or(true, |t| module.module_type() == t)
            && self.source.map_or(true, |s| module.source == s)
            && self.trusted.map_or(true, |t| module.trusted == t)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Module>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from loaded modules tagged with their discovery sequence
    ///
    /// The best ranked source wins a name; within one source the earliest
    /// discovered module wins. Every loser is reported.
    pub fn merge(
        mut loaded: Vec<(usize, Module)>,
        precedence: &Precedence,
    ) -> (Self, Vec<ShadowedModule>) {
        loaded.sort_by_key(|(sequence, module)| (precedence.rank(module.source), *sequence));

        let mut modules: BTreeMap<String, Module> = BTreeMap::new();
        let mut shadowed = Vec::new();

        for (_, module) in loaded {
            match modules.get(module.name()) {
                Some(winner) => shadowed.push(ShadowedModule {
                    name: module.name().to_string(),
                    winner: winner.source,
                    winner_location: winner.location(),
                    loser: module.source,
                    loser_location: module.location(),
                }),
                None => {
                    modules.insert(module.name().to_string(), module);
                }
            }
        }

        (Self { modules }, shadowed)
    }

    pub fn get_module(&self, name: &str) -> Result<&Module, NotFoundError> {
        self.modules.get(name).ok_or_else(|| NotFoundError::Module {
            name: name.to_string(),
        })
    }

    /// Matching modules, ordered by name
    pub fn list_modules(&self, filter: &ModuleFilter) -> Vec<&Module> {
        self.modules.values().filter(|m| filter.matches(m)).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.modules.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
