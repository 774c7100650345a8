//! Modules compiled into the binary
//!
//! Builtin descriptors are plain `module.yaml` documents embedded at build
//! time and go through the same loader as any other source.

use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinDescriptor {
    pub name: String,
    pub descriptor: Arc<str>,
}

/// Table of embedded descriptors, handed to the resolver at construction
#[derive(Debug, Clone, Default)]
pub struct BuiltinTable {
    entries: Vec<BuiltinDescriptor>,
}

const STANDARD: &[(&str, &str)] = &[
    ("tflint", include_str!("../../builtin/tflint.yaml")),
    ("checkov", include_str!("../../builtin/checkov.yaml")),
    ("gitleaks", include_str!("../../builtin/gitleaks.yaml")),
    ("trivy", include_str!("../../builtin/trivy.yaml")),
    (
        "terraform-docs",
        include_str!("../../builtin/terraform-docs.yaml"),
    ),
    ("hadolint", include_str!("../../builtin/hadolint.yaml")),
];

impl BuiltinTable {
    /// The tool modules shipped with every build
    pub fn standard() -> Self {
        Self::new(
            STANDARD
                .iter()
                .map(|(name, text)| BuiltinDescriptor {
                    name: (*name).to_string(),
                    descriptor: Arc::from(*text),
                })
                .collect(),
        )
    }

    pub fn new(entries: Vec<BuiltinDescriptor>) -> Self {
        Self { entries }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a descriptor, mostly useful for tests and embedders
    pub fn with(mut self, name: impl Into<String>, descriptor: impl Into<Arc<str>>) -> Self {
        self.entries.push(BuiltinDescriptor {
            name: name.into(),
            descriptor: descriptor.into(),
        });
        self
    }

    pub fn entries(&self) -> &[BuiltinDescriptor] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
