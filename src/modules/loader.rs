use crate::modules::descriptor::RawDescriptor;
use crate::modules::error::{ValidationError, Violation};
use crate::modules::resolver::{Candidate, CandidateOrigin};
use crate::modules::types::{Module, SourceKind};
use crate::modules::validator::ModuleValidator;
use chrono::Utc;
use std::path::PathBuf;
use tracing::debug;

/// A module freshly parsed from its descriptor, not yet trust-classified
#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub module: Module,
    pub warnings: Vec<String>,
}

/// Parses raw descriptors into validated `Module` values
#[derive(Debug, Clone, Default)]
pub struct MetadataLoader {
    validator: ModuleValidator,
}

impl MetadataLoader {
    pub fn new() -> Self {
        Self {
            validator: ModuleValidator::new(),
        }
    }

    /// Read and parse the descriptor behind a discovered candidate
    pub async fn load_candidate(&self, candidate: &Candidate) -> Result<LoadedModule, ValidationError> {
        match &candidate.origin {
            CandidateOrigin::Builtin { descriptor, .. } => {
                self.load_str(descriptor, candidate.source, None, &candidate.location())
            }
            CandidateOrigin::Generated {
                descriptor,
                module_dir,
                ..
            } => self.load_str(
                descriptor,
                candidate.source,
                Some(module_dir.clone()),
                &candidate.location(),
            ),
            CandidateOrigin::File {
                descriptor_path,
                module_dir,
            } => {
                let text = tokio::fs::read_to_string(descriptor_path)
                    .await
                    .map_err(|e| ValidationError {
                        descriptor: candidate.location(),
                        violations: vec![Violation::new(
                            "descriptor",
                            format!("cannot read descriptor: {e}"),
                        )],
                    })?;
                self.load_str(
                    &text,
                    candidate.source,
                    Some(module_dir.clone()),
                    &candidate.location(),
                )
            }
        }
    }

    /// Parse one descriptor, collecting every violation it contains
    pub fn load_str(
        &self,
        text: &str,
        source: SourceKind,
        path: Option<PathBuf>,
        location: &str,
    ) -> Result<LoadedModule, ValidationError> {
        let raw = RawDescriptor::from_yaml(text).map_err(|e| ValidationError {
            descriptor: location.to_string(),
            violations: vec![Violation::new(
                "descriptor",
                format!("not a valid YAML module descriptor: {e}"),
            )],
        })?;

        let validated = self
            .validator
            .validate(&raw)
            .map_err(|result| ValidationError {
                descriptor: location.to_string(),
                violations: result.errors,
            })?;

        debug!(
            "Loaded module {} {} from {}",
            validated.metadata.name, validated.metadata.version, location
        );

        Ok(LoadedModule {
            module: Module {
                metadata: validated.metadata,
                spec: validated.spec,
                source,
                trusted: false,
                path,
                loaded_at: Utc::now(),
            },
            warnings: validated.warnings,
        })
    }
}
