use crate::modules::arguments::flag_env_name;
use crate::modules::descriptor::{
    RawCommand, RawDagger, RawDescriptor, RawDocker, RawFlag, RawMetadata, RawSpec,
};
use crate::modules::error::Violation;
use crate::modules::types::{
    Backend, Command, DaggerConfig, DockerConfig, Flag, FlagType, ModuleMetadata, ModuleSpec,
    ModuleType, Permission, VolumeKind, VolumeMount, API_VERSION, DESCRIPTOR_KIND,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("name pattern is valid"));

/// Names of modules, commands and flags share one syntax
pub fn check_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("must not be empty".to_string());
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(format!(
            "'{name}' must start with a letter or digit and contain only letters, digits, '.', '_' or '-'"
        ));
    }
    Ok(())
}

/// Accumulates every problem instead of stopping at the first one
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub passed: bool,
    pub errors: Vec<Violation>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            passed: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        let violation = Violation::new(field, message);
        debug!("Validation error: {}", violation);
        self.errors.push(violation);
        self.passed = false;
    }

    pub fn add_warning(&mut self, warning: String) {
        debug!("Validation warning: {}", warning);
        self.warnings.push(warning);
    }

    pub fn merge(&mut self, other: ValidationResult) {
        if !other.passed {
            self.passed = false;
        }
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Descriptor that passed every rule, ready to become a `Module`
#[derive(Debug, Clone)]
pub struct ValidatedDescriptor {
    pub metadata: ModuleMetadata,
    pub spec: ModuleSpec,
    pub warnings: Vec<String>,
}

/// Schema rules for module descriptors
#[derive(Debug, Clone, Default)]
pub struct ModuleValidator;

impl ModuleValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a raw descriptor, returning every violation on failure
    pub fn validate(
        &self,
        raw: &RawDescriptor,
    ) -> Result<ValidatedDescriptor, ValidationResult> {
        let mut result = ValidationResult::new();

        if let Some(api_version) = &raw.api_version {
            if api_version != API_VERSION {
                result.add_error(
                    "apiVersion",
                    format!("unsupported apiVersion '{api_version}' (expected {API_VERSION})"),
                );
            }
        }
        if let Some(kind) = &raw.kind {
            if kind != DESCRIPTOR_KIND {
                result.add_error(
                    "kind",
                    format!("unsupported kind '{kind}' (expected {DESCRIPTOR_KIND})"),
                );
            }
        }

        let metadata = match &raw.metadata {
            Some(metadata) => self.validate_metadata(metadata, &mut result),
            None => {
                result.add_error("metadata", "metadata section is required");
                None
            }
        };

        let spec = match &raw.spec {
            Some(spec) => self.validate_spec(spec, &mut result),
            None => {
                result.add_error("spec", "spec section is required");
                None
            }
        };

        match (metadata, spec) {
            (Some(metadata), Some(spec)) if result.passed => Ok(ValidatedDescriptor {
                metadata,
                spec,
                warnings: result.warnings,
            }),
            _ => Err(result),
        }
    }

    fn validate_metadata(
        &self,
        raw: &RawMetadata,
        result: &mut ValidationResult,
    ) -> Option<ModuleMetadata> {
        let name = match raw.name.as_deref() {
            None | Some("") => {
                result.add_error("metadata.name", "name is required");
                None
            }
            Some(name) => match check_name(name) {
                Ok(()) => Some(name.to_string()),
                Err(reason) => {
                    result.add_error("metadata.name", reason);
                    None
                }
            },
        };

        let version = match raw.version.as_deref() {
            None | Some("") => {
                result.add_error("metadata.version", "version is required");
                None
            }
            Some(version) => Some(version.to_string()),
        };

        let mut seen = HashSet::new();
        for tag in &raw.tags {
            if tag.trim().is_empty() {
                result.add_error("metadata.tags", "tags must not be empty");
            } else if !seen.insert(tag.as_str()) {
                result.add_error("metadata.tags", format!("duplicate tag '{tag}'"));
            }
        }

        if raw.description.trim().is_empty() {
            result.add_warning("metadata.description is empty".to_string());
        }

        Some(ModuleMetadata {
            name: name?,
            version: version?,
            description: raw.description.clone(),
            author: raw.author.clone(),
            tags: raw.tags.clone(),
            labels: raw.labels.clone(),
        })
    }

    fn validate_spec(&self, raw: &RawSpec, result: &mut ValidationResult) -> Option<ModuleSpec> {
        let module_type = match raw.module_type.as_deref() {
            None | Some("") => {
                result.add_error("spec.type", "type is required (docker or dagger)");
                None
            }
            Some(value) => match value.parse::<ModuleType>() {
                Ok(module_type) => Some(module_type),
                Err(reason) => {
                    result.add_error("spec.type", reason);
                    None
                }
            },
        };

        let backend = match module_type {
            Some(ModuleType::Docker) => {
                if raw.dagger.is_some() {
                    result.add_error(
                        "spec.dagger",
                        "dagger configuration is not allowed for type docker",
                    );
                }
                match &raw.docker {
                    Some(docker) => self.validate_docker(docker, result),
                    None => {
                        result.add_error(
                            "spec.docker",
                            "docker configuration is required for type docker",
                        );
                        None
                    }
                }
            }
            Some(ModuleType::Dagger) => {
                if raw.docker.is_some() {
                    result.add_error(
                        "spec.docker",
                        "docker configuration is not allowed for type dagger",
                    );
                }
                match &raw.dagger {
                    Some(dagger) => self.validate_dagger(dagger, result),
                    None => {
                        result.add_error(
                            "spec.dagger",
                            "dagger configuration is required for type dagger",
                        );
                        None
                    }
                }
            }
            None => None,
        };

        if raw.commands.is_empty() {
            result.add_error("spec.commands", "at least one command is required");
        }
        let mut command_names = HashSet::new();
        let mut commands = Vec::with_capacity(raw.commands.len());
        for (index, command) in raw.commands.iter().enumerate() {
            if let Some(name) = command.name.as_deref() {
                if !command_names.insert(name) {
                    result.add_error(
                        format!("spec.commands[{index}].name"),
                        format!("duplicate command '{name}'"),
                    );
                }
            }
            if let Some(command) = self.validate_command(index, command, result) {
                commands.push(command);
            }
        }

        let mut permissions = Vec::with_capacity(raw.permissions.len());
        for (index, permission) in raw.permissions.iter().enumerate() {
            match permission.parse::<Permission>() {
                Ok(p) if permissions.contains(&p) => {
                    result.add_warning(format!("permission '{p}' is listed more than once"));
                }
                Ok(p) => permissions.push(p),
                Err(reason) => result.add_error(format!("spec.permissions[{index}]"), reason),
            }
        }

        for (index, dependency) in raw.dependencies.iter().enumerate() {
            if dependency.trim().is_empty() {
                result.add_error(
                    format!("spec.dependencies[{index}]"),
                    "dependency must not be empty",
                );
            }
        }

        Some(ModuleSpec {
            backend: backend?,
            commands,
            dependencies: raw.dependencies.clone(),
            permissions,
        })
    }

    fn validate_docker(
        &self,
        raw: &RawDocker,
        result: &mut ValidationResult,
    ) -> Option<Backend> {
        let image = match raw.image.as_deref().map(str::trim) {
            None | Some("") => {
                result.add_error("spec.docker.image", "image is required");
                None
            }
            Some(image) if image.contains(char::is_whitespace) => {
                result.add_error(
                    "spec.docker.image",
                    format!("image reference '{image}' must not contain whitespace"),
                );
                None
            }
            Some(image) => Some(image.to_string()),
        };

        let mut volumes = Vec::with_capacity(raw.volumes.len());
        for (index, volume) in raw.volumes.iter().enumerate() {
            let field = format!("spec.docker.volumes[{index}]");
            let kind = match volume.kind.as_deref() {
                None => Some(VolumeKind::Bind),
                Some(kind) => match kind.parse::<VolumeKind>() {
                    Ok(kind) => Some(kind),
                    Err(reason) => {
                        result.add_error(format!("{field}.type"), reason);
                        None
                    }
                },
            };
            let target = match volume.target.as_deref() {
                Some(target) if target.starts_with('/') => Some(target.to_string()),
                Some(target) => {
                    result.add_error(
                        format!("{field}.target"),
                        format!("target '{target}' must be an absolute container path"),
                    );
                    None
                }
                None => {
                    result.add_error(format!("{field}.target"), "target is required");
                    None
                }
            };
            let source = match (volume.source.as_deref(), kind) {
                (Some(source), _) if !source.is_empty() => Some(source.to_string()),
                (_, Some(VolumeKind::Tmpfs)) => Some(String::new()),
                _ => {
                    result.add_error(format!("{field}.source"), "source is required");
                    None
                }
            };
            if let (Some(source), Some(target), Some(kind)) = (source, target, kind) {
                volumes.push(VolumeMount {
                    source,
                    target,
                    kind,
                });
            }
        }

        Some(Backend::Docker(DockerConfig {
            image: image?,
            entrypoint: raw.entrypoint.clone(),
            working_dir: raw.working_dir.clone().filter(|dir| !dir.is_empty()),
            env: raw.env.clone(),
            volumes,
        }))
    }

    fn validate_dagger(
        &self,
        raw: &RawDagger,
        result: &mut ValidationResult,
    ) -> Option<Backend> {
        let module = match raw.module.as_deref().map(str::trim) {
            None | Some("") => {
                result.add_error("spec.dagger.module", "module reference is required");
                None
            }
            Some(module) => Some(module.to_string()),
        };
        let function = raw.function.clone().filter(|f| !f.trim().is_empty());

        Some(Backend::Dagger(DaggerConfig {
            module: module?,
            function,
        }))
    }

    fn validate_command(
        &self,
        index: usize,
        raw: &RawCommand,
        result: &mut ValidationResult,
    ) -> Option<Command> {
        let field = format!("spec.commands[{index}]");
        let name = match raw.name.as_deref() {
            None | Some("") => {
                result.add_error(format!("{field}.name"), "command name is required");
                None
            }
            Some(name) => match check_name(name) {
                Ok(()) => Some(name.to_string()),
                Err(reason) => {
                    result.add_error(format!("{field}.name"), reason);
                    None
                }
            },
        };

        let mut flag_names = HashSet::new();
        let mut env_names: HashMap<String, &str> = HashMap::new();
        let mut flags = Vec::with_capacity(raw.flags.len());
        for (flag_index, flag) in raw.flags.iter().enumerate() {
            let flag_field = format!("{field}.flags[{flag_index}]");
            if let Some(flag_name) = flag.name.as_deref() {
                if !flag_names.insert(flag_name) {
                    result.add_error(
                        format!("{flag_field}.name"),
                        format!("duplicate flag '{flag_name}'"),
                    );
                } else if let Some(earlier) =
                    env_names.insert(flag_env_name(flag_name), flag_name)
                {
                    result.add_error(
                        format!("{flag_field}.name"),
                        format!(
                            "flag '{flag_name}' and flag '{earlier}' both map to {}",
                            flag_env_name(flag_name)
                        ),
                    );
                }
            }
            if let Some(flag) = self.validate_flag(&flag_field, flag, result) {
                flags.push(flag);
            }
        }

        Some(Command {
            name: name?,
            description: raw.description.clone(),
            usage: raw.usage.clone(),
            flags,
            examples: raw.examples.clone(),
        })
    }

    fn validate_flag(
        &self,
        field: &str,
        raw: &RawFlag,
        result: &mut ValidationResult,
    ) -> Option<Flag> {
        let name = match raw.name.as_deref() {
            None | Some("") => {
                result.add_error(format!("{field}.name"), "flag name is required");
                None
            }
            Some(name) => match check_name(name) {
                Ok(()) => Some(name.to_string()),
                Err(reason) => {
                    result.add_error(format!("{field}.name"), reason);
                    None
                }
            },
        };

        let flag_type = match raw.flag_type.as_deref() {
            None | Some("") => {
                result.add_error(format!("{field}.type"), "flag type is required");
                None
            }
            Some(value) => match value.parse::<FlagType>() {
                Ok(flag_type) => Some(flag_type),
                Err(reason) => {
                    result.add_error(format!("{field}.type"), reason);
                    None
                }
            },
        };

        if let Some(short) = &raw.short {
            if short.chars().count() != 1 || !short.chars().all(|c| c.is_ascii_alphanumeric()) {
                result.add_error(
                    format!("{field}.short"),
                    format!("short name '{short}' must be a single letter or digit"),
                );
            }
        }

        if !raw.enum_values.is_empty() && flag_type.is_some_and(|t| t != FlagType::String) {
            result.add_error(
                format!("{field}.enum"),
                "enum values are only allowed on string flags",
            );
        }

        if let (Some(default), Some(flag_type)) = (&raw.default, flag_type) {
            let matches_type = match flag_type {
                FlagType::String => default.is_string(),
                FlagType::Bool => default.is_boolean(),
                FlagType::Number => default.is_number(),
                FlagType::Array => default
                    .as_array()
                    .is_some_and(|items| items.iter().all(|v| v.is_string())),
            };
            if !matches_type {
                result.add_error(
                    format!("{field}.default"),
                    format!("default value {default} does not match flag type {flag_type}"),
                );
            } else if let Some(value) = default.as_str() {
                if !raw.enum_values.is_empty() && !raw.enum_values.iter().any(|e| e == value) {
                    result.add_error(
                        format!("{field}.default"),
                        format!(
                            "default '{value}' is not one of [{}]",
                            raw.enum_values.join(", ")
                        ),
                    );
                }
            }
        }

        Some(Flag {
            name: name?,
            short: raw.short.clone(),
            flag_type: flag_type?,
            required: raw.required,
            enum_values: raw.enum_values.clone(),
            default: raw.default.clone(),
            description: raw.description.clone(),
        })
    }
}
