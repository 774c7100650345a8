//! Module data model shared by discovery, loading, trust and dispatch

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// API version every descriptor is written against
pub const API_VERSION: &str = "ship.cloudship.ai/v1";

/// Descriptor kind accepted by the loader
pub const DESCRIPTOR_KIND: &str = "Module";

/// Where a module was discovered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Builtin,
    User,
    Project,
    Git,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Builtin,
        SourceKind::User,
        SourceKind::Project,
        SourceKind::Git,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Builtin => "builtin",
            SourceKind::User => "user",
            SourceKind::Project => "project",
            SourceKind::Git => "git",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "builtin" => Ok(SourceKind::Builtin),
            "user" => Ok(SourceKind::User),
            "project" => Ok(SourceKind::Project),
            "git" => Ok(SourceKind::Git),
            other => Err(format!(
                "unknown module source '{other}' (expected builtin, user, project or git)"
            )),
        }
    }
}

impl<'de> serde::Deserialize<'de> for SourceKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Execution backend family of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    Docker,
    Dagger,
}

impl ModuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleType::Docker => "docker",
            ModuleType::Dagger => "dagger",
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docker" => Ok(ModuleType::Docker),
            "dagger" => Ok(ModuleType::Dagger),
            other => Err(format!(
                "unknown module type '{other}' (expected docker or dagger)"
            )),
        }
    }
}

/// Closed vocabulary of capabilities a module may request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Permission {
    #[serde(rename = "filesystem:read")]
    FilesystemRead,
    #[serde(rename = "filesystem:write")]
    FilesystemWrite,
    #[serde(rename = "network")]
    Network,
    #[serde(rename = "environment")]
    Environment,
    #[serde(rename = "docker")]
    Docker,
}

impl Permission {
    pub const ALL: [Permission; 5] = [
        Permission::FilesystemRead,
        Permission::FilesystemWrite,
        Permission::Network,
        Permission::Environment,
        Permission::Docker,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::FilesystemRead => "filesystem:read",
            Permission::FilesystemWrite => "filesystem:write",
            Permission::Network => "network",
            Permission::Environment => "environment",
            Permission::Docker => "docker",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| {
                let known: Vec<&str> = Permission::ALL.iter().map(|p| p.as_str()).collect();
                format!("unknown permission '{s}' (known: {})", known.join(", "))
            })
    }
}

/// Value type of a command flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagType {
    String,
    Bool,
    Number,
    Array,
}

impl FlagType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagType::String => "string",
            FlagType::Bool => "bool",
            FlagType::Number => "number",
            FlagType::Array => "array",
        }
    }
}

impl fmt::Display for FlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlagType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(FlagType::String),
            "bool" | "boolean" => Ok(FlagType::Bool),
            "number" | "int" | "integer" | "float" => Ok(FlagType::Number),
            "array" | "[]string" => Ok(FlagType::Array),
            other => Err(format!(
                "unknown flag type '{other}' (expected string, bool, number or array)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Flag {
    pub name: String,
    pub short: Option<String>,
    #[serde(rename = "type")]
    pub flag_type: FlagType,
    pub required: bool,
    #[serde(rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    pub default: Option<serde_json::Value>,
    pub description: String,
}

/// One invocable action of a module
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    pub name: String,
    pub description: String,
    pub usage: Option<String>,
    pub flags: Vec<Flag>,
    pub examples: Vec<String>,
}

impl Command {
    pub fn flag(&self, name: &str) -> Option<&Flag> {
        self.flags.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeKind {
    Bind,
    Volume,
    Tmpfs,
}

impl FromStr for VolumeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bind" => Ok(VolumeKind::Bind),
            "volume" => Ok(VolumeKind::Volume),
            "tmpfs" => Ok(VolumeKind::Tmpfs),
            other => Err(format!(
                "unknown volume type '{other}' (expected bind, volume or tmpfs)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeMount {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub kind: VolumeKind,
}

/// Direct container image backend configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerConfig {
    pub image: String,
    pub entrypoint: Vec<String>,
    pub working_dir: Option<String>,
    /// Static environment; an empty value inherits the host variable
    pub env: BTreeMap<String, String>,
    pub volumes: Vec<VolumeMount>,
}

/// Pipeline engine backend configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaggerConfig {
    pub module: String,
    /// Falls back to the invoked command's name when absent
    pub function: Option<String>,
}

/// Backend configuration, tagged by module type
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Backend {
    Docker(DockerConfig),
    Dagger(DaggerConfig),
}

impl Backend {
    pub fn module_type(&self) -> ModuleType {
        match self {
            Backend::Docker(_) => ModuleType::Docker,
            Backend::Dagger(_) => ModuleType::Dagger,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub tags: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleSpec {
    pub backend: Backend,
    pub commands: Vec<Command>,
    pub dependencies: Vec<String>,
    pub permissions: Vec<Permission>,
}

impl ModuleSpec {
    pub fn module_type(&self) -> ModuleType {
        self.backend.module_type()
    }

    pub fn docker(&self) -> Option<&DockerConfig> {
        match &self.backend {
            Backend::Docker(config) => Some(config),
            Backend::Dagger(_) => None,
        }
    }

    pub fn dagger(&self) -> Option<&DaggerConfig> {
        match &self.backend {
            Backend::Dagger(config) => Some(config),
            Backend::Docker(_) => None,
        }
    }

    pub fn command(&self, name: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.name == name)
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

/// A loaded, self-describing unit of tool functionality
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Module {
    pub metadata: ModuleMetadata,
    pub spec: ModuleSpec,
    pub source: SourceKind,
    /// Derived by the trust evaluator, never read from the descriptor
    pub trusted: bool,
    /// Module directory; `None` for builtin modules
    pub path: Option<PathBuf>,
    pub loaded_at: DateTime<Utc>,
}

impl Module {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn module_type(&self) -> ModuleType {
        self.spec.module_type()
    }

    /// Human readable origin, used in diagnostics
    pub fn location(&self) -> String {
        match &self.path {
            Some(path) => format!("{} ({})", self.source, path.display()),
            None => format!("{}:{}", self.source, self.metadata.name),
        }
    }
}
