use crate::config::{GitRepository, ModuleConfig};
use crate::modules::builtin::BuiltinTable;
use crate::modules::descriptor::{DESCRIPTOR_FILE, DESCRIPTOR_FILE_ALT};
use crate::modules::error::DiscoveryError;
use crate::modules::git::GitCheckout;
use crate::modules::types::{SourceKind, API_VERSION, DESCRIPTOR_KIND};
use async_trait::async_trait;
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Marks a directory as a Dagger module
const DAGGER_MANIFEST: &str = "dagger.json";

/// Where a candidate descriptor lives
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateOrigin {
    Builtin {
        name: String,
        descriptor: Arc<str>,
    },
    File {
        descriptor_path: PathBuf,
        module_dir: PathBuf,
    },
    /// Descriptor synthesized from another project file, such as `dagger.json`
    Generated {
        descriptor: Arc<str>,
        manifest_path: PathBuf,
        module_dir: PathBuf,
    },
}

/// A descriptor found by a source, not yet parsed
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub source: SourceKind,
    pub origin: CandidateOrigin,
    /// Global discovery order, used to break ties within one source kind
    pub sequence: usize,
}

impl Candidate {
    pub fn location(&self) -> String {
        match &self.origin {
            CandidateOrigin::Builtin { name, .. } => format!("builtin:{name}"),
            CandidateOrigin::File {
                descriptor_path, ..
            } => format!("{} ({})", self.source, descriptor_path.display()),
            CandidateOrigin::Generated { manifest_path, .. } => {
                format!("{} ({})", self.source, manifest_path.display())
            }
        }
    }

    pub fn module_dir(&self) -> Option<&Path> {
        match &self.origin {
            CandidateOrigin::Builtin { .. } => None,
            CandidateOrigin::File { module_dir, .. }
            | CandidateOrigin::Generated { module_dir, .. } => Some(module_dir),
        }
    }
}

/// One place modules are discovered from
#[async_trait]
pub trait CandidateSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn describe(&self) -> String;

    async fn discover(&self) -> Result<Vec<Candidate>, DiscoveryError>;
}

pub struct BuiltinSource {
    table: BuiltinTable,
}

impl BuiltinSource {
    pub fn new(table: BuiltinTable) -> Self {
        Self { table }
    }
}

#[async_trait]
impl CandidateSource for BuiltinSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Builtin
    }

    fn describe(&self) -> String {
        format!("{} builtin modules", self.table.len())
    }

    async fn discover(&self) -> Result<Vec<Candidate>, DiscoveryError> {
        Ok(self
            .table
            .entries()
            .iter()
            .map(|entry| Candidate {
                source: SourceKind::Builtin,
                origin: CandidateOrigin::Builtin {
                    name: entry.name.clone(),
                    descriptor: entry.descriptor.clone(),
                },
                sequence: 0,
            })
            .collect())
    }
}

/// A directory whose immediate subdirectories are modules
pub struct DirectorySource {
    kind: SourceKind,
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(kind: SourceKind, root: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl CandidateSource for DirectorySource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn describe(&self) -> String {
        format!("{} modules in {}", self.kind, self.root.display())
    }

    async fn discover(&self) -> Result<Vec<Candidate>, DiscoveryError> {
        let kind = self.kind;
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || scan_module_root(kind, &root, false))
            .await
            .map_err(|e| DiscoveryError::Unreadable {
                kind: self.kind,
                path: self.root.clone(),
                error: format!("task join error: {e}"),
            })?
    }
}

/// Modules contributed by one git repository
pub struct GitSource {
    repository: GitRepository,
    checkout: GitCheckout,
}

impl GitSource {
    pub fn new(repository: GitRepository, checkout: GitCheckout) -> Self {
        Self {
            repository,
            checkout,
        }
    }
}

#[async_trait]
impl CandidateSource for GitSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Git
    }

    fn describe(&self) -> String {
        match &self.repository.reference {
            Some(reference) => format!("git modules from {}@{}", self.repository.url, reference),
            None => format!("git modules from {}", self.repository.url),
        }
    }

    async fn discover(&self) -> Result<Vec<Candidate>, DiscoveryError> {
        let checkout = self.checkout.sync(&self.repository).await?;
        let root = match &self.repository.path {
            Some(sub) => checkout.join(sub),
            None => checkout,
        };
        tokio::task::spawn_blocking(move || scan_module_root(SourceKind::Git, &root, true))
            .await
            .map_err(|e| DiscoveryError::Git {
                url: self.repository.url.clone(),
                operation: "scan".to_string(),
                error: format!("task join error: {e}"),
            })?
    }
}

/// A project root holding a `dagger.json` becomes one dagger module
pub struct DaggerProjectSource {
    root: PathBuf,
}

impl DaggerProjectSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl CandidateSource for DaggerProjectSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Project
    }

    fn describe(&self) -> String {
        format!("dagger project in {}", self.root.display())
    }

    async fn discover(&self) -> Result<Vec<Candidate>, DiscoveryError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || dagger_project_candidate(&root))
            .await
            .map_err(|e| DiscoveryError::Unreadable {
                kind: SourceKind::Project,
                path: self.root.clone(),
                error: format!("task join error: {e}"),
            })?
    }
}

fn dagger_project_candidate(root: &Path) -> Result<Vec<Candidate>, DiscoveryError> {
    let manifest_path = root.join(DAGGER_MANIFEST);
    if !manifest_path.is_file() {
        return Ok(Vec::new());
    }
    let module_dir = std::fs::canonicalize(root).map_err(|e| DiscoveryError::Unreadable {
        kind: SourceKind::Project,
        path: root.to_path_buf(),
        error: e.to_string(),
    })?;
    let project = module_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());

    debug!("Found {} in {}", DAGGER_MANIFEST, module_dir.display());
    Ok(vec![Candidate {
        source: SourceKind::Project,
        origin: CandidateOrigin::Generated {
            descriptor: dagger_project_descriptor(&project).into(),
            manifest_path,
            module_dir,
        },
        sequence: 0,
    }])
}

/// `dagger-<project>` module calling functions of the project's own dagger module
fn dagger_project_descriptor(project: &str) -> String {
    let slug: String = project
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let quote = |text: &str| serde_json::Value::String(text.to_string()).to_string();
    format!(
        r#"apiVersion: {api_version}
kind: {kind}
metadata:
  name: {name}
  version: "1.0.0"
  description: {description}
  author: Project
spec:
  type: dagger
  dagger:
    module: "."
  commands:
    - name: dagger-functions
      description: Run Dagger functions from this project
"#,
        api_version = API_VERSION,
        kind = DESCRIPTOR_KIND,
        name = quote(&format!("dagger-{slug}")),
        description = quote(&format!("Dagger module from {project}")),
    )
}

fn descriptor_in(dir: &Path) -> Option<PathBuf> {
    [DESCRIPTOR_FILE, DESCRIPTOR_FILE_ALT]
        .iter()
        .map(|file| dir.join(file))
        .find(|path| path.is_file())
}

/// Find `<root>/<name>/module.yaml` entries, sorted by directory name
fn scan_module_root(
    kind: SourceKind,
    root: &Path,
    include_root: bool,
) -> Result<Vec<Candidate>, DiscoveryError> {
    if !root.exists() {
        return Err(DiscoveryError::MissingDirectory {
            kind,
            path: root.to_path_buf(),
        });
    }
    if !root.is_dir() {
        return Err(DiscoveryError::Unreadable {
            kind,
            path: root.to_path_buf(),
            error: "not a directory".to_string(),
        });
    }
    std::fs::read_dir(root).map_err(|e| DiscoveryError::Unreadable {
        kind,
        path: root.to_path_buf(),
        error: e.to_string(),
    })?;

    let mut candidates = Vec::new();

    if include_root {
        if let Some(descriptor_path) = descriptor_in(root) {
            candidates.push(file_candidate(kind, descriptor_path, root.to_path_buf()));
        }
    }

    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };
        let is_dir = entry.file_type().is_dir() || (entry.path_is_symlink() && entry.path().is_dir());
        if !is_dir {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        match descriptor_in(entry.path()) {
            Some(descriptor_path) => {
                candidates.push(file_candidate(kind, descriptor_path, entry.path().to_path_buf()))
            }
            None => debug!("No module descriptor in {}", entry.path().display()),
        }
    }

    Ok(candidates)
}

fn file_candidate(kind: SourceKind, descriptor_path: PathBuf, module_dir: PathBuf) -> Candidate {
    Candidate {
        source: kind,
        origin: CandidateOrigin::File {
            descriptor_path,
            module_dir,
        },
        sequence: 0,
    }
}

/// Everything the configured sources produced
#[derive(Debug, Default)]
pub struct Resolution {
    pub candidates: Vec<Candidate>,
    pub diagnostics: Vec<DiscoveryError>,
}

/// Enumerates candidate descriptors from every configured source
pub struct SourceResolver {
    sources: Vec<Box<dyn CandidateSource>>,
    initial_diagnostics: Vec<DiscoveryError>,
}

impl SourceResolver {
    /// Sources in default order: builtin, user, extra directories, project, dagger project, git
    pub fn from_config(config: &ModuleConfig, builtins: BuiltinTable) -> Self {
        let mut sources: Vec<Box<dyn CandidateSource>> = Vec::new();
        let mut initial_diagnostics = Vec::new();

        if config.include_builtin {
            sources.push(Box::new(BuiltinSource::new(builtins)));
        }

        match config.user_modules_dir() {
            Some(dir) => sources.push(Box::new(DirectorySource::new(SourceKind::User, dir))),
            None => initial_diagnostics.push(DiscoveryError::HomeUnavailable),
        }
        for dir in &config.directories {
            sources.push(Box::new(DirectorySource::new(SourceKind::User, dir.clone())));
        }

        sources.push(Box::new(DirectorySource::new(
            SourceKind::Project,
            config.project_modules_dir(),
        )));
        sources.push(Box::new(DaggerProjectSource::new(config.project_root_dir())));

        if !config.repositories.is_empty() {
            let checkout = GitCheckout::new(config.git_cache_dir(), config.update_interval());
            for repository in &config.repositories {
                sources.push(Box::new(GitSource::new(
                    repository.clone(),
                    checkout.clone(),
                )));
            }
        }

        Self {
            sources,
            initial_diagnostics,
        }
    }

    pub fn with_sources(sources: Vec<Box<dyn CandidateSource>>) -> Self {
        Self {
            sources,
            initial_diagnostics: Vec::new(),
        }
    }

    pub fn sources(&self) -> impl Iterator<Item = &dyn CandidateSource> {
        self.sources.iter().map(|s| s.as_ref())
    }

    /// Query every source; a failing source never stops the others
    pub async fn resolve(&self) -> Resolution {
        let results = join_all(self.sources.iter().map(|source| async move {
            debug!("Discovering {}", source.describe());
            source.discover().await
        }))
        .await;

        let mut resolution = Resolution {
            candidates: Vec::new(),
            diagnostics: self.initial_diagnostics.clone(),
        };

        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(candidates) => {
                    debug!("{}: {} candidates", source.describe(), candidates.len());
                    resolution.candidates.extend(candidates);
                }
                Err(DiscoveryError::MissingDirectory { kind, path }) => {
                    debug!("{} module directory {} does not exist", kind, path.display());
                    resolution
                        .diagnostics
                        .push(DiscoveryError::MissingDirectory { kind, path });
                }
                Err(e) => {
                    warn!("Module source failed: {}", e);
                    resolution.diagnostics.push(e);
                }
            }
        }

        for (sequence, candidate) in resolution.candidates.iter_mut().enumerate() {
            candidate.sequence = sequence;
        }

        resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_module(root: &Path, dir: &str, file: &str) {
        let module_dir = root.join(dir);
        fs::create_dir_all(&module_dir).unwrap();
        fs::write(module_dir.join(file), "metadata: {}\n").unwrap();
    }

    #[tokio::test]
    async fn test_directory_source_sorted_and_filtered() {
        let temp_dir = TempDir::new().unwrap();
        write_module(temp_dir.path(), "zeta", DESCRIPTOR_FILE);
        write_module(temp_dir.path(), "alpha", DESCRIPTOR_FILE_ALT);
        fs::create_dir_all(temp_dir.path().join("empty")).unwrap();
        write_module(temp_dir.path(), ".hidden", DESCRIPTOR_FILE);
        fs::write(temp_dir.path().join("README.md"), "not a module").unwrap();

        let source = DirectorySource::new(SourceKind::Project, temp_dir.path());
        let candidates = source.discover().await.unwrap();

        let dirs: Vec<_> = candidates
            .iter()
            .map(|c| {
                c.module_dir()
                    .unwrap()
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        assert_eq!(dirs, vec!["alpha", "zeta"]);
        assert!(candidates.iter().all(|c| c.source == SourceKind::Project));
    }

    #[tokio::test]
    async fn test_missing_directory_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let source = DirectorySource::new(SourceKind::User, temp_dir.path().join("nope"));
        let err = source.discover().await.unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::MissingDirectory {
                kind: SourceKind::User,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_resolver_keeps_source_order_and_numbers_candidates() {
        let user = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        write_module(user.path(), "b", DESCRIPTOR_FILE);
        write_module(project.path(), "a", DESCRIPTOR_FILE);

        let resolver = SourceResolver::with_sources(vec![
            Box::new(BuiltinSource::new(
                BuiltinTable::empty().with("x", "metadata: {}"),
            )),
            Box::new(DirectorySource::new(SourceKind::User, user.path())),
            Box::new(DirectorySource::new(
                SourceKind::Project,
                project.path().join("missing"),
            )),
            Box::new(DirectorySource::new(SourceKind::Project, project.path())),
        ]);

        let resolution = resolver.resolve().await;
        let kinds: Vec<_> = resolution.candidates.iter().map(|c| c.source).collect();
        assert_eq!(
            kinds,
            vec![SourceKind::Builtin, SourceKind::User, SourceKind::Project]
        );
        let sequences: Vec<_> = resolution.candidates.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(resolution.diagnostics.len(), 1);
    }

    #[tokio::test]
    async fn test_dagger_project_becomes_module() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("My Pipeline");
        fs::create_dir_all(&root).unwrap();

        let source = DaggerProjectSource::new(&root);
        assert!(source.discover().await.unwrap().is_empty());

        fs::write(root.join(DAGGER_MANIFEST), r#"{"name": "pipeline"}"#).unwrap();
        let candidates = source.discover().await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].source, SourceKind::Project);
        assert!(candidates[0].location().ends_with("dagger.json)"));

        let module = crate::modules::loader::MetadataLoader::new()
            .load_candidate(&candidates[0])
            .await
            .unwrap()
            .module;
        assert_eq!(module.name(), "dagger-my-pipeline");
        assert_eq!(module.spec.dagger().unwrap().module, ".");
        assert!(module.spec.command("dagger-functions").is_some());
        assert_eq!(module.path, Some(fs::canonicalize(&root).unwrap()));
    }
}
