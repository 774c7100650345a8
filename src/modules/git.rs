//! Checkouts of git repositories that contribute modules

use crate::config::GitRepository;
use crate::modules::error::DiscoveryError;
use git2::{build::CheckoutBuilder, build::RepoBuilder, FetchOptions, RemoteCallbacks, Repository};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tokio::task;
use tracing::{debug, info};
use url::Url;

const FETCH_STAMP: &str = "ship-last-fetch";

const ALLOWED_SCHEMES: &[&str] = &["https", "http", "ssh", "git", "file"];

/// Syncs repositories into a local cache directory
///
/// Clones share a lock table, so sources pointing at the same checkout
/// directory sync one after another.
#[derive(Debug, Clone)]
pub struct GitCheckout {
    cache_dir: PathBuf,
    update_interval: Option<Duration>,
    locks: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl GitCheckout {
    pub fn new(cache_dir: PathBuf, update_interval: Option<Duration>) -> Self {
        Self {
            cache_dir,
            update_interval,
            locks: Arc::default(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Where a repository is checked out inside the cache, one worktree per ref
    pub fn checkout_dir(&self, repo: &GitRepository) -> PathBuf {
        self.cache_dir.join(cache_key(&repo.url, repo.reference.as_deref()))
    }

    /// Clone or update the repository and return the checkout's root
    pub async fn sync(&self, repo: &GitRepository) -> Result<PathBuf, DiscoveryError> {
        validate_url(&repo.url)?;
        if let Some(reference) = &repo.reference {
            validate_ref(&repo.url, reference)?;
        }
        if let Some(path) = &repo.path {
            validate_subpath(&repo.url, path)?;
        }

        let dest = self.checkout_dir(repo);
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(dest.clone()).or_default().clone()
        };
        let _guard = lock.lock().await;

        let repo = repo.clone();
        let interval = self.update_interval;
        let url = repo.url.clone();

        task::spawn_blocking(move || sync_blocking(&repo, &dest, interval).map(|_| dest))
            .await
            .map_err(|e| DiscoveryError::Git {
                url,
                operation: "sync".to_string(),
                error: format!("task join error: {e}"),
            })?
    }
}

fn sync_blocking(
    repo: &GitRepository,
    dest: &Path,
    interval: Option<Duration>,
) -> Result<(), DiscoveryError> {
    let git_err = |operation: &str| {
        let url = repo.url.clone();
        let operation = operation.to_string();
        move |e: git2::Error| DiscoveryError::Git {
            url,
            operation,
            error: e.message().to_string(),
        }
    };

    let (repository, fresh) = if dest.join(".git").exists() {
        let repository = Repository::open(dest).map_err(git_err("open"))?;
        (repository, false)
    } else {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DiscoveryError::Git {
                url: repo.url.clone(),
                operation: "create cache directory".to_string(),
                error: e.to_string(),
            })?;
        }
        info!("Cloning module repository {}", repo.url);
        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch_options());
        let repository = builder
            .clone(&repo.url, dest)
            .map_err(git_err("clone"))?;
        stamp_fetch(&repository);
        (repository, true)
    };

    if !fresh {
        if fetch_is_due(&repository, interval) {
            debug!("Fetching updates for {}", repo.url);
            let mut remote = repository
                .find_remote("origin")
                .map_err(git_err("find remote"))?;
            remote
                .fetch(&[] as &[&str], Some(&mut fetch_options()), None)
                .map_err(git_err("fetch"))?;
            stamp_fetch(&repository);
        } else {
            debug!("Skipping fetch for {}, updated recently", repo.url);
        }
    }

    let target = match &repo.reference {
        Some(reference) => repository
            .revparse_single(&format!("origin/{reference}"))
            .or_else(|_| repository.revparse_single(reference))
            .map_err(git_err("resolve ref"))?,
        None => match default_target(&repository) {
            Some(object) => object,
            None => return Ok(()),
        },
    };

    let commit = target.peel_to_commit().map_err(git_err("resolve ref"))?;
    repository
        .set_head_detached(commit.id())
        .map_err(git_err("checkout"))?;
    repository
        .checkout_head(Some(CheckoutBuilder::new().force()))
        .map_err(git_err("checkout"))?;
    debug!("Checked out {} at {}", repo.url, commit.id());
    Ok(())
}

fn fetch_options<'a>() -> FetchOptions<'a> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.transfer_progress(|stats| {
        tracing::trace!(
            "Transfer progress: {}/{} objects",
            stats.received_objects(),
            stats.total_objects()
        );
        true
    });
    let mut options = FetchOptions::new();
    options.remote_callbacks(callbacks);
    options
}

/// `origin/HEAD`, `origin/main` or `origin/master`, else the remote branch matching the current one
fn default_target(repository: &Repository) -> Option<git2::Object<'_>> {
    for candidate in [
        "refs/remotes/origin/HEAD",
        "refs/remotes/origin/main",
        "refs/remotes/origin/master",
    ] {
        if let Ok(object) = repository.revparse_single(candidate) {
            return Some(object);
        }
    }
    let head = repository.head().ok()?;
    let branch = head.shorthand()?.to_string();
    repository
        .revparse_single(&format!("origin/{branch}"))
        .ok()
}

fn stamp_fetch(repository: &Repository) {
    let stamp = repository.path().join(FETCH_STAMP);
    if let Err(e) = std::fs::write(&stamp, b"") {
        debug!("Could not record fetch time in {}: {}", stamp.display(), e);
    }
}

fn fetch_is_due(repository: &Repository, interval: Option<Duration>) -> bool {
    let Some(interval) = interval else {
        return true;
    };
    let stamp = repository.path().join(FETCH_STAMP);
    let modified = match std::fs::metadata(&stamp).and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(_) => return true,
    };
    match SystemTime::now().duration_since(modified) {
        Ok(elapsed) => elapsed >= interval,
        Err(_) => true,
    }
}

/// Stable directory name for a repository URL at an optional ref
pub fn cache_key(url: &str, reference: Option<&str>) -> String {
    let readable: String = url
        .trim_end_matches(".git")
        .rsplit(['/', ':'])
        .next()
        .unwrap_or_default()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .take(40)
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    if let Some(reference) = reference {
        hasher.update(b"\0");
        hasher.update(reference.as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());

    if readable.is_empty() {
        digest[..12].to_string()
    } else {
        format!("{}-{}", readable, &digest[..12])
    }
}

/// Reject repository references git could never resolve
pub fn validate_url(url: &str) -> Result<(), DiscoveryError> {
    let invalid = |reason: &str| DiscoveryError::InvalidGitReference {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(invalid("repository URL is empty"));
    }
    if trimmed != url || url.chars().any(char::is_whitespace) {
        return Err(invalid("repository URL contains whitespace"));
    }
    if url.starts_with('-') {
        return Err(invalid("repository URL must not start with '-'"));
    }

    if let Ok(parsed) = Url::parse(url) {
        if ALLOWED_SCHEMES.contains(&parsed.scheme()) {
            return Ok(());
        }
        // `C:\...` parses as a URL with a one letter scheme
        if parsed.scheme().len() > 1 {
            return Err(invalid(&format!(
                "unsupported scheme '{}' (expected one of {})",
                parsed.scheme(),
                ALLOWED_SCHEMES.join(", ")
            )));
        }
    }

    if is_scp_like(url) {
        return Ok(());
    }

    let path = Path::new(url);
    if path.is_absolute() {
        if path.exists() {
            return Ok(());
        }
        return Err(invalid("local repository path does not exist"));
    }

    Err(invalid(
        "expected a URL, user@host:path or an absolute local path",
    ))
}

fn is_scp_like(url: &str) -> bool {
    let Some((user_host, path)) = url.split_once(':') else {
        return false;
    };
    let Some((user, host)) = user_host.split_once('@') else {
        return false;
    };
    !user.is_empty() && !host.is_empty() && !host.contains('/') && !path.is_empty()
}

pub fn validate_ref(url: &str, reference: &str) -> Result<(), DiscoveryError> {
    let reason = if reference.is_empty() {
        Some("ref is empty")
    } else if reference.chars().any(char::is_whitespace) {
        Some("ref contains whitespace")
    } else if reference.contains("..") {
        Some("ref contains '..'")
    } else if reference.starts_with('-') {
        Some("ref must not start with '-'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(DiscoveryError::InvalidGitReference {
            url: url.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// A repository `path` must stay inside the checkout
pub fn validate_subpath(url: &str, path: &Path) -> Result<(), DiscoveryError> {
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(DiscoveryError::InvalidGitReference {
            url: url.to_string(),
            reason: format!(
                "path '{}' must be relative to the repository root without '..'",
                path.display()
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_validation() {
        assert!(validate_url("https://github.com/example/modules.git").is_ok());
        assert!(validate_url("ssh://git@github.com/example/modules.git").is_ok());
        assert!(validate_url("git@github.com:example/modules.git").is_ok());

        for bad in [
            "",
            "   ",
            "not a url",
            "ftp://example.com/repo.git",
            "-upload-pack=evil",
            "relative/path",
            "/definitely/not/a/real/path/for/ship",
        ] {
            assert!(
                matches!(
                    validate_url(bad),
                    Err(DiscoveryError::InvalidGitReference { .. })
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_existing_local_path_accepted() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        assert!(validate_url(temp_dir.path().to_str().unwrap()).is_ok());
    }

    #[test]
    fn test_ref_validation() {
        assert!(validate_ref("u", "v1.2.0").is_ok());
        assert!(validate_ref("u", "feature/scanner").is_ok());
        assert!(validate_ref("u", "main..evil").is_err());
        assert!(validate_ref("u", "--force").is_err());
        assert!(validate_ref("u", "two words").is_err());
    }

    #[test]
    fn test_cache_key_is_stable_and_distinct() {
        let url = "https://github.com/example/modules.git";
        let a = cache_key(url, None);
        let b = cache_key("https://gitlab.com/example/modules.git", None);
        assert_eq!(a, cache_key(url, None));
        assert_ne!(a, b);
        assert!(a.starts_with("modules-"));

        assert_ne!(cache_key(url, Some("v1")), cache_key(url, Some("v2")));
        assert_ne!(cache_key(url, Some("v1")), a);
    }

    #[test]
    fn test_subpath_must_stay_inside_checkout() {
        assert!(validate_subpath("u", Path::new("modules")).is_ok());
        assert!(validate_subpath("u", Path::new("./tools/modules")).is_ok());
        for bad in ["../outside", "modules/../../x", "/etc"] {
            assert!(
                matches!(
                    validate_subpath("u", Path::new(bad)),
                    Err(DiscoveryError::InvalidGitReference { .. })
                ),
                "{bad:?} should be rejected"
            );
        }
    }
}
