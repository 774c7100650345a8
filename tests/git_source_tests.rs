//! Git sources backed by local repositories

mod common;

use common::{docker_descriptor, isolated_config, write_module};
use git2::{IndexAddOption, Oid, Repository, Signature};
use ship_modules::config::{GitRepository, ModuleConfig};
use ship_modules::modules::{BuiltinTable, DiscoveryError, Manager, SourceKind};
use std::path::Path;
use tempfile::TempDir;

fn commit_all(repo: &Repository, message: &str) -> Oid {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let signature = Signature::now("Ship Test", "test@example.com").unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<_> = parent.iter().collect();
    repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
        .unwrap()
}

fn config_with(repositories: Vec<GitRepository>, cache: &Path, empty: &Path) -> ModuleConfig {
    ModuleConfig {
        repositories,
        cache_dir: Some(cache.to_path_buf()),
        ..isolated_config(&empty.join("user"), &empty.join("project"))
    }
}

#[tokio::test]
async fn test_modules_load_from_local_repository() {
    let origin = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let empty = TempDir::new().unwrap();

    let repo = Repository::init(origin.path()).unwrap();
    write_module(&origin.path().join("modules"), "scanner", &docker_descriptor("scanner", "1.0.0"));
    commit_all(&repo, "add scanner");

    let repositories = vec![
        GitRepository {
            url: "ftp://example.com/not-supported.git".to_string(),
            reference: None,
            path: None,
        },
        GitRepository {
            url: origin.path().display().to_string(),
            reference: None,
            path: Some("modules".into()),
        },
    ];
    let config = config_with(repositories, cache.path(), empty.path());
    let mut manager = Manager::with_builtins(&config, BuiltinTable::empty());
    let report = manager.load_modules().await.unwrap();

    assert_eq!(report.loaded, 1);
    assert!(report
        .discovery_errors()
        .any(|e| matches!(e, DiscoveryError::InvalidGitReference { .. })));

    let module = manager.get_module("scanner").unwrap();
    assert_eq!(module.source, SourceKind::Git);
    assert!(!module.trusted);
    assert!(module.path.as_ref().unwrap().starts_with(cache.path()));
}

#[tokio::test]
async fn test_ref_selects_tagged_revision() {
    let origin = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let empty = TempDir::new().unwrap();

    let repo = Repository::init(origin.path()).unwrap();
    write_module(origin.path(), "scanner", &docker_descriptor("scanner", "1.0.0"));
    let first = commit_all(&repo, "v1");
    repo.tag_lightweight("v1", &repo.find_object(first, None).unwrap(), false)
        .unwrap();
    write_module(origin.path(), "scanner", &docker_descriptor("scanner", "2.0.0"));
    commit_all(&repo, "v2");

    let url = origin.path().display().to_string();
    let pinned = config_with(
        vec![GitRepository {
            url: url.clone(),
            reference: Some("v1".to_string()),
            path: None,
        }],
        cache.path(),
        empty.path(),
    );
    let mut manager = Manager::with_builtins(&pinned, BuiltinTable::empty());
    manager.load_modules().await.unwrap();
    assert_eq!(manager.get_module("scanner").unwrap().metadata.version, "1.0.0");

    // Same cache, separate worktree for the default branch
    let latest = config_with(
        vec![GitRepository {
            url,
            reference: None,
            path: None,
        }],
        cache.path(),
        empty.path(),
    );
    let mut manager = Manager::with_builtins(&latest, BuiltinTable::empty());
    manager.load_modules().await.unwrap();
    assert_eq!(manager.get_module("scanner").unwrap().metadata.version, "2.0.0");
}

#[tokio::test]
async fn test_unknown_ref_fails_only_that_source() {
    let origin = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let empty = TempDir::new().unwrap();

    let repo = Repository::init(origin.path()).unwrap();
    write_module(origin.path(), "scanner", &docker_descriptor("scanner", "1.0.0"));
    commit_all(&repo, "initial");

    let config = ModuleConfig {
        include_builtin: true,
        ..config_with(
            vec![GitRepository {
                url: origin.path().display().to_string(),
                reference: Some("does-not-exist".to_string()),
                path: None,
            }],
            cache.path(),
            empty.path(),
        )
    };
    let mut manager = Manager::with_builtins(&config, BuiltinTable::standard());
    let report = manager.load_modules().await.unwrap();

    assert_eq!(report.loaded, 6);
    assert!(report
        .discovery_errors()
        .any(|e| matches!(e, DiscoveryError::Git { .. })));
    assert!(manager.get_module("scanner").is_err());
}

#[tokio::test]
async fn test_same_url_with_different_paths_loads_both() {
    let origin = TempDir::new().unwrap();
    let repo = Repository::init(origin.path()).unwrap();
    write_module(&origin.path().join("a"), "alpha", &docker_descriptor("alpha", "1.0.0"));
    write_module(&origin.path().join("b"), "beta", &docker_descriptor("beta", "1.0.0"));
    commit_all(&repo, "two module roots");
    let url = origin.path().display().to_string();

    for _ in 0..5 {
        let cache = TempDir::new().unwrap();
        let empty = TempDir::new().unwrap();
        let repositories = ["a", "b"]
            .iter()
            .map(|path| GitRepository {
                url: url.clone(),
                reference: None,
                path: Some(path.into()),
            })
            .collect();
        let config = config_with(repositories, cache.path(), empty.path());
        let mut manager = Manager::with_builtins(&config, BuiltinTable::empty());
        let report = manager.load_modules().await.unwrap();

        assert!(
            !report.discovery_errors().any(|e| e.kind() == SourceKind::Git),
            "{:?}",
            report.diagnostics
        );
        assert_eq!(report.loaded, 2);
        assert!(manager.get_module("alpha").is_ok());
        assert!(manager.get_module("beta").is_ok());
    }
}

#[tokio::test]
async fn test_same_url_at_two_refs_scans_each_revision() {
    let origin = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let empty = TempDir::new().unwrap();

    let repo = Repository::init(origin.path()).unwrap();
    write_module(origin.path(), "scanner", &docker_descriptor("scanner", "1.0.0"));
    let first = commit_all(&repo, "v1");
    repo.tag_lightweight("v1", &repo.find_object(first, None).unwrap(), false)
        .unwrap();
    write_module(origin.path(), "scanner", &docker_descriptor("scanner", "2.0.0"));
    write_module(origin.path(), "linter", &docker_descriptor("linter", "2.0.0"));
    commit_all(&repo, "v2");

    let url = origin.path().display().to_string();
    let repositories = vec![
        GitRepository {
            url: url.clone(),
            reference: Some("v1".to_string()),
            path: None,
        },
        GitRepository {
            url,
            reference: None,
            path: None,
        },
    ];
    let config = config_with(repositories, cache.path(), empty.path());
    let mut manager = Manager::with_builtins(&config, BuiltinTable::empty());
    let report = manager.load_modules().await.unwrap().clone();

    assert!(
        !report.discovery_errors().any(|e| e.kind() == SourceKind::Git),
        "{:?}",
        report.diagnostics
    );
    assert_eq!(manager.get_module("scanner").unwrap().metadata.version, "1.0.0");
    assert!(manager.get_module("linter").is_ok());
    assert_eq!(report.shadowed_for("scanner").count(), 1);
}

#[tokio::test]
async fn test_path_outside_checkout_rejected() {
    let origin = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let empty = TempDir::new().unwrap();

    let repo = Repository::init(origin.path()).unwrap();
    write_module(origin.path(), "scanner", &docker_descriptor("scanner", "1.0.0"));
    commit_all(&repo, "initial");

    let config = config_with(
        vec![GitRepository {
            url: origin.path().display().to_string(),
            reference: None,
            path: Some("../..".into()),
        }],
        cache.path(),
        empty.path(),
    );
    let mut manager = Manager::with_builtins(&config, BuiltinTable::empty());
    let report = manager.load_modules().await.unwrap();

    assert_eq!(report.loaded, 0);
    assert!(report
        .discovery_errors()
        .any(|e| matches!(e, DiscoveryError::InvalidGitReference { .. })));
}
