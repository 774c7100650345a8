#![allow(dead_code)]

use ship_modules::config::ModuleConfig;
use std::fs;
use std::path::{Path, PathBuf};

pub fn docker_descriptor(name: &str, version: &str) -> String {
    format!(
        r#"apiVersion: ship.cloudship.ai/v1
kind: Module
metadata:
  name: {name}
  version: "{version}"
  description: Test module {name}
spec:
  type: docker
  docker:
    image: example/{name}:latest
  commands:
    - name: scan
      flags:
        - name: target
          type: string
          required: true
        - name: format
          type: string
          enum: [json, sarif]
          default: json
  permissions:
    - filesystem:read
"#
    )
}

pub fn dagger_descriptor(name: &str) -> String {
    format!(
        r#"metadata:
  name: {name}
  version: "1.0.0"
spec:
  type: dagger
  dagger:
    module: github.com/example/{name}
    function: audit
  commands:
    - name: run
"#
    )
}

/// Declares `type: dagger` without the dagger block
pub fn broken_descriptor(name: &str) -> String {
    format!(
        r#"metadata:
  name: {name}
  version: "1.0.0"
spec:
  type: dagger
  commands:
    - name: run
"#
    )
}

pub fn write_module(root: &Path, dir: &str, descriptor: &str) -> PathBuf {
    let module_dir = root.join(dir);
    fs::create_dir_all(&module_dir).unwrap();
    fs::write(module_dir.join("module.yaml"), descriptor).unwrap();
    module_dir
}

/// Config confined to the given directories, with builtins disabled
pub fn isolated_config(user: &Path, project: &Path) -> ModuleConfig {
    ModuleConfig {
        user_dir: Some(user.to_path_buf()),
        project_dir: Some(project.to_path_buf()),
        project_root: Some(project.to_path_buf()),
        include_builtin: false,
        ..ModuleConfig::default()
    }
}
