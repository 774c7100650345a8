//! Generates the skeleton of a new module directory

use crate::modules::error::ScaffoldError;
use crate::modules::types::ModuleType;
use crate::modules::validator::check_name;
use handlebars::Handlebars;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const MODULE_TEMPLATE: &str = include_str!("../../templates/module.yaml.hbs");
const DOCKERFILE_TEMPLATE: &str = include_str!("../../templates/Dockerfile.hbs");
const ENTRYPOINT_TEMPLATE: &str = include_str!("../../templates/entrypoint.sh.hbs");
const README_TEMPLATE: &str = include_str!("../../templates/README.md.hbs");

#[derive(Debug, Clone)]
pub struct ScaffoldRequest {
    pub name: String,
    pub module_type: ModuleType,
    pub description: Option<String>,
    pub author: Option<String>,
    pub output_dir: PathBuf,
}

pub struct ModuleScaffold {
    templates: Handlebars<'static>,
}

impl ModuleScaffold {
    pub fn new() -> Result<Self, ScaffoldError> {
        let mut templates = Handlebars::new();
        templates.set_strict_mode(true);
        templates.register_escape_fn(handlebars::no_escape);
        templates.register_template_string("module.yaml", MODULE_TEMPLATE)?;
        templates.register_template_string("Dockerfile", DOCKERFILE_TEMPLATE)?;
        templates.register_template_string("entrypoint.sh", ENTRYPOINT_TEMPLATE)?;
        templates.register_template_string("README.md", README_TEMPLATE)?;
        Ok(Self { templates })
    }

    /// Write the module files; an existing descriptor is never overwritten
    pub fn generate(&self, request: &ScaffoldRequest) -> Result<Vec<PathBuf>, ScaffoldError> {
        check_name(&request.name).map_err(|reason| ScaffoldError::InvalidName {
            name: request.name.clone(),
            reason,
        })?;

        let dir = &request.output_dir;
        let descriptor = dir.join("module.yaml");
        if descriptor.exists() {
            return Err(ScaffoldError::AlreadyExists { path: descriptor });
        }

        let description = request
            .description
            .clone()
            .unwrap_or_else(|| format!("Custom {} module", request.name));
        let author = request.author.clone().unwrap_or_else(|| "Unknown".to_string());
        let docker = request.module_type == ModuleType::Docker;
        let run_description = if docker {
            format!("Run {}", request.name)
        } else {
            format!("Run {} Dagger function", request.name)
        };

        let context = json!({
            "name": request.name,
            "module_type": request.module_type.as_str(),
            "docker": docker,
            "description": yaml_string(&description),
            "description_text": description,
            "author": yaml_string(&author),
            "image": yaml_string(&format!("{}:latest", request.name)),
            "run_description": yaml_string(&run_description),
        });

        fs::create_dir_all(dir).map_err(|e| io_error("create module directory", e))?;

        let mut files = vec!["module.yaml", "README.md"];
        if docker {
            files.extend(["Dockerfile", "entrypoint.sh"]);
        }

        let mut written = Vec::with_capacity(files.len());
        for file in files {
            let path = dir.join(file);
            if path.exists() && file != "module.yaml" {
                info!("Keeping existing {}", path.display());
                continue;
            }
            let content = self.templates.render(file, &context)?;
            fs::write(&path, content).map_err(|e| io_error("write module file", e))?;
            if file == "entrypoint.sh" {
                make_executable(&path)?;
            }
            written.push(path);
        }

        info!("Created module {} in {}", request.name, dir.display());
        Ok(written)
    }
}

/// JSON strings are valid double-quoted YAML scalars
fn yaml_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn io_error(operation: &str, error: std::io::Error) -> ScaffoldError {
    ScaffoldError::Io {
        operation: operation.to_string(),
        error: error.to_string(),
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), ScaffoldError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .map_err(|e| io_error("set entrypoint permissions", e))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), ScaffoldError> {
    Ok(())
}
