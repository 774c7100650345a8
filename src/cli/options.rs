use crate::config::ModuleConfig;
use crate::modules::types::{ModuleType, SourceKind};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Discover, inspect and run Ship tool modules
#[derive(Parser, Debug)]
#[command(name = "ship-modules")]
#[command(about = "Discover, inspect and run containerized Ship tool modules")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct ShipModulesCli {
    #[command(subcommand)]
    pub command: ModulesCommand,

    /// Enable verbose output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Ship config file (defaults to ~/.ship/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Allow running modules from user, project and git sources
    #[arg(long, global = true)]
    pub allow_untrusted: bool,

    /// Trust one module by name (repeatable)
    #[arg(long = "trust", value_name = "NAME", global = true)]
    pub trust: Vec<String>,

    /// Override the user module directory
    #[arg(long, global = true)]
    pub user_dir: Option<PathBuf>,

    /// Override the project module directory
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Disable the container sandbox (network and filesystem restrictions)
    #[arg(long, global = true)]
    pub no_sandbox: bool,
}

#[derive(Subcommand, Debug)]
pub enum ModulesCommand {
    /// List available modules
    List {
        /// Only modules of this type
        #[arg(long = "type", value_enum)]
        module_type: Option<TypeArg>,

        /// Only modules from this source
        #[arg(long, value_enum)]
        source: Option<SourceArg>,

        /// Only trusted (or, with =false, untrusted) modules
        #[arg(long)]
        trusted: Option<bool>,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show details about one module
    Info {
        name: String,

        #[arg(long)]
        json: bool,
    },

    /// Create a new module skeleton
    New {
        name: String,

        #[arg(long = "type", value_enum, default_value = "docker")]
        module_type: TypeArg,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        author: Option<String>,

        /// Output directory (defaults to the user module directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a module command
    Run {
        module: String,

        command: String,

        /// Flag value as key=value (repeatable)
        #[arg(short, long = "arg", value_name = "KEY=VALUE")]
        args: Vec<String>,

        /// Kill the run after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Host directory exposed to the module (defaults to the current directory)
        #[arg(long)]
        workdir: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report discovery and validation problems
    Diagnostics {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TypeArg {
    Docker,
    Dagger,
}

impl From<TypeArg> for ModuleType {
    fn from(arg: TypeArg) -> Self {
        match arg {
            TypeArg::Docker => ModuleType::Docker,
            TypeArg::Dagger => ModuleType::Dagger,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    Builtin,
    User,
    Project,
    Git,
}

impl From<SourceArg> for SourceKind {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Builtin => SourceKind::Builtin,
            SourceArg::User => SourceKind::User,
            SourceArg::Project => SourceKind::Project,
            SourceArg::Git => SourceKind::Git,
        }
    }
}

impl ShipModulesCli {
    /// Apply command line overrides on top of the loaded config
    pub fn apply_overrides(&self, config: &mut ModuleConfig) {
        if self.allow_untrusted {
            config.allow_untrusted = true;
        }
        for name in &self.trust {
            if !config.trusted_modules.contains(name) {
                config.trusted_modules.push(name.clone());
            }
        }
        if let Some(dir) = &self.user_dir {
            config.user_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.project_dir {
            config.project_dir = Some(dir.clone());
        }
        if self.no_sandbox {
            config.sandbox = false;
        }
    }
}
