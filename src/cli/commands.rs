use crate::cli::options::{ModulesCommand, ShipModulesCli};
use crate::cli::output;
use crate::config::ModuleConfig;
use crate::modules::arguments::parse_key_values;
use crate::modules::dispatcher::{ExecutionDispatcher, RunContext};
use crate::modules::error::{ExecutionError, ModuleError};
use crate::modules::manager::Manager;
use crate::modules::registry::ModuleFilter;
use crate::modules::scaffold::{ModuleScaffold, ScaffoldRequest};
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Executes one parsed `ship-modules` invocation
pub struct ModulesCliImpl {
    config: ModuleConfig,
    cancel: CancellationToken,
}

impl ModulesCliImpl {
    pub fn new(cli: &ShipModulesCli) -> Result<Self> {
        let mut config = ModuleConfig::load(cli.config.as_deref())
            .context("failed to load module configuration")?;
        cli.apply_overrides(&mut config);
        debug!("Module configuration: {:?}", config);
        Ok(Self::with_config(config))
    }

    pub fn with_config(config: ModuleConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that aborts any running module when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the command and return the process exit code
    pub async fn execute(&self, command: &ModulesCommand) -> Result<i32> {
        match command {
            ModulesCommand::List {
                module_type,
                source,
                trusted,
                json,
            } => {
                let manager = self.load().await?;
                let mut filter = ModuleFilter::new();
                if let Some(t) = module_type {
                    filter = filter.with_type((*t).into());
                }
                if let Some(s) = source {
                    filter = filter.with_source((*s).into());
                }
                if let Some(t) = trusted {
                    filter = filter.with_trusted(*t);
                }
                let modules = manager.list_modules(&filter);
                if *json {
                    output::print_json(&modules)?;
                } else {
                    output::print_module_table(&modules);
                    if let Some(report) = manager.report() {
                        output::print_load_summary(report);
                    }
                }
                Ok(0)
            }

            ModulesCommand::Info { name, json } => {
                let manager = self.load().await?;
                let module = manager.get_module(name)?;
                if *json {
                    output::print_json(module)?;
                } else {
                    output::print_module_info(module);
                    if let Some(report) = manager.report() {
                        for shadowed in report.shadowed_for(name) {
                            println!(
                                "  ⚠️  shadows {} definition at {}",
                                shadowed.loser, shadowed.loser_location
                            );
                        }
                    }
                }
                Ok(0)
            }

            ModulesCommand::New {
                name,
                module_type,
                description,
                author,
                output: output_dir,
            } => {
                let output_dir = match output_dir {
                    Some(dir) => dir.clone(),
                    None => self
                        .config
                        .user_modules_dir()
                        .ok_or_else(|| anyhow!("cannot determine home directory; pass --output"))?
                        .join(name),
                };
                let request = ScaffoldRequest {
                    name: name.clone(),
                    module_type: (*module_type).into(),
                    description: description.clone(),
                    author: author.clone(),
                    output_dir,
                };
                let written = ModuleScaffold::new()?.generate(&request)?;
                output::print_scaffold_result(&request, &written);
                Ok(0)
            }

            ModulesCommand::Run {
                module,
                command,
                args,
                timeout,
                workdir,
                json,
            } => {
                let manager = self.load().await?;
                let module = manager.get_module(module)?;
                let argv = parse_key_values(args).map_err(|e| anyhow!(e))?;

                let working_dir = match workdir {
                    Some(dir) => dir.clone(),
                    None => std::env::current_dir().context("cannot read current directory")?,
                };
                let working_dir = absolute(working_dir);
                let mut ctx = RunContext::new(working_dir).with_cancel(self.cancel.clone());
                if let Some(secs) = timeout {
                    ctx = ctx.with_timeout(Duration::from_secs(*secs));
                }

                let dispatcher = ExecutionDispatcher::from_config(&self.config);
                match dispatcher.run(&ctx, module, command, &argv).await {
                    Ok(result) => {
                        if *json {
                            output::print_json(&result)?;
                        } else {
                            output::print_run_output(&result);
                        }
                        Ok(0)
                    }
                    Err(ModuleError::Execution(ExecutionError::NonZeroExit {
                        exit_code,
                        stdout,
                        stderr,
                        ..
                    })) => {
                        print!("{stdout}");
                        eprint!("{stderr}");
                        warn!("{} {} exited with code {}", module.name(), command, exit_code);
                        Ok(exit_code)
                    }
                    Err(e) => Err(e.into()),
                }
            }

            ModulesCommand::Diagnostics { json } => {
                let manager = self.load().await?;
                let Some(report) = manager.report() else {
                    return Ok(0);
                };
                if *json {
                    output::print_json(&output::diagnostic_records(report))?;
                } else {
                    output::print_diagnostics(report);
                }
                Ok(if report.has_problems() { 1 } else { 0 })
            }
        }
    }

    async fn load(&self) -> Result<Manager> {
        let mut manager = Manager::new(&self.config);
        let report = manager.load_modules().await?;
        info!("{} modules available", report.loaded);
        for diagnostic in report.validation_errors() {
            warn!("{}", diagnostic);
        }
        Ok(manager)
    }
}

fn absolute(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}
