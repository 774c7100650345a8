use crate::modules::dispatcher::ExecutionOutput;
use crate::modules::manager::{Diagnostic, LoadReport};
use crate::modules::scaffold::ScaffoldRequest;
use crate::modules::types::{Backend, Module, ModuleType};
use serde::Serialize;
use std::path::PathBuf;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print modules as an aligned table
pub fn print_module_table(modules: &[&Module]) {
    if modules.is_empty() {
        println!("No modules found.");
        return;
    }

    let name_width = modules
        .iter()
        .map(|m| m.name().len())
        .max()
        .unwrap_or(4)
        .max(4);

    println!(
        "{:<name_width$}  {:<8}  {:<7}  {:<7}  DESCRIPTION",
        "NAME", "VERSION", "TYPE", "SOURCE"
    );
    for module in modules {
        let marker = if module.trusted { "" } else { " (untrusted)" };
        println!(
            "{:<name_width$}  {:<8}  {:<7}  {:<7}  {}{}",
            module.name(),
            module.metadata.version,
            module.module_type(),
            module.source,
            module.metadata.description,
            marker
        );
    }
}

pub fn print_load_summary(report: &LoadReport) {
    let invalid = report.validation_errors().count();
    if invalid > 0 {
        println!();
        println!(
            "⚠️  {invalid} module descriptor(s) failed validation; run `ship-modules diagnostics` for details"
        );
    }
}

/// Print everything known about one module
pub fn print_module_info(module: &Module) {
    println!("📦 {} {}", module.name(), module.metadata.version);
    println!("================================================");
    if !module.metadata.description.is_empty() {
        println!("{}", module.metadata.description);
        println!();
    }
    if !module.metadata.author.is_empty() {
        println!("Author:  {}", module.metadata.author);
    }
    println!("Type:    {}", module.module_type());
    println!("Source:  {}", module.location());
    println!(
        "Trusted: {}",
        if module.trusted { "✅ yes" } else { "❌ no" }
    );
    if !module.metadata.tags.is_empty() {
        println!("Tags:    {}", module.metadata.tags.join(", "));
    }

    match &module.spec.backend {
        Backend::Docker(docker) => {
            println!("Image:   {}", docker.image);
            if !docker.entrypoint.is_empty() {
                println!("Entry:   {}", docker.entrypoint.join(" "));
            }
        }
        Backend::Dagger(dagger) => {
            println!("Dagger:  {}", dagger.module);
            if let Some(function) = &dagger.function {
                println!("Function: {function}");
            }
        }
    }

    if !module.spec.permissions.is_empty() {
        let permissions: Vec<&str> = module.spec.permissions.iter().map(|p| p.as_str()).collect();
        println!("Permissions: {}", permissions.join(", "));
    }
    if !module.spec.dependencies.is_empty() {
        println!("Dependencies: {}", module.spec.dependencies.join(", "));
    }

    println!();
    println!("Commands:");
    for command in &module.spec.commands {
        println!("  {} - {}", command.name, command.description);
        for flag in &command.flags {
            let mut notes = Vec::new();
            if flag.required {
                notes.push("required".to_string());
            }
            if !flag.enum_values.is_empty() {
                notes.push(format!("one of: {}", flag.enum_values.join(", ")));
            }
            if let Some(default) = &flag.default {
                notes.push(format!("default: {default}"));
            }
            let short = flag
                .short
                .as_ref()
                .map(|s| format!("-{s}, "))
                .unwrap_or_default();
            let notes = if notes.is_empty() {
                String::new()
            } else {
                format!(" [{}]", notes.join("; "))
            };
            println!(
                "      {}--{} <{}>  {}{}",
                short, flag.name, flag.flag_type, flag.description, notes
            );
        }
        for example in &command.examples {
            println!("      $ {example}");
        }
    }
}

pub fn print_run_output(result: &ExecutionOutput) {
    print!("{}", result.stdout);
    if !result.stderr.is_empty() {
        eprint!("{}", result.stderr);
    }
    eprintln!(
        "✅ {} {} completed in {:.1}s",
        result.module,
        result.command,
        result.duration.as_secs_f64()
    );
}

pub fn print_scaffold_result(request: &ScaffoldRequest, written: &[PathBuf]) {
    let dir = request.output_dir.display();
    println!("✅ Module '{}' created at {}", request.name, dir);
    for path in written {
        println!("  • {}", path.display());
    }
    println!();
    println!("Next steps:");
    println!("  1. Edit {dir}/module.yaml to customize the module");
    match request.module_type {
        ModuleType::Docker => {
            println!("  2. Edit {dir}/Dockerfile and {dir}/entrypoint.sh");
            println!("  3. Build the image: docker build -t {}:latest {dir}", request.name);
        }
        ModuleType::Dagger => {
            println!("  2. Initialize the Dagger module: cd {dir} && dagger init");
            println!("  3. Implement your Dagger functions");
        }
    }
    println!("  4. Check it loads: ship-modules info {}", request.name);
}

#[derive(Debug, Serialize)]
pub struct DiagnosticRecord {
    pub kind: &'static str,
    pub message: String,
}

pub fn diagnostic_records(report: &LoadReport) -> Vec<DiagnosticRecord> {
    report
        .diagnostics
        .iter()
        .map(|d| DiagnosticRecord {
            kind: match d {
                Diagnostic::Discovery(_) => "discovery",
                Diagnostic::Invalid(_) => "validation",
                Diagnostic::Warning { .. } => "warning",
                Diagnostic::Shadowed(_) => "shadowed",
            },
            message: d.to_string(),
        })
        .collect()
}

pub fn print_diagnostics(report: &LoadReport) {
    println!("🔍 Loaded {} modules", report.loaded);
    if report.diagnostics.is_empty() {
        println!("No problems found.");
        return;
    }
    println!();
    for diagnostic in &report.diagnostics {
        match diagnostic {
            Diagnostic::Discovery(e) => println!("  ℹ️  {e}"),
            Diagnostic::Invalid(e) => {
                println!("  ❌ {}", e.descriptor);
                for violation in &e.violations {
                    println!("       {violation}");
                }
            }
            Diagnostic::Warning { .. } => println!("  ⚠️  {diagnostic}"),
            Diagnostic::Shadowed(_) => println!("  ↪️  {diagnostic}"),
        }
    }
}
