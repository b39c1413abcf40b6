use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use touch_designer::export::preview_export;
use touch_designer::recipe::lint_recipe;
use touch_designer::selfcheck::self_check;
use touch_designer::{
    compile_with, export_to_path, CompileOptions, Compilation, Device, ExportMode, ExportOptions,
    SchemaRegistry,
};

#[derive(Parser)]
#[command(name = "touch-designer", version, about = "Compile touchscreen UI projects into ESPHome YAML")]
struct Cli {
    /// Compile options file (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Widget schema file replacing the built-in registry
    #[arg(long, global = true)]
    schemas: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Inputs {
    /// Device snapshot (JSON)
    #[arg(long)]
    device: PathBuf,

    /// Hardware recipe template (YAML)
    #[arg(long)]
    recipe: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a device project and print the document
    Compile {
        #[command(flatten)]
        inputs: Inputs,

        /// Write the document here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Exit with an error when any warning is reported
        #[arg(long)]
        deny_warnings: bool,
    },
    /// Compile and merge into the managed region of a target file
    Export {
        #[command(flatten)]
        inputs: Inputs,

        /// Target device YAML file
        #[arg(long)]
        target: PathBuf,

        /// Refuse to create a managed region if the target has none
        #[arg(long)]
        update_only: bool,

        /// Abort unless the target still hashes to this value (from --dry-run)
        #[arg(long)]
        expected_hash: Option<String>,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },
    /// Check determinism, document validity and export idempotence
    SelfCheck {
        #[command(flatten)]
        inputs: Inputs,
    },
    /// Check recipe templates for structural problems
    LintRecipe {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match run(Cli::parse()) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("✗ {:#}", e);
            process::exit(2);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let options = match &cli.config {
        Some(path) => CompileOptions::from_path(path)?,
        None => CompileOptions::default(),
    };
    let registry = match &cli.schemas {
        Some(path) => {
            let text = read(path)?;
            SchemaRegistry::from_yaml_str(&text)
                .with_context(|| format!("loading schemas from {}", path.display()))?
        }
        None => SchemaRegistry::builtin()?,
    };

    match cli.command {
        Command::Compile {
            inputs,
            output,
            deny_warnings,
        } => {
            let compiled = compile_inputs(&inputs, &registry, &options)?;
            report(&compiled);
            match output {
                Some(path) => {
                    fs::write(&path, &compiled.document)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("✓ wrote {}", path.display());
                }
                None => print!("{}", compiled.document),
            }
            Ok(if deny_warnings && compiled.diagnostics.has_warnings() {
                1
            } else {
                0
            })
        }
        Command::Export {
            inputs,
            target,
            update_only,
            expected_hash,
            dry_run,
        } => {
            let compiled = compile_inputs(&inputs, &registry, &options)?;
            report(&compiled);
            let mode = if update_only {
                ExportMode::UpdateOnly
            } else {
                ExportMode::CreateOrUpdate
            };

            if dry_run {
                let existing = match fs::read_to_string(&target) {
                    Ok(text) => text,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                    Err(e) => return Err(e).with_context(|| format!("reading {}", target.display())),
                };
                return match preview_export(&existing, &compiled.document, mode) {
                    Ok(preview) => {
                        println!("outcome:       {:?}", preview.outcome);
                        println!("changed:       {}", preview.changed);
                        println!("expected hash: {}", preview.expected_hash);
                        println!("new hash:      {}", preview.new_hash);
                        Ok(0)
                    }
                    Err(abort) => {
                        eprintln!("✗ export aborted ({}): {}", abort.code(), abort);
                        Ok(1)
                    }
                };
            }

            let export_options = ExportOptions {
                mode,
                expected_hash,
            };
            match export_to_path(&target, &compiled.document, &export_options) {
                Ok(export) if export.changed => {
                    println!("✓ {} {:?}", target.display(), export.outcome);
                    Ok(0)
                }
                Ok(_) => {
                    println!("✓ {} unchanged", target.display());
                    Ok(0)
                }
                Err(touch_designer::DesignerError::ExportAborted(abort)) => {
                    eprintln!("✗ export aborted ({}): {}", abort.code(), abort);
                    Ok(1)
                }
                Err(e) => Err(e.into()),
            }
        }
        Command::SelfCheck { inputs } => {
            let device = load_device(&inputs.device)?;
            let recipe = read(&inputs.recipe)?;
            let report = self_check(&device, &recipe, &registry, &options);
            for check in &report.checks {
                let mark = if check.passed { "✓" } else { "✗" };
                if check.detail.is_empty() {
                    println!("{} {}", mark, check.name);
                } else {
                    println!("{} {}: {}", mark, check.name, check.detail);
                }
            }
            Ok(if report.passed() { 0 } else { 1 })
        }
        Command::LintRecipe { files } => {
            let mut exit_code = 0;
            for path in files {
                let text = read(&path)?;
                let issues = lint_recipe(&text);
                if issues.is_empty() {
                    println!("✓ {} is usable", path.display());
                } else {
                    eprintln!("✗ {} has problems:", path.display());
                    for issue in issues {
                        eprintln!("    {}", issue);
                    }
                    exit_code = 1;
                }
            }
            Ok(exit_code)
        }
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn load_device(path: &Path) -> Result<Device> {
    let text = read(path)?;
    Device::from_json(&text).with_context(|| format!("parsing device {}", path.display()))
}

fn compile_inputs(
    inputs: &Inputs,
    registry: &SchemaRegistry,
    options: &CompileOptions,
) -> Result<Compilation> {
    let device = load_device(&inputs.device)?;
    let recipe = read(&inputs.recipe)?;
    Ok(compile_with(&device, &recipe, registry, options))
}

fn report(compiled: &Compilation) {
    for diagnostic in &compiled.diagnostics {
        eprintln!("  [{}] {}", diagnostic.severity(), diagnostic);
    }
}
