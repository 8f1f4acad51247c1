mod commands;
mod logging;
mod progress;
mod prompt;

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use jellyfin_migrator_core::{AcceptAll, AppConfig, Diagnostic, MigrationReport, Migrator};
use progress::CliReporter;
use prompt::TerminalAck;
use tracing::{error, info};

/// Migration overrides given on the command line.
struct Overrides {
    source_root: Option<PathBuf>,
    target_root: Option<PathBuf>,
    workers: Option<usize>,
    yes: bool,
}

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();

    let args = Cli::parse();

    let result = match args.command {
        Some(Commands::Migrate {
            config,
            source_root,
            target_root,
            workers,
            yes,
        }) => run_migrate(
            &config,
            Overrides {
                source_root,
                target_root,
                workers,
                yes,
            },
        ),
        Some(Commands::InitConfig { path }) => AppConfig::write_template(&path)
            .map(|_| println!("Wrote {}", path.display()))
            .with_context(|| format!("cannot write {}", path.display())),
        Some(Commands::PrintConfig { config }) => print_config(&config),
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("Error: {:#}", err);
        process::exit(1);
    }
}

fn run_migrate(path: &Path, overrides: Overrides) -> Result<()> {
    let mut config = AppConfig::load(path)
        .with_context(|| format!("Error loading configuration from {}", path.display()))?;
    if let Some(source_root) = overrides.source_root {
        config.source_root = source_root;
    }
    if let Some(target_root) = overrides.target_root {
        config.target_root = target_root;
    }
    if let Some(workers) = overrides.workers {
        config.workers = workers;
    }

    info!(
        "Migration started {} : {} -> {}",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        config.source_root.display(),
        config.target_root.display()
    );

    let migrator = Migrator::new(config);
    let mut migrator = if overrides.yes {
        migrator.with_acknowledger(AcceptAll)
    } else {
        migrator.with_acknowledger(TerminalAck)
    };
    let reporter = CliReporter::new();
    let report = migrator.run(&reporter)?;

    print_summary(&report);
    Ok(())
}

fn print_config(path: &Path) -> Result<()> {
    let config = AppConfig::load(path)
        .with_context(|| format!("Error loading configuration from {}", path.display()))?;
    config.validate()?;
    println!("{}", config.to_toml()?);
    println!("# Effective path rules");
    for rule in config.effective_path_rules() {
        println!("#   {} -> {}", rule.from, rule.to);
    }
    println!("# Effective filesystem rules");
    for rule in config.effective_fs_rules() {
        println!("#   {} -> {}", rule.from, rule.to);
    }
    Ok(())
}

fn print_summary(report: &MigrationReport) {
    println!();
    info!(
        "{} paths rewritten, {} identifiers rewritten",
        format!("{}", report.paths_rewritten).green(),
        format!("{}", report.identifiers_rewritten).green(),
    );
    info!(
        "{} files copied, {} relocated, {} timestamps updated",
        format!("{}", report.files_copied).green(),
        format!("{}", report.files_relocated).cyan(),
        format!("{}", report.timestamps_updated).cyan(),
    );
    info!(
        "{} merge groups, {} duplicate rows deleted, {} unresolved candidates, {} missing files",
        format!("{}", report.merges).yellow(),
        format!("{}", report.rows_deleted).yellow(),
        format!("{}", report.unresolved).yellow(),
        format!("{}", report.missing_files).yellow(),
    );

    for notice in report.merge_notices() {
        if let Diagnostic::MergeNotice {
            new_path,
            merged,
            deleted_row: None,
            ..
        } = notice
        {
            println!("{} {} <- {}", "merged".yellow(), new_path, merged.join(", "));
        }
    }
    for diagnostic in &report.diagnostics {
        if let Diagnostic::JobFailed { path, error } = diagnostic {
            println!("{} {}: {}", "failed".red(), path.display(), error);
        }
    }
    if report.failed_jobs > 0 {
        println!(
            "{}",
            format!("{} jobs failed, see the log for details", report.failed_jobs).red()
        );
    }
}
