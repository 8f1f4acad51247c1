use clap::{Parser, Subcommand};
use jellyfin_migrator_core::config::DEFAULT_CONFIG_FILE;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "jellyfin-migrator")]
#[command(about = "Move a Jellyfin installation to another machine or layout", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run all migration phases
    Migrate {
        /// Configuration file
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        /// Override the directory holding the copied installation
        #[arg(long)]
        source_root: Option<PathBuf>,
        /// Override the output directory
        #[arg(long)]
        target_root: Option<PathBuf>,
        /// Number of jobs processed in parallel
        #[arg(short, long)]
        workers: Option<usize>,
        /// Allow jobs that modify their own source file without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Write an example configuration file
    InitConfig {
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        path: PathBuf,
    },
    /// Print the effective configuration
    PrintConfig {
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
}
