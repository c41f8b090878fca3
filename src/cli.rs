//! CLI surface: a `Cli { command: Commands }` derive shape covering every
//! subcommand this crate exposes.

use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "minescan", version, about = "Wide-area Minecraft server discovery")]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, global = true, default_value = "config.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a scan over a CIDR range or a target file.
    #[command(group(ArgGroup::new("target").required(true).args(["range", "file"])))]
    Scan {
        /// CIDR range to scan, e.g. 10.0.0.0/24
        #[arg(long)]
        range: Option<String>,
        /// Newline-delimited target file (ip or ip:port per line)
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Parse and validate the configuration file without scanning.
    ValidateConfig,
    /// Write a configuration file with documented defaults.
    InitConfig,
    /// Print version information.
    Version,
    /// Export stored results to JSON, CSV, or XLSX.
    Export {
        /// Output format; inferred from --output's extension if omitted.
        #[arg(long)]
        format: Option<String>,
        #[arg(long)]
        output: PathBuf,
    },
    /// Load blacklist entries from a file into the store.
    ImportBlacklist { path: PathBuf },
    /// Print aggregate scan statistics.
    Stats,
    /// Search stored endpoints (MOTD/version/software substring match).
    Search { query: String },
}
