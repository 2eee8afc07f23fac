//! CLI definitions using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::transfer::TableFormat;

pub mod commands;

/// projpack - export and import a project's data and evidence files as one archive
#[derive(Parser, Debug)]
#[command(name = "projpack", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.projpack/data/projpack.db)
    #[arg(long, global = true, env = "PROJPACK_DB")]
    pub db: Option<PathBuf>,

    /// Active project id (default: the most recently created project)
    #[arg(long, global = true, env = "PROJPACK_PROJECT")]
    pub project: Option<i64>,

    /// Root that relative file paths are resolved against
    #[arg(long, global = true, env = "PROJPACK_EVIDENCE_ROOT")]
    pub evidence_root: Option<PathBuf>,

    /// Naming-convention overrides (JSON file)
    #[arg(long, global = true, env = "PROJPACK_CONVENTIONS")]
    pub conventions: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export the active project to an archive
    Export(ExportArgs),

    /// Import an archive into a new or existing project
    Import(ImportArgs),

    /// Show an archive's manifest without importing it
    Inspect {
        /// Archive to inspect
        archive: PathBuf,
    },

    /// List project-scoped tables in dependency order
    Tables,

    /// Print version information
    Version,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(clap::Args, Debug)]
pub struct ExportArgs {
    /// Archive to write (default: <project name>.projpack in the current directory)
    pub output: Option<PathBuf>,

    /// Row format for table files
    #[arg(long, value_enum, default_value_t)]
    pub format: TableFormat,

    /// Do not bundle referenced files
    #[arg(long)]
    pub no_files: bool,

    /// Author recorded in the manifest
    #[arg(long)]
    pub author: Option<String>,

    /// Author website recorded in the manifest
    #[arg(long)]
    pub author_website: Option<String>,

    /// Author email recorded in the manifest
    #[arg(long)]
    pub author_email: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct ImportArgs {
    /// Archive to import
    pub archive: PathBuf,

    /// Folder to restore bundled files into (default: the evidence root)
    #[arg(long)]
    pub dest: Option<PathBuf>,

    /// Existing project to import into (default: create a new project)
    #[arg(long)]
    pub target: Option<i64>,

    /// Delete the target project's rows before importing
    #[arg(long, requires = "target")]
    pub overwrite: bool,

    /// Insert all rows in a single transaction
    #[arg(long)]
    pub atomic: bool,

    /// Restore files under their original relative paths
    #[arg(long)]
    pub preserve_paths: bool,
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}
