//! Import command implementation.

use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;

use crate::cli::{Cli, ImportArgs};
use crate::config::{resolve_evidence_root, ProjectContext};
use crate::error::{Error, Result};
use crate::transfer::{spawn_import, ImportOptions};

/// Execute the import command.
///
/// # Errors
///
/// Returns an error if the archive is missing, unsafe, or invalid, or the
/// import fails.
pub fn execute(args: &ImportArgs, cli: &Cli, json: bool) -> Result<()> {
    if !args.archive.is_file() {
        return Err(Error::InvalidArgument(format!(
            "archive not found: {}",
            args.archive.display()
        )));
    }

    let context = super::context(cli)?;
    let conventions = context.conventions().clone();
    let options = ImportOptions {
        destination_folder: destination(args, cli)?,
        target_project: args.target,
        overwrite: args.overwrite,
        atomic: args.atomic,
        preserve_paths: args.preserve_paths,
    };

    let context: Arc<dyn ProjectContext> = Arc::new(context);
    let handle = spawn_import(context, conventions, options, args.archive.clone())?;
    let stats = super::wait(handle, !json && !cli.quiet)?;

    if json {
        let output = serde_json::json!({
            "success": true,
            "stats": stats,
        });
        println!("{}", serde_json::to_string(&output)?);
    } else if !cli.quiet {
        let target = if stats.created_project {
            format!("new project {}", stats.project_id)
        } else {
            format!("project {}", stats.project_id)
        };
        println!("{} into {target}", "Imported".green().bold());
        println!();
        for table in &stats.tables {
            println!(
                "  {:<28} {:>8} created {:>8} skipped",
                table.table, table.created, table.skipped
            );
        }
        println!();
        if stats.deleted_rows > 0 {
            println!("  Replaced: {} existing rows", stats.deleted_rows);
        }
        println!(
            "  Total:    {} created, {} skipped",
            stats.total_created(),
            stats.total_skipped()
        );
        println!("  Files:    {} restored", stats.files_restored);
        println!("  Folder:   {}", stats.destination_folder.display());
    }
    Ok(())
}

/// `--dest`, else the evidence root flag, else `./<archive stem>`.
fn destination(args: &ImportArgs, cli: &Cli) -> Result<PathBuf> {
    let explicit = args
        .dest
        .clone()
        .or_else(|| resolve_evidence_root(cli.evidence_root.as_deref()));
    if let Some(dest) = explicit {
        return Ok(dest);
    }
    let stem = args
        .archive
        .file_stem()
        .map_or_else(|| "import".to_string(), |s| s.to_string_lossy().into_owned());
    Ok(std::env::current_dir()?.join(stem))
}
