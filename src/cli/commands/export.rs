//! Export command implementation.

use std::sync::Arc;

use colored::Colorize;

use crate::cli::{Cli, ExportArgs};
use crate::config::ProjectContext;
use crate::error::Result;
use crate::transfer::{spawn_export, ExportOptions};

/// Execute the export command.
///
/// # Errors
///
/// Returns an error if the context cannot be resolved or the export fails.
pub fn execute(args: &ExportArgs, cli: &Cli, json: bool) -> Result<()> {
    let context = super::context(cli)?;
    let conventions = context.conventions().clone();
    let destination = match &args.output {
        Some(path) => path.clone(),
        None => super::default_archive_name(&context.active_project_name()?),
    };

    let options = ExportOptions {
        format: args.format,
        include_files: !args.no_files,
        author: args.author.clone(),
        author_website: args.author_website.clone(),
        author_email: args.author_email.clone(),
    };

    let context: Arc<dyn ProjectContext> = Arc::new(context);
    let handle = spawn_export(context, conventions, options, destination)?;
    let stats = super::wait(handle, !json && !cli.quiet)?;

    if json {
        let output = serde_json::json!({
            "success": true,
            "stats": stats,
        });
        println!("{}", serde_json::to_string(&output)?);
    } else if !cli.quiet {
        println!(
            "{} {} (project {})",
            "Exported".green().bold(),
            stats.project_name,
            stats.project_id
        );
        println!();
        for table in &stats.tables {
            println!("  {:<28} {:>8} rows", table.table, table.rows);
        }
        println!();
        println!("  Total:    {} rows", stats.total_rows());
        println!("  Files:    {}", stats.files);
        if stats.missing_files > 0 {
            println!(
                "  {}",
                format!("Missing:  {} referenced files not found", stats.missing_files).yellow()
            );
        }
        println!("  Archive:  {}", stats.archive.display());
    }
    Ok(())
}
