//! Inspect command implementation.

use std::path::Path;

use colored::Colorize;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::Manifest;
use crate::transfer::archive::{archive_summary, read_entry};
use crate::transfer::{FILES_INDEX, MANIFEST_FILE};

#[derive(Serialize)]
struct InspectOutput<'a> {
    archive: String,
    entries: usize,
    uncompressed_bytes: u64,
    indexed_files: usize,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    problem: Option<String>,
    manifest: &'a Manifest,
}

/// Execute the inspect command.
///
/// # Errors
///
/// Returns an error if the archive cannot be read or has no valid manifest.
pub fn execute(archive: &Path, json: bool) -> Result<()> {
    if !archive.is_file() {
        return Err(Error::InvalidArgument(format!(
            "archive not found: {}",
            archive.display()
        )));
    }

    let bytes = read_entry(archive, MANIFEST_FILE)?
        .ok_or_else(|| Error::Format("manifest.json not found in archive".to_string()))?;
    let manifest = Manifest::parse(&bytes)?;
    let problem = manifest.validate().err().map(|e| e.to_string());
    let (entries, uncompressed_bytes) = archive_summary(archive)?;
    let indexed_files = read_entry(archive, FILES_INDEX)?.map_or(0, |index| {
        String::from_utf8_lossy(&index)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .count()
    });

    if json {
        let output = InspectOutput {
            archive: archive.display().to_string(),
            entries,
            uncompressed_bytes,
            indexed_files,
            valid: problem.is_none(),
            problem,
            manifest: &manifest,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    println!("{}", archive.display().to_string().bold());
    match &problem {
        None => println!("  Status:    {}", "importable".green()),
        Some(reason) => println!("  Status:    {}", reason.red()),
    }
    println!("  Format:    {} ({})", manifest.format_version, manifest.table_format);
    println!("  Producer:  projpack {}", manifest.producer_version);
    println!("  Created:   {}", manifest.created_utc.to_rfc3339());
    if let Some(id) = manifest.export_id {
        println!("  Export id: {id}");
    }
    println!(
        "  Project:   {} (id {})",
        manifest.project_name, manifest.project_id
    );
    println!("  Database:  {} {}", manifest.db_provider, manifest.db_version);
    if let Some(author) = &manifest.author {
        println!("  Author:    {author}");
    }
    if let Some(email) = &manifest.author_email {
        println!("  Email:     {email}");
    }
    if let Some(site) = &manifest.author_website {
        println!("  Website:   {site}");
    }
    println!("  Tables:    {}", manifest.tables.join(", "));
    println!(
        "  Files:     {} ({} indexed, {} hashed)",
        manifest.file_count, indexed_files, manifest.hash_algorithm
    );
    println!("  Entries:   {entries} ({uncompressed_bytes} bytes uncompressed)");
    Ok(())
}
