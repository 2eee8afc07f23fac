//! Version command implementation.

use crate::error::Result;
use crate::model::manifest::{FORMAT_VERSION, SUPPORTED_FORMAT_VERSIONS};
use serde::Serialize;

#[derive(Serialize)]
struct VersionOutput<'a> {
    version: &'a str,
    build: &'a str,
    archive_format: &'a str,
    readable_formats: &'a [&'a str],
    sqlite: &'a str,
}

/// Execute the version command.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn execute(json: bool) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    let build = if cfg!(debug_assertions) {
        "dev"
    } else {
        "release"
    };
    let sqlite = rusqlite::version();

    if json {
        let output = VersionOutput {
            version,
            build,
            archive_format: FORMAT_VERSION,
            readable_formats: SUPPORTED_FORMAT_VERSIONS,
            sqlite,
        };
        let payload = serde_json::to_string(&output)?;
        println!("{payload}");
        return Ok(());
    }

    println!("projpack version {version} ({build})");
    println!("archive format {FORMAT_VERSION}, sqlite {sqlite}");
    Ok(())
}
