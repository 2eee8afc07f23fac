//! Project archive export and import.
//!
//! An archive is a zip file with this layout:
//!
//! ```text
//! manifest.json                 archive description, written last
//! db/tables/<table>.jsonl|csv   scoped rows, one file per table
//! meta/config.json              the project row, {project_table: {column: value}}
//! meta/files.jsonl              one FileRecord per bundled file
//! files/<hh>/<sha256>/<name>    bundled file content
//! ```
//!
//! # Pipelines
//!
//! - [`export::Exporter`]: dependency-ordered table dump, file bundling, packaging
//! - [`import::Importer`]: safe extraction, merge-key dedup, foreign-key remap,
//!   verified file restore
//! - [`worker`]: run either pipeline on a background thread with progress and
//!   cancellation

pub mod archive;
pub mod codec;
pub mod content_store;
pub mod export;
pub mod file;
pub mod import;
pub mod merge;
pub mod progress;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod fixtures;

pub use archive::ARCHIVE_EXTENSION;
pub use codec::TableFormat;
pub use export::Exporter;
pub use import::Importer;
pub use progress::{CancellationToken, Progress, ProgressReporter};
pub use types::{ExportOptions, ExportStats, ImportOptions, ImportStats, TableExport, TableStats};
pub use worker::{spawn_export, spawn_import, PipelineHandle};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const TABLES_DIR: &str = "db/tables";
pub const CONFIG_FILE: &str = "meta/config.json";
pub const FILES_INDEX: &str = "meta/files.jsonl";
pub const FILES_DIR: &str = "files";

/// File name for a table's row file, or `None` if the table name cannot be
/// used as a single path component.
#[must_use]
pub fn table_file_name(table: &str, format: TableFormat) -> Option<String> {
    let unusable = table.is_empty()
        || table == "."
        || table == ".."
        || table.contains(['/', '\\', ':', '\0']);
    if unusable {
        None
    } else {
        Some(format!("{table}.{}", format.extension()))
    }
}
