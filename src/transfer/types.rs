//! Options and result statistics for the transfer pipelines.

use std::path::PathBuf;

use serde::Serialize;

use crate::transfer::codec::TableFormat;

/// Options for one export run.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Row file format for the table files.
    pub format: TableFormat,
    /// Bundle the files referenced by path columns.
    pub include_files: bool,
    pub author: Option<String>,
    pub author_website: Option<String>,
    pub author_email: Option<String>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: TableFormat::default(),
            include_files: true,
            author: None,
            author_website: None,
            author_email: None,
        }
    }
}

/// Options for one import run.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Where bundled files are restored.
    pub destination_folder: PathBuf,
    /// Existing project to import into. `None` creates a new project.
    pub target_project: Option<i64>,
    /// Delete the target project's scoped rows before importing.
    pub overwrite: bool,
    /// Run every table insert in one transaction.
    pub atomic: bool,
    /// Restore files under their original relative paths instead of flat.
    pub preserve_paths: bool,
}

/// Rows written for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableExport {
    pub table: String,
    pub rows: u64,
}

/// Statistics from an export operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportStats {
    pub archive: PathBuf,
    pub project_id: i64,
    pub project_name: String,
    /// Tables in the order they were written.
    pub tables: Vec<TableExport>,
    /// Files bundled into the archive.
    pub files: usize,
    /// Referenced files that did not exist on disk.
    pub missing_files: usize,
}

impl ExportStats {
    /// Total rows across all tables.
    #[must_use]
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows).sum()
    }
}

/// Per-table import counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub table: String,
    /// Rows inserted.
    pub created: usize,
    /// Rows whose merge key matched an existing row.
    pub skipped: usize,
}

impl TableStats {
    #[must_use]
    pub fn total(&self) -> usize {
        self.created + self.skipped
    }
}

/// Statistics from an import operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportStats {
    pub project_id: i64,
    /// Whether the target project was created by this import.
    pub created_project: bool,
    /// Rows removed by `overwrite`.
    pub deleted_rows: usize,
    pub tables: Vec<TableStats>,
    pub files_restored: usize,
    pub destination_folder: PathBuf,
}

impl ImportStats {
    #[must_use]
    pub fn total_created(&self) -> usize {
        self.tables.iter().map(|t| t.created).sum()
    }

    #[must_use]
    pub fn total_skipped(&self) -> usize {
        self.tables.iter().map(|t| t.skipped).sum()
    }

    /// Counts for one table, if it was imported.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableStats> {
        self.tables.iter().find(|t| t.table == name)
    }
}
