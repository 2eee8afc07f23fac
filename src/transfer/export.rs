//! Project export.
//!
//! Writes every scoped table (parents before children), the project row, and
//! the files the project's rows point at into a scratch directory, then zips
//! it. The destination archive only appears once packaging succeeds; the
//! scratch directory is removed whether the run succeeds, fails, or is
//! cancelled.
//!
//! # Phases
//!
//! | Progress | Phase                         |
//! |----------|-------------------------------|
//! | 1-65     | tables, in dependency order   |
//! | 70       | project metadata              |
//! | 75-90    | file bundling                 |
//! | 90       | manifest                      |
//! | 95       | packaging                     |

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, Connection};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Conventions, ProjectContext};
use crate::error::{Error, Result};
use crate::model::manifest::{DB_PROVIDER, FORMAT_VERSION, HASH_ALGORITHM};
use crate::model::{FileRecord, Manifest};
use crate::storage::{quote_ident, quote_list, SqliteStorage, TableDescriptor};
use crate::transfer::archive::{pack_directory, portable_relative, scratch_dir};
use crate::transfer::codec::{create_writer, TableFormat};
use crate::transfer::content_store::ContentStore;
use crate::transfer::file::{write_json, JsonlWriter};
use crate::transfer::progress::{CancellationToken, ProgressReporter};
use crate::transfer::types::{ExportOptions, ExportStats, TableExport};
use crate::transfer::{table_file_name, CONFIG_FILE, FILES_INDEX, MANIFEST_FILE, TABLES_DIR};

/// Rows fetched per page when dumping a table.
pub const BATCH_SIZE: i64 = 10_000;

/// A path value found in a scoped row.
#[derive(Debug, Clone)]
struct FileReference {
    path: String,
    file_name: Option<String>,
}

/// Exporter for project archives.
pub struct Exporter<'a> {
    context: &'a dyn ProjectContext,
    conventions: &'a Conventions,
    options: ExportOptions,
    progress: ProgressReporter,
    cancel: CancellationToken,
}

impl<'a> Exporter<'a> {
    #[must_use]
    pub fn new(
        context: &'a dyn ProjectContext,
        conventions: &'a Conventions,
        options: ExportOptions,
    ) -> Self {
        Self {
            context,
            conventions,
            options,
            progress: ProgressReporter::silent(),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Export the active project to `destination`.
    ///
    /// # Errors
    ///
    /// Returns an error if the context cannot be resolved, a query or write
    /// fails, or the run is cancelled. No archive is left behind on error.
    pub fn export(&mut self, destination: &Path) -> Result<ExportStats> {
        let storage = self.context.connection()?.open()?;
        let project_id = self.context.active_project_id()?;
        let project_name = self.context.active_project_name()?;
        info!(project_id, %project_name, archive = %destination.display(), "Starting export");

        let scratch = scratch_dir("projpack_export_")?;
        let root = scratch.path();
        let mut stats = ExportStats {
            archive: destination.to_path_buf(),
            project_id,
            project_name: project_name.clone(),
            ..ExportStats::default()
        };

        self.cancel.check()?;
        self.progress.report(1, "Exporting tables");
        stats.tables = self.export_tables(&storage, project_id, &root.join(TABLES_DIR))?;

        self.cancel.check()?;
        self.progress.report(70, "Exporting project metadata");
        self.export_project_config(&storage, project_id, &root.join(CONFIG_FILE))?;

        self.cancel.check()?;
        self.progress.report(75, "Bundling files");
        let (files, missing) = self.export_files(&storage, project_id, root)?;
        stats.files = files;
        stats.missing_files = missing;

        self.cancel.check()?;
        self.progress.report(90, "Writing manifest");
        let manifest = Manifest {
            format_version: FORMAT_VERSION.to_string(),
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            created_utc: Utc::now(),
            export_id: Some(Uuid::new_v4()),
            project_id: project_id.to_string(),
            project_name,
            db_provider: DB_PROVIDER.to_string(),
            db_version: storage.sqlite_version()?,
            tables: stats.tables.iter().map(|t| t.table.clone()).collect(),
            table_format: self.options.format,
            file_count: stats.files,
            hash_algorithm: HASH_ALGORITHM.to_string(),
            author: self.options.author.clone(),
            author_website: self.options.author_website.clone(),
            author_email: self.options.author_email.clone(),
        };
        write_json(&root.join(MANIFEST_FILE), &manifest)?;

        self.cancel.check()?;
        self.progress.report(95, "Packaging archive");
        pack_directory(root, destination)?;

        self.progress.report(100, "Export complete");
        info!(
            project_id,
            tables = stats.tables.len(),
            rows = stats.total_rows(),
            files = stats.files,
            "Export complete"
        );
        Ok(stats)
    }

    fn export_tables(
        &mut self,
        storage: &SqliteStorage,
        project_id: i64,
        dir: &Path,
    ) -> Result<Vec<TableExport>> {
        fs::create_dir_all(dir)?;
        let introspector = storage.introspector(self.conventions);
        let order = introspector.topological_order()?;
        let total = order.len();
        let mut exported = Vec::with_capacity(total);

        for (i, table) in order.iter().enumerate() {
            self.cancel.check()?;
            let Some(file_name) = table_file_name(table, self.options.format) else {
                warn!(table = %table, "Skipping table whose name is not a valid file name");
                continue;
            };
            self.progress
                .report_within(5, 65, i, total, format!("Exporting {table}"));

            let desc = introspector.describe(table)?;
            let rows = export_table(
                storage.conn(),
                &desc,
                project_id,
                self.options.format,
                &dir.join(file_name),
            )?;
            debug!(table = %table, rows, "Exported table");
            exported.push(TableExport {
                table: table.clone(),
                rows,
            });
        }

        Ok(exported)
    }

    fn export_project_config(
        &self,
        storage: &SqliteStorage,
        project_id: i64,
        path: &Path,
    ) -> Result<()> {
        let mut config = serde_json::Map::new();
        match storage.project_snapshot(self.conventions, project_id) {
            Ok(Some(snapshot)) => {
                config.insert(
                    self.conventions.project_table.clone(),
                    serde_json::Value::Object(snapshot),
                );
            }
            Ok(None) => warn!(project_id, "Project row not found, exporting empty metadata"),
            Err(Error::Config(reason)) => warn!(%reason, "Exporting empty project metadata"),
            Err(e) => return Err(e),
        }
        write_json(path, &config)
    }

    fn file_references(
        &self,
        storage: &SqliteStorage,
        project_id: i64,
    ) -> Result<Vec<FileReference>> {
        let introspector = storage.introspector(self.conventions);
        let mut references = Vec::new();

        for table in introspector.scoped_tables()? {
            let desc = introspector.describe(&table)?;
            let Some(path_col) =
                Conventions::pick_column(&desc.columns, &self.conventions.path_columns)
            else {
                continue;
            };
            let Some(scope) = desc.scope_column.as_deref() else {
                continue;
            };
            let name_expr = Conventions::pick_column(&desc.columns, &self.conventions.file_name_columns)
                .filter(|c| *c != path_col)
                .map_or_else(|| "NULL".to_string(), quote_ident);

            let sql = format!(
                "SELECT {}, {} FROM {} WHERE {} = ?1",
                quote_ident(path_col),
                name_expr,
                quote_ident(&table),
                quote_ident(scope)
            );
            let mut stmt = storage.conn().prepare(&sql)?;
            let rows = stmt.query_map(params![project_id], |row| {
                Ok((row.get::<_, Value>(0)?, row.get::<_, Value>(1)?))
            })?;

            for row in rows {
                let (path, name) = row?;
                let Value::Text(path) = path else { continue };
                if path.trim().is_empty() {
                    continue;
                }
                let file_name = match name {
                    Value::Text(name) if !name.trim().is_empty() => Some(name),
                    _ => None,
                };
                references.push(FileReference { path, file_name });
            }
        }

        Ok(references)
    }

    fn export_files(
        &mut self,
        storage: &SqliteStorage,
        project_id: i64,
        root: &Path,
    ) -> Result<(usize, usize)> {
        let mut index = JsonlWriter::create(&root.join(FILES_INDEX))?;
        if !self.options.include_files {
            return Ok((index.finish()?, 0));
        }

        let references = self.file_references(storage, project_id)?;
        let evidence_root = self.context.evidence_root()?;
        let store = ContentStore::new(root);
        let mut seen = HashSet::new();
        let mut missing = 0;
        let total = references.len();

        for (i, reference) in references.iter().enumerate() {
            let source = resolve_reference(&evidence_root, &reference.path);
            let display = reference.file_name.clone().unwrap_or_else(|| {
                source
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
            // One record per display name, even when the content is shared
            if !seen.insert((source.clone(), display.clone())) {
                continue;
            }
            if !source.is_file() {
                debug!(path = %source.display(), "Referenced file not found, skipping");
                missing += 1;
                continue;
            }

            let stored = store.store(&source, &display)?;
            let original_rel = source
                .strip_prefix(&evidence_root)
                .ok()
                .and_then(portable_relative)
                .unwrap_or_else(|| stored.file_name.clone());

            index.append(&FileRecord {
                path: stored.path,
                sha256: stored.sha256,
                size: stored.size,
                original_rel,
                file_name: stored.file_name,
            })?;

            if (i + 1) % 10 == 0 || i + 1 == total {
                self.progress
                    .report_within(75, 90, i + 1, total, "Bundling files");
            }
        }

        if missing > 0 {
            warn!(missing, "Some referenced files were not found and were skipped");
        }
        Ok((index.finish()?, missing))
    }
}

/// Resolve a stored path against the evidence root. Absolute paths are used as is.
fn resolve_reference(evidence_root: &Path, raw: &str) -> PathBuf {
    let normalized = if std::path::MAIN_SEPARATOR == '\\' {
        raw.trim().to_string()
    } else {
        raw.trim().replace('\\', "/")
    };
    let path = Path::new(&normalized);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        evidence_root.join(path)
    }
}

/// Dump one table's scoped rows, one page at a time.
///
/// Tables with an identity column are paged by key (`id > last`); others by
/// offset over the first column.
fn export_table(
    conn: &Connection,
    desc: &TableDescriptor,
    project_id: i64,
    format: TableFormat,
    path: &Path,
) -> Result<u64> {
    let scope = desc
        .scope_column
        .as_deref()
        .ok_or_else(|| Error::Other(format!("table {} has no scope column", desc.name)))?;
    let width = desc.columns.len();
    let select = format!(
        "SELECT {} FROM {} WHERE {} = ?1",
        quote_list(&desc.columns),
        quote_ident(&desc.name),
        quote_ident(scope)
    );
    let mut writer = create_writer(format, path, &desc.columns)?;

    let read_values = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Vec<Value>> {
        (0..width).map(|i| row.get::<_, Value>(i)).collect()
    };

    let identity_index = desc
        .identity
        .as_deref()
        .and_then(|id| desc.columns.iter().position(|c| c == id));

    if let (Some(identity), Some(index)) = (desc.identity.as_deref(), identity_index) {
        let sql = format!(
            "{select} AND (?2 IS NULL OR {id} > ?2) ORDER BY {id} LIMIT ?3",
            id = quote_ident(identity)
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut after = Value::Null;
        loop {
            let mut rows = stmt.query(params![project_id, after, BATCH_SIZE])?;
            let mut fetched = 0;
            while let Some(row) = rows.next()? {
                let values = read_values(row)?;
                after = values[index].clone();
                writer.write_row(&values)?;
                fetched += 1;
            }
            if fetched < BATCH_SIZE {
                break;
            }
        }
    } else if let Some(order) = desc.order_by() {
        let sql = format!("{select} ORDER BY {order} LIMIT ?2 OFFSET ?3");
        let mut stmt = conn.prepare(&sql)?;
        let mut offset = 0i64;
        loop {
            let mut rows = stmt.query(params![project_id, BATCH_SIZE, offset])?;
            let mut fetched = 0;
            while let Some(row) = rows.next()? {
                writer.write_row(&read_values(row)?)?;
                fetched += 1;
            }
            if fetched < BATCH_SIZE {
                break;
            }
            offset += fetched;
        }
    }

    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::archive::extract_archive;
    use crate::transfer::codec::TableReader;
    use crate::transfer::file::read_jsonl;
    use crate::transfer::fixtures::Fixture;
    use tempfile::TempDir;

    fn export(fixture: &Fixture, options: ExportOptions) -> (PathBuf, ExportStats) {
        let conventions = Conventions::default();
        let context = fixture.context();
        let archive = fixture.path("acme.projpack");
        let stats = Exporter::new(&context, &conventions, options)
            .export(&archive)
            .unwrap();
        (archive, stats)
    }

    #[test]
    fn test_export_writes_tables_in_dependency_order() {
        let fixture = Fixture::new();
        let (archive, stats) = export(&fixture, ExportOptions::default());

        let out = TempDir::new().unwrap();
        extract_archive(&archive, out.path()).unwrap();
        let manifest = Manifest::read(&out.path().join(MANIFEST_FILE)).unwrap();
        assert_eq!(manifest.tables, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(manifest.file_count, 1);
        assert_eq!(manifest.project_id, "1");
        assert_eq!(manifest.table_format, TableFormat::Jsonl);
        assert!(manifest.validate().is_ok());

        assert_eq!(stats.total_rows(), 4);
        assert_eq!(stats.files, 1);
        assert_eq!(stats.missing_files, 1);
        assert!(out.path().join("db/tables/A.jsonl").is_file());
        assert!(out.path().join("db/tables/B.jsonl").is_file());
    }

    #[test]
    fn test_export_only_scoped_rows() {
        let fixture = Fixture::new();
        fixture
            .storage()
            .conn()
            .execute_batch(
                "INSERT INTO projects (id, name) VALUES (2, 'other');
                 INSERT INTO A (name, project_id) VALUES ('foreign', 2);",
            )
            .unwrap();
        let (archive, _) = export(&fixture, ExportOptions::default());

        let out = TempDir::new().unwrap();
        extract_archive(&archive, out.path()).unwrap();
        let rows: Vec<_> = TableReader::open(TableFormat::Jsonl, &out.path().join("db/tables/A.jsonl"))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], Value::Text("alpha".to_string()));
    }

    #[test]
    fn test_export_bundles_referenced_file() {
        let fixture = Fixture::new();
        let (archive, _) = export(&fixture, ExportOptions::default());

        let out = TempDir::new().unwrap();
        extract_archive(&archive, out.path()).unwrap();
        let records: Vec<FileRecord> = read_jsonl(&out.path().join(FILES_INDEX)).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.file_name, "report.pdf");
        assert_eq!(record.original_rel, "docs/report.pdf");
        assert!(record.path.starts_with(&format!("files/{}/", &record.sha256[..2])));
        assert!(out.path().join(&record.path).is_file());

        let config: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.path().join(CONFIG_FILE)).unwrap())
                .unwrap();
        assert_eq!(config["projects"]["client"], "Acme Corp");
    }

    #[test]
    fn test_export_csv_without_files() {
        let fixture = Fixture::new();
        let options = ExportOptions {
            format: TableFormat::Csv,
            include_files: false,
            author: Some("analyst".to_string()),
            ..ExportOptions::default()
        };
        let (archive, stats) = export(&fixture, options);
        assert_eq!(stats.files, 0);

        let out = TempDir::new().unwrap();
        extract_archive(&archive, out.path()).unwrap();
        let manifest = Manifest::read(&out.path().join(MANIFEST_FILE)).unwrap();
        assert_eq!(manifest.table_format, TableFormat::Csv);
        assert_eq!(manifest.author.as_deref(), Some("analyst"));
        assert_eq!(manifest.file_count, 0);
        assert!(out.path().join("db/tables/B.csv").is_file());
    }

    #[test]
    fn test_paging_crosses_batch_boundary() {
        let fixture = Fixture::new();
        {
            let mut storage = fixture.storage();
            let tx = storage.conn_mut().transaction().unwrap();
            for i in 0..(BATCH_SIZE + 5) {
                tx.execute(
                    "INSERT INTO A (name, project_id) VALUES (?1, 1)",
                    params![format!("row{i}")],
                )
                .unwrap();
            }
            tx.commit().unwrap();
        }
        let (_, stats) = export(
            &fixture,
            ExportOptions {
                include_files: false,
                ..ExportOptions::default()
            },
        );
        let a = stats.tables.iter().find(|t| t.table == "A").unwrap();
        assert_eq!(a.rows, u64::try_from(BATCH_SIZE + 6).unwrap());
    }

    #[test]
    fn test_paging_without_identity_visits_every_row_once() {
        let fixture = Fixture::with_extra_sql(
            "CREATE TABLE tags (project_id INTEGER REFERENCES projects(id), label TEXT);",
        );
        {
            let mut storage = fixture.storage();
            let tx = storage.conn_mut().transaction().unwrap();
            for i in 0..(BATCH_SIZE + 5) {
                tx.execute(
                    "INSERT INTO tags (project_id, label) VALUES (1, ?1)",
                    params![format!("tag{i}")],
                )
                .unwrap();
            }
            tx.commit().unwrap();
        }
        let (archive, stats) = export(
            &fixture,
            ExportOptions {
                include_files: false,
                ..ExportOptions::default()
            },
        );
        let tags = stats.tables.iter().find(|t| t.table == "tags").unwrap();
        assert_eq!(tags.rows, u64::try_from(BATCH_SIZE + 5).unwrap());

        let out = TempDir::new().unwrap();
        extract_archive(&archive, out.path()).unwrap();
        let labels: HashSet<String> =
            TableReader::open(TableFormat::Jsonl, &out.path().join("db/tables/tags.jsonl"))
                .unwrap()
                .map(|row| match &row.unwrap()["label"] {
                    Value::Text(label) => label.clone(),
                    other => panic!("unexpected label {other:?}"),
                })
                .collect();
        assert_eq!(labels.len(), usize::try_from(BATCH_SIZE + 5).unwrap());
    }

    #[test]
    fn test_shared_content_keeps_each_display_name() {
        let fixture = Fixture::with_extra_sql(
            "CREATE TABLE attachments (
                id INTEGER PRIMARY KEY,
                project_id INTEGER REFERENCES projects(id),
                file_path TEXT,
                file_name TEXT
            );",
        );
        fixture
            .storage()
            .conn()
            .execute_batch(
                "INSERT INTO attachments (project_id, file_path, file_name) VALUES (1, 'docs/report.pdf', 'summary.pdf');
                 INSERT INTO attachments (project_id, file_path, file_name) VALUES (1, 'docs/report.pdf', 'summary.pdf');
                 INSERT INTO attachments (project_id, file_path, file_name) VALUES (1, 'docs/report.pdf', 'report.pdf');",
            )
            .unwrap();
        let (archive, stats) = export(&fixture, ExportOptions::default());
        assert_eq!(stats.files, 2);

        let out = TempDir::new().unwrap();
        extract_archive(&archive, out.path()).unwrap();
        let mut names: Vec<String> = read_jsonl::<FileRecord>(&out.path().join(FILES_INDEX))
            .unwrap()
            .into_iter()
            .map(|r| r.file_name)
            .collect();
        names.sort();
        assert_eq!(names, ["report.pdf", "summary.pdf"]);
    }

    #[test]
    fn test_cancelled_export_leaves_no_archive() {
        let fixture = Fixture::new();
        let conventions = Conventions::default();
        let context = fixture.context();
        let archive = fixture.path("cancelled.projpack");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = Exporter::new(&context, &conventions, ExportOptions::default())
            .with_cancellation(cancel)
            .export(&archive);
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(!archive.exists());
    }

    #[test]
    fn test_progress_reaches_100_monotonically() {
        let fixture = Fixture::new();
        let conventions = Conventions::default();
        let context = fixture.context();
        let (reporter, rx) = ProgressReporter::channel();
        Exporter::new(&context, &conventions, ExportOptions::default())
            .with_progress(reporter)
            .export(&fixture.path("p.projpack"))
            .unwrap();

        let seen: Vec<u8> = rx.try_iter().map(|p| p.percent).collect();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last(), Some(&100));
    }

    #[test]
    fn test_resolve_reference() {
        let root = Path::new("/ev");
        assert_eq!(resolve_reference(root, "docs/a.pdf"), PathBuf::from("/ev/docs/a.pdf"));
        assert_eq!(resolve_reference(root, "/abs/a.pdf"), PathBuf::from("/abs/a.pdf"));
    }
}
