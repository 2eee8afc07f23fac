//! Project import.
//!
//! Extracts an archive (rejecting any entry that would land outside the
//! scratch directory), validates its manifest, resolves or creates the target
//! project, and inserts every table in dependency order. Each row is stamped
//! with the target project id, deduplicated against its merge key, and has
//! foreign keys to already-imported parents rewritten to the new identities.
//! Bundled files are restored last and re-hashed; any mismatch aborts.
//!
//! Without `atomic`, rows are inserted in autocommit mode and a failure
//! leaves the rows inserted so far in place.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::config::{Conventions, ProjectContext};
use crate::error::{Error, Result};
use crate::model::{FileRecord, Manifest};
use crate::storage::{quote_ident, quote_list, SchemaIntrospector, SqliteStorage, TableDescriptor};
use crate::transfer::archive::{extract_archive, safe_relative_path, scratch_dir};
use crate::transfer::codec::{Row, TableFormat, TableReader};
use crate::transfer::content_store::{sanitize_file_name, ContentStore};
use crate::transfer::file::{read_json_object, read_jsonl};
use crate::transfer::merge::MergeKeyResolver;
use crate::transfer::progress::{CancellationToken, ProgressReporter};
use crate::transfer::types::{ImportOptions, ImportStats, TableStats};
use crate::transfer::{CONFIG_FILE, FILES_INDEX, MANIFEST_FILE, TABLES_DIR};

/// Old identity to new identity, per table.
type IdentityMap = HashMap<String, HashMap<i64, i64>>;

/// A child column holding the identity of a parent table's row.
#[derive(Debug, Clone)]
struct ColumnRemap {
    column: String,
    parent: String,
}

/// Importer for project archives.
pub struct Importer<'a> {
    context: &'a dyn ProjectContext,
    conventions: &'a Conventions,
    options: ImportOptions,
    progress: ProgressReporter,
    cancel: CancellationToken,
}

impl<'a> Importer<'a> {
    #[must_use]
    pub fn new(
        context: &'a dyn ProjectContext,
        conventions: &'a Conventions,
        options: ImportOptions,
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

    /// Import `archive` into the target project.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ArchiveSecurity`] for unsafe entries, [`Error::Format`]
    /// for a bad manifest, [`Error::Integrity`] for a corrupted file,
    /// [`Error::Cancelled`] if cancelled, or any database/I/O error.
    pub fn import(&mut self, archive: &Path) -> Result<ImportStats> {
        info!(archive = %archive.display(), "Starting import");
        let scratch = scratch_dir("projpack_import_")?;
        let root = scratch.path();

        self.progress.report(5, "Extracting archive");
        extract_archive(archive, root)?;

        self.cancel.check()?;
        self.progress.report(10, "Reading manifest");
        let manifest = Manifest::read(&root.join(MANIFEST_FILE))?;
        manifest.validate()?;
        debug!(
            source_project = %manifest.project_id,
            tables = manifest.tables.len(),
            files = manifest.file_count,
            "Manifest accepted"
        );

        self.cancel.check()?;
        let mut storage = self.context.connection()?.open()?;
        self.progress.report(15, "Resolving target project");
        let (project_id, created_project) = self.resolve_target(&storage, &manifest, root)?;
        let destination = self.destination()?;
        let mut stats = ImportStats {
            project_id,
            created_project,
            destination_folder: destination.clone(),
            ..ImportStats::default()
        };

        self.cancel.check()?;
        self.progress.report(20, "Preparing import by dependencies");
        let order = storage.introspector(self.conventions).topological_order()?;

        if self.options.overwrite {
            self.progress.report(22, "Removing existing project rows");
            stats.deleted_rows = delete_project_rows(&mut storage, self.conventions, &order, project_id)?;
            info!(project_id, deleted = stats.deleted_rows, "Removed existing rows");
        }

        self.cancel.check()?;
        self.progress.report(30, "Importing tables");
        let tables_dir = root.join(TABLES_DIR);
        stats.tables = if self.options.atomic {
            let tx = storage.conn_mut().transaction()?;
            let tables = self.import_tables(&tx, &order, &manifest, &tables_dir, project_id)?;
            tx.commit()?;
            tables
        } else {
            self.import_tables(storage.conn(), &order, &manifest, &tables_dir, project_id)?
        };

        self.cancel.check()?;
        self.progress.report(70, "Restoring files");
        stats.files_restored = self.restore_files(root, &destination)?;

        let folder = fs::canonicalize(&destination).unwrap_or(destination);
        storage.set_evidence_folder(self.conventions, project_id, &folder.to_string_lossy())?;
        stats.destination_folder = folder;

        self.progress.report(100, "Import complete");
        info!(
            project_id,
            created = stats.total_created(),
            skipped = stats.total_skipped(),
            files = stats.files_restored,
            "Import complete"
        );
        Ok(stats)
    }

    fn destination(&self) -> Result<PathBuf> {
        let folder = if self.options.destination_folder.as_os_str().is_empty() {
            self.context.evidence_root()?
        } else {
            self.options.destination_folder.clone()
        };
        fs::create_dir_all(&folder)?;
        Ok(folder)
    }

    fn resolve_target(
        &self,
        storage: &SqliteStorage,
        manifest: &Manifest,
        root: &Path,
    ) -> Result<(i64, bool)> {
        if let Some(id) = self.options.target_project {
            if storage.get_project(self.conventions, id)?.is_none() {
                return Err(Error::ProjectNotFound { id });
            }
            return Ok((id, false));
        }

        let config = read_json_object(&root.join(CONFIG_FILE))?;
        let snapshot = config.as_ref().and_then(|c| {
            c.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(&self.conventions.project_table))
                .and_then(|(_, v)| v.as_object())
        });
        let id = storage.create_project(self.conventions, &manifest.project_name, snapshot)?;
        info!(project_id = id, name = %manifest.project_name, "Created project");
        Ok((id, true))
    }

    fn import_tables(
        &mut self,
        conn: &Connection,
        order: &[String],
        manifest: &Manifest,
        dir: &Path,
        project_id: i64,
    ) -> Result<Vec<TableStats>> {
        let introspector = SchemaIntrospector::new(conn, self.conventions);
        let foreign_keys = introspector.foreign_keys()?;
        let files = table_files(dir, manifest.table_format)?;

        for name in &manifest.tables {
            if !order.iter().any(|t| t.eq_ignore_ascii_case(name)) {
                warn!(table = %name, "Table not present or not scoped in this database, skipping");
            }
        }

        let present: Vec<(&String, &(PathBuf, TableFormat))> = order
            .iter()
            .filter_map(|t| files.get(&t.to_ascii_lowercase()).map(|f| (t, f)))
            .collect();
        let total = present.len();
        let mut resolver = MergeKeyResolver::new(self.conventions);
        let mut identities = IdentityMap::new();
        let mut stats = Vec::with_capacity(total);

        for (i, (table, (path, format))) in present.into_iter().enumerate() {
            self.cancel.check()?;
            self.progress
                .report_within(30, 70, i, total, format!("Importing {table}"));

            let desc = introspector.describe(table)?;
            let remaps = identity_references(&introspector, &foreign_keys, &desc)?;
            let table_stats = import_table(
                conn,
                &desc,
                path,
                *format,
                project_id,
                &remaps,
                &mut resolver,
                &mut identities,
            )?;
            debug!(
                table = %table,
                created = table_stats.created,
                skipped = table_stats.skipped,
                "Imported table"
            );
            stats.push(table_stats);
        }

        Ok(stats)
    }

    fn restore_files(&mut self, root: &Path, destination: &Path) -> Result<usize> {
        let index = root.join(FILES_INDEX);
        if !index.exists() {
            return Ok(0);
        }
        let records: Vec<FileRecord> = read_jsonl(&index)?;
        let store = ContentStore::new(root);
        let total = records.len();

        for (i, record) in records.iter().enumerate() {
            let target = if self.options.preserve_paths && !record.original_rel.trim().is_empty() {
                destination.join(safe_relative_path(&record.original_rel)?)
            } else {
                destination.join(sanitize_file_name(&record.file_name))
            };
            store.restore(record, &target)?;
            debug!(path = %target.display(), sha256 = %record.sha256, "Restored file");

            if (i + 1) % 25 == 0 || i + 1 == total {
                self.progress
                    .report_within(70, 95, i + 1, total, "Restoring files");
            }
        }

        Ok(total)
    }
}

/// Table files in the extracted archive, keyed by lowercased table name.
/// When a table has both a CSV and a JSONL file, `preferred` wins.
fn table_files(dir: &Path, preferred: TableFormat) -> Result<HashMap<String, (PathBuf, TableFormat)>> {
    let mut files: HashMap<String, (PathBuf, TableFormat)> = HashMap::new();
    if !dir.is_dir() {
        return Ok(files);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(format) = TableFormat::from_path(&path) else {
            continue;
        };
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_ascii_lowercase()) else {
            continue;
        };
        let keep_existing = files.get(&stem).is_some_and(|(_, f)| *f == preferred);
        if !keep_existing {
            files.insert(stem, (path, format));
        }
    }
    Ok(files)
}

/// Foreign keys of `desc` that point at a parent's identity column.
fn identity_references(
    introspector: &SchemaIntrospector<'_>,
    foreign_keys: &[crate::storage::ForeignKey],
    desc: &TableDescriptor,
) -> Result<Vec<ColumnRemap>> {
    let mut remaps = Vec::new();
    for fk in foreign_keys
        .iter()
        .filter(|fk| fk.child_table.eq_ignore_ascii_case(&desc.name))
    {
        let parent_identity = if fk.parent_table.eq_ignore_ascii_case(&desc.name) {
            desc.identity.clone()
        } else {
            introspector.describe(&fk.parent_table)?.identity
        };
        let Some(parent_identity) = parent_identity else {
            continue;
        };
        let targets_identity = fk
            .parent_column
            .as_deref()
            .is_none_or(|c| c.eq_ignore_ascii_case(&parent_identity));
        let Some(column) = Conventions::find_column(&desc.columns, &fk.child_column) else {
            continue;
        };
        let is_scope = desc
            .scope_column
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case(column));
        if targets_identity && !is_scope {
            let parent = if fk.parent_table.eq_ignore_ascii_case(&desc.name) {
                desc.name.clone()
            } else {
                fk.parent_table.clone()
            };
            remaps.push(ColumnRemap {
                column: column.to_string(),
                parent,
            });
        }
    }
    Ok(remaps)
}

/// Integer view of a value. CSV cells arrive as text.
fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Keep only columns the destination table has, spelled as in its catalog.
fn align_row(row: Row, desc: &TableDescriptor) -> Row {
    row.into_iter()
        .filter_map(|(key, value)| {
            Conventions::find_column(&desc.columns, &key).map(|c| (c.to_string(), value))
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn import_table(
    conn: &Connection,
    desc: &TableDescriptor,
    path: &Path,
    format: TableFormat,
    project_id: i64,
    remaps: &[ColumnRemap],
    resolver: &mut MergeKeyResolver<'_>,
    identities: &mut IdentityMap,
) -> Result<TableStats> {
    let scope = desc
        .scope_column
        .as_deref()
        .ok_or_else(|| Error::Other(format!("table {} has no scope column", desc.name)))?;
    let mut own = identities.remove(&desc.name).unwrap_or_default();
    let mut stats = TableStats {
        table: desc.name.clone(),
        ..TableStats::default()
    };

    for row in TableReader::open(format, path)? {
        let mut values = align_row(row?, desc);
        let source_identity = desc
            .identity
            .as_ref()
            .and_then(|id| values.remove(id))
            .as_ref()
            .and_then(as_integer);
        values.insert(scope.to_string(), Value::Integer(project_id));

        for remap in remaps {
            let Some(old) = values.get(&remap.column).and_then(as_integer) else {
                continue;
            };
            let map = if remap.parent == desc.name {
                Some(&own)
            } else {
                identities.get(&remap.parent)
            };
            if let Some(new) = map.and_then(|m| m.get(&old)) {
                values.insert(remap.column.clone(), Value::Integer(*new));
            }
        }

        let columns: Vec<String> = values.keys().cloned().collect();
        let existing = match resolver.resolve(desc, &columns) {
            Some(key) => find_existing(conn, desc, &key, &values)?,
            None => None,
        };

        let target_identity = if let Some(found) = existing {
            stats.skipped += 1;
            as_integer(&found)
        } else {
            insert_row(conn, desc, &values)?;
            stats.created += 1;
            Some(conn.last_insert_rowid())
        };

        if let (Some(old), Some(new)) = (source_identity, target_identity) {
            own.insert(old, new);
        }
    }

    identities.insert(desc.name.clone(), own);
    Ok(stats)
}

/// Identity (or `1` for tables without one) of a row matching `key`.
fn find_existing(
    conn: &Connection,
    desc: &TableDescriptor,
    key: &[String],
    values: &Row,
) -> Result<Option<Value>> {
    let select = desc
        .identity
        .as_deref()
        .map_or_else(|| "1".to_string(), quote_ident);
    let predicate = key
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} IS ?{}", quote_ident(c), i + 1))
        .collect::<Vec<_>>()
        .join(" AND ");
    let sql = format!(
        "SELECT {select} FROM {} WHERE {predicate} LIMIT 1",
        quote_ident(&desc.name)
    );
    let params: Vec<Value> = key
        .iter()
        .map(|c| values.get(c).cloned().unwrap_or(Value::Null))
        .collect();

    Ok(conn
        .prepare_cached(&sql)?
        .query_row(params_from_iter(params), |row| row.get::<_, Value>(0))
        .optional()?)
}

fn insert_row(conn: &Connection, desc: &TableDescriptor, values: &Row) -> Result<()> {
    let columns: Vec<&String> = values.keys().collect();
    let sql = if columns.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", quote_ident(&desc.name))
    } else {
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            quote_ident(&desc.name),
            quote_list(&columns)
        )
    };
    conn.prepare_cached(&sql)?
        .execute(params_from_iter(values.values()))?;
    Ok(())
}

/// Delete the target project's rows from every scoped table, children first,
/// in one transaction.
fn delete_project_rows(
    storage: &mut SqliteStorage,
    conventions: &Conventions,
    order: &[String],
    project_id: i64,
) -> Result<usize> {
    let tx = storage.conn_mut().transaction()?;
    let mut deleted = 0;
    {
        let introspector = SchemaIntrospector::new(&tx, conventions);
        for table in order.iter().rev() {
            let desc = introspector.describe(table)?;
            let Some(scope) = desc.scope_column.as_deref() else {
                continue;
            };
            let sql = format!(
                "DELETE FROM {} WHERE {} = ?1",
                quote_ident(table),
                quote_ident(scope)
            );
            deleted += tx.execute(&sql, params![project_id])?;
        }
    }
    tx.commit()?;
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticContext;
    use crate::transfer::content_store::hash_file;
    use crate::transfer::export::Exporter;
    use crate::transfer::fixtures::{Fixture, REPORT_BYTES};
    use crate::transfer::types::ExportOptions;
    use std::io::{Read, Write};
    use tempfile::TempDir;
    use zip::{write::FileOptions, ZipArchive, ZipWriter};

    fn export(fixture: &Fixture, name: &str) -> PathBuf {
        let conventions = Conventions::default();
        let archive = fixture.path(name);
        Exporter::new(&fixture.context(), &conventions, ExportOptions::default())
            .export(&archive)
            .unwrap();
        archive
    }

    fn import_with(
        context: &StaticContext,
        conventions: &Conventions,
        archive: &Path,
        options: ImportOptions,
    ) -> Result<ImportStats> {
        Importer::new(context, conventions, options).import(archive)
    }

    fn options(dest: &Path) -> ImportOptions {
        ImportOptions {
            destination_folder: dest.to_path_buf(),
            ..ImportOptions::default()
        }
    }

    /// Copy an archive, replacing the content of every entry for which `edit` returns Some.
    fn rewrite_archive(src: &Path, dst: &Path, edit: impl Fn(&str, &[u8]) -> Option<Vec<u8>>) {
        let mut input = ZipArchive::new(fs::File::open(src).unwrap()).unwrap();
        let mut output = ZipWriter::new(fs::File::create(dst).unwrap());
        for i in 0..input.len() {
            let mut entry = input.by_index(i).unwrap();
            let name = entry.name().to_string();
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).unwrap();
            let bytes = edit(&name, &bytes).unwrap_or(bytes);
            output.start_file(name, FileOptions::default()).unwrap();
            output.write_all(&bytes).unwrap();
        }
        output.finish().unwrap();
    }

    #[test]
    fn test_round_trip_into_new_project() {
        let fixture = Fixture::new();
        let archive = export(&fixture, "acme.projpack");
        let dest = TempDir::new().unwrap();
        let conventions = Conventions::default();

        let stats = import_with(&fixture.context(), &conventions, &archive, options(dest.path())).unwrap();
        assert!(stats.created_project);
        let new_id = stats.project_id;
        assert_ne!(new_id, 1);
        assert_eq!(stats.table("A").unwrap().created, 1);
        assert_eq!(stats.table("B").unwrap().created, 3);
        assert_eq!(stats.files_restored, 1);

        let new_a: i64 = fixture
            .storage()
            .conn()
            .query_row("SELECT id FROM A WHERE project_id = ?1", [new_id], |r| r.get(0))
            .unwrap();
        assert_ne!(new_a, 10);
        assert_eq!(
            fixture.count(&format!(
                "SELECT COUNT(*) FROM B WHERE project_id = {new_id} AND a_id = {new_a}"
            )),
            3
        );
        // Source rows untouched
        assert_eq!(fixture.count("SELECT COUNT(*) FROM B WHERE project_id = 1"), 3);

        let restored = dest.path().join("report.pdf");
        assert_eq!(fs::read(&restored).unwrap(), REPORT_BYTES);
        let expected = hash_file(&fixture.evidence.join("docs/report.pdf")).unwrap();
        assert_eq!(hash_file(&restored).unwrap(), expected);

        let storage = fixture.storage();
        let project = storage.get_project(&conventions, new_id).unwrap().unwrap();
        assert_eq!(project.name, "acme");
        let client: String = storage
            .conn()
            .query_row("SELECT client FROM projects WHERE id = ?1", [new_id], |r| r.get(0))
            .unwrap();
        assert_eq!(client, "Acme Corp");
        assert_eq!(
            project.evidence_folder.map(PathBuf::from),
            Some(fs::canonicalize(dest.path()).unwrap())
        );
    }

    #[test]
    fn test_round_trip_csv_into_fresh_database() {
        let fixture = Fixture::new();
        let conventions = Conventions::default();
        let archive = fixture.path("acme_csv.projpack");
        Exporter::new(
            &fixture.context(),
            &conventions,
            ExportOptions {
                format: TableFormat::Csv,
                ..ExportOptions::default()
            },
        )
        .export(&archive)
        .unwrap();

        let target_dir = TempDir::new().unwrap();
        let target_db = target_dir.path().join("target.db");
        SqliteStorage::open(&target_db)
            .unwrap()
            .conn()
            .execute_batch(crate::transfer::fixtures::SCHEMA)
            .unwrap();
        let context = StaticContext {
            project_id: 0,
            project_name: String::new(),
            connection: crate::config::ConnectionDescriptor::new(&target_db),
            evidence_root: target_dir.path().join("evidence"),
        };

        let stats = import_with(&context, &conventions, &archive, ImportOptions::default()).unwrap();
        assert_eq!(stats.project_id, 1);
        assert_eq!(stats.total_created(), 4);
        assert!(target_dir.path().join("evidence").join("report.pdf").is_file());

        let storage = SqliteStorage::open(&target_db).unwrap();
        let orphans: i64 = storage
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM B WHERE a_id NOT IN (SELECT id FROM A)",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn test_merge_key_makes_reimport_idempotent() {
        let fixture =
            Fixture::with_extra_sql("CREATE UNIQUE INDEX ux_a_name ON A(project_id, name);");
        let archive = export(&fixture, "acme.projpack");
        let dest = TempDir::new().unwrap();
        let conventions = Conventions::default();

        let first = import_with(&fixture.context(), &conventions, &archive, options(dest.path())).unwrap();
        let target = ImportOptions {
            target_project: Some(first.project_id),
            ..options(dest.path())
        };
        let second = import_with(&fixture.context(), &conventions, &archive, target).unwrap();

        assert_eq!(second.table("A").unwrap().skipped, 1);
        assert_eq!(second.table("A").unwrap().created, 0);
        assert_eq!(
            fixture.count(&format!("SELECT COUNT(*) FROM A WHERE project_id = {}", first.project_id)),
            1
        );
        // B has no natural key, so its rows are inserted again, pointing at the matched A row
        let a_id: i64 = fixture
            .storage()
            .conn()
            .query_row("SELECT id FROM A WHERE project_id = ?1", [first.project_id], |r| r.get(0))
            .unwrap();
        assert_eq!(
            fixture.count(&format!(
                "SELECT COUNT(*) FROM B WHERE project_id = {} AND a_id = {a_id}",
                first.project_id
            )),
            6
        );
    }

    #[test]
    fn test_merge_key_with_null_member_matches() {
        let fixture =
            Fixture::with_extra_sql("CREATE UNIQUE INDEX ux_b_path ON B(project_id, file_path);");
        let archive = export(&fixture, "acme.projpack");
        let dest = TempDir::new().unwrap();
        let conventions = Conventions::default();

        let first = import_with(&fixture.context(), &conventions, &archive, options(dest.path())).unwrap();
        let target = ImportOptions {
            target_project: Some(first.project_id),
            ..options(dest.path())
        };
        let second = import_with(&fixture.context(), &conventions, &archive, target).unwrap();

        // The row with a NULL file_path is matched like the others
        assert_eq!(second.table("B").unwrap().skipped, 3);
        assert_eq!(second.table("B").unwrap().created, 0);
        assert_eq!(
            fixture.count(&format!("SELECT COUNT(*) FROM B WHERE project_id = {}", first.project_id)),
            3
        );
    }

    #[test]
    fn test_csv_keeps_empty_text_apart_from_null() {
        let fixture = Fixture::with_extra_sql(
            "CREATE TABLE notes (
                id INTEGER PRIMARY KEY,
                project_id INTEGER REFERENCES projects(id),
                body TEXT NOT NULL,
                remark TEXT
            );",
        );
        fixture
            .storage()
            .conn()
            .execute_batch("INSERT INTO notes (project_id, body, remark) VALUES (1, '', NULL);")
            .unwrap();
        let conventions = Conventions::default();
        let archive = fixture.path("notes_csv.projpack");
        Exporter::new(
            &fixture.context(),
            &conventions,
            ExportOptions {
                format: TableFormat::Csv,
                include_files: false,
                ..ExportOptions::default()
            },
        )
        .export(&archive)
        .unwrap();

        let dest = TempDir::new().unwrap();
        let stats = import_with(&fixture.context(), &conventions, &archive, options(dest.path())).unwrap();
        assert_eq!(stats.table("notes").unwrap().created, 1);

        let (body, remark): (Option<String>, Option<String>) = fixture
            .storage()
            .conn()
            .query_row(
                "SELECT body, remark FROM notes WHERE project_id = ?1",
                [stats.project_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(body.as_deref(), Some(""));
        assert_eq!(remark, None);
    }

    #[test]
    fn test_without_merge_key_rows_duplicate() {
        let fixture = Fixture::new();
        let archive = export(&fixture, "acme.projpack");
        let dest = TempDir::new().unwrap();
        let conventions = Conventions::default();

        let first = import_with(&fixture.context(), &conventions, &archive, options(dest.path())).unwrap();
        let target = ImportOptions {
            target_project: Some(first.project_id),
            ..options(dest.path())
        };
        import_with(&fixture.context(), &conventions, &archive, target).unwrap();
        assert_eq!(
            fixture.count(&format!("SELECT COUNT(*) FROM A WHERE project_id = {}", first.project_id)),
            2
        );
    }

    #[test]
    fn test_overwrite_replaces_target_rows() {
        let fixture = Fixture::new();
        let archive = export(&fixture, "acme.projpack");
        let dest = TempDir::new().unwrap();
        let conventions = Conventions::default();

        let first = import_with(&fixture.context(), &conventions, &archive, options(dest.path())).unwrap();
        let overwrite = ImportOptions {
            target_project: Some(first.project_id),
            overwrite: true,
            atomic: true,
            ..options(dest.path())
        };
        let second = import_with(&fixture.context(), &conventions, &archive, overwrite).unwrap();

        assert_eq!(second.deleted_rows, 4);
        assert_eq!(
            fixture.count(&format!("SELECT COUNT(*) FROM A WHERE project_id = {}", first.project_id)),
            1
        );
        assert_eq!(
            fixture.count(&format!("SELECT COUNT(*) FROM B WHERE project_id = {}", first.project_id)),
            3
        );
        assert_eq!(fixture.count("SELECT COUNT(*) FROM A WHERE project_id = 1"), 1);
    }

    #[test]
    fn test_unknown_target_project() {
        let fixture = Fixture::new();
        let archive = export(&fixture, "acme.projpack");
        let dest = TempDir::new().unwrap();
        let target = ImportOptions {
            target_project: Some(404),
            ..options(dest.path())
        };
        let result = import_with(&fixture.context(), &Conventions::default(), &archive, target);
        assert!(matches!(result, Err(Error::ProjectNotFound { id: 404 })));
    }

    #[test]
    fn test_corrupted_file_fails_integrity() {
        let fixture = Fixture::new();
        let archive = export(&fixture, "acme.projpack");
        let tampered = fixture.path("tampered.projpack");
        rewrite_archive(&archive, &tampered, |name, bytes| {
            name.starts_with("files/").then(|| {
                let mut flipped = bytes.to_vec();
                flipped[0] ^= 0xFF;
                flipped
            })
        });

        let dest = TempDir::new().unwrap();
        let result = import_with(&fixture.context(), &Conventions::default(), &tampered, options(dest.path()));
        assert!(matches!(result, Err(Error::Integrity { .. })));
        assert!(!dest.path().join("report.pdf").exists());
    }

    #[test]
    fn test_traversal_entry_aborts_before_database() {
        let fixture = Fixture::new();
        let archive = fixture.path("evil.projpack");
        {
            let mut zip = ZipWriter::new(fs::File::create(&archive).unwrap());
            zip.start_file("../../escape.txt", FileOptions::default()).unwrap();
            zip.write_all(b"gotcha").unwrap();
            zip.finish().unwrap();
        }
        let dest = TempDir::new().unwrap();
        let result = import_with(&fixture.context(), &Conventions::default(), &archive, options(dest.path()));
        assert!(matches!(result, Err(Error::ArchiveSecurity { .. })));
        assert_eq!(fixture.count("SELECT COUNT(*) FROM projects"), 1);
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let fixture = Fixture::new();
        let archive = export(&fixture, "acme.projpack");
        let future = fixture.path("future.projpack");
        rewrite_archive(&archive, &future, |name, bytes| {
            (name == MANIFEST_FILE).then(|| {
                let mut manifest: serde_json::Value = serde_json::from_slice(bytes).unwrap();
                manifest["format_version"] = serde_json::json!("2.0");
                serde_json::to_vec(&manifest).unwrap()
            })
        });

        let dest = TempDir::new().unwrap();
        let result = import_with(&fixture.context(), &Conventions::default(), &future, options(dest.path()));
        assert!(matches!(result, Err(Error::Format(_))));
        assert_eq!(fixture.count("SELECT COUNT(*) FROM projects"), 1);
    }

    #[test]
    fn test_preserve_paths_restores_layout() {
        let fixture = Fixture::new();
        let archive = export(&fixture, "acme.projpack");
        let dest = TempDir::new().unwrap();
        let preserve = ImportOptions {
            preserve_paths: true,
            ..options(dest.path())
        };
        import_with(&fixture.context(), &Conventions::default(), &archive, preserve).unwrap();
        assert!(dest.path().join("docs").join("report.pdf").is_file());
    }

    #[test]
    fn test_cancelled_import() {
        let fixture = Fixture::new();
        let archive = export(&fixture, "acme.projpack");
        let dest = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let conventions = Conventions::default();
        let context = fixture.context();
        let result = Importer::new(&context, &conventions, options(dest.path()))
            .with_cancellation(cancel)
            .import(&archive);
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(fixture.count("SELECT COUNT(*) FROM projects"), 1);
    }

    #[test]
    fn test_self_reference_remapped() {
        let fixture = Fixture::with_extra_sql(
            "CREATE TABLE C (
                id INTEGER PRIMARY KEY,
                parent_id INTEGER REFERENCES C(id),
                project_id INTEGER
            );
            INSERT INTO C (id, parent_id, project_id) VALUES (100, NULL, 1);
            INSERT INTO C (id, parent_id, project_id) VALUES (101, 100, 1);",
        );
        let archive = export(&fixture, "acme.projpack");
        let dest = TempDir::new().unwrap();
        let stats = import_with(&fixture.context(), &Conventions::default(), &archive, options(dest.path())).unwrap();

        let (root_id, child_parent): (i64, i64) = fixture
            .storage()
            .conn()
            .query_row(
                "SELECT r.id, c.parent_id FROM C r JOIN C c ON c.parent_id IS NOT NULL
                 WHERE r.project_id = ?1 AND r.parent_id IS NULL AND c.project_id = ?1",
                [stats.project_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(root_id, child_parent);
    }

    #[test]
    fn test_as_integer() {
        assert_eq!(as_integer(&Value::Integer(4)), Some(4));
        assert_eq!(as_integer(&Value::Text(" 12 ".to_string())), Some(12));
        assert_eq!(as_integer(&Value::Text("x".to_string())), None);
        assert_eq!(as_integer(&Value::Null), None);
    }
}
