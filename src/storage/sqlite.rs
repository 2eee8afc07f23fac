//! SQLite storage implementation.
//!
//! Owns the single connection a pipeline run uses and the handful of
//! project-table operations (lookup, snapshot, create, evidence folder).
//! Table and column names for the project table come from [`Conventions`]
//! and are confirmed against the catalog before they reach any SQL.

use crate::config::Conventions;
use crate::error::{Error, Result};
use crate::model::Project;
use crate::storage::schema::SchemaIntrospector;
use crate::storage::value::{from_json, to_json};
use crate::storage::{quote_ident, quote_list};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Map;
use std::path::Path;
use std::time::Duration;

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
}

/// Catalog spelling of the project table's columns.
struct ProjectColumns {
    table: String,
    id: String,
    name: String,
    evidence: Option<String>,
    all: Vec<String>,
}

impl SqliteStorage {
    /// Open a database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;

        if let Some(timeout) = timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        } else {
            // Default 5 second timeout
            conn.busy_timeout(Duration::from_secs(5))?;
        }

        Self::configure(conn)
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection.
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Get a mutable reference to the underlying connection (for transactions).
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Catalog reader over this connection.
    #[must_use]
    pub fn introspector<'a>(&'a self, conventions: &'a Conventions) -> SchemaIntrospector<'a> {
        SchemaIntrospector::new(&self.conn, conventions)
    }

    /// Version string of the SQLite library in use.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn sqlite_version(&self) -> Result<String> {
        Ok(self
            .conn
            .query_row("SELECT sqlite_version()", [], |row| row.get(0))?)
    }

    fn project_columns(&self, conventions: &Conventions) -> Result<ProjectColumns> {
        let table = self
            .introspector(conventions)
            .tables()?
            .into_iter()
            .find(|t| t.eq_ignore_ascii_case(&conventions.project_table))
            .ok_or_else(|| {
                Error::Config(format!(
                    "project table '{}' not found in database",
                    conventions.project_table
                ))
            })?;
        let all = self.introspector(conventions).columns(&table)?;

        let required = |name: &str| {
            Conventions::find_column(&all, name)
                .map(String::from)
                .ok_or_else(|| Error::Config(format!("project table '{table}' has no column '{name}'")))
        };
        let id = required(&conventions.project_id_column)?;
        let name = required(&conventions.project_name_column)?;
        let evidence =
            Conventions::find_column(&all, &conventions.evidence_folder_column).map(String::from);

        Ok(ProjectColumns {
            table,
            id,
            name,
            evidence,
            all,
        })
    }

    /// Look up a project by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the project table is missing or the query fails.
    pub fn get_project(&self, conventions: &Conventions, id: i64) -> Result<Option<Project>> {
        let cols = self.project_columns(conventions)?;
        let evidence_expr = cols
            .evidence
            .as_deref()
            .map_or_else(|| "NULL".to_string(), quote_ident);
        let sql = format!(
            "SELECT {}, {}, {} FROM {} WHERE {} = ?1",
            quote_ident(&cols.id),
            quote_ident(&cols.name),
            evidence_expr,
            quote_ident(&cols.table),
            quote_ident(&cols.id),
        );

        Ok(self
            .conn
            .query_row(&sql, params![id], |row| {
                Ok(Project {
                    id: row.get(0)?,
                    name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    evidence_folder: row.get(2)?,
                })
            })
            .optional()?)
    }

    /// Id of the most recently created project (highest id).
    ///
    /// # Errors
    ///
    /// Returns an error if the project table is missing or the query fails.
    pub fn latest_project_id(&self, conventions: &Conventions) -> Result<Option<i64>> {
        let cols = self.project_columns(conventions)?;
        let sql = format!(
            "SELECT MAX({}) FROM {}",
            quote_ident(&cols.id),
            quote_ident(&cols.table)
        );
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }

    /// Every column of one project row, as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the project table is missing or the query fails.
    pub fn project_snapshot(
        &self,
        conventions: &Conventions,
        id: i64,
    ) -> Result<Option<Map<String, serde_json::Value>>> {
        let cols = self.project_columns(conventions)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            quote_list(&cols.all),
            quote_ident(&cols.table),
            quote_ident(&cols.id)
        );

        Ok(self
            .conn
            .query_row(&sql, params![id], |row| {
                let mut map = Map::new();
                for (i, name) in cols.all.iter().enumerate() {
                    map.insert(name.clone(), to_json(&row.get::<_, Value>(i)?));
                }
                Ok(map)
            })
            .optional()?)
    }

    /// Create a project row and return its id.
    ///
    /// Columns from `snapshot` that exist in this database's project table are
    /// copied, except the identity and the evidence folder. `name` is used when
    /// the snapshot does not supply one.
    ///
    /// # Errors
    ///
    /// Returns an error if the project table is missing or the insert fails.
    pub fn create_project(
        &self,
        conventions: &Conventions,
        name: &str,
        snapshot: Option<&Map<String, serde_json::Value>>,
    ) -> Result<i64> {
        let cols = self.project_columns(conventions)?;
        let mut names: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        for (key, value) in snapshot.into_iter().flatten() {
            let Some(column) = Conventions::find_column(&cols.all, key) else {
                continue;
            };
            let is_excluded = column == cols.id
                || cols.evidence.as_deref() == Some(column)
                || names.iter().any(|n| n == column);
            if !is_excluded {
                names.push(column.to_string());
                values.push(from_json(value));
            }
        }
        if let Some(i) = names.iter().position(|n| *n == cols.name) {
            if values[i] == Value::Null {
                values[i] = Value::Text(name.to_string());
            }
        } else {
            names.push(cols.name.clone());
            values.push(Value::Text(name.to_string()));
        }

        let placeholders = (1..=names.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&cols.table),
            quote_list(&names),
            placeholders
        );
        self.conn.execute(&sql, params_from_iter(values.iter()))?;

        let select = format!(
            "SELECT {} FROM {} WHERE rowid = ?1",
            quote_ident(&cols.id),
            quote_ident(&cols.table)
        );
        Ok(self
            .conn
            .query_row(&select, params![self.conn.last_insert_rowid()], |row| row.get(0))?)
    }

    /// Point a project at its evidence folder.
    ///
    /// Returns `false` when the project table has no evidence-folder column.
    ///
    /// # Errors
    ///
    /// Returns an error if the project does not exist or the update fails.
    pub fn set_evidence_folder(
        &self,
        conventions: &Conventions,
        id: i64,
        folder: &str,
    ) -> Result<bool> {
        let cols = self.project_columns(conventions)?;
        let Some(evidence) = cols.evidence else {
            return Ok(false);
        };
        let sql = format!(
            "UPDATE {} SET {} = ?1 WHERE {} = ?2",
            quote_ident(&cols.table),
            quote_ident(&evidence),
            quote_ident(&cols.id)
        );
        if self.conn.execute(&sql, params![folder, id])? == 0 {
            return Err(Error::ProjectNotFound { id });
        }
        Ok(true)
    }
}
