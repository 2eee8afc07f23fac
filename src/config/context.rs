//! Project context consumed by the export and import pipelines.
//!
//! The pipelines never decide which project or database they act on. They ask
//! a [`ProjectContext`] for it. [`CliContext`] resolves everything from flags,
//! environment and the database itself; [`StaticContext`] carries fixed values
//! for embedding hosts and tests.

use std::path::{Path, PathBuf};

use crate::config::Conventions;
use crate::error::{Error, Result};
use crate::storage::SqliteStorage;

/// How to reach the project database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub path: PathBuf,
    /// Busy timeout in milliseconds. `None` means the 5 second default.
    pub busy_timeout_ms: Option<u64>,
}

impl ConnectionDescriptor {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: None,
        }
    }

    /// Open a fresh connection. Each pipeline run owns exactly one.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(&self) -> Result<SqliteStorage> {
        SqliteStorage::open_with_timeout(&self.path, self.busy_timeout_ms)
    }
}

/// Source of the active project, its database, and its evidence folder.
pub trait ProjectContext: Send + Sync {
    /// Identity of the project to export.
    ///
    /// # Errors
    ///
    /// Returns an error if no project can be determined.
    fn active_project_id(&self) -> Result<i64>;

    /// Display name of the active project.
    ///
    /// # Errors
    ///
    /// Returns an error if the project cannot be found.
    fn active_project_name(&self) -> Result<String>;

    /// Where the project database lives.
    ///
    /// # Errors
    ///
    /// Returns an error if no database location is known.
    fn connection(&self) -> Result<ConnectionDescriptor>;

    /// Root that relative file references are resolved against.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be determined.
    fn evidence_root(&self) -> Result<PathBuf>;
}

/// A context with every value fixed up front.
#[derive(Debug, Clone)]
pub struct StaticContext {
    pub project_id: i64,
    pub project_name: String,
    pub connection: ConnectionDescriptor,
    pub evidence_root: PathBuf,
}

impl ProjectContext for StaticContext {
    fn active_project_id(&self) -> Result<i64> {
        Ok(self.project_id)
    }

    fn active_project_name(&self) -> Result<String> {
        Ok(self.project_name.clone())
    }

    fn connection(&self) -> Result<ConnectionDescriptor> {
        Ok(self.connection.clone())
    }

    fn evidence_root(&self) -> Result<PathBuf> {
        Ok(self.evidence_root.clone())
    }
}

/// Context resolved from command-line flags, environment, and the database.
///
/// Project id: explicit, else the most recently created project.
/// Evidence root: explicit, else the project's evidence folder, else the
/// current directory.
#[derive(Debug, Clone)]
pub struct CliContext {
    db_path: PathBuf,
    project: Option<i64>,
    evidence_root: Option<PathBuf>,
    conventions: Conventions,
}

impl CliContext {
    #[must_use]
    pub fn new(
        db_path: PathBuf,
        project: Option<i64>,
        evidence_root: Option<PathBuf>,
        conventions: Conventions,
    ) -> Self {
        Self {
            db_path,
            project,
            evidence_root,
            conventions,
        }
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    #[must_use]
    pub fn conventions(&self) -> &Conventions {
        &self.conventions
    }

    fn ensure_exists(&self) -> Result<()> {
        if self.db_path.exists() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "database not found at {}",
                self.db_path.display()
            )))
        }
    }

    fn open(&self) -> Result<SqliteStorage> {
        self.ensure_exists()?;
        SqliteStorage::open(&self.db_path)
    }
}

impl ProjectContext for CliContext {
    fn active_project_id(&self) -> Result<i64> {
        if let Some(id) = self.project {
            return Ok(id);
        }
        self.open()?
            .latest_project_id(&self.conventions)?
            .ok_or_else(|| Error::Config("no project found in database".to_string()))
    }

    fn active_project_name(&self) -> Result<String> {
        let id = self.active_project_id()?;
        self.open()?
            .get_project(&self.conventions, id)?
            .map(|p| p.name)
            .ok_or(Error::ProjectNotFound { id })
    }

    fn connection(&self) -> Result<ConnectionDescriptor> {
        self.ensure_exists()?;
        Ok(ConnectionDescriptor::new(&self.db_path))
    }

    fn evidence_root(&self) -> Result<PathBuf> {
        if let Some(root) = &self.evidence_root {
            return Ok(root.clone());
        }
        let id = self.active_project_id()?;
        let folder = self
            .open()?
            .get_project(&self.conventions, id)?
            .and_then(|p| p.evidence_folder)
            .filter(|f| !f.trim().is_empty());
        match folder {
            Some(folder) => Ok(PathBuf::from(folder)),
            None => Ok(std::env::current_dir()?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn database(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("projpack.db");
        let storage = SqliteStorage::open(&path).unwrap();
        storage
            .conn()
            .execute_batch(
                "CREATE TABLE projects (id INTEGER PRIMARY KEY, name TEXT, evidence_folder TEXT);
                 INSERT INTO projects (name, evidence_folder) VALUES ('first', NULL);
                 INSERT INTO projects (name, evidence_folder) VALUES ('second', '/srv/second');",
            )
            .unwrap();
        path
    }

    #[test]
    fn test_latest_project_is_default() {
        let dir = TempDir::new().unwrap();
        let ctx = CliContext::new(database(&dir), None, None, Conventions::default());
        assert_eq!(ctx.active_project_id().unwrap(), 2);
        assert_eq!(ctx.active_project_name().unwrap(), "second");
        assert_eq!(ctx.evidence_root().unwrap(), PathBuf::from("/srv/second"));
    }

    #[test]
    fn test_explicit_values_win() {
        let dir = TempDir::new().unwrap();
        let ctx = CliContext::new(
            database(&dir),
            Some(1),
            Some(PathBuf::from("/elsewhere")),
            Conventions::default(),
        );
        assert_eq!(ctx.active_project_name().unwrap(), "first");
        assert_eq!(ctx.evidence_root().unwrap(), PathBuf::from("/elsewhere"));
    }

    #[test]
    fn test_missing_evidence_folder_falls_back_to_cwd() {
        let dir = TempDir::new().unwrap();
        let ctx = CliContext::new(database(&dir), Some(1), None, Conventions::default());
        assert_eq!(ctx.evidence_root().unwrap(), std::env::current_dir().unwrap());
    }

    #[test]
    fn test_unknown_project_and_missing_db() {
        let dir = TempDir::new().unwrap();
        let ctx = CliContext::new(database(&dir), Some(9), None, Conventions::default());
        assert!(matches!(
            ctx.active_project_name(),
            Err(Error::ProjectNotFound { id: 9 })
        ));

        let missing = CliContext::new(
            dir.path().join("nope.db"),
            None,
            None,
            Conventions::default(),
        );
        assert!(matches!(missing.active_project_id(), Err(Error::Config(_))));
        assert!(matches!(missing.connection(), Err(Error::Config(_))));
        assert!(!dir.path().join("nope.db").exists());
    }
}
