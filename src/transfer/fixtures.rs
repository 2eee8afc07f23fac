//! Shared database and evidence setup for pipeline tests.

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use crate::config::{ConnectionDescriptor, StaticContext};
use crate::storage::SqliteStorage;

pub const SCHEMA: &str = "
    CREATE TABLE projects (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        client TEXT,
        evidence_folder TEXT
    );
    CREATE TABLE A (
        id INTEGER PRIMARY KEY,
        name TEXT,
        project_id INTEGER REFERENCES projects(id)
    );
    CREATE TABLE B (
        id INTEGER PRIMARY KEY,
        a_id INTEGER REFERENCES A(id),
        project_id INTEGER REFERENCES projects(id),
        sha256 TEXT,
        file_path TEXT
    );
";

pub const REPORT_BYTES: &[u8] = b"%PDF-1.4 quarterly findings\n";

/// A database with one project, one A row, three B rows, and one evidence file.
pub struct Fixture {
    pub dir: TempDir,
    pub db: PathBuf,
    pub evidence: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_extra_sql("")
    }

    pub fn with_extra_sql(extra: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("projpack.db");
        let evidence = dir.path().join("evidence");
        fs::create_dir_all(evidence.join("docs")).unwrap();
        fs::write(evidence.join("docs").join("report.pdf"), REPORT_BYTES).unwrap();

        let storage = SqliteStorage::open(&db).unwrap();
        storage.conn().execute_batch(SCHEMA).unwrap();
        storage.conn().execute_batch(extra).unwrap();
        storage
            .conn()
            .execute(
                "INSERT INTO projects (id, name, client, evidence_folder) VALUES (1, 'acme', 'Acme Corp', ?1)",
                [evidence.to_string_lossy()],
            )
            .unwrap();
        storage
            .conn()
            .execute_batch(
                "INSERT INTO A (id, name, project_id) VALUES (10, 'alpha', 1);
                 INSERT INTO B (a_id, project_id, sha256, file_path) VALUES (10, 1, 'aa', 'docs/report.pdf');
                 INSERT INTO B (a_id, project_id, sha256, file_path) VALUES (10, 1, 'bb', NULL);
                 INSERT INTO B (a_id, project_id, sha256, file_path) VALUES (10, 1, 'cc', 'docs/missing.pdf');",
            )
            .unwrap();

        Self { dir, db, evidence }
    }

    pub fn context(&self) -> StaticContext {
        StaticContext {
            project_id: 1,
            project_name: "acme".to_string(),
            connection: ConnectionDescriptor::new(&self.db),
            evidence_root: self.evidence.clone(),
        }
    }

    pub fn storage(&self) -> SqliteStorage {
        SqliteStorage::open(&self.db).unwrap()
    }

    pub fn count(&self, sql: &str) -> i64 {
        self.storage()
            .conn()
            .query_row(sql, [], |row| row.get(0))
            .unwrap()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}
