//! Naming conventions for scoped databases.
//!
//! Every place where the tool has to guess at a column or table by name goes
//! through [`Conventions`]. The defaults describe the common layout
//! (`projects` table, `project_id` scope column); a JSON file can override any
//! subset of fields.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A heuristic natural-key rule.
///
/// The scope column is always part of the resulting key and is not listed
/// here. Each slot of `columns` holds alternatives; the first one present in
/// the table wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NaturalKeyRule {
    /// Only applies to tables whose name contains this substring.
    #[serde(default)]
    pub table_contains: Option<String>,
    pub columns: Vec<Vec<String>>,
}

impl NaturalKeyRule {
    fn new(table_contains: Option<&str>, columns: &[&[&str]]) -> Self {
        Self {
            table_contains: table_contains.map(String::from),
            columns: columns
                .iter()
                .map(|slot| slot.iter().map(|c| (*c).to_string()).collect())
                .collect(),
        }
    }
}

/// Table and column naming conventions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Conventions {
    /// Column tying a row to one project. Its presence marks a table as scoped.
    pub scope_column: String,
    pub project_table: String,
    pub project_id_column: String,
    pub project_name_column: String,
    pub evidence_folder_column: String,
    /// Columns holding a file path, in priority order.
    pub path_columns: Vec<String>,
    /// Columns holding a display file name, in priority order.
    pub file_name_columns: Vec<String>,
    /// Fall back to `natural_key_rules` when the catalog has no usable key.
    pub heuristic_merge_keys: bool,
    pub natural_key_rules: Vec<NaturalKeyRule>,
}

impl Default for Conventions {
    fn default() -> Self {
        Self {
            scope_column: "project_id".to_string(),
            project_table: "projects".to_string(),
            project_id_column: "id".to_string(),
            project_name_column: "name".to_string(),
            evidence_folder_column: "evidence_folder".to_string(),
            path_columns: ["relative_path", "local_path", "file_path", "path", "full_path"]
                .into_iter()
                .map(String::from)
                .collect(),
            file_name_columns: ["file_name", "name"].into_iter().map(String::from).collect(),
            heuristic_merge_keys: false,
            natural_key_rules: vec![
                NaturalKeyRule::new(Some("document"), &[&["source_url"], &["sha256"]]),
                NaturalKeyRule::new(None, &[&["sha256"]]),
                NaturalKeyRule::new(None, &[&["email"]]),
                NaturalKeyRule::new(None, &[&["path"]]),
                NaturalKeyRule::new(None, &[&["domain", "host", "ip"]]),
                NaturalKeyRule::new(None, &[&["name"]]),
            ],
        }
    }
}

impl Conventions {
    /// Load conventions from a JSON file. Missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read conventions {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("invalid conventions {}: {e}", path.display()))
        })
    }

    /// Find `name` among `columns`, ignoring ASCII case. Returns the catalog spelling.
    #[must_use]
    pub fn find_column<'a>(columns: &'a [String], name: &str) -> Option<&'a str> {
        columns
            .iter()
            .find(|c| c.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    /// First candidate (in candidate order) present in `columns`.
    #[must_use]
    pub fn pick_column<'a>(columns: &'a [String], candidates: &[String]) -> Option<&'a str> {
        candidates
            .iter()
            .find_map(|candidate| Self::find_column(columns, candidate))
    }

    /// The scope column as spelled in this table, if present.
    #[must_use]
    pub fn scope_column_in<'a>(&self, columns: &'a [String]) -> Option<&'a str> {
        Self::find_column(columns, &self.scope_column)
    }

    /// Apply the heuristic natural-key rules to a table.
    ///
    /// Returns `None` when heuristics are disabled, the table has no scope
    /// column, or no rule matches.
    #[must_use]
    pub fn heuristic_key(&self, table: &str, columns: &[String]) -> Option<Vec<String>> {
        if !self.heuristic_merge_keys {
            return None;
        }
        let scope = self.scope_column_in(columns)?;
        let table_lower = table.to_ascii_lowercase();

        self.natural_key_rules.iter().find_map(|rule| {
            if let Some(needle) = &rule.table_contains {
                if !table_lower.contains(&needle.to_ascii_lowercase()) {
                    return None;
                }
            }
            let mut key = vec![scope.to_string()];
            for slot in &rule.columns {
                key.push(Self::pick_column(columns, slot)?.to_string());
            }
            Some(key)
        })
    }
}
