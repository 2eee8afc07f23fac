//! Project model.
//!
//! A project is the unit of export: one row of the project table plus every
//! row in the scoped tables that carries its id.

use serde::{Deserialize, Serialize};

/// A project row, reduced to the fields the pipelines care about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Identity of the project row, also the value of every scope column.
    pub id: i64,

    /// Display name
    pub name: String,

    /// Folder under which the project's evidence files live
    pub evidence_folder: Option<String>,
}
