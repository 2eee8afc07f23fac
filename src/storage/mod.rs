//! SQLite storage layer for projpack.
//!
//! # Submodules
//!
//! - [`schema`] - Catalog introspection and dependency ordering
//! - [`sqlite`] - Connection handling and project-row access
//! - [`value`] - SQLite value conversions for archive files

pub mod schema;
pub mod sqlite;
pub mod value;

pub use schema::{
    topological_order, ColumnInfo, DependencyEdge, ForeignKey, SchemaIntrospector,
    TableDescriptor,
};
pub use sqlite::SqliteStorage;

/// Quote an SQL identifier.
///
/// Only ever called with names obtained from [`SchemaIntrospector`]; embedded
/// double quotes are doubled so even an odd catalog name cannot break out.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote and comma-join a list of identifiers.
#[must_use]
pub fn quote_list<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}
