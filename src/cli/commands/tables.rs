//! Tables command implementation.
//!
//! Shows what an export of the active project would contain: every scoped
//! table in dependency order with its row count, identity column, and the
//! merge key an import would use.

use colored::Colorize;
use rusqlite::params;
use serde::Serialize;

use crate::cli::Cli;
use crate::config::ProjectContext;
use crate::error::Result;
use crate::storage::{quote_ident, DependencyEdge};
use crate::transfer::merge::MergeKeyResolver;

#[derive(Serialize)]
struct TableRow {
    table: String,
    rows: i64,
    identity: Option<String>,
    merge_key: Option<Vec<String>>,
    depends_on: Vec<String>,
}

/// Execute the tables command.
///
/// # Errors
///
/// Returns an error if the database cannot be read.
pub fn execute(cli: &Cli, json: bool) -> Result<()> {
    let context = super::context(cli)?;
    let project_id = context.active_project_id()?;
    let storage = context.connection()?.open()?;
    let conventions = context.conventions();
    let introspector = storage.introspector(conventions);
    let edges: Vec<DependencyEdge> = introspector.foreign_key_edges()?;
    let mut resolver = MergeKeyResolver::new(conventions);

    let mut tables = Vec::new();
    for table in introspector.topological_order()? {
        let desc = introspector.describe(&table)?;
        let Some(scope) = desc.scope_column.as_deref() else {
            continue;
        };
        let rows: i64 = storage.conn().query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {} = ?1",
                quote_ident(&table),
                quote_ident(scope)
            ),
            params![project_id],
            |row| row.get(0),
        )?;
        let row_columns: Vec<String> = desc
            .columns
            .iter()
            .filter(|c| Some(c.as_str()) != desc.identity.as_deref())
            .cloned()
            .collect();
        let mut depends_on: Vec<String> = edges
            .iter()
            .filter(|e| e.child == table && e.parent != table)
            .map(|e| e.parent.clone())
            .collect();
        depends_on.sort();
        depends_on.dedup();

        tables.push(TableRow {
            merge_key: resolver.resolve(&desc, &row_columns),
            identity: desc.identity.clone(),
            table,
            rows,
            depends_on,
        });
    }

    if json {
        let output = serde_json::json!({
            "project_id": project_id,
            "tables": tables,
        });
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if tables.is_empty() {
        println!(
            "No tables carry the scope column '{}'.",
            conventions.scope_column
        );
        return Ok(());
    }

    println!("{} {}", "Project".bold(), project_id);
    println!();
    for t in &tables {
        let key = t
            .merge_key
            .as_ref()
            .map_or_else(|| "always insert".dimmed().to_string(), |k| k.join(", "));
        println!("  {:<28} {:>8} rows   key: {key}", t.table.cyan(), t.rows);
        if !t.depends_on.is_empty() {
            println!("  {:<28} after {}", "", t.depends_on.join(", "));
        }
    }
    Ok(())
}
