//! Schema introspection.
//!
//! Reads catalog metadata through SQLite's table-valued pragma functions,
//! always binding the table name as a parameter. Names returned from here are
//! the only identifiers the transfer pipelines ever interpolate into SQL.

use std::collections::VecDeque;

use rusqlite::{params, Connection};

use crate::config::Conventions;
use crate::error::Result;
use crate::storage::quote_ident;

/// One column as reported by `pragma_table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    /// 1-based position within the primary key, 0 if not part of it.
    pub pk_position: i64,
}

/// A foreign key column pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub child_table: String,
    pub child_column: String,
    pub parent_table: String,
    /// `None` when the constraint references the parent's primary key implicitly.
    pub parent_column: Option<String>,
}

/// A (child, parent) dependency between two tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub child: String,
    pub parent: String,
}

impl DependencyEdge {
    #[must_use]
    pub fn new(child: &str, parent: &str) -> Self {
        Self {
            child: child.to_string(),
            parent: parent.to_string(),
        }
    }
}

/// Everything the pipelines need to know about one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: String,
    /// Column names in ordinal order.
    pub columns: Vec<String>,
    pub primary_keys: Vec<Vec<String>>,
    pub unique_keys: Vec<Vec<String>>,
    /// Rowid alias (`INTEGER PRIMARY KEY`), if the table has one.
    pub identity: Option<String>,
    /// Scope column as spelled in this table.
    pub scope_column: Option<String>,
}

impl TableDescriptor {
    /// Whether the table carries the project-scope column.
    #[must_use]
    pub fn is_scoped(&self) -> bool {
        self.scope_column.is_some()
    }

    /// `ORDER BY` list that pages through the table in a total order.
    ///
    /// The identity column when there is one. Otherwise the first column,
    /// tie-broken by the primary key, or by `rowid` for tables without one
    /// (only rowid tables can lack a primary key).
    #[must_use]
    pub fn order_by(&self) -> Option<String> {
        if let Some(identity) = &self.identity {
            return Some(quote_ident(identity));
        }
        let first = self.columns.first()?;
        let mut keys = vec![quote_ident(first)];
        match self.primary_keys.first() {
            Some(pk) => keys.extend(pk.iter().filter(|c| *c != first).map(|c| quote_ident(c))),
            None => keys.push("rowid".to_string()),
        }
        Some(keys.join(", "))
    }

    /// Pick a natural key from the catalog.
    ///
    /// Prefers a unique index that includes the scope column and whose every
    /// member is in `row_columns`, then a primary key meeting the same test.
    #[must_use]
    pub fn catalog_merge_key(&self, row_columns: &[String]) -> Option<Vec<String>> {
        let scope = self.scope_column.as_deref()?;
        let usable = |group: &&Vec<String>| {
            group.iter().any(|c| c.eq_ignore_ascii_case(scope))
                && group
                    .iter()
                    .all(|c| row_columns.iter().any(|r| r.eq_ignore_ascii_case(c)))
        };

        self.unique_keys
            .iter()
            .find(usable)
            .or_else(|| self.primary_keys.iter().find(usable))
            .cloned()
    }
}

/// Catalog reader bound to one connection.
pub struct SchemaIntrospector<'a> {
    conn: &'a Connection,
    conventions: &'a Conventions,
}

impl<'a> SchemaIntrospector<'a> {
    #[must_use]
    pub fn new(conn: &'a Connection, conventions: &'a Conventions) -> Self {
        Self { conn, conventions }
    }

    /// All user tables, in name order.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog query fails.
    pub fn tables(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    /// Column metadata in ordinal order. Empty if the table does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog query fails.
    pub fn column_info(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT name, type, pk FROM pragma_table_info(?1) ORDER BY cid")?;
        let rows = stmt.query_map(params![table], |row| {
            Ok(ColumnInfo {
                name: row.get(0)?,
                decl_type: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                pk_position: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Column names in ordinal order.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog query fails.
    pub fn columns(&self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .column_info(table)?
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    /// Primary key column groups (zero or one group in SQLite).
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog query fails.
    pub fn primary_keys(&self, table: &str) -> Result<Vec<Vec<String>>> {
        Ok(primary_key_group(&self.column_info(table)?)
            .map(|group| vec![group])
            .unwrap_or_default())
    }

    /// Unique index column groups, excluding the primary key's own index.
    ///
    /// Expression indexes are skipped since they have no column names.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog query fails.
    pub fn unique_indexes(&self, table: &str) -> Result<Vec<Vec<String>>> {
        let index_names: Vec<String> = {
            let mut stmt = self.conn.prepare_cached(
                "SELECT name FROM pragma_index_list(?1)
                 WHERE \"unique\" = 1 AND origin <> 'pk'
                 ORDER BY seq DESC",
            )?;
            let rows = stmt.query_map(params![table], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut groups = Vec::with_capacity(index_names.len());
        let mut stmt = self
            .conn
            .prepare_cached("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
        for index in index_names {
            let members: Vec<Option<String>> = stmt
                .query_map(params![index], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            if let Some(group) = members.into_iter().collect::<Option<Vec<String>>>() {
                if !group.is_empty() {
                    groups.push(group);
                }
            }
        }
        Ok(groups)
    }

    /// Foreign keys declared on one table.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog query fails.
    pub fn foreign_keys_of(&self, table: &str) -> Result<Vec<ForeignKey>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT \"table\", \"from\", \"to\" FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
        )?;
        let rows = stmt.query_map(params![table], |row| {
            Ok(ForeignKey {
                child_table: table.to_string(),
                parent_table: row.get(0)?,
                child_column: row.get(1)?,
                parent_column: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Every foreign key in the database, with parent names normalized to
    /// their catalog spelling.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog query fails.
    pub fn foreign_keys(&self) -> Result<Vec<ForeignKey>> {
        let tables = self.tables()?;
        let mut all = Vec::new();
        for table in &tables {
            for mut fk in self.foreign_keys_of(table)? {
                if let Some(canonical) = tables
                    .iter()
                    .find(|t| t.eq_ignore_ascii_case(&fk.parent_table))
                {
                    fk.parent_table.clone_from(canonical);
                }
                all.push(fk);
            }
        }
        Ok(all)
    }

    /// All foreign-key edges as (child, parent) table pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog query fails.
    pub fn foreign_key_edges(&self) -> Result<Vec<DependencyEdge>> {
        Ok(self
            .foreign_keys()?
            .iter()
            .map(|fk| DependencyEdge::new(&fk.child_table, &fk.parent_table))
            .collect())
    }

    /// Whether the table carries the scope column.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog query fails.
    pub fn has_scope_column(&self, table: &str) -> Result<bool> {
        let columns = self.columns(table)?;
        Ok(self.conventions.scope_column_in(&columns).is_some())
    }

    /// Tables carrying the scope column, in discovery order.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog query fails.
    pub fn scoped_tables(&self) -> Result<Vec<String>> {
        let mut scoped = Vec::new();
        for table in self.tables()? {
            if self.has_scope_column(&table)? {
                scoped.push(table);
            }
        }
        Ok(scoped)
    }

    /// Scoped tables ordered so that every parent precedes its children.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog query fails.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let scoped = self.scoped_tables()?;
        let edges = self.foreign_key_edges()?;
        Ok(topological_order(&scoped, &edges))
    }

    /// Full descriptor for one table.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog query fails.
    pub fn describe(&self, table: &str) -> Result<TableDescriptor> {
        let info = self.column_info(table)?;
        let primary_key = primary_key_group(&info);
        let identity = match &primary_key {
            Some(group) if group.len() == 1 => info
                .iter()
                .find(|c| c.name == group[0] && c.decl_type.eq_ignore_ascii_case("INTEGER"))
                .map(|c| c.name.clone()),
            _ => None,
        };
        let columns: Vec<String> = info.into_iter().map(|c| c.name).collect();
        let scope_column = self.conventions.scope_column_in(&columns).map(String::from);

        Ok(TableDescriptor {
            name: table.to_string(),
            unique_keys: self.unique_indexes(table)?,
            primary_keys: primary_key.into_iter().collect(),
            identity,
            scope_column,
            columns,
        })
    }
}

fn primary_key_group(info: &[ColumnInfo]) -> Option<Vec<String>> {
    let mut members: Vec<&ColumnInfo> = info.iter().filter(|c| c.pk_position > 0).collect();
    if members.is_empty() {
        return None;
    }
    members.sort_by_key(|c| c.pk_position);
    Some(members.into_iter().map(|c| c.name.clone()).collect())
}

/// Kahn's algorithm over the edges whose both ends are in `tables`.
///
/// Tables left over because of a cycle are appended in their `tables` order
/// rather than failing.
#[must_use]
pub fn topological_order(tables: &[String], edges: &[DependencyEdge]) -> Vec<String> {
    let position = |name: &str| tables.iter().position(|t| t.eq_ignore_ascii_case(name));
    let mut remaining: Vec<(usize, usize)> = edges
        .iter()
        .filter_map(|e| Some((position(&e.child)?, position(&e.parent)?)))
        .collect();

    let mut in_degree = vec![0usize; tables.len()];
    for &(child, _) in &remaining {
        in_degree[child] += 1;
    }

    let mut queue: VecDeque<usize> = (0..tables.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut placed = vec![false; tables.len()];
    let mut order = Vec::with_capacity(tables.len());

    while let Some(node) = queue.pop_front() {
        placed[node] = true;
        order.push(tables[node].clone());
        remaining.retain(|&(child, parent)| {
            if parent != node {
                return true;
            }
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                queue.push_back(child);
            }
            false
        });
    }

    for (i, table) in tables.iter().enumerate() {
        if !placed[i] {
            order.push(table.clone());
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|t| t == name).unwrap()
    }

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r"
            CREATE TABLE projects (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
            CREATE TABLE hosts (
                id INTEGER PRIMARY KEY,
                project_id INTEGER NOT NULL REFERENCES projects(id),
                name TEXT NOT NULL,
                UNIQUE (project_id, name)
            );
            CREATE TABLE ports (
                id INTEGER PRIMARY KEY,
                host_id INTEGER NOT NULL REFERENCES hosts,
                project_id INTEGER NOT NULL,
                number INTEGER NOT NULL
            );
            CREATE TABLE tags (
                project_id INTEGER NOT NULL,
                label TEXT NOT NULL,
                PRIMARY KEY (project_id, label)
            );
            CREATE TABLE settings (key TEXT PRIMARY KEY, value TEXT);
            CREATE UNIQUE INDEX idx_ports_number ON ports(project_id, host_id, number);
            ",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_topological_order_parents_first() {
        let tables = names(&["c", "b", "a"]);
        let edges = vec![DependencyEdge::new("c", "b"), DependencyEdge::new("b", "a")];
        assert_eq!(topological_order(&tables, &edges), names(&["a", "b", "c"]));
    }

    #[test]
    fn test_topological_order_ignores_edges_outside_scope() {
        let tables = names(&["child", "parent"]);
        let edges = vec![
            DependencyEdge::new("child", "projects"),
            DependencyEdge::new("child", "parent"),
        ];
        assert_eq!(topological_order(&tables, &edges), names(&["parent", "child"]));
    }

    #[test]
    fn test_topological_order_cycle_falls_back_to_discovery_order() {
        let tables = names(&["x", "y", "root", "z"]);
        let edges = vec![
            DependencyEdge::new("x", "y"),
            DependencyEdge::new("y", "x"),
            DependencyEdge::new("z", "root"),
        ];
        // root and z resolve; x and y are stuck in a cycle and come last
        assert_eq!(topological_order(&tables, &edges), names(&["root", "z", "x", "y"]));
    }

    #[test]
    fn test_topological_order_self_reference_is_a_cycle() {
        let tables = names(&["tree", "leaf"]);
        let edges = vec![DependencyEdge::new("tree", "tree")];
        assert_eq!(topological_order(&tables, &edges), names(&["leaf", "tree"]));
    }

    #[test]
    fn test_scoped_tables_and_order() {
        let conn = test_db();
        let conventions = Conventions::default();
        let introspector = SchemaIntrospector::new(&conn, &conventions);

        assert_eq!(introspector.scoped_tables().unwrap(), names(&["hosts", "ports", "tags"]));

        let order = introspector.topological_order().unwrap();
        for edge in introspector.foreign_key_edges().unwrap() {
            if order.contains(&edge.child) && order.contains(&edge.parent) {
                assert!(position(&order, &edge.parent) < position(&order, &edge.child));
            }
        }
    }

    #[test]
    fn test_foreign_keys_report_implicit_parent_column() {
        let conn = test_db();
        let conventions = Conventions::default();
        let introspector = SchemaIntrospector::new(&conn, &conventions);

        let fks = introspector.foreign_keys_of("ports").unwrap();
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].parent_table, "hosts");
        assert_eq!(fks[0].child_column, "host_id");
        assert_eq!(fks[0].parent_column, None);
    }

    #[test]
    fn test_describe_identity_and_keys() {
        let conn = test_db();
        let conventions = Conventions::default();
        let introspector = SchemaIntrospector::new(&conn, &conventions);

        let hosts = introspector.describe("hosts").unwrap();
        assert_eq!(hosts.columns, names(&["id", "project_id", "name"]));
        assert_eq!(hosts.identity.as_deref(), Some("id"));
        assert_eq!(hosts.primary_keys, vec![names(&["id"])]);
        assert_eq!(hosts.unique_keys, vec![names(&["project_id", "name"])]);
        assert!(hosts.is_scoped());

        let tags = introspector.describe("tags").unwrap();
        assert_eq!(tags.identity, None);
        assert_eq!(tags.order_by().as_deref(), Some("\"project_id\", \"label\""));
        assert_eq!(hosts.order_by().as_deref(), Some("\"id\""));

        let settings = introspector.describe("settings").unwrap();
        assert_eq!(settings.identity, None);
        assert!(!settings.is_scoped());
    }

    #[test]
    fn test_catalog_merge_key_selection() {
        let conn = test_db();
        let conventions = Conventions::default();
        let introspector = SchemaIntrospector::new(&conn, &conventions);

        let hosts = introspector.describe("hosts").unwrap();
        let row = names(&["project_id", "name"]);
        assert_eq!(hosts.catalog_merge_key(&row), Some(names(&["project_id", "name"])));
        // A key member missing from the row disqualifies the index
        assert_eq!(hosts.catalog_merge_key(&names(&["project_id"])), None);

        // Composite primary key including the scope column
        let tags = introspector.describe("tags").unwrap();
        assert_eq!(
            tags.catalog_merge_key(&names(&["project_id", "label"])),
            Some(names(&["project_id", "label"]))
        );
    }

    #[test]
    fn test_missing_table_has_no_columns() {
        let conn = test_db();
        let conventions = Conventions::default();
        let introspector = SchemaIntrospector::new(&conn, &conventions);
        assert!(introspector.columns("nope").unwrap().is_empty());
        assert!(!introspector.has_scope_column("nope").unwrap());
    }
}
