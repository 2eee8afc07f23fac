//! Merge-key resolution for idempotent import.
//!
//! A merge key is the set of columns that identifies "the same row" in the
//! destination. Rows whose key already matches are skipped instead of
//! inserted. Resolution order:
//!
//! 1. A unique index containing the scope column, all members present
//! 2. A primary key containing the scope column, all members present
//! 3. Naming-convention rules, only when enabled in [`Conventions`]
//! 4. No key: the row is always inserted

use std::collections::HashMap;

use crate::config::Conventions;
use crate::storage::TableDescriptor;

/// Resolves and caches merge keys per table and column set.
#[derive(Debug)]
pub struct MergeKeyResolver<'a> {
    conventions: &'a Conventions,
    cache: HashMap<(String, Vec<String>), Option<Vec<String>>>,
}

impl<'a> MergeKeyResolver<'a> {
    #[must_use]
    pub fn new(conventions: &'a Conventions) -> Self {
        Self {
            conventions,
            cache: HashMap::new(),
        }
    }

    /// Merge key for a row of `table` carrying exactly `row_columns`.
    pub fn resolve(&mut self, table: &TableDescriptor, row_columns: &[String]) -> Option<Vec<String>> {
        let conventions = self.conventions;
        self.cache
            .entry((table.name.clone(), row_columns.to_vec()))
            .or_insert_with(|| {
                table
                    .catalog_merge_key(row_columns)
                    .or_else(|| conventions.heuristic_key(&table.name, row_columns))
            })
            .clone()
    }
}
