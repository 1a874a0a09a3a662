//! In-memory table catalog for deltacat
//!
//! This module maps table names to their descriptors. The catalog is a cache of
//! what was last discovered in the backing store; it is not a transactional
//! view of the bucket. Outside the crate it is read-only: every mutation goes
//! through a table manager, which serializes it with discovery and deletion.

use super::schema::TableDescriptor;
use super::types::LogicalType;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Table catalog - maps table names to descriptors
#[derive(Debug, Default)]
pub struct Catalog {
    /// Table descriptors by name
    tables: RwLock<HashMap<String, Arc<TableDescriptor>>>,
}

impl Catalog {
    /// Create a new empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table, failing if the name is taken
    pub(crate) fn register_table(
        &self,
        descriptor: TableDescriptor,
    ) -> Result<Arc<TableDescriptor>> {
        let mut tables = self.tables.write();

        if tables.contains_key(descriptor.name()) {
            return Err(Error::TableAlreadyExists(descriptor.name().to_string()));
        }

        let descriptor = Arc::new(descriptor);
        tables.insert(descriptor.name().to_string(), descriptor.clone());
        Ok(descriptor)
    }

    /// Get a table by name
    pub fn get_table(&self, name: &str) -> Result<Arc<TableDescriptor>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    /// Check if a table exists
    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.read().contains_key(name)
    }

    /// Remove a table. Removing an absent table is a no-op.
    pub(crate) fn remove_table(&self, name: &str) -> Option<Arc<TableDescriptor>> {
        self.tables.write().remove(name)
    }

    /// Swap the whole catalog for a freshly discovered set of tables
    pub(crate) fn replace_all(&self, descriptors: impl IntoIterator<Item = TableDescriptor>) {
        let tables = descriptors
            .into_iter()
            .map(|d| (d.name().to_string(), Arc::new(d)))
            .collect();
        *self.tables.write() = tables;
    }

    /// List all table names, sorted
    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// All descriptors, sorted by table name
    pub fn snapshot(&self) -> Vec<Arc<TableDescriptor>> {
        let mut tables: Vec<_> = self.tables.read().values().cloned().collect();
        tables.sort_by(|a, b| a.name().cmp(b.name()));
        tables
    }

    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }

    /// Get table schema info as a formatted string
    pub fn get_table_info(&self, name: &str) -> Result<String> {
        let table = self.get_table(name)?;
        let key_columns = table.primary_keys().columns();

        let mut info = format!("Table: {}\n", table.name());
        info.push_str("Columns:\n");

        for (column, tag) in table.table_schema() {
            let mut flags = Vec::new();
            if key_columns.contains(&column.as_str()) {
                flags.push("PRIMARY KEY");
            }
            if !LogicalType::parse(tag).is_known() {
                flags.push("UNRECOGNIZED TYPE");
            }

            let flags_str = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            };

            info.push_str(&format!("  {} {}{}\n", column, tag, flags_str));
        }

        info.push_str(&format!("Primary key: {}\n", table.primary_keys()));
        Ok(info)
    }
}
