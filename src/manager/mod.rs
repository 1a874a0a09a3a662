//! Table managers
//!
//! A table manager keeps a [`Catalog`] in sync with tables stored under a
//! root location. The [`TableManager`] trait defines the contract; concrete
//! backends such as [`S3TableManager`] decide how tables are discovered and
//! deleted.

pub mod s3;

pub use s3::S3TableManager;

use crate::catalog::{Catalog, TableDescriptor};
use crate::config::StorageOptions;
use crate::error::{Result, ValidationError};
use crate::storage::StorageLocation;
use arrow::datatypes::Schema;
use std::fmt;
use std::sync::Arc;

/// Contract shared by all table managers
pub trait TableManager {
    /// Root location of the managed tables
    fn storage_location(&self) -> &StorageLocation;

    /// Options handed to the storage collaborators
    fn storage_options(&self) -> &StorageOptions;

    /// Read access to the in-memory catalog
    fn catalog(&self) -> &Catalog;

    /// Scan the backing store and rebuild the catalog. Never fails; problems
    /// are recorded in the returned report.
    fn discover_existing_tables(&self) -> DiscoveryReport;

    /// Delete a table's log and data objects. Returns `true` only if every
    /// step succeeded.
    fn delete_table(&self, name: &str) -> bool;

    /// Get a table by name
    fn get_table(&self, name: &str) -> Result<Arc<TableDescriptor>> {
        self.catalog().get_table(name)
    }

    /// Check if a table is in the catalog
    fn table_exists(&self, name: &str) -> bool {
        self.catalog().table_exists(name)
    }

    /// List catalog table names, sorted
    fn list_tables(&self) -> Vec<String> {
        self.catalog().list_tables()
    }

    /// Add a table definition to the catalog. Implementations must not let the
    /// insert interleave with a discovery or deletion.
    fn register_table(&self, descriptor: TableDescriptor) -> Result<Arc<TableDescriptor>>;

    /// Check a dataset schema against a catalog table
    fn validate_dataset(&self, name: &str, schema: &Schema) -> Result<bool> {
        Ok(self.get_table(name)?.validate_schema(schema))
    }

    /// Human-readable description of a catalog table
    fn describe_table(&self, name: &str) -> Result<String> {
        self.catalog().get_table_info(name)
    }
}

/// Why a candidate prefix was not loaded
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// No transaction log under the prefix
    NoLogMarker,
    /// Listing the log directory failed
    LogCheckFailed(String),
    /// Opening the table or reading its schema failed
    LoadFailed(String),
    /// The recovered descriptor was rejected
    InvalidDescriptor(ValidationError),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoLogMarker => write!(f, "no transaction log"),
            SkipReason::LogCheckFailed(e) => write!(f, "log check failed: {}", e),
            SkipReason::LoadFailed(e) => write!(f, "load failed: {}", e),
            SkipReason::InvalidDescriptor(e) => write!(f, "invalid descriptor: {}", e),
        }
    }
}

/// A candidate prefix that discovery passed over
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedCandidate {
    pub prefix: String,
    pub reason: SkipReason,
}

/// Outcome of one discovery pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryReport {
    /// Child prefixes examined
    pub candidates: usize,
    /// Tables added to the catalog, sorted
    pub loaded: Vec<String>,
    /// Loaded tables whose primary key could not be read from metadata
    pub unknown_primary_keys: Vec<String>,
    /// Candidates that were not loaded
    pub skipped: Vec<SkippedCandidate>,
    /// Set when the root listing failed and nothing was scanned
    pub error: Option<String>,
}

impl DiscoveryReport {
    /// Check if the root listing succeeded
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a successful table purge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    /// Objects removed in phase B
    pub objects_deleted: usize,
    /// Size of each `delete_objects` batch, in order
    pub batches: Vec<usize>,
    /// Whether the catalog held an entry for the table
    pub catalog_entry_removed: bool,
}
