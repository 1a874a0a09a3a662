//! Storage collaborators
//!
//! The catalog never talks to a bucket or a table-format engine directly. It
//! goes through the two narrow traits defined here:
//! - [`ObjectStore`]: prefix listing, pagination and batched deletes
//! - [`TableFormat`]: opening a table to read its schema and description, and
//!   retiring its transaction log
//!
//! [`s3`] and [`delta`] implement them against Amazon S3 and the Delta
//! transaction log. In-memory implementations of both live in [`memory`].

pub mod delta;
pub mod location;
pub mod memory;
pub mod runtime;
pub mod s3;

pub use delta::DeltaLogFormat;
pub use location::StorageLocation;
pub use memory::{MemoryObjectStore, MemoryTableFormat};
pub use s3::{S3ObjectStore, S3_SCHEME};

use crate::config::StorageOptions;
use crate::error::Result;
use arrow::datatypes::Schema;

/// Name of the subdirectory holding a table's transaction log.
/// A prefix without it is never treated as a table.
pub const DELTA_LOG_DIR: &str = "_delta_log";

/// Largest number of keys accepted by one [`ObjectStore::delete_objects`] call
pub const MAX_DELETE_BATCH: usize = 1000;

/// Path separator used for object keys and listing delimiters
pub const DELIMITER: &str = "/";

/// Pages of object keys, fetched lazily
pub type ObjectPages<'a> = Box<dyn Iterator<Item = Result<Vec<String>>> + 'a>;

/// Object-storage client
pub trait ObjectStore: Send + Sync {
    /// List the distinct child prefixes directly under `prefix`, each ending
    /// with `delimiter`
    fn list_child_prefixes(&self, bucket: &str, prefix: &str, delimiter: &str)
        -> Result<Vec<String>>;

    /// List at most `max_keys` object keys under `prefix`
    fn list_objects(&self, bucket: &str, prefix: &str, max_keys: usize) -> Result<Vec<String>>;

    /// Walk every object key under `prefix` one page at a time
    fn paginate_objects<'a>(&'a self, bucket: &'a str, prefix: &'a str) -> ObjectPages<'a>;

    /// Delete up to [`MAX_DELETE_BATCH`] keys
    fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<()>;
}

/// An opened transactional table
pub trait TableHandle {
    /// Location the table was opened at
    fn location(&self) -> &str;

    /// The table's Arrow schema, in column order
    fn schema(&self) -> Result<Schema>;

    /// Free-text description stored in the table metadata
    fn metadata_description(&self) -> Option<&str>;

    /// Retire the table's transaction log so it is no longer queryable
    fn delete(&self) -> Result<()>;
}

/// Table-format engine
pub trait TableFormat: Send + Sync {
    /// Open the table at `location` using `options` for storage access
    fn open<'a>(
        &'a self,
        location: &str,
        options: &StorageOptions,
    ) -> Result<Box<dyn TableHandle + 'a>>;
}
