//! Table manager for Delta tables in an S3 bucket
//!
//! Every immediate child prefix of the root that contains a `_delta_log/`
//! object is a table. Discovery runs once at construction; deletion retires
//! the table's log through the table format and then removes every object
//! under the table prefix in batches.

use super::{DeleteSummary, DiscoveryReport, SkipReason, SkippedCandidate, TableManager};
use crate::catalog::{type_tag, Catalog, PrimaryKeys, TableDescriptor, TableSchema};
use crate::config::{ManagerConfig, StorageOptions};
use crate::error::{Error, Result};
use crate::observability::manager_span;
use crate::storage::location::basename;
use crate::storage::{
    DeltaLogFormat, ObjectStore, S3ObjectStore, StorageLocation, TableFormat, DELIMITER,
    DELTA_LOG_DIR, MAX_DELETE_BATCH,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub use crate::storage::S3_SCHEME;

/// Catalog of the Delta tables under an `s3://bucket/prefix` root
pub struct S3TableManager {
    location: StorageLocation,
    storage_options: StorageOptions,
    object_store: Arc<dyn ObjectStore>,
    table_format: Arc<dyn TableFormat>,
    catalog: Catalog,
    /// Held for the whole of a discovery, deletion or catalog insert
    write_lock: Mutex<()>,
    last_discovery: Mutex<DiscoveryReport>,
}

impl S3TableManager {
    /// Create a manager for `location` and load the tables already stored there.
    ///
    /// Fails only if `location` is malformed or is not an `s3://` location.
    /// Problems found while scanning the bucket are logged and recorded in
    /// [`S3TableManager::last_discovery`].
    pub fn new(
        location: &str,
        storage_options: StorageOptions,
        object_store: Arc<dyn ObjectStore>,
        table_format: Arc<dyn TableFormat>,
    ) -> Result<Self> {
        let location = StorageLocation::parse(location)?;
        location.require_scheme(S3_SCHEME)?;

        info!(
            bucket = location.bucket(),
            prefix = location.prefix(),
            "S3 table manager initialized"
        );

        let manager = Self {
            location,
            storage_options,
            object_store,
            table_format,
            catalog: Catalog::new(),
            write_lock: Mutex::new(()),
            last_discovery: Mutex::new(DiscoveryReport::default()),
        };
        manager.discover_existing_tables();
        Ok(manager)
    }

    /// Create a manager that talks to S3 directly, building its clients from
    /// `storage_options`
    pub fn connect(location: &str, storage_options: StorageOptions) -> Result<Self> {
        let object_store = Arc::new(S3ObjectStore::new(storage_options.clone())?);
        let table_format = Arc::new(DeltaLogFormat::new()?);
        Self::new(location, storage_options, object_store, table_format)
    }

    /// Create a manager from a loaded config
    pub fn from_config(
        config: &ManagerConfig,
        object_store: Arc<dyn ObjectStore>,
        table_format: Arc<dyn TableFormat>,
    ) -> Result<Self> {
        Self::new(
            &config.location,
            config.storage_options.clone(),
            object_store,
            table_format,
        )
    }

    pub fn bucket(&self) -> &str {
        self.location.bucket()
    }

    pub fn prefix(&self) -> &str {
        self.location.prefix()
    }

    /// Rescan the bucket and replace the catalog
    pub fn reload(&self) -> DiscoveryReport {
        self.discover_existing_tables()
    }

    /// Report of the most recent discovery
    pub fn last_discovery(&self) -> DiscoveryReport {
        self.last_discovery.lock().clone()
    }

    /// Delete a table and report what was removed.
    ///
    /// Phase A retires the transaction log; phase B removes every object under
    /// the table prefix. The phases are not atomic: if phase B fails, data
    /// objects may be left behind and the catalog entry is kept.
    ///
    /// A name that is blank or contains `/` is rejected before either phase.
    pub fn purge_table(&self, name: &str) -> Result<DeleteSummary> {
        if name.trim().is_empty() || name.contains(DELIMITER) {
            return Err(Error::InvalidTableName(name.to_string()));
        }

        let _guard = self.write_lock.lock();
        let span = manager_span("delete", self.bucket(), self.prefix());
        let _entered = span.enter();

        let table_uri = self.location.table_uri(name);
        let table_prefix = self.location.table_prefix(name);

        let table = self.table_format.open(&table_uri, &self.storage_options)?;
        table.delete()?;
        debug!(table = name, location = %table_uri, "transaction log retired");

        let mut summary = DeleteSummary::default();
        let mut pending = Vec::with_capacity(MAX_DELETE_BATCH);
        for page in self
            .object_store
            .paginate_objects(self.bucket(), &table_prefix)
        {
            for key in page? {
                pending.push(key);
                if pending.len() == MAX_DELETE_BATCH {
                    self.delete_batch(&mut pending, &mut summary)?;
                }
            }
        }
        if !pending.is_empty() {
            self.delete_batch(&mut pending, &mut summary)?;
        }

        summary.catalog_entry_removed = self.catalog.remove_table(name).is_some();
        Ok(summary)
    }

    fn delete_batch(&self, pending: &mut Vec<String>, summary: &mut DeleteSummary) -> Result<()> {
        self.object_store
            .delete_objects(self.bucket(), pending.as_slice())?;
        debug!(count = pending.len(), "deleted object batch");
        summary.objects_deleted += pending.len();
        summary.batches.push(pending.len());
        pending.clear();
        Ok(())
    }

    fn scan(&self) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        info!("looking for tables");

        let listing = self
            .object_store
            .list_child_prefixes(self.bucket(), self.prefix(), DELIMITER);
        let children = match listing {
            Ok(children) => children,
            Err(e) => {
                error!(error = %e.display_chain(), "failed to list table candidates");
                report.error = Some(e.display_chain());
                return report;
            }
        };

        report.candidates = children.len();
        if children.is_empty() {
            info!("no table candidates found");
            self.catalog.replace_all(Vec::new());
            return report;
        }
        debug!(count = children.len(), "found candidate prefixes");

        let mut discovered = Vec::new();
        for child in children {
            let child = if child.ends_with(DELIMITER) {
                child
            } else {
                format!("{}{}", child, DELIMITER)
            };
            let name = basename(&child);

            match self.load_candidate(name, &child) {
                Ok(descriptor) => {
                    debug!(
                        table = name,
                        columns = descriptor.table_schema().len(),
                        primary_keys = %descriptor.primary_keys(),
                        "loaded table"
                    );
                    if descriptor.primary_keys().is_unknown() {
                        warn!(table = name, "table metadata has no usable primary key");
                        report.unknown_primary_keys.push(name.to_string());
                    }
                    report.loaded.push(name.to_string());
                    discovered.push(descriptor);
                }
                Err(SkipReason::NoLogMarker) => {
                    debug!(prefix = %child, "no {} found, skipping", DELTA_LOG_DIR);
                    report.skipped.push(SkippedCandidate {
                        prefix: child.clone(),
                        reason: SkipReason::NoLogMarker,
                    });
                }
                Err(reason) => {
                    warn!(prefix = %child, reason = %reason, "skipping table candidate");
                    report.skipped.push(SkippedCandidate {
                        prefix: child.clone(),
                        reason,
                    });
                }
            }
        }

        report.loaded.sort();
        report.unknown_primary_keys.sort();
        self.catalog.replace_all(discovered);
        info!(
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            "table discovery finished"
        );
        report
    }

    /// Confirm a candidate prefix is a table and rebuild its descriptor
    fn load_candidate(
        &self,
        name: &str,
        child_prefix: &str,
    ) -> std::result::Result<TableDescriptor, SkipReason> {
        let log_prefix = format!("{}{}{}", child_prefix, DELTA_LOG_DIR, DELIMITER);
        let marker = self
            .object_store
            .list_objects(self.bucket(), &log_prefix, 1)
            .map_err(|e| SkipReason::LogCheckFailed(e.display_chain()))?;
        if marker.is_empty() {
            return Err(SkipReason::NoLogMarker);
        }

        let uri = self.location.key_uri(child_prefix);
        let table = self
            .table_format
            .open(&uri, &self.storage_options)
            .map_err(|e| SkipReason::LoadFailed(e.display_chain()))?;
        let schema = table
            .schema()
            .map_err(|e| SkipReason::LoadFailed(e.display_chain()))?;

        let table_schema: TableSchema = schema
            .fields()
            .iter()
            .map(|field| (field.name().clone(), type_tag(field.data_type())))
            .collect();
        let primary_keys = table
            .metadata_description()
            .and_then(PrimaryKeys::parse_description)
            .unwrap_or(PrimaryKeys::Unknown);

        TableDescriptor::new(name, table_schema, primary_keys).map_err(SkipReason::InvalidDescriptor)
    }
}

impl TableManager for S3TableManager {
    fn storage_location(&self) -> &StorageLocation {
        &self.location
    }

    fn storage_options(&self) -> &StorageOptions {
        &self.storage_options
    }

    fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn discover_existing_tables(&self) -> DiscoveryReport {
        let _guard = self.write_lock.lock();
        let span = manager_span("discover", self.bucket(), self.prefix());
        let _entered = span.enter();

        let report = self.scan();
        *self.last_discovery.lock() = report.clone();
        report
    }

    fn register_table(&self, descriptor: TableDescriptor) -> Result<Arc<TableDescriptor>> {
        let _guard = self.write_lock.lock();
        let table = self.catalog.register_table(descriptor)?;
        debug!(table = table.name(), "table registered");
        Ok(table)
    }

    fn delete_table(&self, name: &str) -> bool {
        match self.purge_table(name) {
            Ok(summary) => {
                info!(
                    table = name,
                    objects = summary.objects_deleted,
                    batches = summary.batches.len(),
                    "table deleted"
                );
                true
            }
            Err(e) => {
                error!(table = name, error = %e.display_chain(), "failed to delete table");
                false
            }
        }
    }
}

impl fmt::Debug for S3TableManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3TableManager")
            .field("location", &self.location.to_string())
            .field("storage_options", &self.storage_options)
            .field("tables", &self.catalog.list_tables())
            .finish()
    }
}
