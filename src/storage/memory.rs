//! In-memory storage collaborators
//!
//! [`MemoryObjectStore`] keeps sorted key sets per bucket and pages through
//! them the way S3 does. [`MemoryTableFormat`] keeps Delta-like tables on top
//! of a shared store: creating a table writes its first log object, and a
//! table only opens while its log is present.
//!
//! Both support failure injection so callers can exercise error paths.

use super::location::StorageLocation;
use super::{ObjectPages, ObjectStore, TableFormat, TableHandle, DELTA_LOG_DIR, MAX_DELETE_BATCH};
use crate::config::StorageOptions;
use crate::error::{Error, Result};
use anyhow::anyhow;
use arrow::datatypes::Schema;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Default number of keys per listing page
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// First commit file written when a table is created
const FIRST_COMMIT: &str = "00000000000000000000.json";

/// In-memory object store
#[derive(Debug)]
pub struct MemoryObjectStore {
    /// Object keys by bucket
    buckets: RwLock<BTreeMap<String, BTreeSet<String>>>,
    /// Keys per page returned by `paginate_objects`
    page_size: usize,
    /// Key prefixes whose operations fail
    fail_prefixes: Mutex<Vec<String>>,
    /// 1-based `delete_objects` call that fails
    fail_delete_call: Mutex<Option<usize>>,
    /// Batch size of every `delete_objects` call, in order
    delete_calls: Mutex<Vec<usize>>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self {
            buckets: RwLock::new(BTreeMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            fail_prefixes: Mutex::new(Vec::new()),
            fail_delete_call: Mutex::new(None),
            delete_calls: Mutex::new(Vec::new()),
        }
    }
}

impl MemoryObjectStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the listing page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Create a bucket if it does not exist
    pub fn create_bucket(&self, bucket: &str) {
        self.buckets.write().entry(bucket.to_string()).or_default();
    }

    /// Store an object, creating the bucket if needed
    pub fn put_object(&self, bucket: &str, key: impl Into<String>) {
        self.buckets
            .write()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.into());
    }

    /// Check if an object exists
    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.buckets
            .read()
            .get(bucket)
            .map_or(false, |keys| keys.contains(key))
    }

    /// Count objects under a prefix
    pub fn object_count(&self, bucket: &str, prefix: &str) -> usize {
        self.keys_under(bucket, prefix).map_or(0, |keys| keys.len())
    }

    /// Make every operation touching keys under `prefix` fail
    pub fn inject_failure(&self, prefix: impl Into<String>) {
        self.fail_prefixes.lock().push(prefix.into());
    }

    /// Make the `call`-th `delete_objects` call (1-based) fail
    pub fn fail_delete_call(&self, call: usize) {
        *self.fail_delete_call.lock() = Some(call);
    }

    /// Clear all injected failures
    pub fn clear_failures(&self) {
        self.fail_prefixes.lock().clear();
        *self.fail_delete_call.lock() = None;
    }

    /// Batch sizes passed to `delete_objects` so far
    pub fn delete_batches(&self) -> Vec<usize> {
        self.delete_calls.lock().clone()
    }

    fn check_failure(&self, bucket: &str, path: &str) -> Result<()> {
        let fail_prefixes = self.fail_prefixes.lock();
        if fail_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
            return Err(Error::storage(
                format!("s3://{}/{}", bucket, path),
                anyhow!("injected failure"),
            ));
        }
        Ok(())
    }

    fn keys_under(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let buckets = self.buckets.read();
        let keys = buckets.get(bucket).ok_or_else(|| {
            Error::storage(format!("list s3://{}/{}", bucket, prefix), anyhow!("no such bucket"))
        })?;

        Ok(keys
            .range(prefix.to_string()..)
            .take_while(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

impl ObjectStore for MemoryObjectStore {
    fn list_child_prefixes(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
    ) -> Result<Vec<String>> {
        self.check_failure(bucket, prefix)?;

        let children: BTreeSet<String> = self
            .keys_under(bucket, prefix)?
            .iter()
            .filter_map(|key| {
                let rest = &key[prefix.len()..];
                rest.find(delimiter)
                    .map(|end| format!("{}{}", prefix, &rest[..end + delimiter.len()]))
            })
            .collect();

        Ok(children.into_iter().collect())
    }

    fn list_objects(&self, bucket: &str, prefix: &str, max_keys: usize) -> Result<Vec<String>> {
        self.check_failure(bucket, prefix)?;

        let mut keys = self.keys_under(bucket, prefix)?;
        keys.truncate(max_keys);
        Ok(keys)
    }

    fn paginate_objects<'a>(&'a self, bucket: &'a str, prefix: &'a str) -> ObjectPages<'a> {
        let keys = match self
            .check_failure(bucket, prefix)
            .and_then(|_| self.keys_under(bucket, prefix))
        {
            Ok(keys) => keys,
            Err(e) => return Box::new(std::iter::once(Err::<Vec<String>, Error>(e))),
        };

        let pages: Vec<Vec<String>> = keys
            .chunks(self.page_size)
            .map(|page| page.to_vec())
            .collect();
        Box::new(pages.into_iter().map(Ok))
    }

    fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<()> {
        let call = {
            let mut calls = self.delete_calls.lock();
            calls.push(keys.len());
            calls.len()
        };

        if keys.len() > MAX_DELETE_BATCH {
            return Err(Error::storage(
                format!("delete {} keys from s3://{}", keys.len(), bucket),
                anyhow!("batch exceeds {} keys", MAX_DELETE_BATCH),
            ));
        }
        if *self.fail_delete_call.lock() == Some(call) {
            return Err(Error::storage(
                format!("delete {} keys from s3://{}", keys.len(), bucket),
                anyhow!("injected failure"),
            ));
        }
        for key in keys {
            self.check_failure(bucket, key)?;
        }

        let mut buckets = self.buckets.write();
        let objects = buckets.get_mut(bucket).ok_or_else(|| {
            Error::storage(format!("delete from s3://{}", bucket), anyhow!("no such bucket"))
        })?;
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }
}

/// Metadata of a table kept by [`MemoryTableFormat`]
#[derive(Debug, Clone)]
struct MemoryTable {
    schema: Schema,
    description: Option<String>,
}

/// In-memory table format over a [`MemoryObjectStore`]
#[derive(Debug)]
pub struct MemoryTableFormat {
    store: Arc<MemoryObjectStore>,
    /// Table metadata by location (no trailing `/`)
    tables: RwLock<HashMap<String, MemoryTable>>,
    /// Options passed to the most recent `open`
    last_options: Mutex<Option<StorageOptions>>,
    fail_deletes: Mutex<bool>,
}

impl MemoryTableFormat {
    /// Create a table format writing into `store`
    pub fn new(store: Arc<MemoryObjectStore>) -> Self {
        Self {
            store,
            tables: RwLock::new(HashMap::new()),
            last_options: Mutex::new(None),
            fail_deletes: Mutex::new(false),
        }
    }

    /// Create a table at `location`: writes its first commit to the store and
    /// records its schema and description
    pub fn create_table(
        &self,
        location: &str,
        schema: Schema,
        description: Option<&str>,
    ) -> Result<()> {
        let (parsed, key) = resolve(location)?;
        self.store.put_object(
            parsed.bucket(),
            format!("{}{}/{}", parsed.prefix(), DELTA_LOG_DIR, FIRST_COMMIT),
        );
        self.tables.write().insert(
            key,
            MemoryTable {
                schema,
                description: description.map(str::to_string),
            },
        );
        Ok(())
    }

    /// Make every table delete fail
    pub fn fail_deletes(&self, fail: bool) {
        *self.fail_deletes.lock() = fail;
    }

    /// Options passed to the most recent `open`
    pub fn last_options(&self) -> Option<StorageOptions> {
        self.last_options.lock().clone()
    }

    /// Check if a table's metadata is still live
    pub fn is_live(&self, location: &str) -> bool {
        resolve(location)
            .map(|(_, key)| self.tables.read().contains_key(&key))
            .unwrap_or(false)
    }
}

impl TableFormat for MemoryTableFormat {
    fn open<'a>(
        &'a self,
        location: &str,
        options: &StorageOptions,
    ) -> Result<Box<dyn TableHandle + 'a>> {
        *self.last_options.lock() = Some(options.clone());

        let (parsed, key) = resolve(location)?;
        let log_prefix = format!("{}{}/", parsed.prefix(), DELTA_LOG_DIR);
        if self
            .store
            .list_objects(parsed.bucket(), &log_prefix, 1)?
            .is_empty()
        {
            return Err(Error::NotATable(key));
        }

        let table = self
            .tables
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::table_format(key.clone(), anyhow!("table metadata not found")))?;

        Ok(Box::new(MemoryTableHandle {
            format: self,
            location: key,
            table,
        }))
    }
}

struct MemoryTableHandle<'a> {
    format: &'a MemoryTableFormat,
    location: String,
    table: MemoryTable,
}

impl TableHandle for MemoryTableHandle<'_> {
    fn location(&self) -> &str {
        &self.location
    }

    fn schema(&self) -> Result<Schema> {
        Ok(self.table.schema.clone())
    }

    fn metadata_description(&self) -> Option<&str> {
        self.table.description.as_deref()
    }

    fn delete(&self) -> Result<()> {
        if *self.format.fail_deletes.lock() {
            return Err(Error::table_format(
                self.location.clone(),
                anyhow!("injected failure"),
            ));
        }
        self.format.tables.write().remove(&self.location);
        Ok(())
    }
}

/// Parse a table location into its storage location and registry key
fn resolve(location: &str) -> Result<(StorageLocation, String)> {
    let parsed = StorageLocation::parse(location)?;
    let key = parsed.key_uri(parsed.prefix());
    Ok((parsed, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{DataType, Field};

    fn store_with(keys: &[&str]) -> MemoryObjectStore {
        let store = MemoryObjectStore::new();
        for key in keys {
            store.put_object("lake", *key);
        }
        store
    }

    #[test]
    fn test_list_child_prefixes() {
        let store = store_with(&[
            "wh/orders/_delta_log/0.json",
            "wh/orders/part-0.parquet",
            "wh/users/_delta_log/0.json",
            "wh/readme.txt",
            "other/x",
        ]);

        let children = store.list_child_prefixes("lake", "wh/", "/").unwrap();
        assert_eq!(children, vec!["wh/orders/".to_string(), "wh/users/".to_string()]);

        assert!(store.list_child_prefixes("missing", "", "/").is_err());
    }

    #[test]
    fn test_pagination_and_max_keys() {
        let store = MemoryObjectStore::new().with_page_size(2);
        for i in 0..5 {
            store.put_object("lake", format!("t/part-{}", i));
        }

        let pages: Vec<Vec<String>> = store
            .paginate_objects("lake", "t/")
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(pages.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 2, 1]);

        assert_eq!(store.list_objects("lake", "t/", 1).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_objects_and_failures() {
        let store = store_with(&["t/a", "t/b", "t/c"]);

        store
            .delete_objects("lake", &["t/a".to_string(), "t/b".to_string()])
            .unwrap();
        assert_eq!(store.object_count("lake", "t/"), 1);

        store.fail_delete_call(2);
        assert!(store.delete_objects("lake", &["t/c".to_string()]).is_err());
        assert!(store.contains("lake", "t/c"));
        assert_eq!(store.delete_batches(), vec![2, 1]);

        store.inject_failure("t/");
        assert!(store.list_objects("lake", "t/", 10).is_err());
    }

    #[test]
    fn test_table_format_open_requires_log() {
        let store = Arc::new(MemoryObjectStore::new());
        let format = MemoryTableFormat::new(store.clone());
        let schema = Schema::new(vec![Field::new("id", DataType::Int64, false)]);

        format
            .create_table("s3://lake/wh/orders", schema, Some("id"))
            .unwrap();
        assert!(store.contains("lake", "wh/orders/_delta_log/00000000000000000000.json"));

        let options = StorageOptions::new().region("us-east-1");
        let table = format.open("s3://lake/wh/orders/", &options).unwrap();
        assert_eq!(table.location(), "s3://lake/wh/orders");
        assert_eq!(table.metadata_description(), Some("id"));
        assert_eq!(table.schema().unwrap().fields().len(), 1);
        assert_eq!(format.last_options(), Some(options.clone()));

        assert!(matches!(
            format.open("s3://lake/wh/users", &options),
            Err(Error::NotATable(_))
        ));
    }

    #[test]
    fn test_table_delete_retires_metadata() {
        let store = Arc::new(MemoryObjectStore::new());
        let format = MemoryTableFormat::new(store);
        format
            .create_table("s3://lake/orders", Schema::empty(), None)
            .unwrap();

        let options = StorageOptions::new();
        format.open("s3://lake/orders", &options).unwrap().delete().unwrap();
        assert!(!format.is_live("s3://lake/orders"));
        assert!(format.open("s3://lake/orders", &options).is_err());
    }
}
