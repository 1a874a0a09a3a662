//! S3 object store
//!
//! [`S3ObjectStore`] implements [`ObjectStore`] on top of the `object_store`
//! crate's Amazon S3 client. One client is built per bucket from the
//! [`StorageOptions`] given at construction and reused afterwards.

use super::runtime::BlockingRuntime;
use super::{ObjectPages, ObjectStore, DELIMITER, MAX_DELETE_BATCH};
use crate::config::StorageOptions;
use crate::error::{Error, Result};
use anyhow::anyhow;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::ObjectStore as RemoteStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// URL scheme of S3 locations
pub const S3_SCHEME: &str = "s3";

/// Region used when the options name none
pub const DEFAULT_REGION: &str = "us-east-1";

/// Keys per page yielded by [`S3ObjectStore::paginate_objects`]
const LIST_PAGE_SIZE: usize = 1000;

/// Shared handle to an async object-store client
pub type RemoteClient = Arc<dyn RemoteStore>;

type ClientFactory = Box<dyn Fn(&str) -> Result<RemoteClient> + Send + Sync>;

/// Build an S3 client for `bucket`.
///
/// Starts from the `AWS_*` environment, then applies `options` on top, so
/// unset credentials fall back to the environment.
pub fn build_s3_client(bucket: &str, options: &StorageOptions) -> Result<RemoteClient> {
    let mut builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_region(options.get_region().unwrap_or(DEFAULT_REGION));

    if let Some(endpoint) = options.get_endpoint() {
        builder = builder
            .with_endpoint(endpoint)
            .with_virtual_hosted_style_request(false);
    }
    if options.allow_http() {
        builder = builder.with_allow_http(true);
    }
    if let Some(access_key_id) = options.get_access_key_id() {
        builder = builder.with_access_key_id(access_key_id);
    }
    if let Some(secret_access_key) = options.get_secret_access_key() {
        builder = builder.with_secret_access_key(secret_access_key);
    }
    if let Some(token) = options.get_session_token() {
        builder = builder.with_token(token);
    }

    let client = builder
        .build()
        .map_err(|e| Error::storage(format!("build S3 client for bucket '{}'", bucket), e))?;
    Ok(Arc::new(client))
}

/// Convert a `/`-terminated key prefix into a listing prefix. The empty prefix
/// lists the whole bucket.
pub(crate) fn prefix_path(prefix: &str) -> Result<Option<Path>> {
    let trimmed = prefix.trim_end_matches(DELIMITER);
    if trimmed.is_empty() {
        return Ok(None);
    }
    Path::parse(trimmed)
        .map(Some)
        .map_err(|e| Error::storage(format!("invalid key prefix '{}'", prefix), e))
}

pub(crate) fn key_path(key: &str) -> Result<Path> {
    Path::parse(key).map_err(|e| Error::storage(format!("invalid object key '{}'", key), e))
}

/// Object store backed by Amazon S3 or an S3-compatible service
pub struct S3ObjectStore {
    runtime: BlockingRuntime,
    factory: ClientFactory,
    /// Clients by bucket
    clients: Mutex<HashMap<String, RemoteClient>>,
}

impl S3ObjectStore {
    /// Create a store whose clients use `options` for region, endpoint and
    /// credentials
    pub fn new(options: StorageOptions) -> Result<Self> {
        Self::with_client_factory(move |bucket| build_s3_client(bucket, &options))
    }

    /// Create a store that gets its per-bucket clients from `factory`
    pub fn with_client_factory<F>(factory: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<RemoteClient> + Send + Sync + 'static,
    {
        Ok(Self {
            runtime: BlockingRuntime::new()?,
            factory: Box::new(factory),
            clients: Mutex::new(HashMap::new()),
        })
    }

    fn client(&self, bucket: &str) -> Result<RemoteClient> {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(bucket) {
            return Ok(client.clone());
        }
        let client = (self.factory)(bucket)?;
        clients.insert(bucket.to_string(), client.clone());
        Ok(client)
    }

    fn list_keys(&self, bucket: &str, prefix: &str, limit: Option<usize>) -> Result<Vec<String>> {
        let client = self.client(bucket)?;
        let path = prefix_path(prefix)?;
        let context = format!("list s3://{}/{}", bucket, prefix);

        self.runtime.run(async move {
            let listing = client.list(path.as_ref());
            let listing = match limit {
                Some(limit) => listing.take(limit).boxed(),
                None => listing,
            };
            listing
                .map_ok(|meta| meta.location.to_string())
                .try_collect::<Vec<_>>()
                .await
                .map_err(|e| Error::storage(context, e))
        })
    }
}

impl ObjectStore for S3ObjectStore {
    fn list_child_prefixes(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
    ) -> Result<Vec<String>> {
        let context = format!("list s3://{}/{}", bucket, prefix);
        if delimiter != DELIMITER {
            return Err(Error::storage(
                context,
                anyhow!("unsupported delimiter '{}'", delimiter),
            ));
        }

        let client = self.client(bucket)?;
        let path = prefix_path(prefix)?;
        let listing = self.runtime.run(async move {
            client
                .list_with_delimiter(path.as_ref())
                .await
                .map_err(|e| Error::storage(context, e))
        })?;

        Ok(listing
            .common_prefixes
            .into_iter()
            .map(|child| format!("{}{}", child, DELIMITER))
            .collect())
    }

    fn list_objects(&self, bucket: &str, prefix: &str, max_keys: usize) -> Result<Vec<String>> {
        self.list_keys(bucket, prefix, Some(max_keys))
    }

    /// The client pages through the listing internally; keys are regrouped
    /// into pages of 1000 once the listing completes.
    fn paginate_objects<'a>(&'a self, bucket: &'a str, prefix: &'a str) -> ObjectPages<'a> {
        match self.list_keys(bucket, prefix, None) {
            Ok(keys) => {
                let pages: Vec<Vec<String>> =
                    keys.chunks(LIST_PAGE_SIZE).map(<[String]>::to_vec).collect();
                Box::new(pages.into_iter().map(Ok))
            }
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }

    fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<()> {
        if keys.len() > MAX_DELETE_BATCH {
            return Err(Error::storage(
                format!("delete from s3://{}", bucket),
                anyhow!("{} keys exceed the batch limit of {}", keys.len(), MAX_DELETE_BATCH),
            ));
        }
        let paths = keys
            .iter()
            .map(|key| key_path(key))
            .collect::<Result<Vec<_>>>()?;

        let client = self.client(bucket)?;
        let context = format!("delete {} objects from s3://{}", keys.len(), bucket);
        self.runtime.run(async move {
            let locations = stream::iter(paths.into_iter().map(Ok::<_, object_store::Error>))
                .boxed();
            client
                .delete_stream(locations)
                .try_collect::<Vec<Path>>()
                .await
                .map(|_| ())
                .map_err(|e| Error::storage(context, e))
        })
    }
}

impl fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buckets: Vec<String> = self.clients.lock().keys().cloned().collect();
        buckets.sort();
        f.debug_struct("S3ObjectStore")
            .field("buckets", &buckets)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use object_store::PutPayload;

    fn in_memory_store(keys: &[&str]) -> (S3ObjectStore, RemoteClient) {
        let remote: RemoteClient = Arc::new(InMemory::new());
        let factory_remote = remote.clone();
        let store = S3ObjectStore::with_client_factory(move |_| Ok(factory_remote.clone())).unwrap();

        let writer = remote.clone();
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        store
            .runtime
            .run(async move {
                for key in keys {
                    writer
                        .put(&key_path(&key)?, PutPayload::from(b"x".to_vec()))
                        .await
                        .map_err(|e| Error::storage("seed", e))?;
                }
                Ok(())
            })
            .unwrap();
        (store, remote)
    }

    #[test]
    fn test_build_client_from_options() {
        let options = StorageOptions::new()
            .region("eu-west-1")
            .credentials("AKIAEXAMPLE", "secret")
            .with(crate::config::AWS_ENDPOINT_URL, "http://localhost:9000")
            .with(crate::config::AWS_ALLOW_HTTP, "true");
        assert!(build_s3_client("lake", &options).is_ok());
    }

    #[test]
    fn test_prefix_paths() {
        assert!(prefix_path("").unwrap().is_none());
        assert_eq!(
            prefix_path("warehouse/orders/").unwrap().unwrap().as_ref(),
            "warehouse/orders"
        );
        assert!(key_path("warehouse//orders").is_err());
    }

    #[test]
    fn test_child_prefixes_and_log_check() {
        let (store, _) = in_memory_store(&[
            "wh/orders/_delta_log/00000000000000000000.json",
            "wh/orders/part-0.parquet",
            "wh/scratch/notes.txt",
            "wh/readme.md",
        ]);

        let children = store.list_child_prefixes("lake", "wh/", "/").unwrap();
        assert_eq!(children, vec!["wh/orders/".to_string(), "wh/scratch/".to_string()]);

        let marker = store
            .list_objects("lake", "wh/orders/_delta_log/", 1)
            .unwrap();
        assert_eq!(marker.len(), 1);
        assert!(store
            .list_objects("lake", "wh/scratch/_delta_log/", 1)
            .unwrap()
            .is_empty());

        assert!(store.list_child_prefixes("lake", "wh/", "|").is_err());
    }

    #[test]
    fn test_paginate_and_delete() {
        let keys: Vec<String> = (0..1500).map(|i| format!("t/part-{:05}", i)).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let (store, _) = in_memory_store(&refs);

        let pages: Vec<Vec<String>> = store
            .paginate_objects("lake", "t/")
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(pages.iter().map(Vec::len).collect::<Vec<_>>(), vec![1000, 500]);

        store.delete_objects("lake", &pages[0]).unwrap();
        assert_eq!(store.list_objects("lake", "t/", usize::MAX).unwrap().len(), 500);

        let too_many: Vec<String> = (0..1001).map(|i| format!("t/x-{}", i)).collect();
        assert!(store.delete_objects("lake", &too_many).is_err());
    }
}
