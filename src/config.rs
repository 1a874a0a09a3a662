//! Configuration for deltacat
//!
//! [`StorageOptions`] are handed verbatim to the storage collaborators. The
//! S3 backends read the `AWS_*` keys below; the catalog itself only uses them
//! to redact credentials.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Region of the bucket
pub const AWS_REGION: &str = "AWS_REGION";
/// Access key id
pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
/// Secret access key
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
/// Session token for temporary credentials
pub const AWS_SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";
/// Endpoint of an S3-compatible service such as MinIO
pub const AWS_ENDPOINT_URL: &str = "AWS_ENDPOINT_URL";
/// `true` to allow plain HTTP endpoints
pub const AWS_ALLOW_HTTP: &str = "AWS_ALLOW_HTTP";

const REDACTED_KEYS: &[&str] = &[AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_SESSION_TOKEN];

/// Credential and client options for the storage collaborators
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageOptions(BTreeMap<String, String>);

impl StorageOptions {
    /// Create an empty set of options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Set the region
    pub fn region(self, region: impl Into<String>) -> Self {
        self.with(AWS_REGION, region)
    }

    /// Set the access key pair
    pub fn credentials(
        self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.with(AWS_ACCESS_KEY_ID, access_key_id)
            .with(AWS_SECRET_ACCESS_KEY, secret_access_key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn get_region(&self) -> Option<&str> {
        self.get(AWS_REGION)
    }

    pub fn get_access_key_id(&self) -> Option<&str> {
        self.get(AWS_ACCESS_KEY_ID)
    }

    pub fn get_secret_access_key(&self) -> Option<&str> {
        self.get(AWS_SECRET_ACCESS_KEY)
    }

    pub fn get_session_token(&self) -> Option<&str> {
        self.get(AWS_SESSION_TOKEN)
    }

    pub fn get_endpoint(&self) -> Option<&str> {
        self.get(AWS_ENDPOINT_URL)
    }

    /// Whether plain HTTP endpoints are allowed. Defaults to `false`.
    pub fn allow_http(&self) -> bool {
        self.get(AWS_ALLOW_HTTP)
            .map_or(false, |v| v.trim().eq_ignore_ascii_case("true"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for StorageOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.iter().map(|(k, v)| {
                let shown = if REDACTED_KEYS.contains(&k.as_str()) {
                    "<redacted>"
                } else {
                    v.as_str()
                };
                (k, shown)
            }))
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StorageOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Table manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Root location of the catalog, e.g. `s3://bucket/warehouse`
    pub location: String,
    /// Options passed to the storage collaborators
    #[serde(default)]
    pub storage_options: StorageOptions,
}

impl ManagerConfig {
    /// Create a config for the given root location
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            storage_options: StorageOptions::new(),
        }
    }

    /// Set the storage options
    pub fn storage_options(mut self, options: StorageOptions) -> Self {
        self.storage_options = options;
        self
    }

    /// Parse a config from JSON text
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Load a config from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}
