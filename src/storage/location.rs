//! Storage locations
//!
//! A location has the form `scheme://bucket/path`. The path is used as an
//! object-key prefix and always ends with a single `/` when non-empty.

use super::DELIMITER;
use crate::error::{Error, Result};
use std::fmt;

/// Parsed root location of a table catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    /// URL scheme (e.g., "s3")
    scheme: String,
    /// Bucket name
    bucket: String,
    /// Normalized key prefix, empty or ending with `/`
    prefix: String,
}

impl StorageLocation {
    /// Parse a location string
    /// Format: scheme://bucket[/path]
    pub fn parse(uri: &str) -> Result<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| Error::InvalidLocation(format!("{}: missing scheme", uri)))?;

        if scheme.is_empty() {
            return Err(Error::InvalidLocation(format!("{}: missing scheme", uri)));
        }

        let (bucket, path) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(Error::InvalidLocation(format!("{}: missing bucket", uri)));
        }

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            bucket: bucket.to_string(),
            prefix: normalize_prefix(path),
        })
    }

    /// Fail unless the location uses `expected` as its scheme
    pub fn require_scheme(&self, expected: &'static str) -> Result<()> {
        if self.scheme != expected {
            return Err(Error::UnsupportedScheme {
                expected,
                found: self.to_string(),
            });
        }
        Ok(())
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Key prefix of the catalog root
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key prefix holding every object of the named table
    pub fn table_prefix(&self, table: &str) -> String {
        format!("{}{}{}", self.prefix, table, DELIMITER)
    }

    /// Location passed to the table format for the named table
    pub fn table_uri(&self, table: &str) -> String {
        self.key_uri(&format!("{}{}", self.prefix, table))
    }

    /// Location of an object key in this bucket, without a trailing `/`
    pub fn key_uri(&self, key: &str) -> String {
        format!(
            "{}://{}/{}",
            self.scheme,
            self.bucket,
            key.trim_end_matches(DELIMITER)
        )
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.prefix)
    }
}

/// Strip leading slashes and end a non-empty prefix with exactly one `/`
pub fn normalize_prefix(path: &str) -> String {
    let trimmed = path.trim_start_matches(DELIMITER).trim_end_matches(DELIMITER);
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}{}", trimmed, DELIMITER)
    }
}

/// Final path segment of a key prefix
pub fn basename(prefix: &str) -> &str {
    let trimmed = prefix.trim_end_matches(DELIMITER);
    trimmed.rsplit(DELIMITER).next().unwrap_or(trimmed)
}
