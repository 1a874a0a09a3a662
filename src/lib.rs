//! deltacat - a catalog of Delta tables stored in an object-storage bucket
//!
//! This library provides:
//! - Table descriptors with validated primary keys
//! - Schema validation of Arrow datasets against type tags
//! - An in-memory catalog of table descriptors
//! - Table managers that discover and delete tables in a bucket
//! - Narrow storage traits, with in-memory implementations

pub mod catalog;
pub mod config;
pub mod error;
pub mod manager;
pub mod observability;
pub mod storage;

pub use catalog::{Catalog, PrimaryKeys, TableDescriptor, TableSchema};
pub use config::{ManagerConfig, StorageOptions};
pub use error::{Error, Result, ValidationError};
pub use manager::{DiscoveryReport, S3TableManager, TableManager};
