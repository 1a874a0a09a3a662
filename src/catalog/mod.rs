//! Catalog module
//!
//! This module contains the in-memory table catalog, table descriptors, and
//! the type tag vocabulary used to validate datasets.

pub mod catalog;
pub mod schema;
pub mod types;

pub use catalog::Catalog;
pub use schema::{PrimaryKeys, SchemaMismatch, TableDescriptor, TableSchema, UNKNOWN_PRIMARY_KEYS};
pub use types::{type_tag, LogicalType};
