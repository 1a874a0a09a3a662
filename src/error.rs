//! Error types for deltacat
//!
//! This module defines all error types used throughout the catalog layer.

use thiserror::Error;

/// Reasons a table descriptor can be rejected at construction time
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    #[error("table name must not be empty")]
    EmptyName,

    #[error("primary key list must not be empty")]
    EmptyPrimaryKeys,

    #[error("primary key column '{0}' not found in schema")]
    PrimaryKeyNotFound(String),
}

/// The main error type for deltacat
#[derive(Error, Debug)]
pub enum Error {
    // ========== Configuration Errors ==========
    #[error("Configuration error: expected a '{expected}://' location, got '{found}'")]
    UnsupportedScheme {
        expected: &'static str,
        found: String,
    },

    #[error("Configuration error: invalid location '{0}'")]
    InvalidLocation(String),

    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    // ========== Validation Errors ==========
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    // ========== Catalog Errors ==========
    #[error("Catalog error: table '{0}' not found")]
    TableNotFound(String),

    #[error("Catalog error: table '{0}' already exists")]
    TableAlreadyExists(String),

    #[error("Catalog error: invalid table name '{0}'")]
    InvalidTableName(String),

    // ========== Collaborator Errors ==========
    #[error("Storage error: {context}")]
    Storage {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Table format error at '{location}'")]
    TableFormat {
        location: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Table format error: no transaction log at '{0}'")]
    NotATable(String),

    // ========== I/O Errors ==========
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Wrap an object-storage failure with a description of the call
    pub fn storage(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Error::Storage {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Wrap a table-format failure for the table at `location`
    pub fn table_format(location: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Error::TableFormat {
            location: location.into(),
            source: source.into(),
        }
    }

    /// Render the error followed by each of its sources, `: `-separated
    pub fn display_chain(&self) -> String {
        let mut rendered = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            // Variants built with #[from] already print their source
            let cause_text = cause.to_string();
            if !rendered.ends_with(&cause_text) {
                rendered.push_str(": ");
                rendered.push_str(&cause_text);
            }
            source = std::error::Error::source(cause);
        }
        rendered
    }
}

/// Result type alias for deltacat operations
pub type Result<T> = std::result::Result<T, Error>;
