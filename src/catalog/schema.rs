//! Table descriptors for deltacat
//!
//! A [`TableDescriptor`] names a table, maps each of its columns to a type tag
//! and records the primary key. Descriptors are validated once when built and
//! are immutable afterwards.

use super::types::LogicalType;
use crate::error::ValidationError;
use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Primary key stored when a table's metadata carries no usable key
pub const UNKNOWN_PRIMARY_KEYS: &str = "unknown_primary_keys";

/// Column name to type tag mapping
pub type TableSchema = IndexMap<String, String>;

/// Primary key definition of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PrimaryKeysRepr", into = "PrimaryKeysRepr")]
pub enum PrimaryKeys {
    /// A single key column
    Single(String),
    /// An ordered list of key columns
    Composite(Vec<String>),
    /// The key could not be recovered from table metadata
    Unknown,
}

impl PrimaryKeys {
    /// Key column names in declaration order. Empty for [`PrimaryKeys::Unknown`].
    pub fn columns(&self) -> Vec<&str> {
        match self {
            PrimaryKeys::Single(column) => vec![column.as_str()],
            PrimaryKeys::Composite(columns) => columns.iter().map(String::as_str).collect(),
            PrimaryKeys::Unknown => Vec::new(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, PrimaryKeys::Unknown)
    }

    /// Parse the primary key out of a table's metadata description.
    ///
    /// Accepts a JSON array of column names or a comma-separated list of
    /// identifiers made of ASCII letters, digits and underscores. Returns
    /// `None` for anything else, including an empty description.
    pub fn parse_description(description: &str) -> Option<Self> {
        let description = description.trim();
        if description.is_empty() {
            return None;
        }
        if description == UNKNOWN_PRIMARY_KEYS {
            return Some(PrimaryKeys::Unknown);
        }

        let columns: Vec<String> = if description.starts_with('[') {
            serde_json::from_str(description).ok()?
        } else {
            description
                .split(',')
                .map(|column| column.trim().to_string())
                .collect()
        };

        if columns.is_empty() || !columns.iter().all(|c| is_identifier(c)) {
            return None;
        }

        let mut columns = columns;
        if columns.len() == 1 {
            columns.pop().map(PrimaryKeys::Single)
        } else {
            Some(PrimaryKeys::Composite(columns))
        }
    }

    /// Serialize the key into the form read by [`PrimaryKeys::parse_description`]
    pub fn to_description(&self) -> String {
        match self {
            PrimaryKeys::Single(column) => column.clone(),
            PrimaryKeys::Composite(columns) => columns.join(","),
            PrimaryKeys::Unknown => UNKNOWN_PRIMARY_KEYS.to_string(),
        }
    }
}

impl fmt::Display for PrimaryKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryKeys::Single(column) => write!(f, "{}", column),
            PrimaryKeys::Composite(columns) => write!(f, "({})", columns.join(", ")),
            PrimaryKeys::Unknown => write!(f, "{}", UNKNOWN_PRIMARY_KEYS),
        }
    }
}

impl From<&str> for PrimaryKeys {
    fn from(column: &str) -> Self {
        PrimaryKeys::Single(column.to_string())
    }
}

impl From<String> for PrimaryKeys {
    fn from(column: String) -> Self {
        PrimaryKeys::Single(column)
    }
}

impl From<Vec<String>> for PrimaryKeys {
    fn from(columns: Vec<String>) -> Self {
        PrimaryKeys::Composite(columns)
    }
}

impl From<Vec<&str>> for PrimaryKeys {
    fn from(columns: Vec<&str>) -> Self {
        PrimaryKeys::Composite(columns.into_iter().map(str::to_string).collect())
    }
}

/// Wire form of [`PrimaryKeys`]: a string or a list of strings.
///
/// An explicit definition never yields [`PrimaryKeys::Unknown`]; the sentinel
/// string is read back as an ordinary column name and must exist in the schema.
#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum PrimaryKeysRepr {
    One(String),
    Many(Vec<String>),
}

impl From<PrimaryKeysRepr> for PrimaryKeys {
    fn from(repr: PrimaryKeysRepr) -> Self {
        match repr {
            PrimaryKeysRepr::One(column) => PrimaryKeys::Single(column),
            PrimaryKeysRepr::Many(columns) => PrimaryKeys::Composite(columns),
        }
    }
}

impl From<PrimaryKeys> for PrimaryKeysRepr {
    fn from(keys: PrimaryKeys) -> Self {
        match keys {
            PrimaryKeys::Single(column) => PrimaryKeysRepr::One(column),
            PrimaryKeys::Composite(columns) => PrimaryKeysRepr::Many(columns),
            PrimaryKeys::Unknown => PrimaryKeysRepr::One(UNKNOWN_PRIMARY_KEYS.to_string()),
        }
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Why a declared column failed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaMismatch {
    /// The dataset has no column with this name
    MissingColumn(String),
    /// The dataset column's type does not satisfy the declared tag
    IncompatibleType {
        column: String,
        expected: String,
        actual: String,
    },
}

impl fmt::Display for SchemaMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaMismatch::MissingColumn(column) => write!(f, "column '{}' is missing", column),
            SchemaMismatch::IncompatibleType {
                column,
                expected,
                actual,
            } => write!(
                f,
                "column '{}' has type {}, expected {}",
                column, actual, expected
            ),
        }
    }
}

/// Validated, immutable description of a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct TableDescriptor {
    name: String,
    table_schema: TableSchema,
    primary_keys: PrimaryKeys,
}

impl TableDescriptor {
    /// Build a descriptor, checking that every primary key column is declared
    pub fn new(
        name: impl Into<String>,
        table_schema: TableSchema,
        primary_keys: impl Into<PrimaryKeys>,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        let primary_keys = primary_keys.into();

        if name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if let PrimaryKeys::Composite(columns) = &primary_keys {
            if columns.is_empty() {
                return Err(ValidationError::EmptyPrimaryKeys);
            }
        }
        if let Some(missing) = primary_keys
            .columns()
            .into_iter()
            .find(|column| !table_schema.contains_key(*column))
        {
            return Err(ValidationError::PrimaryKeyNotFound(missing.to_string()));
        }

        Ok(Self {
            name,
            table_schema,
            primary_keys,
        })
    }

    /// Build a descriptor from untyped JSON such as a table definition file
    pub fn from_json(value: &Value) -> Result<Self, ValidationError> {
        let object = value.as_object().ok_or(ValidationError::InvalidField {
            field: "descriptor",
            expected: "an object",
        })?;

        let name = match object.get("name") {
            None | Some(Value::Null) => return Err(ValidationError::MissingField("name")),
            Some(Value::String(name)) => name.clone(),
            Some(_) => {
                return Err(ValidationError::InvalidField {
                    field: "name",
                    expected: "a string",
                })
            }
        };

        let schema_error = ValidationError::InvalidField {
            field: "table_schema",
            expected: "a mapping of column names to type tags",
        };
        let table_schema = match object.get("table_schema") {
            None | Some(Value::Null) => return Err(ValidationError::MissingField("table_schema")),
            Some(Value::Object(columns)) => {
                let mut table_schema = TableSchema::with_capacity(columns.len());
                for (column, tag) in columns {
                    let tag = tag.as_str().ok_or_else(|| schema_error.clone())?;
                    table_schema.insert(column.clone(), tag.to_string());
                }
                table_schema
            }
            Some(_) => return Err(schema_error),
        };

        let primary_keys = match object.get("primary_keys") {
            None | Some(Value::Null) => return Err(ValidationError::MissingField("primary_keys")),
            Some(keys) => serde_json::from_value::<PrimaryKeys>(keys.clone()).map_err(|_| {
                ValidationError::InvalidField {
                    field: "primary_keys",
                    expected: "a column name or a list of column names",
                }
            })?,
        };

        Self::new(name, table_schema, primary_keys)
    }

    /// Get the table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the column to type tag mapping
    pub fn table_schema(&self) -> &TableSchema {
        &self.table_schema
    }

    /// Get the primary key definition
    pub fn primary_keys(&self) -> &PrimaryKeys {
        &self.primary_keys
    }

    /// Get the declared type tag of a column
    pub fn column_type(&self, column: &str) -> Option<&str> {
        self.table_schema.get(column).map(String::as_str)
    }

    /// Check that `schema` has every declared column with a compatible type.
    /// Columns that are not declared are ignored.
    pub fn validate_schema(&self, schema: &Schema) -> bool {
        let all_present = self
            .table_schema
            .keys()
            .all(|column| schema.field_with_name(column).is_ok());
        if !all_present {
            return false;
        }

        self.table_schema.iter().all(|(column, tag)| {
            schema
                .field_with_name(column)
                .map(|field| LogicalType::parse(tag).accepts(field.data_type()))
                .unwrap_or(false)
        })
    }

    /// Validate the schema of a record batch
    pub fn validate_batch(&self, batch: &RecordBatch) -> bool {
        self.validate_schema(batch.schema().as_ref())
    }

    /// List every declared column that `schema` is missing or mistyped
    pub fn mismatches(&self, schema: &Schema) -> Vec<SchemaMismatch> {
        self.table_schema
            .iter()
            .filter_map(|(column, tag)| match schema.field_with_name(column) {
                Err(_) => Some(SchemaMismatch::MissingColumn(column.clone())),
                Ok(field) if !LogicalType::parse(tag).accepts(field.data_type()) => {
                    Some(SchemaMismatch::IncompatibleType {
                        column: column.clone(),
                        expected: tag.clone(),
                        actual: super::types::type_tag(field.data_type()),
                    })
                }
                Ok(_) => None,
            })
            .collect()
    }
}

impl TryFrom<Value> for TableDescriptor {
    type Error = ValidationError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_json(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Float64Array, Int32Array, StringArray};
    use arrow::datatypes::{DataType, Field, TimeUnit};
    use serde_json::json;
    use std::sync::Arc;

    fn simple_schema() -> TableSchema {
        TableSchema::from([
            ("id".to_string(), "int32".to_string()),
            ("name".to_string(), "string".to_string()),
        ])
    }

    fn simple_table() -> TableDescriptor {
        TableDescriptor::new("test_table", simple_schema(), "id").unwrap()
    }

    fn arrow_schema(fields: Vec<(&str, DataType)>) -> Schema {
        Schema::new(
            fields
                .into_iter()
                .map(|(name, dt)| Field::new(name, dt, true))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn test_valid_initialization() {
        let table = simple_table();
        assert_eq!(table.name(), "test_table");
        assert_eq!(table.table_schema(), &simple_schema());
        assert_eq!(table.primary_keys(), &PrimaryKeys::Single("id".to_string()));
    }

    #[test]
    fn test_invalid_primary_keys() {
        let schema = TableSchema::from([("name".to_string(), "string".to_string())]);
        let err = TableDescriptor::new("test_table", schema, "id").unwrap_err();
        assert_eq!(err, ValidationError::PrimaryKeyNotFound("id".to_string()));
        assert_eq!(err.to_string(), "primary key column 'id' not found in schema");
    }

    #[test]
    fn test_composite_key_reports_first_missing_column() {
        let err = TableDescriptor::new("t", simple_schema(), vec!["id", "region", "day"])
            .unwrap_err();
        assert_eq!(err, ValidationError::PrimaryKeyNotFound("region".to_string()));

        let table = TableDescriptor::new("t", simple_schema(), vec!["id", "name"]).unwrap();
        assert_eq!(table.primary_keys().columns(), vec!["id", "name"]);
    }

    #[test]
    fn test_empty_name_and_keys() {
        assert_eq!(
            TableDescriptor::new("", simple_schema(), "id").unwrap_err(),
            ValidationError::EmptyName
        );
        assert_eq!(
            TableDescriptor::new("t", simple_schema(), Vec::<String>::new()).unwrap_err(),
            ValidationError::EmptyPrimaryKeys
        );
    }

    #[test]
    fn test_unknown_primary_keys_skip_reference_check() {
        let table = TableDescriptor::new("t", simple_schema(), PrimaryKeys::Unknown).unwrap();
        assert!(table.primary_keys().is_unknown());
    }

    #[test]
    fn test_missing_required_fields() {
        let err = TableDescriptor::from_json(&json!({ "name": "test_table" })).unwrap_err();
        assert_eq!(err, ValidationError::MissingField("table_schema"));

        let err = TableDescriptor::from_json(&json!({ "table_schema": {} })).unwrap_err();
        assert_eq!(err, ValidationError::MissingField("name"));
    }

    #[test]
    fn test_invalid_field_types() {
        let err = TableDescriptor::from_json(&json!({
            "name": 123,
            "table_schema": { "id": "int32" },
            "primary_keys": "id",
        }))
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { field: "name", .. }));

        let err = TableDescriptor::from_json(&json!({
            "name": "test_table",
            "table_schema": "not_a_dict",
            "primary_keys": "id",
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidField {
                field: "table_schema",
                ..
            }
        ));

        let err = TableDescriptor::from_json(&json!({
            "name": "test_table",
            "table_schema": { "id": 5 },
            "primary_keys": "id",
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidField {
                field: "table_schema",
                ..
            }
        ));
    }

    #[test]
    fn test_deserialize_validates() {
        let table: TableDescriptor = serde_json::from_value(json!({
            "name": "orders",
            "table_schema": { "order_id": "int64", "region": "string" },
            "primary_keys": ["order_id", "region"],
        }))
        .unwrap();
        assert_eq!(table.primary_keys().columns(), vec!["order_id", "region"]);

        let result: Result<TableDescriptor, _> = serde_json::from_value(json!({
            "name": "orders",
            "table_schema": { "region": "string" },
            "primary_keys": "order_id",
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_explicit_definition_cannot_use_unknown_key() {
        let err = TableDescriptor::from_json(&json!({
            "name": "orders",
            "table_schema": { "order_id": "int64" },
            "primary_keys": UNKNOWN_PRIMARY_KEYS,
        }))
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::PrimaryKeyNotFound(UNKNOWN_PRIMARY_KEYS.to_string())
        );

        let direct = TableDescriptor::new(
            "orders",
            TableSchema::from([("order_id".to_string(), "int64".to_string())]),
            UNKNOWN_PRIMARY_KEYS,
        );
        assert_eq!(direct.unwrap_err(), err);
    }

    #[test]
    fn test_validate_schema_valid() {
        let batch = RecordBatch::try_from_iter(vec![
            ("id", Arc::new(Int32Array::from(vec![1, 2, 3])) as ArrayRef),
            ("name", Arc::new(StringArray::from(vec!["a", "b", "c"])) as ArrayRef),
        ])
        .unwrap();
        assert!(simple_table().validate_batch(&batch));
    }

    #[test]
    fn test_validate_schema_missing_column() {
        let batch = RecordBatch::try_from_iter(vec![(
            "id",
            Arc::new(Int32Array::from(vec![1, 2, 3])) as ArrayRef,
        )])
        .unwrap();
        let table = simple_table();
        assert!(!table.validate_batch(&batch));
        assert_eq!(
            table.mismatches(batch.schema().as_ref()),
            vec![SchemaMismatch::MissingColumn("name".to_string())]
        );
    }

    #[test]
    fn test_validate_schema_wrong_type() {
        let batch = RecordBatch::try_from_iter(vec![
            ("id", Arc::new(Int32Array::from(vec![1, 2, 3])) as ArrayRef),
            ("name", Arc::new(Float64Array::from(vec![1.0, 2.0, 3.0])) as ArrayRef),
        ])
        .unwrap();
        assert!(!simple_table().validate_batch(&batch));
    }

    #[test]
    fn test_validate_schema_ignores_extra_columns() {
        let schema = arrow_schema(vec![
            ("id", DataType::Int32),
            ("name", DataType::LargeUtf8),
            ("comment", DataType::Utf8),
        ]);
        assert!(simple_table().validate_schema(&schema));
    }

    #[test]
    fn test_validate_schema_timestamp() {
        let table = TableDescriptor::new(
            "test_table",
            TableSchema::from([
                ("id".to_string(), "int32".to_string()),
                ("timestamp".to_string(), "timestamp[ns]".to_string()),
            ]),
            "id",
        )
        .unwrap();

        let ns = arrow_schema(vec![
            ("id", DataType::Int32),
            ("timestamp", DataType::Timestamp(TimeUnit::Nanosecond, None)),
        ]);
        let us = arrow_schema(vec![
            ("id", DataType::Int32),
            ("timestamp", DataType::Timestamp(TimeUnit::Microsecond, None)),
        ]);
        assert!(table.validate_schema(&ns));
        assert!(!table.validate_schema(&us));
    }

    #[test]
    fn test_validate_schema_decimal() {
        let table = TableDescriptor::new(
            "test_table",
            TableSchema::from([
                ("id".to_string(), "int32".to_string()),
                ("amount".to_string(), "decimal".to_string()),
            ]),
            "id",
        )
        .unwrap();

        for dt in [DataType::Decimal128(10, 2), DataType::Decimal128(38, 9)] {
            let schema = arrow_schema(vec![("id", DataType::Int32), ("amount", dt)]);
            assert!(table.validate_schema(&schema));
        }
        let schema = arrow_schema(vec![("id", DataType::Int32), ("amount", DataType::Float64)]);
        assert!(!table.validate_schema(&schema));
    }

    #[test]
    fn test_parse_description() {
        assert_eq!(
            PrimaryKeys::parse_description("id"),
            Some(PrimaryKeys::Single("id".to_string()))
        );
        assert_eq!(
            PrimaryKeys::parse_description(" order_id , region "),
            Some(PrimaryKeys::Composite(vec![
                "order_id".to_string(),
                "region".to_string()
            ]))
        );
        assert_eq!(
            PrimaryKeys::parse_description(r#"["a", "b"]"#),
            Some(PrimaryKeys::Composite(vec!["a".to_string(), "b".to_string()]))
        );
        assert_eq!(
            PrimaryKeys::parse_description(UNKNOWN_PRIMARY_KEYS),
            Some(PrimaryKeys::Unknown)
        );
        assert_eq!(PrimaryKeys::parse_description(""), None);
        assert_eq!(PrimaryKeys::parse_description("a,,b"), None);
        assert_eq!(PrimaryKeys::parse_description("[not json"), None);
        assert_eq!(PrimaryKeys::parse_description("Customer orders table"), None);
    }

    #[test]
    fn test_description_written_back_parses() {
        let keys = PrimaryKeys::from(vec!["tenant", "id"]);
        assert_eq!(
            PrimaryKeys::parse_description(&keys.to_description()),
            Some(keys)
        );
    }
}
