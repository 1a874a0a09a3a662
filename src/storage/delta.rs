//! Delta transaction-log reader
//!
//! [`DeltaLogFormat`] opens a Delta table by reading the JSON commits under
//! its `_delta_log/` directory, newest first, until one carries a `metaData`
//! action. That action holds the table schema and its free-text description.
//!
//! Commits folded into a Parquet checkpoint and then cleaned up are not read;
//! such a table fails to open.

use super::location::StorageLocation;
use super::runtime::BlockingRuntime;
use super::s3::{build_s3_client, key_path, prefix_path, RemoteClient, S3_SCHEME};
use super::{TableFormat, TableHandle, DELIMITER, DELTA_LOG_DIR};
use crate::config::StorageOptions;
use crate::error::{Error, Result};
use anyhow::{anyhow, bail};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use object_store::path::Path;
use object_store::ObjectStore as RemoteStore;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

type ClientFactory = Box<dyn Fn(&str, &StorageOptions) -> Result<RemoteClient> + Send + Sync>;

/// Table format for Delta tables in S3
pub struct DeltaLogFormat {
    runtime: BlockingRuntime,
    factory: ClientFactory,
}

impl DeltaLogFormat {
    /// Create a format that builds an S3 client from the options passed to
    /// each `open`
    pub fn new() -> Result<Self> {
        Self::with_client_factory(build_s3_client)
    }

    /// Create a format that gets its clients from `factory`, called with the
    /// bucket and the options passed to `open`
    pub fn with_client_factory<F>(factory: F) -> Result<Self>
    where
        F: Fn(&str, &StorageOptions) -> Result<RemoteClient> + Send + Sync + 'static,
    {
        Ok(Self {
            runtime: BlockingRuntime::new()?,
            factory: Box::new(factory),
        })
    }
}

impl fmt::Debug for DeltaLogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeltaLogFormat").finish_non_exhaustive()
    }
}

impl TableFormat for DeltaLogFormat {
    fn open<'a>(
        &'a self,
        location: &str,
        options: &StorageOptions,
    ) -> Result<Box<dyn TableHandle + 'a>> {
        let parsed = StorageLocation::parse(location)?;
        parsed.require_scheme(S3_SCHEME)?;
        let table_uri = parsed.key_uri(parsed.prefix());
        let log_prefix = format!("{}{}{}", parsed.prefix(), DELTA_LOG_DIR, DELIMITER);

        let client = (self.factory)(parsed.bucket(), options)?;
        let log_keys = self.runtime.run(list_keys(client.as_ref(), &log_prefix))?;
        if log_keys.is_empty() {
            return Err(Error::NotATable(table_uri));
        }

        let mut commits: Vec<(u64, String)> = log_keys
            .into_iter()
            .filter_map(|key| {
                let file_name = key.strip_prefix(log_prefix.as_str())?;
                commit_version(file_name).map(|version| (version, key.clone()))
            })
            .collect();
        commits.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        let (version, metadata) = self
            .runtime
            .run(read_latest_metadata(client.as_ref(), &commits))?
            .ok_or_else(|| {
                Error::table_format(
                    table_uri.clone(),
                    anyhow!("no metaData action in {} JSON commits", commits.len()),
                )
            })?;
        debug!(location = %table_uri, version, "read table metadata");

        Ok(Box::new(DeltaTableHandle {
            format: self,
            client,
            location: table_uri,
            log_prefix,
            metadata,
        }))
    }
}

struct DeltaTableHandle<'a> {
    format: &'a DeltaLogFormat,
    client: RemoteClient,
    location: String,
    log_prefix: String,
    metadata: Metadata,
}

impl TableHandle for DeltaTableHandle<'_> {
    fn location(&self) -> &str {
        &self.location
    }

    fn schema(&self) -> Result<Schema> {
        parse_schema(&self.metadata.schema_string)
            .map_err(|e| Error::table_format(self.location.clone(), e))
    }

    fn metadata_description(&self) -> Option<&str> {
        self.metadata.description.as_deref()
    }

    /// Remove every object under `_delta_log/`
    fn delete(&self) -> Result<()> {
        let client = self.client.as_ref();
        let location = self.location.clone();
        self.format.runtime.run(async move {
            let keys = list_keys(client, &self.log_prefix).await?;
            let paths = keys
                .iter()
                .map(|key| key_path(key))
                .collect::<Result<Vec<_>>>()?;
            let count = paths.len();

            let locations = stream::iter(paths.into_iter().map(Ok::<_, object_store::Error>))
                .boxed();
            client
                .delete_stream(locations)
                .try_collect::<Vec<Path>>()
                .await
                .map_err(|e| Error::table_format(location.clone(), e))?;
            debug!(location = %location, count, "transaction log removed");
            Ok(())
        })
    }
}

/// One line of a commit file. Actions other than `metaData` are skipped.
#[derive(Deserialize)]
struct Action {
    #[serde(rename = "metaData", default)]
    meta_data: Option<Metadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Metadata {
    #[serde(default)]
    description: Option<String>,
    schema_string: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DeltaType {
    Primitive(String),
    Nested(Box<NestedType>),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum NestedType {
    Struct {
        fields: Vec<DeltaField>,
    },
    #[serde(rename_all = "camelCase")]
    Array {
        element_type: DeltaType,
        contains_null: bool,
    },
    #[serde(rename_all = "camelCase")]
    Map {
        key_type: DeltaType,
        value_type: DeltaType,
        value_contains_null: bool,
    },
}

#[derive(Deserialize)]
struct DeltaField {
    name: String,
    #[serde(rename = "type")]
    data_type: DeltaType,
    nullable: bool,
}

async fn list_keys(client: &dyn RemoteStore, prefix: &str) -> Result<Vec<String>> {
    let path = prefix_path(prefix)?;
    client
        .list(path.as_ref())
        .map_ok(|meta| meta.location.to_string())
        .try_collect::<Vec<String>>()
        .await
        .map_err(|e| Error::storage(format!("list {}", prefix), e))
}

/// Version of a JSON commit file such as `00000000000000000042.json`
fn commit_version(file_name: &str) -> Option<u64> {
    let stem = file_name.strip_suffix(".json")?;
    if stem.len() != 20 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Read commits in the given order and return the first `metaData` found
async fn read_latest_metadata(
    client: &dyn RemoteStore,
    commits: &[(u64, String)],
) -> Result<Option<(u64, Metadata)>> {
    for (version, key) in commits {
        let path = key_path(key)?;
        let context = format!("read {}", key);
        let bytes = client
            .get(&path)
            .await
            .map_err(|e| Error::storage(context.clone(), e))?
            .bytes()
            .await
            .map_err(|e| Error::storage(context, e))?;
        let text = std::str::from_utf8(&bytes)
            .map_err(|e| Error::table_format(key.clone(), e))?;

        if let Some(metadata) =
            find_metadata(text).map_err(|e| Error::table_format(key.clone(), e))?
        {
            return Ok(Some((*version, metadata)));
        }
    }
    Ok(None)
}

/// Find the `metaData` action in the newline-delimited actions of one commit
fn find_metadata(commit: &str) -> anyhow::Result<Option<Metadata>> {
    for line in commit.lines().filter(|line| !line.trim().is_empty()) {
        let action: Action = serde_json::from_str(line)?;
        if action.meta_data.is_some() {
            return Ok(action.meta_data);
        }
    }
    Ok(None)
}

/// Convert a Delta `schemaString` into an Arrow schema
fn parse_schema(schema_string: &str) -> anyhow::Result<Schema> {
    match serde_json::from_str::<NestedType>(schema_string)? {
        NestedType::Struct { fields } => Ok(Schema::new(to_arrow_fields(&fields)?)),
        _ => bail!("table schema must be a struct"),
    }
}

fn to_arrow_fields(fields: &[DeltaField]) -> anyhow::Result<Vec<Field>> {
    fields.iter().map(to_arrow_field).collect()
}

fn to_arrow_field(field: &DeltaField) -> anyhow::Result<Field> {
    Ok(Field::new(
        &field.name,
        to_arrow_type(&field.data_type)?,
        field.nullable,
    ))
}

fn to_arrow_type(data_type: &DeltaType) -> anyhow::Result<DataType> {
    match data_type {
        DeltaType::Primitive(name) => primitive_type(name),
        DeltaType::Nested(nested) => match nested.as_ref() {
            NestedType::Struct { fields } => Ok(DataType::Struct(to_arrow_fields(fields)?.into())),
            NestedType::Array {
                element_type,
                contains_null,
            } => Ok(DataType::List(Arc::new(Field::new(
                "element",
                to_arrow_type(element_type)?,
                *contains_null,
            )))),
            NestedType::Map {
                key_type,
                value_type,
                value_contains_null,
            } => {
                let entries = DataType::Struct(
                    vec![
                        Field::new("key", to_arrow_type(key_type)?, false),
                        Field::new("value", to_arrow_type(value_type)?, *value_contains_null),
                    ]
                    .into(),
                );
                Ok(DataType::Map(
                    Arc::new(Field::new("key_value", entries, false)),
                    false,
                ))
            }
        },
    }
}

fn primitive_type(name: &str) -> anyhow::Result<DataType> {
    let data_type = match name {
        "string" => DataType::Utf8,
        "long" => DataType::Int64,
        "integer" => DataType::Int32,
        "short" => DataType::Int16,
        "byte" => DataType::Int8,
        "float" => DataType::Float32,
        "double" => DataType::Float64,
        "boolean" => DataType::Boolean,
        "binary" => DataType::Binary,
        "date" => DataType::Date32,
        "timestamp" => DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        "timestamp_ntz" => DataType::Timestamp(TimeUnit::Microsecond, None),
        other => {
            let args = other
                .strip_prefix("decimal(")
                .and_then(|rest| rest.strip_suffix(')'))
                .ok_or_else(|| anyhow!("unsupported Delta type '{}'", other))?;
            let (precision, scale) = args
                .split_once(',')
                .ok_or_else(|| anyhow!("malformed decimal type '{}'", other))?;
            DataType::Decimal128(precision.trim().parse()?, scale.trim().parse()?)
        }
    };
    Ok(data_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::type_tag;
    use object_store::memory::InMemory;
    use object_store::PutPayload;

    const ORDERS_SCHEMA: &str = r#"{"type":"struct","fields":[
        {"name":"order_id","type":"long","nullable":false,"metadata":{}},
        {"name":"region","type":"string","nullable":true,"metadata":{}},
        {"name":"amount","type":"decimal(12,2)","nullable":true,"metadata":{}},
        {"name":"placed_at","type":"timestamp","nullable":true,"metadata":{}},
        {"name":"tags","type":{"type":"array","elementType":"string","containsNull":true},"nullable":true,"metadata":{}},
        {"name":"attrs","type":{"type":"map","keyType":"string","valueType":"integer","valueContainsNull":true},"nullable":true,"metadata":{}}
    ]}"#;

    fn metadata_line(description: Option<&str>) -> String {
        let schema_string = serde_json::to_string(
            &serde_json::from_str::<serde_json::Value>(ORDERS_SCHEMA).unwrap(),
        )
        .unwrap();
        serde_json::json!({
            "metaData": {
                "id": "5f6a",
                "name": null,
                "description": description,
                "format": { "provider": "parquet", "options": {} },
                "schemaString": schema_string,
                "partitionColumns": [],
                "configuration": {},
                "createdTime": 1700000000000u64
            }
        })
        .to_string()
    }

    fn seed(format: &DeltaLogFormat, remote: &RemoteClient, objects: Vec<(String, String)>) {
        format
            .runtime
            .run(async {
                for (key, body) in objects {
                    remote
                        .put(
                            &key_path(&key)?,
                            PutPayload::from(body.into_bytes()),
                        )
                        .await
                        .map_err(|e| Error::storage("seed", e))?;
                }
                Ok(())
            })
            .unwrap();
    }

    fn in_memory_format() -> (DeltaLogFormat, RemoteClient) {
        let remote: RemoteClient = Arc::new(InMemory::new());
        let shared = remote.clone();
        let format = DeltaLogFormat::with_client_factory(move |_, _| Ok(shared.clone())).unwrap();
        (format, remote)
    }

    #[test]
    fn test_commit_version() {
        assert_eq!(commit_version("00000000000000000042.json"), Some(42));
        assert_eq!(commit_version("00000000000000000010.checkpoint.parquet"), None);
        assert_eq!(commit_version("_last_checkpoint"), None);
        assert_eq!(commit_version("42.json"), None);
    }

    #[test]
    fn test_find_metadata_skips_other_actions() {
        let commit = format!(
            "{}\n{}\n{}\n",
            r#"{"protocol":{"minReaderVersion":1,"minWriterVersion":2}}"#,
            metadata_line(Some("order_id")),
            r#"{"add":{"path":"part-0.parquet","size":10,"dataChange":true}}"#,
        );
        let metadata = find_metadata(&commit).unwrap().unwrap();
        assert_eq!(metadata.description.as_deref(), Some("order_id"));

        let no_metadata = r#"{"commitInfo":{"operation":"WRITE"}}"#;
        assert!(find_metadata(no_metadata).unwrap().is_none());
        assert!(find_metadata("{not json").is_err());
    }

    #[test]
    fn test_parse_schema_renders_pyarrow_tags() {
        let schema = parse_schema(ORDERS_SCHEMA).unwrap();
        let tags: Vec<String> = schema
            .fields()
            .iter()
            .map(|f| type_tag(f.data_type()))
            .collect();
        assert_eq!(
            tags,
            vec![
                "int64",
                "string",
                "decimal128(12, 2)",
                "timestamp[us, tz=UTC]",
                "list<element: string>",
                "map<string, int32>",
            ]
        );
        assert!(!schema.field(0).is_nullable());

        let unsupported =
            r#"{"type":"struct","fields":[{"name":"v","type":"variant","nullable":true}]}"#;
        assert!(parse_schema(unsupported).is_err());
        let not_a_struct = r#"{"type":"array","elementType":"long","containsNull":true}"#;
        assert!(parse_schema(not_a_struct).is_err());
    }

    #[test]
    fn test_open_reads_newest_metadata_and_delete_removes_log() {
        let (format, remote) = in_memory_format();
        seed(
            &format,
            &remote,
            vec![
                (
                    "wh/orders/_delta_log/00000000000000000000.json".to_string(),
                    metadata_line(Some("region")),
                ),
                (
                    "wh/orders/_delta_log/00000000000000000001.json".to_string(),
                    r#"{"add":{"path":"part-0.parquet","size":10,"dataChange":true}}"#.to_string(),
                ),
                (
                    "wh/orders/_delta_log/00000000000000000002.json".to_string(),
                    metadata_line(Some("order_id")),
                ),
                ("wh/orders/part-0.parquet".to_string(), "data".to_string()),
            ],
        );

        let options = StorageOptions::new();
        let table = format.open("s3://lake/wh/orders", &options).unwrap();
        assert_eq!(table.location(), "s3://lake/wh/orders");
        assert_eq!(table.metadata_description(), Some("order_id"));
        assert_eq!(table.schema().unwrap().fields().len(), 6);

        table.delete().unwrap();
        let remaining = format
            .runtime
            .run(list_keys(remote.as_ref(), "wh/orders/"))
            .unwrap();
        assert_eq!(remaining, vec!["wh/orders/part-0.parquet".to_string()]);

        assert!(matches!(
            format.open("s3://lake/wh/orders", &options),
            Err(Error::NotATable(_))
        ));
    }

    #[test]
    fn test_open_rejects_logs_without_metadata() {
        let (format, remote) = in_memory_format();
        seed(
            &format,
            &remote,
            vec![(
                "wh/events/_delta_log/00000000000000000003.checkpoint.parquet".to_string(),
                "PAR1".to_string(),
            )],
        );

        let err = format
            .open("s3://lake/wh/events", &StorageOptions::new())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::TableFormat { ref location, .. } if location == "s3://lake/wh/events"
        ));
        assert!(matches!(
            format.open("gs://lake/wh/events", &StorageOptions::new()),
            Err(Error::UnsupportedScheme { .. })
        ));
    }
}
