//! Logical type tags for deltacat
//!
//! Table schemas are declared as a mapping from column name to a type tag
//! string such as `int32`, `string`, `timestamp[ns]` or `decimal`. This module
//! parses those tags and decides whether an Arrow column type satisfies them.

use arrow::datatypes::{DataType, Field, IntervalUnit, TimeUnit};
use std::fmt;

/// A parsed type tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogicalType {
    Null,
    /// Boolean type
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float16,
    Float32,
    Float64,
    /// Any UTF-8 string layout
    String,
    /// Any binary layout
    Binary,
    /// Date of either width
    Date,
    Date32,
    Date64,
    /// Timestamp; `unit: None` accepts every unit
    Timestamp {
        unit: Option<TimeUnit>,
        tz: Option<String>,
    },
    /// Decimal; `precision_scale: None` accepts every precision and scale
    Decimal { precision_scale: Option<(u8, i8)> },
    Time32(TimeUnit),
    Time64(TimeUnit),
    /// A tag outside the vocabulary, matched by exact rendering only
    Other(String),
}

impl LogicalType {
    /// Parse a type tag. Unrecognized tags become [`LogicalType::Other`].
    pub fn parse(tag: &str) -> Self {
        let normalized = tag.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "null" => return LogicalType::Null,
            "bool" | "boolean" => return LogicalType::Bool,
            "int8" => return LogicalType::Int8,
            "int16" => return LogicalType::Int16,
            "int32" => return LogicalType::Int32,
            "int64" => return LogicalType::Int64,
            "uint8" => return LogicalType::UInt8,
            "uint16" => return LogicalType::UInt16,
            "uint32" => return LogicalType::UInt32,
            "uint64" => return LogicalType::UInt64,
            "halffloat" | "float16" => return LogicalType::Float16,
            "float" | "float32" => return LogicalType::Float32,
            "double" | "float64" => return LogicalType::Float64,
            "string" | "utf8" | "large_string" | "large_utf8" | "string_view" => {
                return LogicalType::String
            }
            "binary" | "large_binary" | "binary_view" => return LogicalType::Binary,
            "date" => return LogicalType::Date,
            "date32" | "date32[day]" => return LogicalType::Date32,
            "date64" | "date64[ms]" => return LogicalType::Date64,
            "timestamp" => {
                return LogicalType::Timestamp {
                    unit: None,
                    tz: None,
                }
            }
            "decimal" => {
                return LogicalType::Decimal {
                    precision_scale: None,
                }
            }
            _ => {}
        }

        // Parameterized tags are matched on the original text so time zone
        // names keep their case.
        let trimmed = tag.trim();
        if let Some(args) = bracketed(trimmed, "timestamp") {
            if let Some(parsed) = parse_timestamp_args(args) {
                return parsed;
            }
        } else if let Some(args) = bracketed(trimmed, "time32") {
            if let Some(unit) = parse_unit(args) {
                return LogicalType::Time32(unit);
            }
        } else if let Some(args) = bracketed(trimmed, "time64") {
            if let Some(unit) = parse_unit(args) {
                return LogicalType::Time64(unit);
            }
        } else if let Some(args) = parenthesized(trimmed, "decimal128")
            .or_else(|| parenthesized(trimmed, "decimal256"))
            .or_else(|| parenthesized(trimmed, "decimal"))
        {
            if let Some(precision_scale) = parse_precision_scale(args) {
                return LogicalType::Decimal {
                    precision_scale: Some(precision_scale),
                };
            }
        }

        LogicalType::Other(trimmed.to_string())
    }

    /// Check whether a column of physical type `data_type` satisfies this tag
    pub fn accepts(&self, data_type: &DataType) -> bool {
        match (self, data_type) {
            (LogicalType::Null, DataType::Null) => true,
            (LogicalType::Bool, DataType::Boolean) => true,
            (LogicalType::Int8, DataType::Int8) => true,
            (LogicalType::Int16, DataType::Int16) => true,
            (LogicalType::Int32, DataType::Int32) => true,
            (LogicalType::Int64, DataType::Int64) => true,
            (LogicalType::UInt8, DataType::UInt8) => true,
            (LogicalType::UInt16, DataType::UInt16) => true,
            (LogicalType::UInt32, DataType::UInt32) => true,
            (LogicalType::UInt64, DataType::UInt64) => true,
            (LogicalType::Float16, DataType::Float16) => true,
            (LogicalType::Float32, DataType::Float32) => true,
            (LogicalType::Float64, DataType::Float64) => true,
            (LogicalType::String, dt) => {
                matches!(dt, DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View)
            }
            (LogicalType::Binary, dt) => matches!(
                dt,
                DataType::Binary | DataType::LargeBinary | DataType::BinaryView
            ),
            (LogicalType::Date, dt) => matches!(dt, DataType::Date32 | DataType::Date64),
            (LogicalType::Date32, DataType::Date32) => true,
            (LogicalType::Date64, DataType::Date64) => true,
            (LogicalType::Timestamp { unit, tz }, DataType::Timestamp(actual_unit, actual_tz)) => {
                let unit_matches = unit.as_ref().map_or(true, |u| u == actual_unit);
                let tz_matches = tz
                    .as_deref()
                    .map_or(true, |tz| actual_tz.as_deref() == Some(tz));
                unit_matches && tz_matches
            }
            (LogicalType::Decimal { precision_scale }, dt) => match dt {
                DataType::Decimal128(p, s) | DataType::Decimal256(p, s) => {
                    precision_scale.map_or(true, |expected| expected == (*p, *s))
                }
                _ => false,
            },
            (LogicalType::Time32(unit), DataType::Time32(actual)) => unit == actual,
            (LogicalType::Time64(unit), DataType::Time64(actual)) => unit == actual,
            (LogicalType::Other(tag), dt) => type_tag(dt) == *tag,
            _ => false,
        }
    }

    /// Check if this tag belongs to the known vocabulary
    pub fn is_known(&self) -> bool {
        !matches!(self, LogicalType::Other(_))
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalType::Null => write!(f, "null"),
            LogicalType::Bool => write!(f, "bool"),
            LogicalType::Int8 => write!(f, "int8"),
            LogicalType::Int16 => write!(f, "int16"),
            LogicalType::Int32 => write!(f, "int32"),
            LogicalType::Int64 => write!(f, "int64"),
            LogicalType::UInt8 => write!(f, "uint8"),
            LogicalType::UInt16 => write!(f, "uint16"),
            LogicalType::UInt32 => write!(f, "uint32"),
            LogicalType::UInt64 => write!(f, "uint64"),
            LogicalType::Float16 => write!(f, "halffloat"),
            LogicalType::Float32 => write!(f, "float"),
            LogicalType::Float64 => write!(f, "double"),
            LogicalType::String => write!(f, "string"),
            LogicalType::Binary => write!(f, "binary"),
            LogicalType::Date => write!(f, "date"),
            LogicalType::Date32 => write!(f, "date32[day]"),
            LogicalType::Date64 => write!(f, "date64[ms]"),
            LogicalType::Timestamp { unit: None, .. } => write!(f, "timestamp"),
            LogicalType::Timestamp {
                unit: Some(unit),
                tz: None,
            } => write!(f, "timestamp[{}]", unit_tag(unit)),
            LogicalType::Timestamp {
                unit: Some(unit),
                tz: Some(tz),
            } => write!(f, "timestamp[{}, tz={}]", unit_tag(unit), tz),
            LogicalType::Decimal {
                precision_scale: None,
            } => write!(f, "decimal"),
            LogicalType::Decimal {
                precision_scale: Some((p, s)),
            } => write!(f, "decimal128({}, {})", p, s),
            LogicalType::Time32(unit) => write!(f, "time32[{}]", unit_tag(unit)),
            LogicalType::Time64(unit) => write!(f, "time64[{}]", unit_tag(unit)),
            LogicalType::Other(tag) => write!(f, "{}", tag),
        }
    }
}

/// Render an Arrow type as the tag stored in a table descriptor
pub fn type_tag(data_type: &DataType) -> String {
    match data_type {
        DataType::Null => "null".to_string(),
        DataType::Boolean => "bool".to_string(),
        DataType::Int8 => "int8".to_string(),
        DataType::Int16 => "int16".to_string(),
        DataType::Int32 => "int32".to_string(),
        DataType::Int64 => "int64".to_string(),
        DataType::UInt8 => "uint8".to_string(),
        DataType::UInt16 => "uint16".to_string(),
        DataType::UInt32 => "uint32".to_string(),
        DataType::UInt64 => "uint64".to_string(),
        DataType::Float16 => "halffloat".to_string(),
        DataType::Float32 => "float".to_string(),
        DataType::Float64 => "double".to_string(),
        DataType::Utf8 => "string".to_string(),
        DataType::LargeUtf8 => "large_string".to_string(),
        DataType::Utf8View => "string_view".to_string(),
        DataType::Binary => "binary".to_string(),
        DataType::LargeBinary => "large_binary".to_string(),
        DataType::BinaryView => "binary_view".to_string(),
        DataType::Date32 => "date32[day]".to_string(),
        DataType::Date64 => "date64[ms]".to_string(),
        DataType::Timestamp(unit, None) => format!("timestamp[{}]", unit_tag(unit)),
        DataType::Timestamp(unit, Some(tz)) => {
            format!("timestamp[{}, tz={}]", unit_tag(unit), tz)
        }
        DataType::Decimal128(p, s) => format!("decimal128({}, {})", p, s),
        DataType::Decimal256(p, s) => format!("decimal256({}, {})", p, s),
        DataType::Time32(unit) => format!("time32[{}]", unit_tag(unit)),
        DataType::Time64(unit) => format!("time64[{}]", unit_tag(unit)),
        DataType::Duration(unit) => format!("duration[{}]", unit_tag(unit)),
        DataType::Interval(IntervalUnit::YearMonth) => "month_interval".to_string(),
        DataType::Interval(IntervalUnit::DayTime) => "day_time_interval".to_string(),
        DataType::Interval(IntervalUnit::MonthDayNano) => "month_day_nano_interval".to_string(),
        DataType::FixedSizeBinary(size) => format!("fixed_size_binary[{}]", size),
        DataType::List(item) => format!("list<{}>", field_tag(item)),
        DataType::LargeList(item) => format!("large_list<{}>", field_tag(item)),
        DataType::FixedSizeList(item, size) => {
            format!("fixed_size_list<{}>[{}]", field_tag(item), size)
        }
        DataType::Struct(fields) => {
            let fields: Vec<String> = fields.iter().map(|f| field_tag(f)).collect();
            format!("struct<{}>", fields.join(", "))
        }
        DataType::Map(entries, _) => match entries.data_type() {
            DataType::Struct(kv) if kv.len() == 2 => format!(
                "map<{}, {}>",
                type_tag(kv[0].data_type()),
                type_tag(kv[1].data_type())
            ),
            other => format!("map<{}>", type_tag(other)),
        },
        DataType::Dictionary(indices, values) => format!(
            "dictionary<values={}, indices={}, ordered=0>",
            type_tag(values),
            type_tag(indices)
        ),
        // Remaining layouts have no stable tag; the rendering follows arrow's
        // Debug output and may change between arrow releases.
        other => format!("{:?}", other),
    }
}

/// `name: tag`, with field names kept verbatim
fn field_tag(field: &Field) -> String {
    format!("{}: {}", field.name(), type_tag(field.data_type()))
}

fn unit_tag(unit: &TimeUnit) -> &'static str {
    match unit {
        TimeUnit::Second => "s",
        TimeUnit::Millisecond => "ms",
        TimeUnit::Microsecond => "us",
        TimeUnit::Nanosecond => "ns",
    }
}

fn parse_unit(s: &str) -> Option<TimeUnit> {
    match s.trim().to_ascii_lowercase().as_str() {
        "s" => Some(TimeUnit::Second),
        "ms" => Some(TimeUnit::Millisecond),
        "us" => Some(TimeUnit::Microsecond),
        "ns" => Some(TimeUnit::Nanosecond),
        _ => None,
    }
}

/// `timestamp[ns]` or `timestamp[us, tz=UTC]`
fn parse_timestamp_args(args: &str) -> Option<LogicalType> {
    let (unit, tz) = match args.split_once(',') {
        Some((unit, rest)) => {
            let rest = rest.trim();
            if !starts_with_ignore_case(rest, "tz=") {
                return None;
            }
            let tz = rest[3..].trim();
            if tz.is_empty() {
                return None;
            }
            (unit, Some(tz.to_string()))
        }
        None => (args, None),
    };
    Some(LogicalType::Timestamp {
        unit: Some(parse_unit(unit)?),
        tz,
    })
}

fn parse_precision_scale(args: &str) -> Option<(u8, i8)> {
    let (p, s) = args.split_once(',')?;
    Some((p.trim().parse().ok()?, s.trim().parse().ok()?))
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.get(..prefix.len())
        .map_or(false, |head| head.eq_ignore_ascii_case(prefix))
}

fn bracketed<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    if !starts_with_ignore_case(tag, name) {
        return None;
    }
    tag[name.len()..].strip_prefix('[')?.strip_suffix(']')
}

fn parenthesized<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    if !starts_with_ignore_case(tag, name) {
        return None;
    }
    tag[name.len()..].strip_prefix('(')?.strip_suffix(')')
}
