//! Value Type System
//!
//! Typed cell values, column descriptors, rows, and result sets.
//!
//! ## Two serialized views
//!
//! - The **tagged** view (`Value`'s derived serde impl) keeps the variant
//!   name next to every value: `{"Int": 7}`, `{"Date": "2024-01-31"}`.
//!   The result cache persists this form, so every column type round-trips
//!   exactly, including 64-bit integers, decimals, blobs, and temporals.
//!   JSON has no literal for non-finite floats, so `NaN` and the infinities
//!   are written as the strings `"NaN"`, `"Infinity"` and `"-Infinity"`.
//! - The **plain JSON** view (`Value::to_json`, and how `Row` serializes)
//!   is what a UI consumes: numbers, strings, arrays, objects. Integers
//!   beyond ±2^53 become strings and bytes become lowercase hex, so the
//!   view stays safe for JavaScript number semantics.

pub mod arrow_convert;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::fmt::Write as _;

pub use arrow_convert::{record_batches_to_result, ArrowConvertError};

/// Tagged encoding of `Value::Float`: finite values stay JSON numbers,
/// non-finite ones become strings so they survive a round trip.
mod float_repr {
    use serde::de::{self, Deserializer, Visitor};
    use serde::Serializer;
    use std::fmt;

    pub fn serialize<S: Serializer>(v: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if v.is_nan() {
            serializer.serialize_str("NaN")
        } else if v.is_infinite() && v.is_sign_positive() {
            serializer.serialize_str("Infinity")
        } else if v.is_infinite() {
            serializer.serialize_str("-Infinity")
        } else {
            serializer.serialize_f64(*v)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        deserializer.deserialize_any(FloatVisitor)
    }

    struct FloatVisitor;

    impl Visitor<'_> for FloatVisitor {
        type Value = f64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a number or one of \"NaN\", \"Infinity\", \"-Infinity\"")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
            match v {
                "NaN" => Ok(f64::NAN),
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
            }
        }
    }
}

/// Largest integer a double-precision float represents exactly
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// A single cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    /// Signed integers up to 64 bits
    Int(i64),
    /// Unsigned integers up to 64 bits
    UInt(u64),
    Float(#[serde(with = "float_repr")] f64),
    /// Decimal and 128-bit integers, kept as exact text
    Decimal(String),
    String(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Interval { months: i32, days: i32, nanos: i64 },
    List(Vec<Value>),
    /// Named fields in declaration order
    Struct(Vec<(String, Value)>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Plain JSON view for display and export
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(v) => {
                if (-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(v) {
                    Json::from(*v)
                } else {
                    Json::String(v.to_string())
                }
            }
            Value::UInt(v) => {
                if *v <= MAX_SAFE_INTEGER as u64 {
                    Json::from(*v)
                } else {
                    Json::String(v.to_string())
                }
            }
            Value::Float(v) => serde_json::Number::from_f64(*v).map_or(Json::Null, Json::Number),
            Value::Decimal(s) | Value::String(s) => Json::String(s.clone()),
            Value::Bytes(b) => Json::String(hex(b)),
            Value::Date(d) => Json::String(d.to_string()),
            Value::Time(t) => Json::String(t.to_string()),
            Value::Timestamp(ts) => Json::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Value::TimestampTz(ts) => Json::String(ts.to_rfc3339()),
            Value::Interval {
                months,
                days,
                nanos,
            } => serde_json::json!({ "months": months, "days": days, "nanos": nanos }),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Struct(fields) => Json::Object(
                fields
                    .iter()
                    .map(|(name, v)| (name.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Decimal(s) | Value::String(s) => write!(f, "{s}"),
            Value::Bytes(b) => write!(f, "\\x{}", hex(b)),
            Value::Date(d) => write!(f, "{d}"),
            Value::Time(t) => write!(f, "{t}"),
            Value::Timestamp(ts) => write!(f, "{ts}"),
            Value::TimestampTz(ts) => write!(f, "{ts}"),
            Value::Interval {
                months,
                days,
                nanos,
            } => write!(f, "{months} months {days} days {nanos} ns"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Struct(fields) => {
                write!(f, "{{")?;
                for (i, (name, item)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{name}': {item}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Logical column type reported in result schemas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Boolean,
    /// 8, 16 and 32-bit integers (signed or unsigned)
    Integer,
    /// 64-bit integers (signed or unsigned)
    BigInt,
    /// 128-bit integer. A declared `DECIMAL(38, 0)` column also reports
    /// as this type, since the two share one Arrow representation.
    HugeInt,
    Float,
    Decimal,
    String,
    Binary,
    Date,
    Time,
    Timestamp,
    Interval,
    List,
    Struct,
    Map,
    Null,
    Other,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Boolean => "boolean",
            ColumnType::Integer => "integer",
            ColumnType::BigInt => "bigint",
            ColumnType::HugeInt => "hugeint",
            ColumnType::Float => "float",
            ColumnType::Decimal => "decimal",
            ColumnType::String => "string",
            ColumnType::Binary => "binary",
            ColumnType::Date => "date",
            ColumnType::Time => "time",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Interval => "interval",
            ColumnType::List => "list",
            ColumnType::Struct => "struct",
            ColumnType::Map => "map",
            ColumnType::Null => "null",
            ColumnType::Other => "other",
        };
        f.write_str(name)
    }
}

/// Column descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable,
        }
    }
}

/// One result row: column name → value, in schema order.
///
/// Lookups by name return the first matching column when a query
/// projects the same name twice.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new(fields: Vec<(String, Value)>) -> Self {
        Self { fields }
    }

    /// Pair values with schema column names
    pub fn from_values(schema: &[ColumnSchema], values: Vec<Value>) -> Self {
        Row {
            fields: schema
                .iter()
                .map(|c| c.name.clone())
                .zip(values)
                .collect(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v)
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.fields.get(index).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.iter().map(|(_, v)| v)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.fields.into_iter().map(|(_, v)| v).collect()
    }

    /// Plain JSON object for this row
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(name, v)| (name.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, &value.to_json())?;
        }
        map.end()
    }
}

/// Normalized result of a query: row objects plus schema
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub schema: Vec<ColumnSchema>,
    pub count: usize,
}

impl QueryResult {
    /// Build from positional row values aligned with `schema`
    pub fn new(schema: Vec<ColumnSchema>, rows: Vec<Vec<Value>>) -> Self {
        let rows: Vec<Row> = rows
            .into_iter()
            .map(|values| Row::from_values(&schema, values))
            .collect();
        let count = rows.len();
        QueryResult {
            rows,
            schema,
            count,
        }
    }

    pub fn empty() -> Self {
        QueryResult::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.schema.iter().map(|c| c.name.as_str()).collect()
    }

    /// Positional values, the shape the cache persists
    pub fn row_values(&self) -> Vec<Vec<Value>> {
        self.rows
            .iter()
            .map(|row| row.values().cloned().collect())
            .collect()
    }

    pub fn to_json_rows(&self) -> Vec<serde_json::Value> {
        self.rows.iter().map(Row::to_json).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> QueryResult {
        QueryResult::new(
            vec![
                ColumnSchema::new("a", ColumnType::Integer, true),
                ColumnSchema::new("b", ColumnType::String, true),
            ],
            vec![
                vec![Value::Int(1), Value::string("hello")],
                vec![Value::Int(2), Value::Null],
            ],
        )
    }

    #[test]
    fn test_row_lookup() {
        let result = sample();
        assert_eq!(result.count, 2);
        assert_eq!(result.rows[0].get("a"), Some(&Value::Int(1)));
        assert_eq!(result.rows[0].get("b"), Some(&Value::string("hello")));
        assert_eq!(result.rows[1].get("b"), Some(&Value::Null));
        assert_eq!(result.rows[0].get("missing"), None);
        assert_eq!(result.rows[0].get_index(1), Some(&Value::string("hello")));
    }

    #[test]
    fn test_duplicate_column_names_keep_first() {
        let schema = vec![
            ColumnSchema::new("x", ColumnType::Integer, true),
            ColumnSchema::new("x", ColumnType::Integer, true),
        ];
        let row = Row::from_values(&schema, vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(row.len(), 2);
        assert_eq!(row.get("x"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_row_serializes_as_object() {
        let result = sample();
        let json = serde_json::to_value(&result.rows[0]).unwrap();
        assert_eq!(json, json!({"a": 1, "b": "hello"}));
        assert_eq!(result.to_json_rows()[1], json!({"a": 2, "b": null}));
    }

    #[test]
    fn test_schema_serializes_type_lowercase() {
        let json = serde_json::to_value(&sample().schema).unwrap();
        assert_eq!(
            json,
            json!([
                {"name": "a", "type": "integer", "nullable": true},
                {"name": "b", "type": "string", "nullable": true}
            ])
        );
        assert_eq!(
            serde_json::to_string(&ColumnType::BigInt).unwrap(),
            "\"bigint\""
        );
    }

    #[test]
    fn test_json_view_large_integers_become_strings() {
        assert_eq!(Value::Int(42).to_json(), json!(42));
        assert_eq!(Value::Int(MAX_SAFE_INTEGER).to_json(), json!(MAX_SAFE_INTEGER));
        assert_eq!(
            Value::Int(i64::MAX).to_json(),
            json!("9223372036854775807")
        );
        assert_eq!(Value::UInt(u64::MAX).to_json(), json!("18446744073709551615"));
    }

    #[test]
    fn test_json_view_misc() {
        assert_eq!(Value::Bytes(vec![0xde, 0xad]).to_json(), json!("dead"));
        assert_eq!(Value::Float(f64::NAN).to_json(), serde_json::Value::Null);
        let date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(Value::Date(date).to_json(), json!("2024-01-31"));
        let s = Value::Struct(vec![("k".into(), Value::List(vec![Value::Int(1)]))]);
        assert_eq!(s.to_json(), json!({"k": [1]}));
    }

    #[test]
    fn test_tagged_serde_roundtrip_is_exact() {
        let values = vec![
            Value::Int(i64::MIN),
            Value::UInt(u64::MAX),
            Value::Decimal("12345678901234567890.123".into()),
            Value::Bytes(vec![0, 255, 7]),
            Value::Timestamp(
                NaiveDate::from_ymd_opt(2020, 2, 29)
                    .unwrap()
                    .and_hms_micro_opt(12, 30, 0, 123_456)
                    .unwrap(),
            ),
            Value::Interval {
                months: 1,
                days: 2,
                nanos: 3_000,
            },
        ];
        let json = serde_json::to_string(&values).unwrap();
        let back: Vec<Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn test_tagged_serde_non_finite_floats() {
        let values = vec![
            Value::Float(f64::INFINITY),
            Value::Float(f64::NEG_INFINITY),
            Value::Float(-0.5),
            Value::Float(3.0),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(
            json,
            r#"[{"Float":"Infinity"},{"Float":"-Infinity"},{"Float":-0.5},{"Float":3.0}]"#
        );
        let back: Vec<Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);

        // NaN never equals itself, so check it by shape
        let json = serde_json::to_string(&Value::Float(f64::NAN)).unwrap();
        assert_eq!(json, r#"{"Float":"NaN"}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, Value::Float(f) if f.is_nan()));

        // Integral JSON numbers still read back as floats
        let back: Value = serde_json::from_str(r#"{"Float":7}"#).unwrap();
        assert_eq!(back, Value::Float(7.0));
        assert!(serde_json::from_str::<Value>(r#"{"Float":"nope"}"#).is_err());
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::UInt(5).as_i64(), Some(5));
        assert_eq!(Value::UInt(u64::MAX).as_i64(), None);
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert!(Value::Null.is_null());
        assert_eq!(Value::string("x").as_str(), Some("x"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::List(vec![Value::Int(1), Value::Int(2)]).to_string(), "[1, 2]");
        assert_eq!(ColumnType::HugeInt.to_string(), "hugeint");
    }
}
