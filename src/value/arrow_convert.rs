//! Arrow Conversion Utilities
//!
//! Normalizes the engine's Arrow result (`Schema` + `RecordBatch`es) into
//! row objects and column descriptors.
//!
//! Types without a dedicated mapping fall back to Arrow's display formatter
//! and come through as strings rather than failing the query.

use super::{ColumnSchema, ColumnType, QueryResult, Value};
use duckdb::arrow::array::{Array, AsArray};
use duckdb::arrow::datatypes::{
    DataType as ArrowDataType, Date32Type, Date64Type, Decimal128Type, Decimal256Type,
    Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type, IntervalMonthDayNanoType,
    IntervalUnit, Schema, Time32MillisecondType, Time32SecondType, Time64MicrosecondType,
    Time64NanosecondType, TimeUnit, TimestampMicrosecondType, TimestampMillisecondType,
    TimestampNanosecondType, TimestampSecondType, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use duckdb::arrow::record_batch::RecordBatch;
use duckdb::arrow::util::display::{ArrayFormatter, FormatOptions};

/// Error type for Arrow conversion operations
#[derive(Debug, thiserror::Error)]
pub enum ArrowConvertError {
    /// Batch shape disagrees with the result schema
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),
    /// Arrow error
    #[error("Arrow error: {0}")]
    ArrowError(#[from] duckdb::arrow::error::ArrowError),
}

/// Convert an engine result into a `QueryResult`
pub fn record_batches_to_result(
    schema: &Schema,
    batches: &[RecordBatch],
) -> Result<QueryResult, ArrowConvertError> {
    let columns: Vec<ColumnSchema> = schema
        .fields()
        .iter()
        .map(|field| {
            ColumnSchema::new(
                field.name().clone(),
                column_type_of(field.data_type()),
                field.is_nullable(),
            )
        })
        .collect();

    let total_rows = batches.iter().map(RecordBatch::num_rows).sum();
    let mut rows = Vec::with_capacity(total_rows);

    for batch in batches {
        if batch.num_columns() != columns.len() {
            return Err(ArrowConvertError::SchemaMismatch(format!(
                "Batch has {} columns but schema has {}",
                batch.num_columns(),
                columns.len()
            )));
        }

        for row_idx in 0..batch.num_rows() {
            let mut values = Vec::with_capacity(columns.len());
            for column in batch.columns() {
                values.push(extract_value(column.as_ref(), row_idx)?);
            }
            rows.push(values);
        }
    }

    Ok(QueryResult::new(columns, rows))
}

/// Map an Arrow data type to the schema type shown to users.
///
/// The engine exports HUGEINT as `DECIMAL(38, 0)`, and the Arrow schema
/// carries nothing else to tell it apart from a declared `DECIMAL(38, 0)`.
/// Both report as `HugeInt`. Only the label is ambiguous: values of either
/// are kept as exact `Value::Decimal` text.
pub fn column_type_of(data_type: &ArrowDataType) -> ColumnType {
    match data_type {
        ArrowDataType::Boolean => ColumnType::Boolean,
        ArrowDataType::Int8
        | ArrowDataType::Int16
        | ArrowDataType::Int32
        | ArrowDataType::UInt8
        | ArrowDataType::UInt16
        | ArrowDataType::UInt32 => ColumnType::Integer,
        ArrowDataType::Int64 | ArrowDataType::UInt64 => ColumnType::BigInt,
        ArrowDataType::Float16 | ArrowDataType::Float32 | ArrowDataType::Float64 => {
            ColumnType::Float
        }
        // HUGEINT, or a declared DECIMAL(38, 0); see above
        ArrowDataType::Decimal128(38, 0) => ColumnType::HugeInt,
        ArrowDataType::Decimal128(..) | ArrowDataType::Decimal256(..) => ColumnType::Decimal,
        ArrowDataType::Utf8 | ArrowDataType::LargeUtf8 | ArrowDataType::Utf8View => {
            ColumnType::String
        }
        ArrowDataType::Binary
        | ArrowDataType::LargeBinary
        | ArrowDataType::FixedSizeBinary(_)
        | ArrowDataType::BinaryView => ColumnType::Binary,
        ArrowDataType::Date32 | ArrowDataType::Date64 => ColumnType::Date,
        ArrowDataType::Time32(_) | ArrowDataType::Time64(_) => ColumnType::Time,
        ArrowDataType::Timestamp(..) => ColumnType::Timestamp,
        ArrowDataType::Interval(IntervalUnit::MonthDayNano) => ColumnType::Interval,
        ArrowDataType::List(_)
        | ArrowDataType::LargeList(_)
        | ArrowDataType::FixedSizeList(..) => ColumnType::List,
        ArrowDataType::Struct(_) => ColumnType::Struct,
        ArrowDataType::Map(..) => ColumnType::Map,
        ArrowDataType::Null => ColumnType::Null,
        ArrowDataType::Dictionary(_, values) => column_type_of(values),
        _ => ColumnType::Other,
    }
}

/// Extract a Value from an Arrow array at a given index
fn extract_value(array: &dyn Array, row: usize) -> Result<Value, ArrowConvertError> {
    if array.is_null(row) {
        return Ok(Value::Null);
    }

    let value = match array.data_type() {
        ArrowDataType::Null => Value::Null,
        ArrowDataType::Boolean => Value::Bool(array.as_boolean().value(row)),

        ArrowDataType::Int8 => Value::Int(i64::from(array.as_primitive::<Int8Type>().value(row))),
        ArrowDataType::Int16 => {
            Value::Int(i64::from(array.as_primitive::<Int16Type>().value(row)))
        }
        ArrowDataType::Int32 => {
            Value::Int(i64::from(array.as_primitive::<Int32Type>().value(row)))
        }
        ArrowDataType::Int64 => Value::Int(array.as_primitive::<Int64Type>().value(row)),
        ArrowDataType::UInt8 => {
            Value::UInt(u64::from(array.as_primitive::<UInt8Type>().value(row)))
        }
        ArrowDataType::UInt16 => {
            Value::UInt(u64::from(array.as_primitive::<UInt16Type>().value(row)))
        }
        ArrowDataType::UInt32 => {
            Value::UInt(u64::from(array.as_primitive::<UInt32Type>().value(row)))
        }
        ArrowDataType::UInt64 => Value::UInt(array.as_primitive::<UInt64Type>().value(row)),
        ArrowDataType::Float32 => {
            Value::Float(f64::from(array.as_primitive::<Float32Type>().value(row)))
        }
        ArrowDataType::Float64 => Value::Float(array.as_primitive::<Float64Type>().value(row)),
        ArrowDataType::Decimal128(..) => {
            Value::Decimal(array.as_primitive::<Decimal128Type>().value_as_string(row))
        }
        ArrowDataType::Decimal256(..) => {
            Value::Decimal(array.as_primitive::<Decimal256Type>().value_as_string(row))
        }

        ArrowDataType::Utf8 => Value::String(array.as_string::<i32>().value(row).to_string()),
        ArrowDataType::LargeUtf8 => {
            Value::String(array.as_string::<i64>().value(row).to_string())
        }
        ArrowDataType::Binary => Value::Bytes(array.as_binary::<i32>().value(row).to_vec()),
        ArrowDataType::LargeBinary => Value::Bytes(array.as_binary::<i64>().value(row).to_vec()),
        ArrowDataType::FixedSizeBinary(_) => {
            Value::Bytes(array.as_fixed_size_binary().value(row).to_vec())
        }

        ArrowDataType::Date32 => match array.as_primitive::<Date32Type>().value_as_date(row) {
            Some(d) => Value::Date(d),
            None => formatted(array, row)?,
        },
        ArrowDataType::Date64 => match array.as_primitive::<Date64Type>().value_as_date(row) {
            Some(d) => Value::Date(d),
            None => formatted(array, row)?,
        },
        ArrowDataType::Time32(unit) => {
            let time = match unit {
                TimeUnit::Second => array.as_primitive::<Time32SecondType>().value_as_time(row),
                TimeUnit::Millisecond => array
                    .as_primitive::<Time32MillisecondType>()
                    .value_as_time(row),
                _ => None,
            };
            match time {
                Some(t) => Value::Time(t),
                None => formatted(array, row)?,
            }
        }
        ArrowDataType::Time64(unit) => {
            let time = match unit {
                TimeUnit::Microsecond => array
                    .as_primitive::<Time64MicrosecondType>()
                    .value_as_time(row),
                TimeUnit::Nanosecond => array
                    .as_primitive::<Time64NanosecondType>()
                    .value_as_time(row),
                _ => None,
            };
            match time {
                Some(t) => Value::Time(t),
                None => formatted(array, row)?,
            }
        }
        ArrowDataType::Timestamp(unit, tz) => {
            let naive = match unit {
                TimeUnit::Second => array
                    .as_primitive::<TimestampSecondType>()
                    .value_as_datetime(row),
                TimeUnit::Millisecond => array
                    .as_primitive::<TimestampMillisecondType>()
                    .value_as_datetime(row),
                TimeUnit::Microsecond => array
                    .as_primitive::<TimestampMicrosecondType>()
                    .value_as_datetime(row),
                TimeUnit::Nanosecond => array
                    .as_primitive::<TimestampNanosecondType>()
                    .value_as_datetime(row),
            };
            match (naive, tz) {
                // Arrow stores zoned timestamps as UTC instants
                (Some(ts), Some(_)) => Value::TimestampTz(ts.and_utc()),
                (Some(ts), None) => Value::Timestamp(ts),
                (None, _) => formatted(array, row)?,
            }
        }
        ArrowDataType::Interval(IntervalUnit::MonthDayNano) => {
            let raw = array.as_primitive::<IntervalMonthDayNanoType>().value(row);
            let (months, days, nanos) = IntervalMonthDayNanoType::to_parts(raw);
            Value::Interval {
                months,
                days,
                nanos,
            }
        }

        ArrowDataType::List(_) => list_value(array.as_list::<i32>().value(row).as_ref())?,
        ArrowDataType::LargeList(_) => list_value(array.as_list::<i64>().value(row).as_ref())?,
        ArrowDataType::FixedSizeList(..) => {
            list_value(array.as_fixed_size_list().value(row).as_ref())?
        }
        ArrowDataType::Struct(fields) => {
            let columns = array.as_struct().columns();
            let mut out = Vec::with_capacity(fields.len());
            for (field, column) in fields.iter().zip(columns) {
                out.push((field.name().clone(), extract_value(column.as_ref(), row)?));
            }
            Value::Struct(out)
        }
        ArrowDataType::Map(..) => {
            // Maps become a list of {key, value} structs
            let entries = array.as_map().value(row);
            let (keys, values) = (entries.column(0), entries.column(1));
            let mut out = Vec::with_capacity(entries.len());
            for i in 0..entries.len() {
                out.push(Value::Struct(vec![
                    ("key".to_string(), extract_value(keys.as_ref(), i)?),
                    ("value".to_string(), extract_value(values.as_ref(), i)?),
                ]));
            }
            Value::List(out)
        }
        ArrowDataType::Dictionary(..) => {
            let dict = array.as_any_dictionary();
            let keys = dict.normalized_keys();
            extract_value(dict.values().as_ref(), keys[row])?
        }

        _ => formatted(array, row)?,
    };

    Ok(value)
}

fn list_value(items: &dyn Array) -> Result<Value, ArrowConvertError> {
    let mut out = Vec::with_capacity(items.len());
    for i in 0..items.len() {
        out.push(extract_value(items, i)?);
    }
    Ok(Value::List(out))
}

fn formatted(array: &dyn Array, row: usize) -> Result<Value, ArrowConvertError> {
    let formatter = ArrayFormatter::try_new(array, &FormatOptions::default())?;
    Ok(Value::String(formatter.value(row).to_string()))
}
