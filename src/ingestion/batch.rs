//! Row batches - bounded groups of coerced source records

use crate::ingestion::schema::{ColumnType, SchemaDescriptor};
use chrono::NaiveDateTime;
use polars::prelude::*;
use std::sync::Arc;

/// A single coerced field value
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

/// An ordered group of records, each laid out in schema column order.
///
/// A batch is consumed once by the loader and dropped after it has been written.
#[derive(Clone, Debug)]
pub struct RowBatch {
    schema: Arc<SchemaDescriptor>,
    rows: Vec<Vec<Value>>,
}

impl RowBatch {
    pub fn new(schema: Arc<SchemaDescriptor>) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    pub fn with_capacity(schema: Arc<SchemaDescriptor>, capacity: usize) -> Self {
        Self {
            schema,
            rows: Vec::with_capacity(capacity),
        }
    }

    /// Build a batch from already coerced rows. Rows must follow schema column order.
    pub fn from_rows(schema: Arc<SchemaDescriptor>, rows: Vec<Vec<Value>>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == schema.len()));
        Self { schema, rows }
    }

    pub fn push(&mut self, row: Vec<Value>) {
        debug_assert_eq!(row.len(), self.schema.len());
        self.rows.push(row);
    }

    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Zero-row batch with the same structure, used as the table template
    pub fn template(&self) -> RowBatch {
        RowBatch::new(Arc::clone(&self.schema))
    }

    /// Convert to a polars `DataFrame` for display
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let mut columns = Vec::with_capacity(self.schema.len());

        for (idx, col) in self.schema.columns().iter().enumerate() {
            let values = self.rows.iter().map(|row| &row[idx]);
            let series = match col.column_type {
                ColumnType::Int64 => {
                    Series::new(&col.name, values.map(Value::as_i64).collect::<Vec<_>>())
                }
                ColumnType::Float64 => {
                    Series::new(&col.name, values.map(Value::as_f64).collect::<Vec<_>>())
                }
                ColumnType::Text => Series::new(
                    &col.name,
                    values
                        .map(|v| v.as_str().map(str::to_string))
                        .collect::<Vec<Option<String>>>(),
                ),
                ColumnType::Timestamp => Series::new(
                    &col.name,
                    values
                        .map(|v| v.as_timestamp().map(|ts| ts.and_utc().timestamp_micros()))
                        .collect::<Vec<_>>(),
                )
                .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?,
            };
            columns.push(series);
        }

        DataFrame::new(columns)
    }
}
