//! Schema descriptor - declared column types for the source file and the destination table

use crate::ingestion::batch::Value;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared scalar type of a column. Every column is nullable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Int64,
    Float64,
    Text,
    Timestamp,
}

const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

impl ColumnType {
    /// Postgres type used when the destination table is created
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Int64 => "BIGINT",
            ColumnType::Float64 => "DOUBLE PRECISION",
            ColumnType::Text => "TEXT",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }

    /// Coerce a raw CSV field into a value of this type.
    ///
    /// Empty fields become `Value::Null` for every type. Returns `None` when the
    /// field cannot be represented as this type.
    pub fn coerce(&self, raw: &str) -> Option<Value> {
        if raw.is_empty() {
            return Some(Value::Null);
        }

        let trimmed = raw.trim();
        match self {
            ColumnType::Text => Some(Value::Text(raw.to_string())),
            _ if trimmed.is_empty() => Some(Value::Null),
            ColumnType::Int64 => {
                // plain decimals with an all-zero fraction ("1.0") are integers too
                let (whole, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));
                if !fraction.bytes().all(|b| b == b'0') {
                    return None;
                }
                whole.parse::<i64>().ok().map(Value::Int)
            }
            ColumnType::Float64 => trimmed.parse::<f64>().ok().map(Value::Float),
            ColumnType::Timestamp => TIMESTAMP_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
                .map(Value::Timestamp),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Int64 => "Int64",
            ColumnType::Float64 => "float64",
            ColumnType::Text => "string",
            ColumnType::Timestamp => "datetime",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

/// Ordered mapping from column name to declared type. Fixed for the duration of a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    columns: Vec<ColumnDef>,
}

impl SchemaDescriptor {
    pub fn new<N: Into<String>>(columns: impl IntoIterator<Item = (N, ColumnType)>) -> Self {
        Self {
            columns: columns
                .into_iter()
                .map(|(name, column_type)| ColumnDef {
                    name: name.into(),
                    column_type,
                })
                .collect(),
        }
    }

    /// The 18 columns of the NYC TLC yellow trip files, in file order
    pub fn yellow_tripdata() -> Self {
        use ColumnType::*;

        Self::new([
            ("VendorID", Int64),
            ("tpep_pickup_datetime", Timestamp),
            ("tpep_dropoff_datetime", Timestamp),
            ("passenger_count", Int64),
            ("trip_distance", Float64),
            ("RatecodeID", Int64),
            ("store_and_fwd_flag", Text),
            ("PULocationID", Int64),
            ("DOLocationID", Int64),
            ("payment_type", Int64),
            ("fare_amount", Float64),
            ("extra", Float64),
            ("mta_tax", Float64),
            ("tip_amount", Float64),
            ("tolls_amount", Float64),
            ("improvement_surcharge", Float64),
            ("total_amount", Float64),
            ("congestion_surcharge", Float64),
        ])
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// `CREATE TABLE` statement for an empty relation with these columns
    pub fn create_table_sql(&self, table_name: &str) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("    {} {}", quote_ident(&c.name), c.column_type.sql_type()))
            .collect::<Vec<_>>()
            .join(",\n");

        format!("CREATE TABLE {} (\n{}\n)", quote_ident(table_name), columns)
    }
}

/// Double-quote an SQL identifier so mixed-case names survive
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
