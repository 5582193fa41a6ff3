//! Table Sink Trait - Abstract interface for the destination store

use crate::error::{LoadError, Result};
use crate::ingestion::batch::{RowBatch, Value};
use crate::ingestion::schema::ColumnDef;
use async_trait::async_trait;
use std::collections::HashMap;

/// Destination of a load.
///
/// Implementations:
/// - PostgresSink: a Postgres database reached through sqlx
/// - MemorySink: in-process tables, for tests and dry runs
#[async_trait]
pub trait TableSink: Send {
    /// Drop `table` if it exists and recreate it empty, with the columns of the
    /// template's schema descriptor. The template's rows are never written.
    async fn materialize_schema(&mut self, template: &RowBatch, table: &str) -> Result<()>;

    /// Append every row of `batch` to `table` in order, returning the rows written
    async fn append_batch(&mut self, batch: &RowBatch, table: &str) -> Result<u64>;

    /// Human readable destination description for logs
    fn describe(&self) -> String;
}

/// One call received by a `MemorySink`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkOp {
    Materialize { table: String },
    Append { table: String, rows: usize },
}

#[derive(Clone, Debug, Default)]
pub struct MemoryTable {
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Vec<Value>>,
}

/// Keeps tables in memory. Failures can be injected to exercise error paths.
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: HashMap<String, MemoryTable>,
    ops: Vec<SinkOp>,
    reject_materialize: Option<String>,
    fail_append_at: Option<usize>,
    appends: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every `materialize_schema` call as if the connection were refused
    pub fn rejecting_materialize(mut self, reason: impl Into<String>) -> Self {
        self.reject_materialize = Some(reason.into());
        self
    }

    /// Fail the append with the given zero-based index, after writing half its rows
    pub fn failing_append_at(mut self, index: usize) -> Self {
        self.fail_append_at = Some(index);
        self
    }

    pub fn table(&self, name: &str) -> Option<&MemoryTable> {
        self.tables.get(name)
    }

    pub fn ops(&self) -> &[SinkOp] {
        &self.ops
    }
}

#[async_trait]
impl TableSink for MemorySink {
    async fn materialize_schema(&mut self, template: &RowBatch, table: &str) -> Result<()> {
        self.ops.push(SinkOp::Materialize {
            table: table.to_string(),
        });

        if let Some(reason) = &self.reject_materialize {
            return Err(LoadError::DestinationUnavailable(reason.clone()));
        }

        self.tables.insert(
            table.to_string(),
            MemoryTable {
                columns: template.schema().columns().to_vec(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    async fn append_batch(&mut self, batch: &RowBatch, table: &str) -> Result<u64> {
        self.ops.push(SinkOp::Append {
            table: table.to_string(),
            rows: batch.len(),
        });

        let index = self.appends;
        self.appends += 1;

        let target = self
            .tables
            .get_mut(table)
            .ok_or_else(|| LoadError::WriteFailure(format!("relation {} does not exist", table)))?;

        if self.fail_append_at == Some(index) {
            let partial = batch.len() / 2;
            target.rows.extend(batch.rows()[..partial].iter().cloned());
            return Err(LoadError::WriteFailure(format!(
                "injected failure on append {}",
                index
            )));
        }

        target.rows.extend(batch.rows().iter().cloned());
        Ok(batch.len() as u64)
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::schema::{ColumnType, SchemaDescriptor};
    use std::sync::Arc;

    fn batch(ids: &[i64]) -> RowBatch {
        let schema = Arc::new(SchemaDescriptor::new([("id", ColumnType::Int64)]));
        RowBatch::from_rows(schema, ids.iter().map(|&i| vec![Value::Int(i)]).collect())
    }

    #[tokio::test]
    async fn test_materialize_replaces_existing_table() {
        let mut sink = MemorySink::new();
        let first = batch(&[1, 2]);

        sink.materialize_schema(&first.template(), "t").await.unwrap();
        sink.append_batch(&first, "t").await.unwrap();
        assert_eq!(sink.table("t").unwrap().rows.len(), 2);

        sink.materialize_schema(&first.template(), "t").await.unwrap();
        assert!(sink.table("t").unwrap().rows.is_empty());
        assert_eq!(sink.table("t").unwrap().columns.len(), 1);
    }

    #[tokio::test]
    async fn test_append_to_missing_table_fails() {
        let mut sink = MemorySink::new();
        let err = sink.append_batch(&batch(&[1]), "missing").await.unwrap_err();
        assert!(matches!(err, LoadError::WriteFailure(_)));
    }
}
