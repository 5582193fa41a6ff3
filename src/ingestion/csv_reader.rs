//! CSV Batch Reader - Lazily turns a delimited text stream into typed row batches

use crate::error::{LoadError, Result};
use crate::ingestion::batch::{RowBatch, Value};
use crate::ingestion::schema::SchemaDescriptor;
use csv::{ReaderBuilder, StringRecord};
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, warn};

/// Upper bound on rows reserved up front; larger batches grow as records arrive
const MAX_PREALLOCATED_ROWS: usize = 8_192;

/// Forward-only reader that yields batches of at most `batch_size` records.
///
/// Only the current batch is held in memory; records are pulled from the underlying
/// reader as the batch fills. The iterator is fused after the first error.
pub struct BatchReader<R: Read> {
    reader: csv::Reader<R>,
    schema: Arc<SchemaDescriptor>,
    batch_size: usize,
    /// For each schema column, the field index in the source record
    positions: Vec<usize>,
    record: StringRecord,
    rows_read: u64,
    batches_read: u64,
    finished: bool,
}

impl<R: Read> BatchReader<R> {
    pub fn new(reader: R, schema: Arc<SchemaDescriptor>, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(LoadError::InvalidConfig(
                "batch size must be a positive integer".to_string(),
            ));
        }

        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(reader);

        let headers = reader
            .headers()
            .map_err(source_error)?
            .iter()
            .map(|h| h.trim().to_string())
            .collect::<Vec<_>>();

        let positions = schema
            .columns()
            .iter()
            .map(|col| {
                headers.iter().position(|h| *h == col.name).ok_or_else(|| {
                    LoadError::StructureMismatch(format!(
                        "column {} not found in source header",
                        col.name
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        for header in headers.iter().filter(|h| schema.position(h).is_none()) {
            warn!("Ignoring source column not declared in schema: {}", header);
        }

        Ok(Self {
            reader,
            schema,
            batch_size,
            positions,
            record: StringRecord::new(),
            rows_read: 0,
            batches_read: 0,
            finished: false,
        })
    }

    pub fn schema(&self) -> &Arc<SchemaDescriptor> {
        &self.schema
    }

    /// Records read from the source so far
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Read the next batch, or `None` once the source is exhausted
    pub fn read_batch(&mut self) -> Result<Option<RowBatch>> {
        if self.finished {
            return Ok(None);
        }

        let mut batch = RowBatch::with_capacity(
            Arc::clone(&self.schema),
            self.batch_size.min(MAX_PREALLOCATED_ROWS),
        );

        while batch.len() < self.batch_size {
            let has_record = self.reader.read_record(&mut self.record).map_err(source_error)?;
            if !has_record {
                self.finished = true;
                break;
            }
            let row = self.coerce_record()?;
            batch.push(row);
            self.rows_read += 1;
        }

        if batch.is_empty() {
            return Ok(None);
        }

        self.batches_read += 1;
        debug!(
            "Read batch {} with {} rows ({} rows so far)",
            self.batches_read,
            batch.len(),
            self.rows_read
        );

        Ok(Some(batch))
    }

    fn coerce_record(&self) -> Result<Vec<Value>> {
        let line = self.record.position().map(|p| p.line()).unwrap_or(0);

        self.schema
            .columns()
            .iter()
            .zip(&self.positions)
            .map(|(col, &pos)| {
                let raw = self.record.get(pos).unwrap_or("");
                col.column_type
                    .coerce(raw)
                    .ok_or_else(|| LoadError::SchemaMismatch {
                        line,
                        column: col.name.clone(),
                        value: raw.to_string(),
                        expected: col.column_type,
                    })
            })
            .collect()
    }
}

impl<R: Read> Iterator for BatchReader<R> {
    type Item = Result<RowBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_batch() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => None,
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

fn source_error(err: csv::Error) -> LoadError {
    match err.kind() {
        csv::ErrorKind::UnequalLengths { pos, expected_len, len } => {
            let line = pos.as_ref().map(|p| p.line()).unwrap_or(0);
            LoadError::StructureMismatch(format!(
                "record at line {} has {} fields, header has {}",
                line, len, expected_len
            ))
        }
        _ => LoadError::SourceUnavailable(format!("Failed to read CSV record: {}", err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::schema::ColumnType;

    fn id_name_schema() -> Arc<SchemaDescriptor> {
        Arc::new(SchemaDescriptor::new([
            ("id", ColumnType::Int64),
            ("name", ColumnType::Text),
        ]))
    }

    fn ids(batch: &RowBatch) -> Vec<i64> {
        batch.rows().iter().filter_map(|r| r[0].as_i64()).collect()
    }

    #[test]
    fn test_batches_are_bounded_and_ordered() {
        let csv = "id,name\n1,a\n2,b\n3,c\n4,d\n5,e\n";
        let reader = BatchReader::new(csv.as_bytes(), id_name_schema(), 2).unwrap();

        let batches = reader.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(ids(&batches[0]), vec![1, 2]);
        assert_eq!(ids(&batches[1]), vec![3, 4]);
        assert_eq!(ids(&batches[2]), vec![5]);
    }

    #[test]
    fn test_batch_count_is_ceiling() {
        let mut csv = String::from("id,name\n");
        for i in 0..23 {
            csv.push_str(&format!("{},n{}\n", i, i));
        }

        for batch_size in 1..=25 {
            let mut reader = BatchReader::new(csv.as_bytes(), id_name_schema(), batch_size).unwrap();
            let batches = reader.by_ref().collect::<Result<Vec<_>>>().unwrap();
            assert_eq!(reader.rows_read(), 23);
            assert_eq!(batches.len(), (23 + batch_size - 1) / batch_size);

            let (last, full) = batches.split_last().unwrap();
            assert!(full.iter().all(|b| b.len() == batch_size));
            assert!(last.len() <= batch_size);

            let all = batches.iter().flat_map(ids).collect::<Vec<_>>();
            assert_eq!(all, (0..23).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_huge_batch_size_reads_without_reserving_it() {
        let mut reader =
            BatchReader::new("id,name\n1,a\n".as_bytes(), id_name_schema(), usize::MAX / 2).unwrap();

        let batch = reader.read_batch().unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert!(reader.read_batch().unwrap().is_none());
        assert_eq!(reader.rows_read(), 1);
    }

    #[test]
    fn test_header_only_yields_no_batches() {
        let reader = BatchReader::new("id,name\n".as_bytes(), id_name_schema(), 10).unwrap();
        assert_eq!(reader.count(), 0);
    }

    #[test]
    fn test_columns_follow_schema_order() {
        let csv = "name,extra,id\nzed,ignored,9\n";
        let mut reader = BatchReader::new(csv.as_bytes(), id_name_schema(), 10).unwrap();
        let batch = reader.read_batch().unwrap().unwrap();

        assert_eq!(
            batch.rows()[0],
            vec![Value::Int(9), Value::Text("zed".to_string())]
        );
    }

    #[test]
    fn test_missing_column_is_rejected() {
        let err = BatchReader::new("id\n1\n".as_bytes(), id_name_schema(), 10)
            .err()
            .unwrap();
        assert!(err.is_schema_mismatch());
    }

    #[test]
    fn test_non_numeric_int_fails_and_fuses() {
        let csv = "id,name\n1,a\n2,b\nthree,c\n4,d\n";
        let mut reader = BatchReader::new(csv.as_bytes(), id_name_schema(), 2).unwrap();

        assert_eq!(ids(&reader.next().unwrap().unwrap()), vec![1, 2]);

        match reader.next() {
            Some(Err(LoadError::SchemaMismatch { line, column, value, expected })) => {
                assert_eq!(line, 4);
                assert_eq!(column, "id");
                assert_eq!(value, "three");
                assert_eq!(expected, ColumnType::Int64);
            }
            other => panic!("expected schema mismatch, got {:?}", other),
        }
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let err = BatchReader::new("id,name\n".as_bytes(), id_name_schema(), 0)
            .err()
            .unwrap();
        assert!(matches!(err, LoadError::InvalidConfig(_)));
    }
}
