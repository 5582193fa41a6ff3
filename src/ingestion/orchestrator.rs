//! Chunked Loader - Drives a batch sequence into a destination table
//!
//! The first batch is pulled before anything touches the destination and serves as
//! the structural template: the table is dropped and recreated empty from it, then
//! the first batch is appended, then every remaining batch in source order.

use crate::error::{LoadError, Result};
use crate::ingestion::batch::RowBatch;
use crate::ingestion::schema::SchemaDescriptor;
use crate::ingestion::sink::TableSink;
use crate::ingestion::source::BatchSource;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Lifecycle of a single load run. `Completed` and `Failed` are terminal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoaderState {
    NotStarted,
    SourceOpened,
    SchemaCreated,
    /// Number of batches appended so far
    Appending(u64),
    Completed,
    Failed(String),
}

impl LoaderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoaderState::Completed | LoaderState::Failed(_))
    }
}

/// Progress notifications emitted while a load runs
#[derive(Clone, Debug)]
pub enum LoadEvent {
    SourceOpened,
    SchemaCreated {
        table: String,
        columns: usize,
    },
    BatchWritten {
        /// 1-based batch number
        index: u64,
        rows: u64,
        total_rows: u64,
        read_elapsed: Duration,
        write_elapsed: Duration,
    },
    Completed {
        batches: u64,
        rows: u64,
        elapsed: Duration,
    },
    Failed {
        /// State the loader was in when the error surfaced
        during: LoaderState,
        kind: &'static str,
        message: String,
    },
}

/// Summary of a successful run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub run_id: Uuid,
    pub table: String,
    pub destination: String,
    pub batches: u64,
    pub rows_written: u64,
    pub elapsed_ms: u64,
}

type Observer = Box<dyn FnMut(&LoadEvent) + Send>;

/// Single-use loader: one `run` per instance, no resume.
pub struct ChunkedLoader<S: TableSink> {
    sink: S,
    table: String,
    run_id: Uuid,
    state: LoaderState,
    observer: Option<Observer>,
    batches: u64,
    rows: u64,
}

impl<S: TableSink> ChunkedLoader<S> {
    pub fn new(sink: S, table: impl Into<String>) -> Self {
        Self {
            sink,
            table: table.into(),
            run_id: Uuid::new_v4(),
            state: LoaderState::NotStarted,
            observer: None,
            batches: 0,
            rows: 0,
        }
    }

    /// Register a callback that receives every progress event
    pub fn with_observer(mut self, observer: impl FnMut(&LoadEvent) + Send + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn state(&self) -> &LoaderState {
        &self.state
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Load every batch of an already opened source into the target table.
    ///
    /// `schema` defines the table when the source yields no batches at all. Any
    /// error aborts the run; rows of batches appended before it stay in place.
    pub async fn run<B: BatchSource>(
        &mut self,
        schema: Arc<SchemaDescriptor>,
        batches: B,
    ) -> Result<LoadReport> {
        self.run_with_source(schema, async { Ok(batches) }).await
    }

    /// Like `run`, opening the source as the first step of the run so that an
    /// unreachable source ends in `Failed` like any other error.
    pub async fn run_with_source<F, B>(
        &mut self,
        schema: Arc<SchemaDescriptor>,
        open: F,
    ) -> Result<LoadReport>
    where
        F: Future<Output = Result<B>>,
        B: BatchSource,
    {
        if self.state != LoaderState::NotStarted {
            return Err(LoadError::InvalidConfig(format!(
                "loader for {} already ran (state {:?})",
                self.table, self.state
            )));
        }

        let span = info_span!("load", run_id = %self.run_id, table = %self.table);
        let started = Instant::now();

        match self.drive(schema, open).instrument(span).await {
            Ok(()) => {
                let elapsed = started.elapsed();
                self.state = LoaderState::Completed;
                self.emit(LoadEvent::Completed {
                    batches: self.batches,
                    rows: self.rows,
                    elapsed,
                });

                Ok(LoadReport {
                    run_id: self.run_id,
                    table: self.table.clone(),
                    destination: self.sink.describe(),
                    batches: self.batches,
                    rows_written: self.rows,
                    elapsed_ms: elapsed.as_millis() as u64,
                })
            }
            Err(e) => {
                let during = std::mem::replace(&mut self.state, LoaderState::Failed(e.to_string()));
                self.emit(LoadEvent::Failed {
                    during,
                    kind: e.kind(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn drive<F, B>(&mut self, schema: Arc<SchemaDescriptor>, open: F) -> Result<()>
    where
        F: Future<Output = Result<B>>,
        B: BatchSource,
    {
        let read_started = Instant::now();
        let mut batches = open.await?;
        self.state = LoaderState::SourceOpened;
        self.emit(LoadEvent::SourceOpened);

        let first = batches.next_batch().await.transpose()?;
        let first_read = read_started.elapsed();

        let template = match &first {
            Some(batch) => batch.template(),
            None => RowBatch::new(schema),
        };
        self.sink.materialize_schema(&template, &self.table).await?;
        self.state = LoaderState::SchemaCreated;
        self.emit(LoadEvent::SchemaCreated {
            table: self.table.clone(),
            columns: template.schema().len(),
        });

        let Some(first) = first else {
            info!("Source yielded no rows; {} left empty", self.table);
            return Ok(());
        };
        self.append(first, first_read).await?;

        loop {
            let read_started = Instant::now();
            let Some(batch) = batches.next_batch().await.transpose()? else {
                break;
            };
            self.append(batch, read_started.elapsed()).await?;
        }

        Ok(())
    }

    async fn append(&mut self, batch: RowBatch, read_elapsed: Duration) -> Result<()> {
        let write_started = Instant::now();
        let rows = self.sink.append_batch(&batch, &self.table).await?;
        let write_elapsed = write_started.elapsed();
        drop(batch);

        self.batches += 1;
        self.rows += rows;
        self.state = LoaderState::Appending(self.batches);
        self.emit(LoadEvent::BatchWritten {
            index: self.batches,
            rows,
            total_rows: self.rows,
            read_elapsed,
            write_elapsed,
        });
        Ok(())
    }

    fn emit(&mut self, event: LoadEvent) {
        log_event(&event);
        if let Some(observer) = self.observer.as_mut() {
            observer(&event);
        }
    }
}

pub(crate) fn log_event(event: &LoadEvent) {
    match event {
        LoadEvent::SourceOpened => info!("Source opened"),
        LoadEvent::SchemaCreated { table, columns } => {
            info!("Table {} created with {} columns", table, columns)
        }
        LoadEvent::BatchWritten {
            index,
            rows,
            total_rows,
            read_elapsed,
            write_elapsed,
        } => info!(
            "Inserted chunk {}: {} rows in {:.3}s (read {:.3}s, {} rows total)",
            index,
            rows,
            write_elapsed.as_secs_f64(),
            read_elapsed.as_secs_f64(),
            total_rows
        ),
        LoadEvent::Completed {
            batches,
            rows,
            elapsed,
        } => info!(
            "✅ Load complete: {} rows in {} chunks ({:.1}s)",
            rows,
            batches,
            elapsed.as_secs_f64()
        ),
        LoadEvent::Failed {
            during,
            kind,
            message,
        } => error!("❌ Load failed during {:?} [{}]: {}", during, kind, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::batch::Value;
    use crate::ingestion::schema::ColumnType;
    use crate::ingestion::sink::{MemorySink, SinkOp};
    use std::sync::Mutex;

    fn schema() -> Arc<SchemaDescriptor> {
        Arc::new(SchemaDescriptor::new([
            ("id", ColumnType::Int64),
            ("name", ColumnType::Text),
        ]))
    }

    fn batch(schema: &Arc<SchemaDescriptor>, ids: &[i64]) -> RowBatch {
        RowBatch::from_rows(
            Arc::clone(schema),
            ids.iter()
                .map(|&i| vec![Value::Int(i), Value::Text(format!("n{}", i))])
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_create_then_append_first_then_rest() {
        let schema = schema();
        let batches = vec![Ok(batch(&schema, &[1, 2])), Ok(batch(&schema, &[3]))];

        let mut loader = ChunkedLoader::new(MemorySink::new(), "trips");
        let report = loader.run(Arc::clone(&schema), batches.into_iter()).await.unwrap();

        assert_eq!(report.run_id, loader.run_id());
        assert_eq!(report.batches, 2);
        assert_eq!(report.rows_written, 3);
        assert_eq!(loader.state(), &LoaderState::Completed);
        assert_eq!(
            loader.sink().ops(),
            &[
                SinkOp::Materialize { table: "trips".to_string() },
                SinkOp::Append { table: "trips".to_string(), rows: 2 },
                SinkOp::Append { table: "trips".to_string(), rows: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn test_events_per_batch_and_one_terminal() {
        let schema = schema();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = Arc::clone(&events);

        let mut loader = ChunkedLoader::new(MemorySink::new(), "trips")
            .with_observer(move |e| sink_events.lock().unwrap().push(e.clone()));
        let batches = (0..4).map(|i| Ok(batch(&schema, &[i])));
        loader.run(Arc::clone(&schema), batches).await.unwrap();

        let events = events.lock().unwrap();
        let written = events
            .iter()
            .filter(|e| matches!(e, LoadEvent::BatchWritten { .. }))
            .count();
        let terminal = events
            .iter()
            .filter(|e| matches!(e, LoadEvent::Completed { .. } | LoadEvent::Failed { .. }))
            .count();
        assert_eq!(written, 4);
        assert_eq!(terminal, 1);
        assert!(matches!(events.last(), Some(LoadEvent::Completed { rows: 4, .. })));
    }

    #[tokio::test]
    async fn test_source_error_after_first_batch_keeps_earlier_rows() {
        let schema = schema();
        let batches = vec![
            Ok(batch(&schema, &[1, 2])),
            Err(LoadError::SchemaMismatch {
                line: 4,
                column: "id".to_string(),
                value: "three".to_string(),
                expected: ColumnType::Int64,
            }),
            Ok(batch(&schema, &[5])),
        ];

        let mut loader = ChunkedLoader::new(MemorySink::new(), "trips");
        let err = loader.run(Arc::clone(&schema), batches.into_iter()).await.unwrap_err();

        assert!(err.is_schema_mismatch());
        assert!(matches!(loader.state(), LoaderState::Failed(_)));
        assert_eq!(loader.sink().table("trips").unwrap().rows.len(), 2);
        assert_eq!(loader.sink().ops().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_materialize_never_appends() {
        let schema = schema();
        let batches = vec![Ok(batch(&schema, &[1]))];

        let sink = MemorySink::new().rejecting_materialize("connection refused");
        let mut loader = ChunkedLoader::new(sink, "trips");
        let err = loader.run(Arc::clone(&schema), batches.into_iter()).await.unwrap_err();

        assert!(matches!(err, LoadError::DestinationUnavailable(_)));
        assert!(loader
            .sink()
            .ops()
            .iter()
            .all(|op| matches!(op, SinkOp::Materialize { .. })));
    }

    #[tokio::test]
    async fn test_loader_is_single_use() {
        let schema = schema();
        let mut loader = ChunkedLoader::new(MemorySink::new(), "trips");
        assert!(!loader.state().is_terminal());
        loader.run(Arc::clone(&schema), std::iter::empty::<Result<RowBatch>>()).await.unwrap();
        assert!(loader.state().is_terminal());

        let err = loader.run(Arc::clone(&schema), std::iter::empty::<Result<RowBatch>>()).await.unwrap_err();
        assert!(matches!(err, LoadError::InvalidConfig(_)));
        assert_eq!(loader.state(), &LoaderState::Completed);
    }

    #[tokio::test]
    async fn test_unreachable_source_fails_from_not_started() {
        let schema = schema();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = Arc::clone(&events);

        let mut loader = ChunkedLoader::new(MemorySink::new(), "trips")
            .with_observer(move |e| sink_events.lock().unwrap().push(e.clone()));
        let open = async {
            Err::<std::vec::IntoIter<Result<RowBatch>>, _>(LoadError::SourceUnavailable(
                "404 Not Found".to_string(),
            ))
        };
        let err = loader.run_with_source(Arc::clone(&schema), open).await.unwrap_err();

        assert!(matches!(err, LoadError::SourceUnavailable(_)));
        assert!(loader.state().is_terminal());
        assert!(loader.sink().ops().is_empty());

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            LoadEvent::Failed { during: LoaderState::NotStarted, kind: "SourceUnavailable", .. }
        ));
    }
}
