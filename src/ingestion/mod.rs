//! Ingestion Module - streams a delimited trip file into a destination table
//!
//! - Typed schema descriptor used for coercion and table creation
//! - Lazy, bounded-size batch reading from local or remote gzip sources
//! - Create-from-first-batch, then append every batch in order
//! - Per-batch progress events

pub mod batch;
pub mod csv_reader;
pub mod orchestrator;
pub mod schema;
pub mod sink;
pub mod source;

pub use batch::{RowBatch, Value};
pub use csv_reader::BatchReader;
pub use orchestrator::{ChunkedLoader, LoadEvent, LoadReport, LoaderState};
pub use schema::{ColumnDef, ColumnType, SchemaDescriptor};
pub use sink::{MemorySink, MemoryTable, SinkOp, TableSink};
pub use source::{open_source, BatchSource, SourceBatches, SourceLocation};
