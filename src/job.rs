//! Job runner - wires configuration, source, loader and destination together

use crate::config::JobConfig;
use crate::db::PostgresSink;
use crate::error::{LoadError, Result};
use crate::ingestion::batch::RowBatch;
use crate::ingestion::orchestrator::{log_event, ChunkedLoader, LoadEvent, LoadReport, LoaderState};
use crate::ingestion::schema::SchemaDescriptor;
use crate::ingestion::sink::TableSink;
use crate::ingestion::source::{open_source, BatchSource};
use polars::prelude::DataFrame;
use std::sync::Arc;
use tracing::info;

/// Load the configured trip file into Postgres.
///
/// The destination is reached before the download starts, so bad connection
/// parameters fail fast with `DestinationUnavailable`.
pub async fn run_job(config: &JobConfig, schema: SchemaDescriptor) -> Result<LoadReport> {
    config.validate()?;
    let sink = PostgresSink::connect(&config.db).await.inspect_err(|e| {
        log_event(&LoadEvent::Failed {
            during: LoaderState::NotStarted,
            kind: e.kind(),
            message: e.to_string(),
        })
    })?;
    run_job_with_sink(config, schema, sink).await.map(|(report, _)| report)
}

/// Same as `run_job` against any destination; hands the sink back on success
pub async fn run_job_with_sink<S: TableSink>(
    config: &JobConfig,
    schema: SchemaDescriptor,
    sink: S,
) -> Result<(LoadReport, S)> {
    config.validate()?;
    let location = config.source_location()?;
    let schema = Arc::new(schema);

    info!(
        "Loading {} into {} on {} in chunks of {}",
        location,
        config.table,
        sink.describe(),
        config.batch_size
    );

    let mut loader = ChunkedLoader::new(sink, config.table.clone());
    let open = open_source(&location, Arc::clone(&schema), config.batch_size);
    let report = loader.run_with_source(schema, open).await?;

    Ok((report, loader.into_sink()))
}

/// First rows of the source and the DDL a load would issue
pub struct Preview {
    pub frame: DataFrame,
    pub create_table: String,
}

/// Read only the first `rows` records of the source. Never touches the destination.
pub async fn preview(config: &JobConfig, schema: SchemaDescriptor, rows: usize) -> Result<Preview> {
    let location = config.source_location()?;
    let schema = Arc::new(schema);

    let mut batches = open_source(&location, Arc::clone(&schema), rows).await?;
    let first = batches.next_batch().await.transpose()?;
    let create_table = schema.create_table_sql(&config.table);

    let frame = match first {
        Some(batch) => batch.to_dataframe(),
        None => RowBatch::new(schema).to_dataframe(),
    }
    .map_err(|e| LoadError::SourceUnavailable(format!("Failed to build preview: {}", e)))?;

    Ok(Preview {
        frame,
        create_table,
    })
}
