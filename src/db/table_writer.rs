//! Postgres table writer - creates the target table and appends batches to it

use crate::config::DbConfig;
use crate::db::connection::init_pool;
use crate::error::{LoadError, Result};
use crate::ingestion::batch::RowBatch;
use crate::ingestion::schema::{quote_ident, ColumnType, SchemaDescriptor};
use crate::ingestion::sink::TableSink;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

/// Postgres refuses statements with more bind parameters than this
const MAX_BIND_PARAMS: usize = 65_535;

pub struct PostgresSink {
    pool: PgPool,
    description: String,
}

impl PostgresSink {
    pub fn new(pool: PgPool, description: impl Into<String>) -> Self {
        Self {
            pool,
            description: description.into(),
        }
    }

    pub async fn connect(config: &DbConfig) -> Result<Self> {
        let pool = init_pool(config).await?;
        Ok(Self::new(pool, config.redacted_url()))
    }

    /// Current number of rows in `table`
    pub async fn row_count(&self, table: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| LoadError::DestinationUnavailable(format!("Failed to count {}: {}", table, e)))?;
        Ok(count)
    }
}

#[async_trait]
impl TableSink for PostgresSink {
    async fn materialize_schema(&mut self, template: &RowBatch, table: &str) -> Result<()> {
        let ddl = template.schema().create_table_sql(table);
        debug!("Replacing table {}:\n{}", table, ddl);

        let rejected = |e: sqlx::Error| {
            LoadError::DestinationUnavailable(format!("Failed to create table {}: {}", table, e))
        };

        let mut tx = self.pool.begin().await.map_err(rejected)?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
            .execute(&mut *tx)
            .await
            .map_err(rejected)?;
        sqlx::query(&ddl).execute(&mut *tx).await.map_err(rejected)?;
        tx.commit().await.map_err(rejected)?;

        Ok(())
    }

    async fn append_batch(&mut self, batch: &RowBatch, table: &str) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let failed = |e: sqlx::Error| {
            LoadError::WriteFailure(format!("Failed to append to {}: {}", table, e))
        };

        let columns = batch.schema().columns();
        let prefix = insert_prefix(table, batch.schema());
        let mut written = 0u64;

        // One transaction per batch; statements are split to stay under the bind limit
        let mut tx = self.pool.begin().await.map_err(failed)?;
        for rows in batch.rows().chunks(rows_per_statement(columns.len())) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(&prefix);
            builder.push_values(rows, |mut tuple, row| {
                for (col, value) in columns.iter().zip(row) {
                    match col.column_type {
                        ColumnType::Int64 => tuple.push_bind(value.as_i64()),
                        ColumnType::Float64 => tuple.push_bind(value.as_f64()),
                        ColumnType::Text => tuple.push_bind(value.as_str().map(str::to_string)),
                        ColumnType::Timestamp => tuple.push_bind(value.as_timestamp()),
                    };
                }
            });

            let result = builder.build().execute(&mut *tx).await.map_err(failed)?;
            written += result.rows_affected();
        }
        tx.commit().await.map_err(failed)?;

        Ok(written)
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

fn insert_prefix(table: &str, schema: &SchemaDescriptor) -> String {
    let columns = schema
        .column_names()
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(", ");
    format!("INSERT INTO {} ({}) ", quote_ident(table), columns)
}

fn rows_per_statement(column_count: usize) -> usize {
    (MAX_BIND_PARAMS / column_count.max(1)).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_prefix_quotes_identifiers() {
        let schema = SchemaDescriptor::new([
            ("VendorID", ColumnType::Int64),
            ("store_and_fwd_flag", ColumnType::Text),
        ]);
        assert_eq!(
            insert_prefix("yellow_taxi_data", &schema),
            "INSERT INTO \"yellow_taxi_data\" (\"VendorID\", \"store_and_fwd_flag\") "
        );
    }

    #[test]
    fn test_rows_per_statement_respects_bind_limit() {
        let yellow = SchemaDescriptor::yellow_tripdata();
        let rows = rows_per_statement(yellow.len());
        assert_eq!(rows, 3640);
        assert!(rows * yellow.len() <= MAX_BIND_PARAMS);
        assert_eq!(rows_per_statement(1), MAX_BIND_PARAMS);
        assert_eq!(rows_per_statement(0), MAX_BIND_PARAMS);
    }
}
