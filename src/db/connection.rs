//! Database connection management using sqlx

use crate::config::DbConfig;
use crate::error::{LoadError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Initialize the database connection pool.
///
/// A load is strictly sequential, so the pool holds a single connection for the
/// whole run.
pub async fn init_pool(config: &DbConfig) -> Result<PgPool> {
    info!("Connecting to {}", config.redacted_url());

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect_with(config.connect_options())
        .await
        .map_err(|e| {
            LoadError::DestinationUnavailable(format!(
                "Failed to connect to {}: {}",
                config.redacted_url(),
                e
            ))
        })?;

    // Test the connection
    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(|e| LoadError::DestinationUnavailable(format!("Connection check failed: {}", e)))?;

    Ok(pool)
}
