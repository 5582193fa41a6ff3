//! Job configuration - destination parameters, source template and batch size

use crate::error::{LoadError, Result};
use crate::ingestion::source::SourceLocation;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;

pub const DEFAULT_URL_PREFIX: &str =
    "https://github.com/DataTalksClub/nyc-tlc-data/releases/download/yellow/";
pub const DEFAULT_FILE_PATTERN: &str = "yellow_tripdata_{year}-{month}.csv.gz";
pub const DEFAULT_TABLE: &str = "yellow_taxi_data";
pub const DEFAULT_BATCH_SIZE: usize = 100_000;

/// Connection parameters for the destination database
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    /// How long to keep trying to obtain a connection
    pub connect_timeout_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            password: "root".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            database: "ny_taxi".to_string(),
            connect_timeout_secs: 30,
        }
    }
}

impl DbConfig {
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }

    /// Connection URL with the password masked, safe to log
    pub fn redacted_url(&self) -> String {
        format!(
            "postgresql://{}:***@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

/// Source URL template, parameterized by year and two-digit month
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTemplate {
    pub prefix: String,
    pub file_pattern: String,
}

impl Default for SourceTemplate {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_URL_PREFIX.to_string(),
            file_pattern: DEFAULT_FILE_PATTERN.to_string(),
        }
    }
}

impl SourceTemplate {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    pub fn render(&self, year: i32, month: u32) -> Result<String> {
        validate_month(month)?;
        let file = self
            .file_pattern
            .replace("{year}", &year.to_string())
            .replace("{month}", &format!("{:02}", month));
        Ok(format!("{}{}", self.prefix, file))
    }
}

/// Everything one run needs. Immutable once the run starts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub db: DbConfig,
    pub table: String,
    pub year: i32,
    pub month: u32,
    pub batch_size: usize,
    pub template: SourceTemplate,
    /// Explicit source path or URL; overrides the template when set
    pub source: Option<String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            db: DbConfig::default(),
            table: DEFAULT_TABLE.to_string(),
            year: 2021,
            month: 1,
            batch_size: DEFAULT_BATCH_SIZE,
            template: SourceTemplate::default(),
            source: None,
        }
    }
}

impl JobConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(LoadError::InvalidConfig(
                "batch size must be a positive integer".to_string(),
            ));
        }
        if self.table.trim().is_empty() {
            return Err(LoadError::InvalidConfig("table name is empty".to_string()));
        }
        if self.source.is_none() {
            validate_month(self.month)?;
        }
        Ok(())
    }

    pub fn source_location(&self) -> Result<SourceLocation> {
        match &self.source {
            Some(source) => Ok(SourceLocation::parse(source)),
            None => Ok(SourceLocation::Url(self.template.render(self.year, self.month)?)),
        }
    }
}

fn validate_month(month: u32) -> Result<()> {
    if (1..=12).contains(&month) {
        Ok(())
    } else {
        Err(LoadError::InvalidConfig(format!(
            "month must be between 1 and 12, got {}",
            month
        )))
    }
}
