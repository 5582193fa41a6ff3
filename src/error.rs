use thiserror::Error;

use crate::ingestion::schema::ColumnType;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Schema mismatch at line {line}: column {column} expected {expected}, got {value:?}")]
    SchemaMismatch {
        line: u64,
        column: String,
        value: String,
        expected: ColumnType,
    },

    #[error("Schema mismatch: {0}")]
    StructureMismatch(String),

    #[error("Destination unavailable: {0}")]
    DestinationUnavailable(String),

    #[error("Write failure: {0}")]
    WriteFailure(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LoadError {
    /// Short name of the error kind, used in progress events and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            LoadError::SourceUnavailable(_) => "SourceUnavailable",
            LoadError::SchemaMismatch { .. } | LoadError::StructureMismatch(_) => "SchemaMismatch",
            LoadError::DestinationUnavailable(_) => "DestinationUnavailable",
            LoadError::WriteFailure(_) => "WriteFailure",
            LoadError::InvalidConfig(_) => "InvalidConfig",
        }
    }

    pub fn is_schema_mismatch(&self) -> bool {
        matches!(self, LoadError::SchemaMismatch { .. } | LoadError::StructureMismatch(_))
    }
}

impl From<reqwest::Error> for LoadError {
    fn from(err: reqwest::Error) -> Self {
        LoadError::SourceUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LoadError>;
