pub mod config;
pub mod db;
pub mod error;
pub mod ingestion;
pub mod job;

pub use config::{DbConfig, JobConfig, SourceTemplate};
pub use error::{LoadError, Result};
pub use job::{preview, run_job, run_job_with_sink};
