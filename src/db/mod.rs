//! Database module for PostgreSQL connection and table writes
//!
//! This module provides the destination side of a load: pool setup and the
//! `TableSink` implementation that creates and fills the target table

pub mod connection;
pub mod table_writer;

pub use connection::init_pool;
pub use table_writer::PostgresSink;
