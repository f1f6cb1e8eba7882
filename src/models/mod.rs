//! Data models for sql-breaker.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{DataSource, DatabaseType};
pub use query::{ExecResult, QueryParam, Row};
