//! Collaborator interfaces between the breaker-gated layer and a SQL driver.
//!
//! The sqlx implementations live in [`crate::db::pool`] and
//! [`crate::db::transaction`]; tests plug in their own.

use crate::error::DbResult;
use crate::models::{DataSource, ExecResult, QueryParam, Row};
use async_trait::async_trait;
use std::sync::Arc;

/// Produces (possibly cached) connections for a datasource.
///
/// Every error returned here is an instance error: the datasource could not be
/// reached at all.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn acquire(&self, source: &DataSource) -> DbResult<Arc<dyn Connection>>;
}

/// A usable handle onto a datasource.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<ExecResult>;

    async fn fetch_all(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>>;

    /// Read at most one row; the rest of the result set is discarded unread.
    async fn fetch_optional(&self, sql: &str, params: &[QueryParam]) -> DbResult<Option<Row>>;

    /// Open a transaction on a dedicated connection.
    async fn begin(&self) -> DbResult<Box<dyn TransactionContext>>;

    /// Prepared-statement capability, when the pool runs in prepared mode.
    fn prepared(&self) -> Option<&dyn PreparedStatements> {
        None
    }
}

/// One live transaction. Every method fails with `TransactionDone` once a
/// terminal action has run.
#[async_trait]
pub trait TransactionContext: Send + Sync {
    async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<ExecResult>;

    async fn fetch_all(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>>;

    async fn fetch_optional(&self, sql: &str, params: &[QueryParam]) -> DbResult<Option<Row>>;

    async fn commit(&self) -> DbResult<()>;

    async fn rollback(&self) -> DbResult<()>;

    fn prepared(&self) -> Option<&dyn PreparedStatements> {
        None
    }
}

#[async_trait]
pub trait PreparedStatements: Send + Sync {
    async fn prepare(&self, sql: &str) -> DbResult<Box<dyn PreparedStatement>>;
}

/// A prepared statement bound to its SQL text.
#[async_trait]
pub trait PreparedStatement: Send + Sync {
    async fn execute(&self, params: &[QueryParam]) -> DbResult<ExecResult>;

    async fn fetch_all(&self, params: &[QueryParam]) -> DbResult<Vec<Row>>;

    async fn fetch_optional(&self, params: &[QueryParam]) -> DbResult<Option<Row>>;

    /// Free the server-side statement.
    async fn close(&self) -> DbResult<()>;
}
