//! Prepared statement handles.

use crate::db::PreparedStatement;
use crate::error::{DbError, DbResult};
use crate::executor::{Operation, QueryExecutor};
use crate::models::{ExecResult, QueryParam};
use crate::rows::{all_rows, first_row};
use serde::de::DeserializeOwned;
use std::fmt;
use tracing::{debug, warn};

enum Handle {
    Open(Box<dyn PreparedStatement>),
    /// The connection has no prepared-statement capability
    Unprepared,
    Released,
}

/// A prepared statement.
///
/// Outside a transaction the handle holds no connection; each call borrows one
/// from the pool. Inside a transaction it runs on the transaction's
/// connection. Every operation after [`Statement::release`] fails with
/// [`DbError::StatementClosed`].
pub struct Statement {
    query: String,
    handle: Handle,
    executor: QueryExecutor,
    transaction_id: Option<String>,
}

impl Statement {
    pub(crate) fn new(
        query: impl Into<String>,
        prepared: Option<Box<dyn PreparedStatement>>,
        executor: QueryExecutor,
        transaction_id: Option<String>,
    ) -> Self {
        Self {
            query: query.into(),
            handle: prepared.map_or(Handle::Unprepared, Handle::Open),
            executor,
            transaction_id,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn is_released(&self) -> bool {
        matches!(self.handle, Handle::Released)
    }

    fn handle(&self) -> DbResult<&dyn PreparedStatement> {
        match &self.handle {
            Handle::Open(stmt) => Ok(stmt.as_ref()),
            Handle::Unprepared => Err(DbError::PreparedModeRequired),
            Handle::Released => Err(DbError::StatementClosed),
        }
    }

    pub async fn execute(&self, params: &[QueryParam]) -> DbResult<ExecResult> {
        let stmt = self.handle()?;
        self.executor
            .run(
                Operation::ExecStatement,
                &self.query,
                params,
                self.transaction_id.as_deref(),
                stmt.execute(params),
            )
            .await
    }

    /// Decode the first row. An empty result is [`DbError::NoRows`].
    pub async fn query_row<T: DeserializeOwned>(&self, params: &[QueryParam]) -> DbResult<T> {
        let stmt = self.handle()?;
        let row = self
            .executor
            .run(
                Operation::QueryStatement,
                &self.query,
                params,
                self.transaction_id.as_deref(),
                stmt.fetch_optional(params),
            )
            .await?;
        first_row(row)
    }

    pub async fn query_rows<T: DeserializeOwned>(&self, params: &[QueryParam]) -> DbResult<Vec<T>> {
        let rows = self.fetch(params).await?;
        all_rows(rows)
    }

    async fn fetch(&self, params: &[QueryParam]) -> DbResult<Vec<crate::models::Row>> {
        let stmt = self.handle()?;
        self.executor
            .run(
                Operation::QueryStatement,
                &self.query,
                params,
                self.transaction_id.as_deref(),
                stmt.fetch_all(params),
            )
            .await
    }

    /// Free the prepared statement.
    ///
    /// Fails with [`DbError::PreparedModeRequired`] when the connection is not
    /// in prepared-statement mode, and with [`DbError::StatementClosed`] on a
    /// second call.
    pub async fn release(&mut self) -> DbResult<()> {
        match std::mem::replace(&mut self.handle, Handle::Released) {
            Handle::Open(stmt) => {
                debug!(sql = %self.query, "Releasing prepared statement");
                stmt.close().await
            }
            Handle::Unprepared => {
                self.handle = Handle::Unprepared;
                Err(DbError::PreparedModeRequired)
            }
            Handle::Released => Err(DbError::StatementClosed),
        }
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        if matches!(self.handle, Handle::Open(_)) {
            warn!(sql = %self.query, "Prepared statement dropped without release");
        }
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handle = match self.handle {
            Handle::Open(_) => "open",
            Handle::Unprepared => "unprepared",
            Handle::Released => "released",
        };
        f.debug_struct("Statement")
            .field("query", &self.query)
            .field("handle", &handle)
            .field("transaction_id", &self.transaction_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Row;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStatement {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PreparedStatement for CountingStatement {
        async fn execute(&self, _params: &[QueryParam]) -> DbResult<ExecResult> {
            Ok(ExecResult::new(Some(9), 1))
        }

        async fn fetch_all(&self, _params: &[QueryParam]) -> DbResult<Vec<Row>> {
            Ok(Vec::new())
        }

        async fn fetch_optional(&self, _params: &[QueryParam]) -> DbResult<Option<Row>> {
            Ok(None)
        }

        async fn close(&self) -> DbResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_release_twice_fails() {
        let closes = Arc::new(AtomicUsize::new(0));
        let prepared = CountingStatement {
            closes: Arc::clone(&closes),
        };
        let mut stmt = Statement::new("DELETE FROM t", Some(Box::new(prepared)), QueryExecutor::default(), None);

        assert_eq!(stmt.execute(&[]).await.unwrap().rows_affected, 1);
        stmt.release().await.unwrap();
        assert!(stmt.is_released());
        assert!(matches!(stmt.release().await, Err(DbError::StatementClosed)));
        assert!(matches!(stmt.execute(&[]).await, Err(DbError::StatementClosed)));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unprepared_handle_requires_prepared_mode() {
        let mut stmt = Statement::new("SELECT 1", None, QueryExecutor::default(), None);
        assert!(matches!(stmt.release().await, Err(DbError::PreparedModeRequired)));
        assert!(matches!(
            stmt.query_rows::<i64>(&[]).await,
            Err(DbError::PreparedModeRequired)
        ));
        assert!(!stmt.is_released());
    }

    #[tokio::test]
    async fn test_query_row_empty_is_no_rows() {
        let mut stmt = Statement::new(
            "SELECT id FROM t WHERE id = ?",
            Some(Box::new(CountingStatement::default())),
            QueryExecutor::default(),
            Some("tx_test".to_string()),
        );
        let err = stmt.query_row::<i64>(&crate::params![1]).await.unwrap_err();
        assert!(err.is_no_rows());
        stmt.release().await.unwrap();
    }
}
