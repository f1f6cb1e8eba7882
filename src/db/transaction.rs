//! sqlx-backed transaction contexts.
//!
//! Each transaction holds a dedicated pooled connection until it is committed
//! or rolled back. Statements prepared inside a transaction run on that same
//! connection.

use crate::db::driver::{PreparedStatement, PreparedStatements, TransactionContext};
use crate::db::executor::{StatementMode, mysql, postgres, sqlite};
use crate::error::{DbError, DbResult};
use crate::{db_each, impl_db_dispatch};
use crate::models::{DatabaseType, ExecResult, QueryParam, Row};
use async_trait::async_trait;
use sqlx::{MySql, Postgres, Sqlite, Transaction};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Database-specific transaction wrapper.
pub enum DbTransaction {
    MySql(Transaction<'static, MySql>),
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

impl DbTransaction {
    /// Get the database type for this transaction.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbTransaction::MySql(_) => DatabaseType::MySQL,
            DbTransaction::Postgres(_) => DatabaseType::PostgreSQL,
            DbTransaction::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Commit the transaction.
    pub async fn commit(self) -> DbResult<()> {
        db_each!(DbTransaction, self, |tx| tx.commit().await.map_err(DbError::from))
    }

    /// Rollback the transaction.
    pub async fn rollback(self) -> DbResult<()> {
        db_each!(DbTransaction, self, |tx| tx.rollback().await.map_err(DbError::from))
    }
}

impl std::fmt::Debug for DbTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DbTransaction").field(&self.db_type()).finish()
    }
}

/// `None` once a terminal action has consumed the transaction.
type SharedTransaction = Arc<Mutex<Option<DbTransaction>>>;

async fn execute_on(
    shared: &SharedTransaction,
    sql: &str,
    params: &[QueryParam],
    mode: StatementMode,
) -> DbResult<ExecResult> {
    let mut guard = shared.lock().await;
    let tx = guard.as_mut().ok_or(DbError::TransactionDone)?;
    impl_db_dispatch!(DbTransaction, tx, {
        MySql(t) => mysql::execute(&mut **t, sql, params, mode).await,
        Postgres(t) => postgres::execute(&mut **t, sql, params, mode).await,
        SQLite(t) => sqlite::execute(&mut **t, sql, params, mode).await,
    })
}

async fn fetch_on(
    shared: &SharedTransaction,
    sql: &str,
    params: &[QueryParam],
    mode: StatementMode,
) -> DbResult<Vec<Row>> {
    let mut guard = shared.lock().await;
    let tx = guard.as_mut().ok_or(DbError::TransactionDone)?;
    impl_db_dispatch!(DbTransaction, tx, {
        MySql(t) => mysql::fetch_all(&mut **t, sql, params, mode).await,
        Postgres(t) => postgres::fetch_all(&mut **t, sql, params, mode).await,
        SQLite(t) => sqlite::fetch_all(&mut **t, sql, params, mode).await,
    })
}

async fn fetch_optional_on(
    shared: &SharedTransaction,
    sql: &str,
    params: &[QueryParam],
    mode: StatementMode,
) -> DbResult<Option<Row>> {
    let mut guard = shared.lock().await;
    let tx = guard.as_mut().ok_or(DbError::TransactionDone)?;
    impl_db_dispatch!(DbTransaction, tx, {
        MySql(t) => mysql::fetch_optional(&mut **t, sql, params, mode).await,
        Postgres(t) => postgres::fetch_optional(&mut **t, sql, params, mode).await,
        SQLite(t) => sqlite::fetch_optional(&mut **t, sql, params, mode).await,
    })
}

/// A live sqlx transaction.
pub struct SqlxTransaction {
    tx: SharedTransaction,
    prepared_mode: bool,
}

impl SqlxTransaction {
    pub fn new(tx: DbTransaction, prepared_mode: bool) -> Self {
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
            prepared_mode,
        }
    }

    async fn take(&self) -> DbResult<DbTransaction> {
        self.tx.lock().await.take().ok_or(DbError::TransactionDone)
    }
}

#[async_trait]
impl TransactionContext for SqlxTransaction {
    async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<ExecResult> {
        execute_on(&self.tx, sql, params, StatementMode::Direct).await
    }

    async fn fetch_all(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>> {
        fetch_on(&self.tx, sql, params, StatementMode::Direct).await
    }

    async fn fetch_optional(&self, sql: &str, params: &[QueryParam]) -> DbResult<Option<Row>> {
        fetch_optional_on(&self.tx, sql, params, StatementMode::Direct).await
    }

    async fn commit(&self) -> DbResult<()> {
        self.take().await?.commit().await
    }

    async fn rollback(&self) -> DbResult<()> {
        self.take().await?.rollback().await
    }

    fn prepared(&self) -> Option<&dyn PreparedStatements> {
        self.prepared_mode.then_some(self as &dyn PreparedStatements)
    }
}

#[async_trait]
impl PreparedStatements for SqlxTransaction {
    async fn prepare(&self, sql: &str) -> DbResult<Box<dyn PreparedStatement>> {
        {
            let mut guard = self.tx.lock().await;
            let tx = guard.as_mut().ok_or(DbError::TransactionDone)?;
            impl_db_dispatch!(DbTransaction, tx, {
                MySql(t) => mysql::prepare(&mut **t, sql).await?,
                Postgres(t) => postgres::prepare(&mut **t, sql).await?,
                SQLite(t) => sqlite::prepare(&mut **t, sql).await?,
            });
        }
        Ok(Box::new(TxStatement {
            tx: Arc::clone(&self.tx),
            sql: sql.to_string(),
        }))
    }
}

/// A statement prepared on a transaction's connection.
struct TxStatement {
    tx: SharedTransaction,
    sql: String,
}

#[async_trait]
impl PreparedStatement for TxStatement {
    async fn execute(&self, params: &[QueryParam]) -> DbResult<ExecResult> {
        execute_on(&self.tx, &self.sql, params, StatementMode::Prepared).await
    }

    async fn fetch_all(&self, params: &[QueryParam]) -> DbResult<Vec<Row>> {
        fetch_on(&self.tx, &self.sql, params, StatementMode::Prepared).await
    }

    async fn fetch_optional(&self, params: &[QueryParam]) -> DbResult<Option<Row>> {
        fetch_optional_on(&self.tx, &self.sql, params, StatementMode::Prepared).await
    }

    async fn close(&self) -> DbResult<()> {
        use sqlx::Connection as _;

        let mut guard = self.tx.lock().await;
        // A finished transaction already handed its connection back
        let Some(tx) = guard.as_mut() else {
            return Ok(());
        };
        db_each!(DbTransaction, tx, |t| (&mut **t).clear_cached_statements().await?);
        Ok(())
    }
}
