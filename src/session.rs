//! Transaction sessions and the transaction boundary.
//!
//! A session moves from `Active` to either `Committed` or `RolledBack` exactly
//! once. [`transact`] owns that terminal action: it commits when the work
//! succeeds and rolls back when the work fails or panics.

use crate::db::{Connection, TransactionContext};
use crate::error::{DbError, DbResult};
use crate::executor::{Operation, QueryExecutor};
use crate::models::{ExecResult, QueryParam, Row};
use crate::rows::{all_rows, first_row};
use crate::statement::Statement;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// Opens a transaction on a connection. Replaceable through
/// [`crate::conn::with_begin`].
pub type BeginFn = Arc<
    dyn Fn(Arc<dyn Connection>) -> BoxFuture<'static, DbResult<Box<dyn TransactionContext>>>
        + Send
        + Sync,
>;

/// Default begin strategy: a fresh transaction from the connection.
pub fn default_begin() -> BeginFn {
    Arc::new(|conn: Arc<dyn Connection>| async move { conn.begin().await }.boxed())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

struct Shared {
    id: String,
    tx: Box<dyn TransactionContext>,
    state: Mutex<TransactionState>,
    executor: QueryExecutor,
}

/// One in-flight transaction.
///
/// Cloning yields another handle onto the same transaction.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    pub(crate) fn new(tx: Box<dyn TransactionContext>, executor: QueryExecutor) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: format!("tx_{}", uuid::Uuid::new_v4().simple()),
                tx,
                state: Mutex::new(TransactionState::Active),
                executor,
            }),
        }
    }

    /// Identifier used in log output.
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn state(&self) -> TransactionState {
        *self.lock_state()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TransactionState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_active(&self) -> DbResult<()> {
        match self.state() {
            TransactionState::Active => Ok(()),
            _ => Err(DbError::TransactionDone),
        }
    }

    pub async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<ExecResult> {
        self.ensure_active()?;
        self.shared
            .executor
            .run(
                Operation::Exec,
                sql,
                params,
                Some(self.id()),
                self.shared.tx.execute(sql, params),
            )
            .await
    }

    /// Decode the first row. An empty result is [`DbError::NoRows`].
    pub async fn query_row<T: DeserializeOwned>(&self, sql: &str, params: &[QueryParam]) -> DbResult<T> {
        self.ensure_active()?;
        let row = self
            .shared
            .executor
            .run(
                Operation::Query,
                sql,
                params,
                Some(self.id()),
                self.shared.tx.fetch_optional(sql, params),
            )
            .await?;
        first_row(row)
    }

    pub async fn query_rows<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<T>> {
        all_rows(self.fetch(sql, params).await?)
    }

    async fn fetch(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>> {
        self.ensure_active()?;
        self.shared
            .executor
            .run(
                Operation::Query,
                sql,
                params,
                Some(self.id()),
                self.shared.tx.fetch_all(sql, params),
            )
            .await
    }

    /// Prepare a statement on this transaction's connection.
    pub async fn prepare(&self, sql: &str) -> DbResult<Statement> {
        self.ensure_active()?;
        let prepared = match self.shared.tx.prepared() {
            Some(capability) => Some(
                self.shared
                    .executor
                    .run(Operation::Prepare, sql, &[], Some(self.id()), capability.prepare(sql))
                    .await?,
            ),
            None => None,
        };
        Ok(Statement::new(
            sql,
            prepared,
            self.shared.executor,
            Some(self.shared.id.clone()),
        ))
    }

    pub async fn commit(&self) -> DbResult<()> {
        self.finish(TransactionState::Committed).await
    }

    pub async fn rollback(&self) -> DbResult<()> {
        self.finish(TransactionState::RolledBack).await
    }

    /// Claim the terminal transition, then run it. A failed commit or
    /// rollback still leaves the session terminal.
    async fn finish(&self, target: TransactionState) -> DbResult<()> {
        {
            let mut state = self.lock_state();
            if *state != TransactionState::Active {
                return Err(DbError::TransactionDone);
            }
            *state = target;
        }

        let result = match target {
            TransactionState::Committed => self.shared.tx.commit().await,
            _ => self.shared.tx.rollback().await,
        };
        match &result {
            Ok(()) => debug!(transaction_id = %self.id(), state = ?target, "Transaction finished"),
            Err(e) => warn!(
                transaction_id = %self.id(),
                state = ?target,
                error = %e,
                "Transaction terminal action failed"
            ),
        }
        result
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Run `work` inside a new transaction on `conn`.
///
/// - `Ok` from `work` commits; a commit failure is the result.
/// - `Err` rolls back and returns the error, combined with the rollback
///   failure if there was one.
/// - A panic while building or polling the work future rolls back and is
///   returned as [`DbError::Panicked`].
///
/// If `work` already committed or rolled back itself, the boundary leaves the
/// transaction alone.
pub async fn transact<T, F, Fut>(
    conn: Arc<dyn Connection>,
    begin: &BeginFn,
    executor: QueryExecutor,
    work: F,
) -> DbResult<T>
where
    F: FnOnce(Session) -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    let tx = begin(conn).await?;
    let session = Session::new(tx, executor);
    let boundary = session.clone();
    debug!(transaction_id = %boundary.id(), "Transaction started");

    let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| work(session))) {
        Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
        Err(payload) => Err(payload),
    };

    match outcome {
        Ok(Ok(value)) => match boundary.commit().await {
            Ok(()) | Err(DbError::TransactionDone) => Ok(value),
            Err(e) => Err(e),
        },
        Ok(Err(cause)) => match boundary.rollback().await {
            Ok(()) | Err(DbError::TransactionDone) => Err(cause),
            Err(rollback) => {
                error!(
                    transaction_id = %boundary.id(),
                    error = %cause,
                    rollback_error = %rollback,
                    "Rollback failed after transaction error"
                );
                Err(DbError::rollback_failed(cause, rollback))
            }
        },
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(
                transaction_id = %boundary.id(),
                panic = %message,
                "Transaction work panicked, rolling back"
            );
            let rollback = match boundary.rollback().await {
                Ok(()) | Err(DbError::TransactionDone) => None,
                Err(e) => Some(e),
            };
            if rollback.is_none() {
                info!(transaction_id = %boundary.id(), "Rolled back after panic");
            }
            Err(DbError::panicked(message, rollback))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_payloads() {
        let from_str = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(from_str.as_ref()), "boom");

        let from_string = std::panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(panic_message(from_string.as_ref()), "code 7");

        let other = std::panic::catch_unwind(|| std::panic::panic_any(5u8)).unwrap_err();
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
