//! Transaction boundary: exactly one terminal action per transaction.

mod common;

use common::{MockDb, count, mock_conn};
use futures_util::FutureExt;
use sql_breaker::db::Connection;
use sql_breaker::{DbError, DbResult, Session, TransactionState, params, with_begin};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

fn explode() -> DbResult<()> {
    panic!("inventory service exploded")
}

#[tokio::test]
async fn test_transact_commits_on_success() {
    let db = MockDb::new();
    let conn = mock_conn(&db, vec![]);

    let result = conn
        .transact(|session| async move {
            session
                .execute("INSERT INTO orders (sku) VALUES (?)", &params!["A-1"])
                .await?;
            Ok(())
        })
        .await;

    assert!(result.is_ok());
    assert_eq!(count(&db.begins), 1);
    assert_eq!(count(&db.commits), 1);
    assert_eq!(count(&db.rollbacks), 0);
}

#[tokio::test]
async fn test_transact_rolls_back_on_error() {
    let db = MockDb::new();
    let conn = mock_conn(&db, vec![]);

    let result: Result<(), DbError> = conn
        .transact(|session| async move {
            session
                .execute("INSERT INTO orders (sku) VALUES (?)", &params!["A-1"])
                .await?;
            Err(DbError::invalid_input("quantity must be positive"))
        })
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { .. }));
    assert_eq!(err.to_string(), "Invalid input: quantity must be positive");
    assert_eq!(count(&db.rollbacks), 1);
    assert_eq!(count(&db.commits), 0);
}

#[tokio::test]
async fn test_transact_rolls_back_on_panic() {
    let db = MockDb::new();
    let conn = mock_conn(&db, vec![]);

    let result: Result<(), DbError> = conn
        .transact(|session| async move {
            session.execute("DELETE FROM carts", &[]).await?;
            explode()
        })
        .await;

    match result {
        Err(DbError::Panicked { message, rollback }) => {
            assert_eq!(message, "inventory service exploded");
            assert!(rollback.is_none());
        }
        other => panic!("expected Panicked, got {:?}", other),
    }
    assert_eq!(count(&db.rollbacks), 1);
    assert_eq!(count(&db.commits), 0);
}

#[tokio::test]
async fn test_transact_rolls_back_when_work_panics_before_awaiting() {
    let db = MockDb::new();
    let conn = mock_conn(&db, vec![]);

    let result: Result<(), DbError> = conn
        .transact(|_session| {
            if db.begins.load(Ordering::SeqCst) > 0 {
                panic!("refusing to build work");
            }
            async { Ok(()) }
        })
        .await;

    assert!(matches!(result, Err(DbError::Panicked { .. })));
    assert_eq!(count(&db.rollbacks), 1);
    assert_eq!(count(&db.commits), 0);
}

#[tokio::test]
async fn test_rollback_failure_reports_both_errors() {
    let db = MockDb::new();
    db.fail_rollback.store(true, Ordering::SeqCst);
    let conn = mock_conn(&db, vec![]);

    let err = conn
        .transact::<(), _, _>(|_session| async { Err(DbError::invalid_input("bad order")) })
        .await
        .unwrap_err();

    match &err {
        DbError::RollbackFailed { cause, rollback } => {
            assert!(matches!(**cause, DbError::InvalidInput { .. }));
            assert!(rollback.is_instance_error());
        }
        other => panic!("expected RollbackFailed, got {:?}", other),
    }
    let message = err.to_string();
    assert!(message.contains("bad order"));
    assert!(message.contains("connection reset during rollback"));
}

#[tokio::test]
async fn test_panic_with_failed_rollback_reports_both() {
    let db = MockDb::new();
    db.fail_rollback.store(true, Ordering::SeqCst);
    let conn = mock_conn(&db, vec![]);

    let err = conn
        .transact(|_session| async { explode() })
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::Panicked { rollback: Some(_), .. }));
    assert!(err.to_string().contains("exploded"));
    assert!(err.to_string().contains("rollback failed"));
    assert_eq!(count(&db.rollbacks), 1);
}

#[tokio::test]
async fn test_commit_failure_is_the_result() {
    let db = MockDb::new();
    db.fail_commit.store(true, Ordering::SeqCst);
    let conn = mock_conn(&db, vec![]);

    let err = conn
        .transact(|_session| async { Ok(42) })
        .await
        .unwrap_err();

    assert!(err.to_string().contains("commit"));
    assert_eq!(count(&db.commits), 1);
    assert_eq!(count(&db.rollbacks), 0);
}

#[tokio::test]
async fn test_session_unusable_after_transaction() {
    let db = MockDb::new();
    let conn = mock_conn(&db, vec![]);
    let leaked: Arc<Mutex<Option<Session>>> = Arc::new(Mutex::new(None));

    let stash = Arc::clone(&leaked);
    let value = conn
        .transact(move |session| async move {
            *stash.lock().unwrap() = Some(session.clone());
            Ok("done")
        })
        .await
        .unwrap();
    assert_eq!(value, "done");

    let session = leaked.lock().unwrap().take().unwrap();
    assert_eq!(session.state(), TransactionState::Committed);
    assert!(matches!(
        session.execute("SELECT 1", &[]).await,
        Err(DbError::TransactionDone)
    ));
    assert!(matches!(session.rollback().await, Err(DbError::TransactionDone)));
    assert!(matches!(session.prepare("SELECT 1").await, Err(DbError::TransactionDone)));
    assert_eq!(count(&db.commits), 1);
    assert_eq!(count(&db.rollbacks), 0);
}

#[tokio::test]
async fn test_work_may_finish_transaction_itself() {
    let db = MockDb::new();
    let conn = mock_conn(&db, vec![]);

    let result = conn
        .transact(|session| async move {
            session.execute("UPDATE stock SET qty = qty - 1", &[]).await?;
            session.rollback().await?;
            Ok(())
        })
        .await;

    assert!(result.is_ok());
    assert_eq!(count(&db.rollbacks), 1);
    assert_eq!(count(&db.commits), 0);
}

#[tokio::test]
async fn test_begin_failure_skips_work() {
    let db = MockDb::new();
    db.fail_begin.store(true, Ordering::SeqCst);
    let conn = mock_conn(&db, vec![]);
    let mut ran = false;

    let result = conn
        .transact(|_session| {
            ran = true;
            async { Ok(()) }
        })
        .await;

    assert!(result.is_err());
    assert!(!ran);
    assert_eq!(count(&db.commits) + count(&db.rollbacks), 0);
}

#[tokio::test]
async fn test_custom_begin_strategy() {
    let db = MockDb::new();
    let begun = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&begun);
    let begin: sql_breaker::BeginFn = Arc::new(move |conn: Arc<dyn Connection>| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { conn.begin().await }.boxed()
    });
    let conn = mock_conn(&db, vec![with_begin(begin)]);

    conn.transact(|_session| async { Ok(()) }).await.unwrap();
    assert_eq!(begun.load(Ordering::SeqCst), 1);
    assert_eq!(count(&db.commits), 1);
}

#[tokio::test]
async fn test_each_transaction_acquires_its_own_connection() {
    let db = MockDb::new();
    let conn = mock_conn(&db, vec![]);

    for _ in 0..3 {
        conn.transact(|_session| async { Ok(()) }).await.unwrap();
    }
    assert_eq!(count(&db.acquires), 3);
    assert_eq!(count(&db.begins), 3);
    assert_eq!(count(&db.commits), 3);
}

#[tokio::test]
async fn test_session_queries_decode_rows() {
    let db = MockDb::new();
    db.set_rows(vec![serde_json::json!({"id": 7})]);
    let conn = mock_conn(&db, vec![]);

    let (id, rows) = conn
        .transact(|session| async move {
            let id: i64 = session.query_row("SELECT id FROM orders LIMIT 1", &[]).await?;
            let rows: Vec<serde_json::Value> =
                session.query_rows("SELECT id FROM orders", &[]).await?;
            Ok((id, rows))
        })
        .await
        .unwrap();

    assert_eq!(id, 7);
    assert_eq!(rows, vec![serde_json::json!({"id": 7})]);
    assert_eq!(count(&db.commits), 1);
}

#[tokio::test]
async fn test_session_no_rows_is_returned_to_work() {
    let db = MockDb::new();
    let conn = mock_conn(&db, vec![]);

    let found = conn
        .transact(|session| async move {
            match session.query_row::<i64>("SELECT id FROM orders WHERE id = ?", &params![9]).await {
                Ok(id) => Ok(Some(id)),
                Err(DbError::NoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .unwrap();

    assert_eq!(found, None);
    assert_eq!(count(&db.commits), 1);
}
