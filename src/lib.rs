//! sql-breaker library
//!
//! Circuit-breaker guarded access to SQL databases (SQLite, PostgreSQL, MySQL):
//! instrumented statements, prepared statement handles and panic-safe
//! transactions behind one connection type, [`SqlConn`].

pub mod acceptable;
pub mod breaker;
pub mod config;
pub mod conn;
pub mod db;
pub mod error;
pub mod executor;
pub mod models;
pub mod rows;
pub mod session;
pub mod statement;

pub use acceptable::Acceptable;
pub use breaker::{Admission, Breaker, BreakerConfig, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use config::Config;
pub use conn::{
    SqlConn, SqlOption, with_acceptable, with_acceptable_codes, with_begin, with_breaker,
    with_breaker_config, with_mysql_acceptable, with_provider, with_slow_threshold,
    with_unique_violation_acceptable,
};
pub use error::{DbError, DbResult};
pub use models::{DataSource, DatabaseType, ExecResult, QueryParam, Row};
pub use session::{BeginFn, Session, TransactionState};
pub use statement::Statement;
