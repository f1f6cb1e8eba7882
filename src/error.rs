//! Error types for breaker-guarded SQL access.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! The variants follow the failure taxonomy of the crate: breaker rejections,
//! instance (connection) failures, statement failures, handle-state misuse and
//! transaction-integrity failures.

use thiserror::Error;

/// Constraint class of a database-reported error, independent of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    UniqueViolation,
    ForeignKeyViolation,
    NotNullViolation,
    CheckViolation,
    Other,
}

impl From<sqlx::error::ErrorKind> for DatabaseErrorKind {
    fn from(kind: sqlx::error::ErrorKind) -> Self {
        match kind {
            sqlx::error::ErrorKind::UniqueViolation => Self::UniqueViolation,
            sqlx::error::ErrorKind::ForeignKeyViolation => Self::ForeignKeyViolation,
            sqlx::error::ErrorKind::NotNullViolation => Self::NotNullViolation,
            sqlx::error::ErrorKind::CheckViolation => Self::CheckViolation,
            _ => Self::Other,
        }
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Circuit breaker is open for {name}")]
    BreakerOpen { name: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "23505" for unique violation
        sql_state: Option<String>,
        /// Engine-specific error number (MySQL error codes such as 1062)
        vendor_code: Option<u16>,
        kind: DatabaseErrorKind,
    },

    #[error("No rows in result set")]
    NoRows,

    #[error("Transaction has already been committed or rolled back")]
    TransactionDone,

    #[error("Statement handle is closed")]
    StatementClosed,

    #[error(
        "Prepared statement mode is not enabled for this connection. Set statement_cache_capacity above 0."
    )]
    PreparedModeRequired,

    #[error("Transaction failed: {cause}, rollback failed: {rollback}")]
    RollbackFailed {
        cause: Box<DbError>,
        rollback: Box<DbError>,
    },

    #[error(
        "Transaction work panicked: {message}{}",
        .rollback.as_ref().map(|e| format!(", rollback failed: {e}")).unwrap_or_default()
    )]
    Panicked {
        message: String,
        rollback: Option<Box<DbError>>,
    },

    #[error("Failed to decode row: {message}")]
    Decode { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a statement-level database error.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        vendor_code: Option<u16>,
        kind: DatabaseErrorKind,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            vendor_code,
            kind,
        }
    }

    pub fn breaker_open(name: impl Into<String>) -> Self {
        Self::BreakerOpen { name: name.into() }
    }

    /// Combine a failed transaction with the failure of its rollback.
    pub fn rollback_failed(cause: DbError, rollback: DbError) -> Self {
        Self::RollbackFailed {
            cause: Box::new(cause),
            rollback: Box::new(rollback),
        }
    }

    /// Report a panic recovered at the transaction boundary.
    pub fn panicked(message: impl Into<String>, rollback: Option<DbError>) -> Self {
        Self::Panicked {
            message: message.into(),
            rollback: rollback.map(Box::new),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::PreparedModeRequired => {
                Some("Enable the statement cache on the datasource URL")
            }
            Self::BreakerOpen { .. } => Some("The datasource is failing; retry later"),
            _ => None,
        }
    }

    /// The "no rows" sentinel returned by single-row queries.
    pub fn is_no_rows(&self) -> bool {
        matches!(self, Self::NoRows)
    }

    pub fn is_transaction_done(&self) -> bool {
        matches!(self, Self::TransactionDone)
    }

    /// Whether the datasource itself could not be reached.
    pub fn is_instance_error(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    pub fn is_breaker_open(&self) -> bool {
        matches!(self, Self::BreakerOpen { .. })
    }

    /// Engine-specific error number, when the database reported one.
    pub fn vendor_code(&self) -> Option<u16> {
        match self {
            Self::Database { vendor_code, .. } => *vendor_code,
            _ => None,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let sql_state = db_err.code().map(|c| c.to_string());
                let vendor_code = db_err
                    .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
                    .map(|e| e.number());
                let kind = DatabaseErrorKind::from(db_err.kind());
                DbError::database(db_err.message(), sql_state, vendor_code, kind)
            }
            sqlx::Error::RowNotFound => DbError::NoRows,
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out acquiring a connection from the pool",
                "Check database availability or raise max_connections",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::decode(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::decode(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::decode(source.to_string()),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
