//! Outcome classification for the circuit breaker.
//!
//! An outcome is acceptable when it says nothing about the health of the
//! datasource: success, an empty result set, or a transaction that was
//! already finished. Engine plugins can widen that set, for example to accept
//! duplicate-key errors on idempotent inserts.

use crate::error::{DatabaseErrorKind, DbError, DbResult};
use std::fmt;
use std::sync::Arc;

/// MySQL `ER_DUP_ENTRY`.
pub const MYSQL_DUPLICATE_ENTRY: u16 = 1062;

type Predicate = Arc<dyn Fn(&DbError) -> bool + Send + Sync>;

/// Decides whether an outcome counts toward the breaker's failure budget.
#[derive(Clone, Default)]
pub struct Acceptable {
    engine: Option<Predicate>,
}

impl Acceptable {
    /// Baseline only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Baseline OR-ed with an engine-specific predicate.
    pub fn with_engine<F>(predicate: F) -> Self
    where
        F: Fn(&DbError) -> bool + Send + Sync + 'static,
    {
        Self {
            engine: Some(Arc::new(predicate)),
        }
    }

    /// OR another predicate into the engine-specific part.
    pub fn or<F>(self, predicate: F) -> Self
    where
        F: Fn(&DbError) -> bool + Send + Sync + 'static,
    {
        match self.engine {
            None => Self::with_engine(predicate),
            Some(existing) => Self::with_engine(move |e: &DbError| existing(e) || predicate(e)),
        }
    }

    pub fn has_engine_predicate(&self) -> bool {
        self.engine.is_some()
    }

    /// Classify an error. `None` means the call succeeded.
    pub fn accept(&self, err: Option<&DbError>) -> bool {
        let Some(err) = err else {
            return true;
        };
        if is_baseline_acceptable(err) {
            return true;
        }
        // The datasource itself failing is never a business condition
        if err.is_instance_error() || err.is_breaker_open() {
            return false;
        }
        self.engine.as_ref().is_some_and(|predicate| predicate(err))
    }

    /// Classify a call result.
    pub fn accept_result<T>(&self, result: &DbResult<T>) -> bool {
        self.accept(result.as_ref().err())
    }
}

impl fmt::Debug for Acceptable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acceptable")
            .field("engine", &self.engine.is_some())
            .finish()
    }
}

/// Errors that are acceptable under every configuration.
pub fn is_baseline_acceptable(err: &DbError) -> bool {
    matches!(err, DbError::NoRows | DbError::TransactionDone)
}

/// Accepts database errors carrying one of the given vendor error numbers.
pub fn vendor_codes(codes: Vec<u16>) -> impl Fn(&DbError) -> bool + Send + Sync + 'static {
    move |err: &DbError| err.vendor_code().is_some_and(|code| codes.contains(&code))
}

/// Accepts MySQL duplicate-entry errors.
pub fn mysql_acceptable(err: &DbError) -> bool {
    err.vendor_code() == Some(MYSQL_DUPLICATE_ENTRY)
}

/// Accepts unique-constraint violations on any engine.
pub fn unique_violation(err: &DbError) -> bool {
    matches!(
        err,
        DbError::Database {
            kind: DatabaseErrorKind::UniqueViolation,
            ..
        }
    )
}
