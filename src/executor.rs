//! Timing and logging around every statement.
//!
//! The façade, transaction sessions and prepared statements all run their
//! driver calls through [`QueryExecutor::run`], so slow-call detection and
//! error logging look the same whichever path issued the call.

use crate::config::DEFAULT_SLOW_THRESHOLD_MS;
use crate::error::{DbError, DbResult};
use crate::models::QueryParam;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Kind of call, used as the log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Exec,
    Query,
    ExecStatement,
    QueryStatement,
    Prepare,
}

impl Operation {
    fn as_str(&self) -> &'static str {
        match self {
            Operation::Exec => "exec",
            Operation::Query => "query",
            Operation::ExecStatement => "exec statement",
            Operation::QueryStatement => "query statement",
            Operation::Prepare => "prepare",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a statement could not be rendered for logging.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("statement has {placeholders} placeholders but {args} arguments were bound")]
    ArgumentCount { placeholders: usize, args: usize },
    #[error("placeholder ${0} has no bound argument")]
    UnknownPlaceholder(usize),
}

/// Shared instrumentation settings.
#[derive(Debug, Clone, Copy)]
pub struct QueryExecutor {
    slow_threshold: Duration,
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_SLOW_THRESHOLD_MS))
    }
}

impl QueryExecutor {
    pub fn new(slow_threshold: Duration) -> Self {
        Self { slow_threshold }
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    /// Strictly slower than the threshold.
    pub fn is_slow(&self, elapsed: Duration) -> bool {
        elapsed > self.slow_threshold
    }

    /// Await `call`, then log its duration and failure. The result is
    /// returned untouched.
    pub async fn run<T, F>(
        &self,
        op: Operation,
        sql: &str,
        params: &[QueryParam],
        transaction_id: Option<&str>,
        call: F,
    ) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        let start = Instant::now();
        let result = call.await;
        self.report(op, sql, params, transaction_id, start.elapsed(), result.as_ref().err());
        result
    }

    fn report(
        &self,
        op: Operation,
        sql: &str,
        params: &[QueryParam],
        transaction_id: Option<&str>,
        elapsed: Duration,
        failure: Option<&DbError>,
    ) {
        let statement = render(sql, params);
        let duration_ms = elapsed.as_millis() as u64;
        let tx = transaction_id.unwrap_or("");
        if self.is_slow(elapsed) {
            warn!(
                sql = %statement,
                duration_ms,
                transaction_id = tx,
                "slow {}", op
            );
        } else {
            debug!(
                sql = %statement,
                duration_ms,
                transaction_id = tx,
                "{}", op
            );
        }
        if let Some(e) = failure {
            error!(
                sql = %statement,
                duration_ms,
                transaction_id = tx,
                error = %e,
                "{} failed", op
            );
        }
    }
}

fn render(sql: &str, params: &[QueryParam]) -> String {
    format_statement(sql, params).unwrap_or_else(|e| {
        debug!(error = %e, "Could not format statement, logging template");
        if params.is_empty() {
            sql.to_string()
        } else {
            let args: Vec<String> = params.iter().map(QueryParam::to_sql_literal).collect();
            format!("{} [{}]", sql, args.join(", "))
        }
    })
}

/// Inline bound arguments into a statement for logging.
///
/// Handles `?` (MySQL, SQLite) and `$N` (PostgreSQL) placeholders and leaves
/// quoted text alone. The output is for humans only and is never executed.
pub fn format_statement(sql: &str, params: &[QueryParam]) -> Result<String, FormatError> {
    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut chars = sql.chars().peekable();
    let mut positional = 0usize;
    let mut numbered = false;
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                out.push(c);
            }
            '?' => {
                let param = params.get(positional).ok_or(FormatError::ArgumentCount {
                    placeholders: positional + 1,
                    args: params.len(),
                })?;
                out.push_str(&param.to_sql_literal());
                positional += 1;
            }
            '$' if chars.peek().is_some_and(char::is_ascii_digit) => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    digits.push(d);
                    chars.next();
                }
                let index: usize = digits.parse().unwrap_or(0);
                let param = index
                    .checked_sub(1)
                    .and_then(|i| params.get(i))
                    .ok_or(FormatError::UnknownPlaceholder(index))?;
                out.push_str(&param.to_sql_literal());
                numbered = true;
            }
            _ => out.push(c),
        }
    }

    if !numbered && positional != params.len() {
        return Err(FormatError::ArgumentCount {
            placeholders: positional,
            args: params.len(),
        });
    }
    Ok(out)
}
