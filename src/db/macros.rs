//! Database dispatch macros for reducing code duplication.
//!
//! Pools and transactions both come in one variant per backend. These macros
//! expand a single body into the per-backend match arms.

/// Macro for generating backend dispatch match arms.
///
/// The first argument names the enum being matched, so the same macro serves
/// `DbPool` and `DbTransaction`.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(DbPool, pool, {
///     MySql(p) => do_mysql(p),
///     Postgres(p) => do_postgres(p),
///     SQLite(p) => do_sqlite(p),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($enum:ident, $value:expr, { $($variant:ident($p:pat) => $body:expr),+ $(,)? }) => {
        match $value {
            $(
                $enum::$variant($p) => $body,
            )+
        }
    };
}

/// Run the same expression against every backend variant.
///
/// For bodies that only call generic sqlx APIs, such as closing a pool or
/// committing a transaction.
#[macro_export]
macro_rules! db_each {
    ($enum:ident, $value:expr, |$p:pat_param| $body:expr) => {
        match $value {
            $enum::MySql($p) => $body,
            $enum::Postgres($p) => $body,
            $enum::SQLite($p) => $body,
        }
    };
}

pub use db_each;
pub use impl_db_dispatch;
