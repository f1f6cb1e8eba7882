//! Backend statement execution.
//!
//! Runs a statement on any sqlx executor (pool, single connection or open
//! transaction) and converts the outcome into crate types.
//!
//! # Architecture
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `mysql`: MySQL-specific execution
//! - `postgres`: PostgreSQL-specific execution
//! - `sqlite`: SQLite-specific execution
//!
//! Each submodule provides identical functionality adapted to the database's type system.

use crate::db::params::{mysql_query, postgres_query, sqlite_query};
use crate::db::types::RowToJson;
use crate::error::DbResult;
use crate::models::{ExecResult, QueryParam, Row};
use sqlx::Executor;

/// How a statement is sent to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementMode {
    /// Statements without arguments go over the simple protocol, so
    /// multi-statement scripts and DDL that refuses preparation still work.
    Direct,
    /// Always go through the connection's prepared statement cache.
    Prepared,
}

impl StatementMode {
    fn raw(self, params: &[QueryParam]) -> bool {
        self == Self::Direct && params.is_empty()
    }
}

pub(crate) mod mysql {
    use super::*;
    use sqlx::MySql;
    use sqlx::mysql::MySqlRow;

    pub async fn execute<'e, E>(
        executor: E,
        sql: &'e str,
        params: &'e [QueryParam],
        mode: StatementMode,
    ) -> DbResult<ExecResult>
    where
        E: 'e + Executor<'e, Database = MySql>,
    {
        let result = if mode.raw(params) {
            executor.execute(sql).await?
        } else {
            mysql_query(sql, params).execute(executor).await?
        };
        Ok(ExecResult::new(
            i64::try_from(result.last_insert_id()).ok(),
            result.rows_affected(),
        ))
    }

    pub async fn fetch_all<'e, E>(
        executor: E,
        sql: &'e str,
        params: &'e [QueryParam],
        mode: StatementMode,
    ) -> DbResult<Vec<Row>>
    where
        E: 'e + Executor<'e, Database = MySql>,
    {
        let rows: Vec<MySqlRow> = if mode.raw(params) {
            executor.fetch_all(sql).await?
        } else {
            mysql_query(sql, params).fetch_all(executor).await?
        };
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    pub async fn fetch_optional<'e, E>(
        executor: E,
        sql: &'e str,
        params: &'e [QueryParam],
        mode: StatementMode,
    ) -> DbResult<Option<Row>>
    where
        E: 'e + Executor<'e, Database = MySql>,
    {
        let row: Option<MySqlRow> = if mode.raw(params) {
            executor.fetch_optional(sql).await?
        } else {
            mysql_query(sql, params).fetch_optional(executor).await?
        };
        Ok(row.as_ref().map(RowToJson::to_json_map))
    }

    pub async fn prepare<'e, E>(executor: E, sql: &'e str) -> DbResult<()>
    where
        E: 'e + Executor<'e, Database = MySql>,
    {
        executor.prepare(sql).await?;
        Ok(())
    }
}

pub(crate) mod postgres {
    use super::*;
    use sqlx::Postgres;
    use sqlx::postgres::PgRow;

    pub async fn execute<'e, E>(
        executor: E,
        sql: &'e str,
        params: &'e [QueryParam],
        mode: StatementMode,
    ) -> DbResult<ExecResult>
    where
        E: 'e + Executor<'e, Database = Postgres>,
    {
        let result = if mode.raw(params) {
            executor.execute(sql).await?
        } else {
            postgres_query(sql, params).execute(executor).await?
        };
        // PostgreSQL has no last-insert-id; use RETURNING instead
        Ok(ExecResult::new(None, result.rows_affected()))
    }

    pub async fn fetch_all<'e, E>(
        executor: E,
        sql: &'e str,
        params: &'e [QueryParam],
        mode: StatementMode,
    ) -> DbResult<Vec<Row>>
    where
        E: 'e + Executor<'e, Database = Postgres>,
    {
        let rows: Vec<PgRow> = if mode.raw(params) {
            executor.fetch_all(sql).await?
        } else {
            postgres_query(sql, params).fetch_all(executor).await?
        };
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    pub async fn fetch_optional<'e, E>(
        executor: E,
        sql: &'e str,
        params: &'e [QueryParam],
        mode: StatementMode,
    ) -> DbResult<Option<Row>>
    where
        E: 'e + Executor<'e, Database = Postgres>,
    {
        let row: Option<PgRow> = if mode.raw(params) {
            executor.fetch_optional(sql).await?
        } else {
            postgres_query(sql, params).fetch_optional(executor).await?
        };
        Ok(row.as_ref().map(RowToJson::to_json_map))
    }

    pub async fn prepare<'e, E>(executor: E, sql: &'e str) -> DbResult<()>
    where
        E: 'e + Executor<'e, Database = Postgres>,
    {
        executor.prepare(sql).await?;
        Ok(())
    }
}

pub(crate) mod sqlite {
    use super::*;
    use sqlx::Sqlite;
    use sqlx::sqlite::SqliteRow;

    pub async fn execute<'e, E>(
        executor: E,
        sql: &'e str,
        params: &'e [QueryParam],
        mode: StatementMode,
    ) -> DbResult<ExecResult>
    where
        E: 'e + Executor<'e, Database = Sqlite>,
    {
        let result = if mode.raw(params) {
            executor.execute(sql).await?
        } else {
            sqlite_query(sql, params).execute(executor).await?
        };
        Ok(ExecResult::new(
            Some(result.last_insert_rowid()),
            result.rows_affected(),
        ))
    }

    pub async fn fetch_all<'e, E>(
        executor: E,
        sql: &'e str,
        params: &'e [QueryParam],
        mode: StatementMode,
    ) -> DbResult<Vec<Row>>
    where
        E: 'e + Executor<'e, Database = Sqlite>,
    {
        let rows: Vec<SqliteRow> = if mode.raw(params) {
            executor.fetch_all(sql).await?
        } else {
            sqlite_query(sql, params).fetch_all(executor).await?
        };
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    pub async fn fetch_optional<'e, E>(
        executor: E,
        sql: &'e str,
        params: &'e [QueryParam],
        mode: StatementMode,
    ) -> DbResult<Option<Row>>
    where
        E: 'e + Executor<'e, Database = Sqlite>,
    {
        let row: Option<SqliteRow> = if mode.raw(params) {
            executor.fetch_optional(sql).await?
        } else {
            sqlite_query(sql, params).fetch_optional(executor).await?
        };
        Ok(row.as_ref().map(RowToJson::to_json_map))
    }

    pub async fn prepare<'e, E>(executor: E, sql: &'e str) -> DbResult<()>
    where
        E: 'e + Executor<'e, Database = Sqlite>,
    {
        executor.prepare(sql).await?;
        Ok(())
    }
}
