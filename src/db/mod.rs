//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Collaborator traits the breaker-gated layer talks to
//! - Connection pool management and the shared pool cache
//! - Backend statement execution and transactions
//! - Type mappings from rows to JSON
//! - Database dispatch macros for reducing code duplication

pub mod driver;
pub mod executor;
pub mod macros;
pub mod params;
pub mod pool;
pub mod transaction;
pub mod types;

pub use driver::{
    Connection, ConnectionProvider, PreparedStatement, PreparedStatements, TransactionContext,
};
pub use executor::StatementMode;
pub use pool::{ConnectionManager, DbPool, SqlxConnection};
pub use transaction::{DbTransaction, SqlxTransaction};
