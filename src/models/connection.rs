//! Connection-related data models.
//!
//! This module defines the datasource identity that every façade is bound to.

use crate::config::{DatabaseConfig, PoolOptions};
use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Driver name, as used in log fields.
    pub fn driver_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgres",
            Self::MySQL => "mysql",
            Self::SQLite => "sqlite",
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Identity of a datasource: driver plus connection string.
///
/// Immutable once built. Two sources with the same driver and connection
/// string share one pool in the connection cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub db_type: DatabaseType,
    /// Contains sensitive data - never log, use [`DataSource::redacted`]
    #[serde(skip_serializing)]
    pub connection_string: String,
    /// Connection pool configuration options.
    #[serde(default)]
    pub pool_options: PoolOptions,
}

impl DataSource {
    /// Parse a datasource URL, splitting off pool options.
    pub fn parse(url: &str) -> DbResult<Self> {
        let config = DatabaseConfig::parse(url).map_err(DbError::invalid_input)?;
        let db_type = DatabaseType::from_connection_string(&config.connection_string)
            .ok_or_else(|| {
                DbError::invalid_input(format!(
                    "Unknown database type in connection string: {}",
                    redact(&config.connection_string)
                ))
            })?;

        Ok(Self {
            db_type,
            connection_string: config.connection_string,
            pool_options: config.pool_options,
        })
    }

    /// Key used to share pools between façades of the same datasource.
    pub fn cache_key(&self) -> (DatabaseType, String) {
        (self.db_type, self.connection_string.clone())
    }

    /// Get a display-safe version of the connection string (credentials masked).
    pub fn redacted(&self) -> String {
        redact(&self.connection_string)
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.redacted())
    }
}

fn redact(connection_string: &str) -> String {
    if let Some(at_pos) = connection_string.find('@') {
        let scheme_end = connection_string.find("://").map(|p| p + 3).unwrap_or(0);
        if let Some(colon_pos) = connection_string[scheme_end..at_pos].rfind(':') {
            let colon_pos = scheme_end + colon_pos;
            let prefix = &connection_string[..colon_pos + 1];
            let suffix = &connection_string[at_pos..];
            return format!("{}****{}", prefix, suffix);
        }
    }
    connection_string.to_string()
}
