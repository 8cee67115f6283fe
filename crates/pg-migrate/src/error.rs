//! Error types for the migration driver.

use thiserror::Error;
use tokio_postgres::error::{ErrorPosition, SqlState};

/// Main error type for driver operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid URL, bad table name, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query error
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// Invalid database URL
    #[error("Invalid database URL: {0}")]
    Url(#[from] url::ParseError),

    /// External command failed (e.g. `pg_dump`)
    #[error("{command} failed: {message}")]
    Command { command: String, message: String },

    /// IO error (spawning the dump process, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Query error normalized with the offending statement and position
    #[error(transparent)]
    Query(#[from] QueryError),
}

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

/// A query failure annotated with the statement that caused it.
///
/// `position` is the 1-based character offset reported by the server, or 0
/// when unknown, so the caller can print a caret under the offending
/// character without knowing the engine's error shape.
#[derive(Error, Debug)]
#[error("{source}")]
pub struct QueryError {
    /// The underlying driver error.
    pub source: tokio_postgres::Error,
    /// The statement that failed.
    pub query: String,
    /// 1-based character position within `query`, or 0 if unknown.
    pub position: u32,
}

/// Engine error signals the driver branches on.
///
/// Only these two SQLSTATE codes get special treatment; every other error
/// is opaque and propagates unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// `3D000`: the target database does not exist.
    DatabaseMissing,
    /// `3F000`: the schema named in a statement does not exist.
    SchemaMissing,
    /// Anything else.
    Other,
}

/// Classify a driver error by its server-reported SQLSTATE.
///
/// Errors without a SQLSTATE (network failures, protocol errors) classify
/// as [`ErrorClass::Other`].
pub fn classify(err: &tokio_postgres::Error) -> ErrorClass {
    match err.code() {
        Some(&SqlState::UNDEFINED_DATABASE) => ErrorClass::DatabaseMissing,
        Some(&SqlState::INVALID_SCHEMA_NAME) => ErrorClass::SchemaMissing,
        _ => ErrorClass::Other,
    }
}

/// Normalize a raw query failure into a [`QueryError`].
///
/// The position is taken from the server's original error position field
/// when present; internally-generated positions are ignored, matching how
/// clients report syntax errors against the submitted text.
pub fn query_error(query: &str, err: tokio_postgres::Error) -> MigrateError {
    let position = err
        .as_db_error()
        .and_then(|db| db.position())
        .and_then(|pos| match pos {
            ErrorPosition::Original(p) => Some(*p),
            ErrorPosition::Internal { .. } => None,
        })
        .unwrap_or(0);

    MigrateError::Query(QueryError {
        source: err,
        query: query.to_string(),
        position,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_class_equality() {
        assert_eq!(ErrorClass::DatabaseMissing, ErrorClass::DatabaseMissing);
        assert_ne!(ErrorClass::DatabaseMissing, ErrorClass::SchemaMissing);
        assert_ne!(ErrorClass::SchemaMissing, ErrorClass::Other);
    }

    #[test]
    fn test_command_error_display() {
        let err = MigrateError::Command {
            command: "pg_dump".to_string(),
            message: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "pg_dump failed: connection refused");
    }
}
