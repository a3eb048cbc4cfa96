/// CRDash Error Module
///
/// This module defines the error types for the dashboard's database layer.
/// Each failure class (connectivity, statement, diagnostics) gets its own
/// variant so callers can tell them apart instead of checking a sentinel.
use thiserror::Error;

/// Error type for the CRDash database layer.
///
/// This enum covers the failure classes that can occur:
/// - Connection could not be opened (configuration or connectivity)
/// - Statement preparation, binding, or execution
/// - Transaction control
/// - Diagnostics reads against an open connection
/// - Configuration loading and validation
#[derive(Error, Debug)]
pub enum CrdError {
    /// No connection is available; carries the reason the open failed
    #[error("Database unavailable: {0}")]
    Unavailable(String),

    /// A statement failed to prepare, bind, or execute
    #[error("Query error: {message} [query: {query}]")]
    Statement { query: String, message: String },

    /// Named parameters do not match the placeholders in the statement
    #[error("Parameter error: {0}")]
    Parameter(String),

    /// Transaction control errors
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Server/client metadata could not be read
    #[error("Diagnostic error: {0}")]
    Diagnostic(String),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors raised by the embedded SQLite driver
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Errors raised by the MySQL driver
    #[error("MySQL error: {0}")]
    MySql(#[from] sqlx::Error),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML configuration parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CrdError {
    /// Builds a statement error for `query` from any driver error.
    pub fn statement(query: &str, err: impl std::fmt::Display) -> Self {
        CrdError::Statement {
            query: query.to_string(),
            message: err.to_string(),
        }
    }

    /// True when the error means no database connection could be obtained.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CrdError::Unavailable(_))
    }
}

/// Type alias for Result to use CrdError as the error type.
pub type Result<T> = std::result::Result<T, CrdError>;
