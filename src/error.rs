//! Error types for the database provider layer.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! The variants follow the failure taxonomy of the providers: programmer errors
//! (`InvalidInput`), infrastructure failures (`CacheWrite`, `Connection`, `Timeout`),
//! domain execution failures (`Execution`, carrying the partial result) and
//! configuration failures (`UnsupportedBackend`). Cancellation is always its own
//! variant and is never wrapped into another one.

use crate::models::ExecutionResult;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Execution failed: {message}")]
    Execution {
        message: String,
        /// Whatever is known about the failed call: elapsed time, bound parameters, error text.
        result: Box<ExecutionResult>,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Cache write failed for '{path}': {message}")]
    CacheWrite { path: String, message: String },

    #[error("Unsupported backend kind '{kind}' requested by {operation}")]
    UnsupportedBackend { kind: String, operation: String },

    #[error("Profile not found: {profile_id}")]
    ProfileNotFound { profile_id: String },

    #[error("Secret '{secret_ref}' not found for profile {profile_id}")]
    SecretNotFound {
        profile_id: String,
        secret_ref: String,
    },

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

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create an execution error carrying the partial result of the call.
    pub fn execution(message: impl Into<String>, result: ExecutionResult) -> Self {
        Self::Execution {
            message: message.into(),
            result: Box::new(result),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a cache write error.
    pub fn cache_write(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CacheWrite {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an unsupported backend error.
    pub fn unsupported_backend(kind: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::UnsupportedBackend {
            kind: kind.into(),
            operation: operation.into(),
        }
    }

    /// Create a profile not found error.
    pub fn profile_not_found(profile_id: impl Into<String>) -> Self {
        Self::ProfileNotFound {
            profile_id: profile_id.into(),
        }
    }

    /// Create a secret not found error.
    pub fn secret_not_found(profile_id: impl Into<String>, secret_ref: impl Into<String>) -> Self {
        Self::SecretNotFound {
            profile_id: profile_id.into(),
            secret_ref: secret_ref.into(),
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
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable by an outer orchestrator.
    /// The providers themselves never retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// Check if this error is a cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Wrap a driver or connectivity fault into an execution error.
    ///
    /// Cancellation and invalid input pass through untouched; everything else
    /// becomes `Execution` with the error text recorded on the partial result.
    pub fn into_execution(self, mut result: ExecutionResult) -> Self {
        match self {
            Self::Cancelled { .. } | Self::InvalidInput { .. } | Self::Execution { .. } => self,
            other => {
                let message = other.to_string();
                result.error_message = Some(message.clone());
                Self::execution(message, result)
            }
        }
    }

    /// The partial result attached to an execution error.
    pub fn execution_result(&self) -> Option<&ExecutionResult> {
        match self {
            Self::Execution { result, .. } => Some(result),
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
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection acquire", 30),
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
                DbError::internal(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Convert tiberius (SQL Server) errors to DbError.
impl From<tiberius::error::Error> for DbError {
    fn from(err: tiberius::error::Error) -> Self {
        match err {
            tiberius::error::Error::Server(token) => DbError::database(
                token.message().to_string(),
                Some(token.code().to_string()),
                "Check the SQL syntax, referenced objects and login permissions",
            ),
            tiberius::error::Error::Io { kind, message } => DbError::connection(
                format!("I/O error ({:?}): {}", kind, message),
                "Check network connectivity and that SQL Server accepts TCP connections",
            ),
            tiberius::error::Error::Tls(message) => DbError::connection(
                format!("TLS error: {}", message),
                "Set TrustServerCertificate=true or install the server certificate",
            ),
            tiberius::error::Error::Routing { host, port } => DbError::connection(
                format!("Server requested routing to {}:{}", host, port),
                "Connect to the routed host directly",
            ),
            other => DbError::connection(
                other.to_string(),
                "Check the connection string and SQL Server availability",
            ),
        }
    }
}

/// Result type alias for provider operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database(
            "Syntax error",
            Some("42601".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::timeout("query", 30).is_retryable());
        assert!(DbError::connection("err", "sugg").is_retryable());
        assert!(!DbError::invalid_input("bad").is_retryable());
        assert!(!DbError::unsupported_backend("oracle", "create_standalone").is_retryable());
    }

    #[test]
    fn test_into_execution_records_message() {
        let err = DbError::connection("refused", "start the server")
            .into_execution(ExecutionResult::default());
        let result = err.execution_result().unwrap();
        assert!(!result.success());
        assert!(result.error_message.as_deref().unwrap().contains("refused"));
    }

    #[test]
    fn test_into_execution_keeps_cancellation() {
        let err = DbError::cancelled("execute").into_execution(ExecutionResult::default());
        assert!(err.is_cancelled());
        assert!(err.execution_result().is_none());
    }

    #[test]
    fn test_unsupported_backend_display() {
        let err = DbError::unsupported_backend("oracle", "create_with_profile");
        let msg = err.to_string();
        assert!(msg.contains("oracle"));
        assert!(msg.contains("create_with_profile"));
    }
}
