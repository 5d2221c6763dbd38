//! Error types for pgcmp

use thiserror::Error;

/// Result type for pgcmp operations
pub type Result<T> = std::result::Result<T, Error>;

/// SQLSTATE raised when `statement_timeout` cancels a statement
pub const QUERY_CANCELED: &str = "57014";

/// Error types for pgcmp
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("SQL apply error: {0}")]
    SqlApplyError(String),

    #[error("Timeout: {0}")]
    TimeoutError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl Error {
    /// Classify an error raised while the sandbox was executing a script.
    ///
    /// Database errors become `SqlApplyError` carrying the server's message and
    /// SQLSTATE; timeouts and transport failures keep their usual classification.
    pub fn apply(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Database(db) if db.code().as_deref() != Some(QUERY_CANCELED) => {
                let code = db.code().map(|c| c.to_string()).unwrap_or_default();
                Error::SqlApplyError(format!("{} (SQLSTATE {})", db.message(), code))
            }
            _ => Error::from(error),
        }
    }

    /// Prefix the message with where the error happened, keeping the variant
    pub fn context(self, what: &str) -> Self {
        match self {
            Error::ConfigError(m) => Error::ConfigError(format!("{}: {}", what, m)),
            Error::ConnectionError(m) => Error::ConnectionError(format!("{}: {}", what, m)),
            Error::QueryError(m) => Error::QueryError(format!("{}: {}", what, m)),
            Error::SqlApplyError(m) => Error::SqlApplyError(format!("{}: {}", what, m)),
            Error::TimeoutError(m) => Error::TimeoutError(format!("{}: {}", what, m)),
            Error::SerializationError(m) => Error::SerializationError(format!("{}: {}", what, m)),
            other => other,
        }
    }
}

/// Driver errors are split by whether the connection itself is unusable
impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Database(db) if db.code().as_deref() == Some(QUERY_CANCELED) => {
                Error::TimeoutError(db.message().to_string())
            }
            sqlx::Error::PoolTimedOut => {
                Error::ConnectionError("timed out waiting for a connection".to_string())
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_) => Error::ConnectionError(error.to_string()),
            _ => Error::QueryError(error.to_string()),
        }
    }
}

/// Convert Serde JSON errors to pgcmp errors
impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::SerializationError(error.to_string())
    }
}

/// Convert TOML deserialization errors to pgcmp errors
impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::ConfigError(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_is_a_connection_error() {
        let error = Error::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(error, Error::ConnectionError(_)));
    }

    #[test]
    fn decode_failures_are_query_errors() {
        let error = Error::from(sqlx::Error::RowNotFound);
        assert!(matches!(error, Error::QueryError(_)));
    }

    #[test]
    fn apply_keeps_transport_errors_as_connection_errors() {
        let error = Error::apply(sqlx::Error::PoolClosed);
        assert!(matches!(error, Error::ConnectionError(_)));
    }

    #[test]
    fn context_keeps_the_variant() {
        let error = Error::QueryError("permission denied".into()).context("right database");
        match error {
            Error::QueryError(message) => assert_eq!(message, "right database: permission denied"),
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
