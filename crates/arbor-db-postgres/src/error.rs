//! Error types for the PostgreSQL row source.

use arbor_search::SearchError;
use sqlx_core::error::Error as SqlxError;

/// PostgreSQL error code for undefined table (42P01).
pub const PG_UNDEFINED_TABLE: &str = "42P01";

/// PostgreSQL error code for undefined column (42703).
pub const PG_UNDEFINED_COLUMN: &str = "42703";

/// Checks if a sqlx error has a specific PostgreSQL error code.
pub fn has_pg_error_code(err: &SqlxError, code: &str) -> bool {
    if let SqlxError::Database(db_err) = err {
        db_err.code().as_deref() == Some(code)
    } else {
        false
    }
}

/// Errors specific to the PostgreSQL row source.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database error, including connection failures.
    #[error("Database error: {0}")]
    Database(#[from] SqlxError),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A row did not decode into the expected shape.
    #[error("Unexpected row: {message}")]
    Decode { message: String },
}

impl PostgresError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Whether the query referenced a table or column the database lacks,
    /// which points at a registry that does not match the schema.
    pub fn is_schema_mismatch(&self) -> bool {
        match self {
            Self::Database(e) => {
                has_pg_error_code(e, PG_UNDEFINED_TABLE)
                    || has_pg_error_code(e, PG_UNDEFINED_COLUMN)
            }
            _ => false,
        }
    }
}

impl From<PostgresError> for SearchError {
    fn from(err: PostgresError) -> Self {
        match err {
            PostgresError::Decode { message } => SearchError::MalformedRow(message),
            other => SearchError::data_access(other),
        }
    }
}

/// Result type alias for PostgreSQL operations.
pub type Result<T> = std::result::Result<T, PostgresError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PostgresError::config("invalid URL");
        assert!(err.to_string().contains("Configuration error"));

        let err = PostgresError::decode("expected an array");
        assert!(err.to_string().contains("Unexpected row"));
    }

    #[test]
    fn test_conversion_to_search_error() {
        let err: SearchError = PostgresError::config("test error").into();
        assert!(matches!(err, SearchError::DataAccess(_)));

        let err: SearchError = PostgresError::decode("bad").into();
        assert!(matches!(err, SearchError::MalformedRow(_)));
    }

    #[test]
    fn test_pool_timeout_is_not_schema_mismatch() {
        assert!(!PostgresError::from(SqlxError::PoolTimedOut).is_schema_mismatch());
    }
}
