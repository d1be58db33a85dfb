//! Error types for search compilation and execution.

use thiserror::Error;

use crate::registry::RegistryError;
use crate::sql::SqlBuilderError;

/// Errors produced while resolving, compiling or running a search.
#[derive(Debug, Error)]
pub enum SearchError {
    /// A path segment names neither a field nor a sublist of its namespace.
    #[error("Unknown field name '{segment}' in '{name}'")]
    UnknownField { segment: String, name: String },

    #[error("Flattened sublists cannot contain nested sublists: '{name}'")]
    NestedUnderFlattened { name: String },

    #[error("'{prefix}' is not a prefix of '{path}'")]
    NotAPrefix { prefix: String, path: String },

    /// The same table was reached twice while building one join chain.
    #[error("Table '{table}' appears more than once in join chain {chain:?}")]
    JoinCycle { table: String, chain: Vec<String> },

    #[error("Field '{field}' cannot be exported")]
    FieldNotExportable { field: String },

    #[error("Field '{field}' is in a nested sublist; only top-level and flattened fields are allowed")]
    NestedFieldNotAllowed { field: String },

    #[error("Invalid value '{value}' for field '{field}': {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Field '{field}' does not support {match_type} matching")]
    UnsupportedMatchType { field: String, match_type: String },

    #[error("Invalid cursor '{0}'")]
    InvalidCursor(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A row returned by the data source does not have the compiled shape.
    #[error("Malformed result row: {0}")]
    MalformedRow(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Sql(#[from] SqlBuilderError),

    #[error("Data access error: {0}")]
    DataAccess(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// An internal invariant was violated. Indicates a bug in the compiler or
    /// a misconfigured registry, never bad user input.
    #[error("BUG! {0}")]
    Internal(String),
}

impl SearchError {
    pub fn unknown_field(segment: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnknownField {
            segment: segment.into(),
            name: name.into(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Wrap an error raised by a data-access collaborator.
    pub fn data_access(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::DataAccess(Box::new(err))
    }

    /// Whether the error was caused by the caller's request rather than the
    /// environment or a bug.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownField { .. }
                | Self::NestedUnderFlattened { .. }
                | Self::NotAPrefix { .. }
                | Self::JoinCycle { .. }
                | Self::FieldNotExportable { .. }
                | Self::NestedFieldNotAllowed { .. }
                | Self::InvalidValue { .. }
                | Self::UnsupportedMatchType { .. }
                | Self::InvalidCursor(_)
                | Self::InvalidRequest(_)
        )
    }
}

/// Result type alias for search operations.
pub type Result<T> = std::result::Result<T, SearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SearchError::unknown_field("bagz", "bagz.number");
        assert_eq!(err.to_string(), "Unknown field name 'bagz' in 'bagz.number'");

        let err = SearchError::internal("node rendered twice");
        assert_eq!(err.to_string(), "BUG! node rendered twice");
    }

    #[test]
    fn test_user_error_classification() {
        assert!(SearchError::InvalidCursor("x".into()).is_user_error());
        assert!(
            SearchError::JoinCycle {
                table: "a".into(),
                chain: vec!["a".into(), "b".into()],
            }
            .is_user_error()
        );
        assert!(!SearchError::internal("x").is_user_error());
        assert!(!SearchError::data_access(std::io::Error::other("down")).is_user_error());
    }
}
