//! Error types for query translation.

use thiserror::Error;

/// Result type for translation operations.
pub type TranslationResult<T> = Result<T, TranslationError>;

/// Errors raised while translating query expressions.
///
/// Translation never silently downgrades to a different query: an
/// expression shape with no handler is an error naming the offending
/// sub-expression.
#[derive(Error, Debug)]
pub enum TranslationError {
    /// No handler covers this expression shape.
    #[error("expression is not supported in this context: {expression}")]
    Unsupported {
        /// Rendered form of the offending sub-expression.
        expression: String,
    },

    /// A selector had to be a simple field path but was not.
    #[error("expected a field path, found: {expression}")]
    NotAFieldPath {
        /// Rendered form of the offending sub-expression.
        expression: String,
    },

    /// A field path did not resolve against the current document shape.
    #[error("field '{path}' does not resolve against the current result shape")]
    UnresolvedField {
        /// The path that failed to resolve.
        path: String,
    },

    /// A lambda parameter was referenced without being bound.
    #[error("unbound parameter '{parameter}'")]
    UnboundParameter {
        /// The parameter name.
        parameter: String,
    },

    /// Serialization of a constant operand failed.
    #[error(transparent)]
    Bson(#[from] manta_bson::BsonError),
}

impl TranslationError {
    /// Create an unsupported-expression error from anything renderable.
    pub fn unsupported(expression: impl ToString) -> Self {
        Self::Unsupported {
            expression: expression.to_string(),
        }
    }

    /// Create a not-a-field-path error from anything renderable.
    pub fn not_a_field_path(expression: impl ToString) -> Self {
        Self::NotAFieldPath {
            expression: expression.to_string(),
        }
    }

    /// Check if this is an unsupported-expression error.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}
