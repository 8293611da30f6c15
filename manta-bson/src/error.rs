//! Error types for document mapping and serialization.

use thiserror::Error;

/// Result type for document mapping and serialization operations.
pub type BsonResult<T> = Result<T, BsonError>;

/// Errors that can occur during mapping, serialization, or codec operations.
#[derive(Error, Debug)]
pub enum BsonError {
    /// Class map construction error (bad member reference, cyclic base chain, ...).
    #[error("mapping error: {0}")]
    Mapping(String),

    /// A class map for the type has already been published.
    #[error("class map already registered for type '{0}'")]
    DuplicateRegistration(String),

    /// Serialization or deserialization failed for one document.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A member marked required was absent from the document.
    #[error("missing required element '{0}'")]
    MissingRequiredElement(String),

    /// Discriminator value matched no registered type.
    #[error("unknown discriminator value '{0}'")]
    UnknownDiscriminator(String),

    /// Discriminator value matched more than one registered type.
    #[error("ambiguous discriminator '{0}'")]
    AmbiguousDiscriminator(String),

    /// A value had a different kind than the serializer expected.
    #[error("type mismatch: expected {expected}, found {actual}")]
    TypeMismatch {
        /// The expected value kind.
        expected: String,
        /// The kind actually found.
        actual: String,
    },

    /// No serializer could be resolved for a type shape.
    #[error("no serializer registered for {0}")]
    NoSerializer(String),

    /// Malformed binary document data.
    #[error("codec error: {0}")]
    Codec(String),

    /// Invalid ObjectId text or bytes.
    #[error("invalid object id: {0}")]
    InvalidObjectId(String),
}

impl BsonError {
    /// Create a mapping error.
    pub fn mapping(message: impl Into<String>) -> Self {
        Self::Mapping(message.into())
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    /// Create a type mismatch error.
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Check if this is a mapping error.
    pub fn is_mapping_error(&self) -> bool {
        matches!(self, Self::Mapping(_) | Self::DuplicateRegistration(_))
    }

    /// Check if this is a codec error.
    pub fn is_codec_error(&self) -> bool {
        matches!(self, Self::Codec(_))
    }

    /// Check if this error came from discriminator resolution.
    pub fn is_discriminator_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownDiscriminator(_) | Self::AmbiguousDiscriminator(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BsonError::mapping("no member named 'nope'");
        assert_eq!(err.to_string(), "mapping error: no member named 'nope'");

        let err = BsonError::MissingRequiredElement("name".to_string());
        assert_eq!(err.to_string(), "missing required element 'name'");
    }

    #[test]
    fn test_error_classification() {
        assert!(BsonError::mapping("x").is_mapping_error());
        assert!(BsonError::DuplicateRegistration("T".into()).is_mapping_error());
        assert!(BsonError::codec("truncated").is_codec_error());
        assert!(BsonError::AmbiguousDiscriminator("Cat".into()).is_discriminator_error());
        assert!(!BsonError::codec("x").is_discriminator_error());
    }
}
