//! Error taxonomy for the hybrid search engine.
//!
//! Errors fall into four kinds (see [`ErrorKind`]):
//! - **Validation**: the request is malformed and was rejected before any store was touched.
//! - **NotFound**: a referenced document or collection does not exist. Reported, never fatal.
//! - **InternalConsistency**: the vector index, attribute store and metadata store disagree
//!   about a document. The owning collection is quarantined until [`repair`] is called.
//! - **Collaborator**: an external embedding provider or augmenter failed.
//!
//! Degraded (short) search results are not errors; they travel with the successful
//! response as a [`DegradedResult`](crate::search::DegradedResult) warning.
//!
//! [`repair`]: crate::storage::Collection::repair

use crate::distance::DistanceMetric;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by collection, index, store and planner operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Vector length differs from the collection dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Vector contains NaN or an infinity.
    #[error("vector component {position} is not finite")]
    NonFiniteVector { position: usize },

    /// Attribute name not declared in the collection schema.
    #[error("unknown attribute field '{0}'")]
    UnknownField(String),

    /// Attribute value or predicate literal does not match the declared type.
    #[error("type mismatch for field '{field}': expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    /// Enum attribute value outside the declared variants.
    #[error("'{value}' is not a declared variant of enum field '{field}'")]
    InvalidEnumValue { field: String, value: String },

    /// Predicate tree is structurally invalid (empty group, bad operator for type, ...).
    #[error("malformed predicate: {0}")]
    MalformedPredicate(String),

    /// Collection or index configuration is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A search asked for a metric other than the one the collection was created with.
    #[error("distance metric mismatch: collection uses {expected}, request uses {actual}")]
    MetricMismatch {
        expected: DistanceMetric,
        actual: DistanceMetric,
    },

    /// Scoring weights or signal declarations are invalid.
    #[error("invalid scoring weights: {0}")]
    InvalidWeights(String),

    /// Document failed validation (empty id, malformed metadata, ...).
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// Serialized metadata exceeds the size or nesting limit.
    #[error("metadata too large: {0}")]
    MetadataTooLarge(String),

    /// Query parameters are out of range.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Delete or replace of an id that is not stored.
    #[error("document '{0}' not found")]
    NotFound(String),

    /// A collection with this name already exists.
    #[error("collection '{0}' already exists")]
    CollectionExists(String),

    /// No collection with this name.
    #[error("collection '{0}' not found")]
    CollectionNotFound(String),

    /// The three stores disagree about a document. Fatal for the current operation.
    #[error("internal consistency violation: {0}")]
    InternalConsistency(String),

    /// The collection was flagged by an earlier consistency violation.
    #[error("collection '{0}' is quarantined and must be repaired")]
    Quarantined(String),

    /// The embedding provider failed.
    #[error("embedding provider error: {0}")]
    Embedding(String),

    /// The answer augmenter failed.
    #[error("augmentation error: {0}")]
    Augmentation(String),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    InternalConsistency,
    Collaborator,
}

impl Error {
    /// Returns the error's kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DimensionMismatch { .. }
            | Error::NonFiniteVector { .. }
            | Error::UnknownField(_)
            | Error::TypeMismatch { .. }
            | Error::InvalidEnumValue { .. }
            | Error::MalformedPredicate(_)
            | Error::InvalidConfig(_)
            | Error::MetricMismatch { .. }
            | Error::InvalidWeights(_)
            | Error::InvalidDocument(_)
            | Error::MetadataTooLarge(_)
            | Error::InvalidQuery(_)
            | Error::CollectionExists(_) => ErrorKind::Validation,
            Error::NotFound(_) | Error::CollectionNotFound(_) => ErrorKind::NotFound,
            Error::InternalConsistency(_) | Error::Quarantined(_) => {
                ErrorKind::InternalConsistency
            }
            Error::Embedding(_) | Error::Augmentation(_) => ErrorKind::Collaborator,
        }
    }

    /// Returns `true` for errors raised before any store was touched.
    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    /// Returns `true` for errors that require an offline repair of the collection.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::InternalConsistency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert!(Error::DimensionMismatch {
            expected: 4,
            actual: 3
        }
        .is_validation());
        assert!(Error::MalformedPredicate("x".into()).is_validation());
        assert_eq!(Error::NotFound("a".into()).kind(), ErrorKind::NotFound);
        assert!(Error::InternalConsistency("x".into()).is_fatal());
        assert!(Error::Quarantined("c".into()).is_fatal());
        assert_eq!(
            Error::Embedding("down".into()).kind(),
            ErrorKind::Collaborator
        );
    }

    #[test]
    fn test_display_messages() {
        let err = Error::DimensionMismatch {
            expected: 4,
            actual: 3,
        };
        assert_eq!(err.to_string(), "dimension mismatch: expected 4, got 3");
        let err = Error::MetricMismatch {
            expected: DistanceMetric::Cosine,
            actual: DistanceMetric::Euclidean,
        };
        assert_eq!(
            err.to_string(),
            "distance metric mismatch: collection uses cosine, request uses euclidean"
        );
    }
}
