//! Error types and result types for mapper operations.
//!
//! Every fallible operation in this crate returns [`MapperResult<T>`]. Validation
//! failures are always surfaced as a list ([`ValidationErrors`]), even when only a
//! single field is at fault, so callers should inspect the whole list rather than
//! treating the error as a single condition.

use bson::error::Error as BsonError;
use thiserror::Error;

use crate::validation::ValidationErrors;

/// Represents all possible errors that can occur while defining schemas or
/// persisting document instances.
#[derive(Error, Debug)]
pub enum MapperError {
    /// One or more field or object level validators rejected the document.
    #[error("{0}")]
    Validation(ValidationErrors),
    /// Serialization/deserialization error when converting between BSON and Rust types.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A document with the given ID already exists in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// An update or destroy matched zero documents.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document not found {0} in collection {1}")]
    DocumentNotFound(String, String),
    /// The schema specification is malformed. Raised while compiling a schema and
    /// never recoverable at runtime.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// The operation cannot run in the current state, e.g. there is no open
    /// storage connection.
    #[error("Precondition failed: {0}")]
    Precondition(String),
    /// A create/update/remove transform failed; the remaining pipeline was aborted.
    #[error("Transform error: {0}")]
    Transform(String),
    /// The field is not declared on the schema, or cannot be used the way it was.
    #[error("Unknown field {0}")]
    UnknownField(String),
    /// The document has an invalid structure.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl MapperError {
    /// Returns the validation errors if this is a validation failure.
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            MapperError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

/// A specialized `Result` type for mapper operations.
pub type MapperResult<T> = Result<T, MapperError>;

impl From<BsonError> for MapperError {
    fn from(err: BsonError) -> Self {
        MapperError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for MapperError {
    fn from(err: serde_json::Error) -> Self {
        MapperError::Serialization(err.to_string())
    }
}

impl From<ValidationErrors> for MapperError {
    fn from(errors: ValidationErrors) -> Self {
        MapperError::Validation(errors)
    }
}
