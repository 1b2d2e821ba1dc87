//! Error types and result types for model and document store operations.
//!
//! Callers are expected to branch on the variant, not on the rendered message:
//!
//! ```ignore
//! match model.get("user-1", None).await {
//!     Ok(doc) => println!("{doc:?}"),
//!     Err(DocumentStoreError::RecordNotFound) => println!("missing"),
//!     Err(err) => return Err(err),
//! }
//! ```

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use std::{convert::Infallible, time::Duration};
use thiserror::Error;

/// Server error code reported by MongoDB-compatible stores for unique index violations.
pub const DUPLICATE_KEY_CODE: i32 = 11000;

/// Represents all possible errors that can occur when working with models and document stores.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// No collection name could be derived from the supplied value.
    #[error("invalid model name")]
    InvalidModelName,
    /// The entity has no resolvable primary key.
    #[error(r#"no id. not found primary key from model, defined by #[db("pk")] or a field serialized as "_id""#)]
    NoId,
    /// No document matched an exact-ID or first-match lookup.
    #[error("record not found")]
    RecordNotFound,
    /// A uniqueness constraint was violated.
    #[error("duplicate key error")]
    DuplicateKey,
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// The document has an invalid structure.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// A filter, sort or update document could not be interpreted.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// An error reported by the underlying storage backend.
    ///
    /// `code` carries the store's numeric error code when one is exposed.
    #[error("Backend error: {message}")]
    Backend {
        code: Option<i32>,
        message: String,
    },
    /// The operation did not complete within the configured time limit.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    /// An unknown error occurred.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// A specialized `Result` type for model and document store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl DocumentStoreError {
    /// Creates a backend error without a store error code.
    pub fn backend(message: impl Into<String>) -> Self {
        DocumentStoreError::Backend { code: None, message: message.into() }
    }

    /// Creates a backend error carrying the store's numeric error code.
    pub fn backend_with_code(code: i32, message: impl Into<String>) -> Self {
        DocumentStoreError::Backend { code: Some(code), message: message.into() }
    }

    /// Returns `true` if this error signals a unique constraint violation.
    ///
    /// The typed variant and the store error code are checked first. Error shapes that do not
    /// expose a code fall back to matching the message text.
    pub fn is_duplicate_key(&self) -> bool {
        match self {
            DocumentStoreError::DuplicateKey => true,
            DocumentStoreError::Backend { code: Some(DUPLICATE_KEY_CODE), .. } => true,
            DocumentStoreError::Backend { message, .. } => is_duplicate_key_message(message),
            _ => false,
        }
    }

    /// Converts duplicate key signals into [`DocumentStoreError::DuplicateKey`], leaving any other
    /// error untouched.
    pub fn into_duplicate_key(self) -> Self {
        if self.is_duplicate_key() {
            DocumentStoreError::DuplicateKey
        } else {
            self
        }
    }
}

/// Text fallback for duplicate key detection.
pub fn is_duplicate_key_message(message: &str) -> bool {
    let message = message.to_lowercase();

    message.contains("duplicate key")
        || message.contains("e11000")
        || (message.contains("index:") && message.contains("dup key"))
}

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<Infallible> for DocumentStoreError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_by_code() {
        let err = DocumentStoreError::backend_with_code(DUPLICATE_KEY_CODE, "write failed");
        assert!(err.is_duplicate_key());
        assert!(matches!(err.into_duplicate_key(), DocumentStoreError::DuplicateKey));
    }

    #[test]
    fn duplicate_key_by_message() {
        assert!(DocumentStoreError::backend("E11000 duplicate key error collection: test.user").is_duplicate_key());
        assert!(DocumentStoreError::backend("index: email_1 dup key: { email: \"a\" }").is_duplicate_key());
        assert!(!DocumentStoreError::backend("index: email_1 build failed").is_duplicate_key());
        assert!(!DocumentStoreError::backend_with_code(112, "write conflict").is_duplicate_key());
    }

    #[test]
    fn other_errors_are_left_alone() {
        let err = DocumentStoreError::RecordNotFound.into_duplicate_key();
        assert!(matches!(err, DocumentStoreError::RecordNotFound));
    }
}
