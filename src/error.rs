//! Error types for the data file bank

use thiserror::Error;

/// Main error type for the data file bank
///
/// Only backend reachability and configuration failures ever surface from a
/// query. Malformed records, filter misses and cache write failures are
/// absorbed where they occur.
#[derive(Error, Debug)]
pub enum Error {
    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Remote cache error
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Storage backend errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO operation against the local filesystem failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend could not be reached (network, credentials, permissions)
    #[error("Backend unavailable ({backend}): {message}")]
    Unavailable {
        /// Backend identifier
        backend: String,
        /// Description of the failure
        message: String,
    },

    /// Requested object or file does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

impl StorageError {
    /// Shorthand for an unavailable backend
    pub fn unavailable(backend: impl Into<String>, message: impl ToString) -> Self {
        StorageError::Unavailable {
            backend: backend.into(),
            message: message.to_string(),
        }
    }
}

/// Remote cache errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Connection to the cache service failed
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// A cache command failed or timed out
    #[error("Command error: {0}")]
    CommandError(String),
}

/// Validation errors
///
/// Raised eagerly while loading configuration or constructing a backend.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Value is out of allowed range
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Field name being validated
        field: String,
        /// The invalid value
        value: String,
        /// Minimum allowed value
        min: String,
        /// Maximum allowed value
        max: String,
    },

    /// Required field is missing
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Invalid format
    #[error("Invalid format for {field}: {message}")]
    InvalidFormat {
        /// Field name being validated
        field: String,
        /// Description of the format error
        message: String,
    },
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Configuration(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_becomes_configuration() {
        let err: Error = ValidationError::MissingField("s3.bucket".to_string()).into();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("s3.bucket"));
    }

    #[test]
    fn test_unavailable_message() {
        let err = StorageError::unavailable("s3", "connection refused");
        assert_eq!(
            err.to_string(),
            "Backend unavailable (s3): connection refused"
        );
    }
}
