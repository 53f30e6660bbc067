//! Error types for resource operations.

use std::fmt;

/// Result type for resource operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the resource cache.
///
/// `Error` is `Clone` because a single failed fetch is handed to every caller
/// that was coalesced onto it.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The loader (remote API) failed to fetch entities.
    ///
    /// Common causes:
    /// - Network or transport failure
    /// - Remote API returned an error payload
    ///
    /// **Recovery:** The cached entry keeps its last known value. Retry with
    /// `refresh` or configure `ResourceConfig::with_retry`.
    LoaderError(String),

    /// A mutation targeted an entity the cache does not hold.
    ///
    /// Only raised where a caller explicitly needs the entity (for example
    /// updating an execution context). Deletes of absent keys are silent.
    NotFound(String),

    /// A requirement gating the resource was not satisfied.
    ///
    /// Raised before the loader runs when, e.g., the session lacks a permission
    /// the resource requires.
    PermissionDenied(String),

    /// Validation failed for an entity or a request.
    ValidationError(String),

    /// Merging a patch or an incoming value onto a cached entity failed.
    MergeError(String),

    /// Serialization failed when writing a snapshot.
    SerializationError(String),

    /// Deserialization failed when reading a snapshot.
    DeserializationError(String),

    /// Snapshot header is corrupted or not produced by this crate.
    InvalidSnapshot(String),

    /// Snapshot was written with a different schema version.
    ///
    /// **Recovery:** Discard the snapshot and load from the remote source.
    VersionMismatch {
        /// Expected schema version (from compiled code)
        expected: u32,
        /// Found schema version (from the snapshot)
        found: u32,
    },

    /// Generic error with custom message.
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::LoaderError(msg) => write!(f, "Loader error: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            Error::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Error::MergeError(msg) => write!(f, "Merge error: {}", msg),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::InvalidSnapshot(msg) => write!(f, "Invalid snapshot: {}", msg),
            Error::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "Snapshot version mismatch: expected {}, found {}",
                    expected, found
                )
            }
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_syntax() || e.is_eof() {
            Error::DeserializationError(e.to_string())
        } else {
            Error::MergeError(e.to_string())
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::LoaderError(format!("fetch task aborted: {}", e))
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::LoaderError("connection refused".to_string());
        assert_eq!(err.to_string(), "Loader error: connection refused");

        let err = Error::VersionMismatch {
            expected: 1,
            found: 2,
        };
        assert_eq!(
            err.to_string(),
            "Snapshot version mismatch: expected 1, found 2"
        );
    }

    #[test]
    fn test_error_from_string() {
        let err: Error = "test error".into();
        assert!(matches!(err, Error::Other(_)));
    }

    #[test]
    fn test_error_from_json_syntax() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json")
            .expect_err("invalid json should fail");
        assert!(matches!(Error::from(json_err), Error::DeserializationError(_)));
    }
}
