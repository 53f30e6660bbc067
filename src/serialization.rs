//! Postcard-based snapshot serialization with versioned envelopes.
//!
//! A resource can export its entries as a snapshot (for example to warm a
//! client after restart) and import it later. Every snapshot is wrapped in an
//! envelope:
//!
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────────────┐
//! │  MAGIC (4 bytes)│ VERSION (varint)│POSTCARD PAYLOAD (N bytes)│
//! └─────────────────┴─────────────────┴──────────────────────────┘
//!   "RKIT"              u32                postcard::to_allocvec(T)
//! ```
//!
//! - **Validated:** magic and version are checked on every read
//! - **Versioned:** a schema change rejects old snapshots instead of migrating
//!
//! Entities stored in snapshots must use plain serde derives; postcard does not
//! support `skip_serializing_if` or self-describing types such as
//! `serde_json::Value`.
//!
//! # Example
//!
//! ```rust
//! use resource_kit::serialization::{decode_envelope, encode_envelope};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Driver {
//!     id: String,
//!     name: String,
//! }
//!
//! # fn main() -> resource_kit::Result<()> {
//! let driver = Driver { id: "pg".to_string(), name: "PostgreSQL".to_string() };
//! let bytes = encode_envelope(&driver)?;
//! let decoded: Driver = decode_envelope(&bytes)?;
//! assert_eq!(driver, decoded);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Magic header for resource snapshots: b"RKIT"
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"RKIT";

/// Current snapshot schema version.
///
/// Increment when the snapshot layout or a cached entity changes shape.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Versioned envelope around a snapshot payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    /// Magic header: must be b"RKIT"
    pub magic: [u8; 4],
    /// Schema version: must match CURRENT_SCHEMA_VERSION
    pub version: u32,
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Create a new envelope with current magic and version.
    pub fn new(payload: T) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: CURRENT_SCHEMA_VERSION,
            payload,
        }
    }
}

/// Entries of one resource as written to a snapshot.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResourceSnapshot<T> {
    /// Resource prefix the snapshot was taken from
    pub resource: String,
    /// Whether the complete collection was loaded when exported
    pub all_loaded: bool,
    pub entries: Vec<T>,
}

/// Leading fields of a [`ResourceSnapshot`], readable without knowing the
/// entity type. Postcard ignores the trailing entries.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SnapshotHeader {
    pub resource: String,
    pub all_loaded: bool,
}

/// Serialize a value inside an envelope.
///
/// # Errors
///
/// Returns `Error::SerializationError` if Postcard serialization fails.
pub fn encode_envelope<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let envelope = Envelope::new(value);
    postcard::to_allocvec(&envelope).map_err(|e| {
        error!("Snapshot serialization failed: {}", e);
        Error::SerializationError(e.to_string())
    })
}

/// Deserialize a value from an envelope, validating magic and version.
///
/// # Errors
///
/// - `Error::InvalidSnapshot`: Invalid magic header
/// - `Error::VersionMismatch`: Schema version mismatch
/// - `Error::DeserializationError`: Corrupted Postcard payload
pub fn decode_envelope<'de, T: Deserialize<'de>>(bytes: &'de [u8]) -> Result<T> {
    let envelope: Envelope<T> = postcard::from_bytes(bytes).map_err(|e| {
        error!("Snapshot deserialization failed: {}", e);
        Error::DeserializationError(e.to_string())
    })?;

    if envelope.magic != SNAPSHOT_MAGIC {
        warn!(
            "Invalid snapshot: expected magic {:?}, got {:?}",
            SNAPSHOT_MAGIC, envelope.magic
        );
        return Err(Error::InvalidSnapshot(format!(
            "Invalid magic: expected {:?}, got {:?}",
            SNAPSHOT_MAGIC, envelope.magic
        )));
    }

    if envelope.version != CURRENT_SCHEMA_VERSION {
        warn!(
            "Snapshot version mismatch: expected {}, got {}",
            CURRENT_SCHEMA_VERSION, envelope.version
        );
        return Err(Error::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found: envelope.version,
        });
    }

    Ok(envelope.payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
    struct TestData {
        id: u64,
        name: String,
        schema: Option<String>,
    }

    fn data() -> TestData {
        TestData {
            id: 123,
            name: "test".to_string(),
            schema: Some("public".to_string()),
        }
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let snapshot = ResourceSnapshot {
            resource: "test".to_string(),
            all_loaded: true,
            entries: vec![data()],
        };

        let bytes = encode_envelope(&snapshot).unwrap();
        let decoded: ResourceSnapshot<TestData> = decode_envelope(&bytes).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn test_envelope_structure() {
        let bytes = encode_envelope(&data()).unwrap();
        let envelope: Envelope<TestData> = postcard::from_bytes(&bytes).unwrap();

        assert_eq!(envelope.magic, SNAPSHOT_MAGIC);
        assert_eq!(envelope.version, CURRENT_SCHEMA_VERSION);
        assert_eq!(envelope.payload, data());
    }

    #[test]
    fn test_invalid_magic_rejected() {
        let envelope = Envelope {
            magic: *b"XXXX",
            version: CURRENT_SCHEMA_VERSION,
            payload: data(),
        };
        let bytes = postcard::to_allocvec(&envelope).unwrap();

        let result: Result<TestData> = decode_envelope(&bytes);
        match result.unwrap_err() {
            Error::InvalidSnapshot(_) => {}
            e => panic!("Expected InvalidSnapshot, got {:?}", e),
        }
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut envelope = Envelope::new(data());
        envelope.version = 999;
        let bytes = postcard::to_allocvec(&envelope).unwrap();

        match decode_envelope::<TestData>(&bytes).unwrap_err() {
            Error::VersionMismatch { expected, found } => {
                assert_eq!(expected, CURRENT_SCHEMA_VERSION);
                assert_eq!(found, 999);
            }
            e => panic!("Expected VersionMismatch, got {:?}", e),
        }
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let mut bytes = encode_envelope(&data()).unwrap();
        let len = bytes.len();
        bytes.truncate(len / 2);

        match decode_envelope::<TestData>(&bytes).unwrap_err() {
            Error::DeserializationError(_) => {}
            e => panic!("Expected DeserializationError, got {:?}", e),
        }
    }
}
