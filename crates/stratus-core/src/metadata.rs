//! Response metadata recorded at header arrival, before any body bytes.

use serde::{Deserialize, Serialize};

use crate::checksum::ChecksumAlgorithm;

/// An integrity value asserted by the data source, to be compared
/// against one computed locally while the body streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredChecksum {
    pub algorithm: ChecksumAlgorithm,
    /// Hex-encoded digest, as declared by the source.
    pub value: String,
}

impl DeclaredChecksum {
    pub fn new(algorithm: ChecksumAlgorithm, value: impl Into<String>) -> Self {
        Self {
            algorithm,
            value: value.into(),
        }
    }

    /// Case-insensitive comparison against a locally computed hex digest.
    pub fn matches(&self, computed_hex: &str) -> bool {
        self.value.eq_ignore_ascii_case(computed_hex)
    }
}

/// What the response header told us about the body that follows.
/// Serializable so orchestration layers can persist and replay it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Declared body length in bytes, when the source provided one.
    pub content_length: Option<u64>,
    /// Declared end-to-end checksum, when the source provided one.
    pub declared_checksum: Option<DeclaredChecksum>,
}

impl ResponseMetadata {
    pub fn new(content_length: Option<u64>, declared_checksum: Option<DeclaredChecksum>) -> Self {
        Self {
            content_length,
            declared_checksum,
        }
    }
}
