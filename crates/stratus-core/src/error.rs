//! Error taxonomy for the delivery pipeline.
//!
//! Callers need to tell three situations apart: the transport broke
//! (retry one layer up may help), the data is corrupt (checksum
//! mismatch, retrying blindly is wrong), and the transfer was cancelled.
//! Protocol violations are programming errors and fail loud.

use thiserror::Error;

use crate::checksum::ChecksumAlgorithm;

/// A failure reported by the transport collaborator: read errors,
/// connection resets, anything that kills the byte stream mid-body.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// The single failure type a transfer can terminate with.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The transport failed while the body was still streaming. The
    /// underlying connection is never reused after this.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The body arrived intact from the transport's point of view but
    /// its computed checksum does not match the declared one.
    #[error("checksum mismatch ({algorithm}): declared {declared}, computed {computed}")]
    ChecksumMismatch {
        algorithm: ChecksumAlgorithm,
        declared: String,
        computed: String,
    },

    /// The transfer was cancelled by the caller before completion.
    #[error("transfer aborted before completion")]
    Aborted,

    /// Writing to the destination sink failed.
    #[error("sink i/o error")]
    Sink(#[from] std::io::Error),

    /// A chunk was delivered with no outstanding demand. This is a
    /// contract breach by the upstream source, not a recoverable
    /// transport condition.
    #[error("demand underflow: chunk delivered with no outstanding demand")]
    DemandUnderflow,

    /// The caller required checksum verification but no implementation
    /// of the declared algorithm is available in this environment.
    #[error("checksum verification required but no {algorithm} implementation is available")]
    VerificationUnavailable { algorithm: ChecksumAlgorithm },

    /// A transfer operation was invoked out of order.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),
}

impl TransferError {
    /// True for the cancellation-class cause.
    pub fn is_aborted(&self) -> bool {
        matches!(self, TransferError::Aborted)
    }

    /// True when the body was delivered but failed integrity validation.
    pub fn is_checksum_mismatch(&self) -> bool {
        matches!(self, TransferError::ChecksumMismatch { .. })
    }
}
