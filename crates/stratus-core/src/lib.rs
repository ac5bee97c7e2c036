//! stratus-core — shared types for the Stratus download pipeline.
//! Chunk and metadata types, checksum resolution, the two-variant
//! transfer outcome, and the error taxonomy. All other Stratus crates
//! depend on this one.

pub mod checksum;
pub mod chunk;
pub mod error;
pub mod metadata;
pub mod outcome;

pub use checksum::{ChecksumAlgorithm, RollingChecksum};
pub use chunk::Chunk;
pub use error::{TransferError, TransportError};
pub use metadata::{DeclaredChecksum, ResponseMetadata};
pub use outcome::Outcome;
