//! stratus-stream — the streaming-response delivery pipeline.
//!
//! Moves a network-sourced byte stream into a caller-chosen materialized
//! form (buffer, file, publisher, blocking reader) under three
//! guarantees: consumer-driven backpressure, a two-mode termination
//! protocol (graceful close vs immediate abort), and end-to-end
//! integrity validation against a declared checksum.
//!
//! Request construction, signing, retry, and transport selection live
//! one layer up; this crate starts where a transport begins handing
//! over ordered body chunks.

pub mod demand;
pub mod materialize;
pub mod pump;
pub mod sink;
pub mod terminate;

pub use demand::{DemandLedger, PullSource, UNBOUNDED};
pub use materialize::{
    ChunkFate, Materialized, ResponseMaterializer, TransferHandle, TransferPhase, Verification,
};
pub use pump::pump;
pub use sink::{BlockingReader, Destination, DestinationSpec, FailurePolicy, OverwritePolicy, Tap};
pub use terminate::{ConnectionLease, Directive, Lifecycle, TerminableStream, TransportSignal};
