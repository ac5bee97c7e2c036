//! Demand ledger — tracks outstanding pull-demand in the producer/consumer
//! chunk pipeline.
//!
//! Sits between the consumer and a pull-based upstream source. Every
//! `request_more` is counted and forwarded unchanged; every delivered
//! chunk decrements the ledger by one. The counter is for diagnostics
//! and tests only; delivery pacing stays the upstream's responsibility.

use std::sync::atomic::{AtomicU64, Ordering};

use stratus_core::TransferError;

/// Sentinel for "the consumer wants everything". Additions that would
/// overflow clamp here instead of wrapping.
pub const UNBOUNDED: u64 = u64::MAX;

/// A pull-based upstream source: the transport side of the pipeline.
pub trait PullSource: Send + Sync {
    /// Grant the producer permission to deliver `n` more chunks.
    fn request_more(&self, n: u64);

    /// Tell the producer to stop delivering. Idempotent.
    fn cancel(&self);
}

/// Counting adapter over a [`PullSource`]. Explicit composition, not
/// delegation: callers hold the ledger and the ledger holds the source.
pub struct DemandLedger<S: PullSource> {
    upstream: S,
    demand: AtomicU64,
}

impl<S: PullSource> DemandLedger<S> {
    pub fn new(upstream: S) -> Self {
        Self {
            upstream,
            demand: AtomicU64::new(0),
        }
    }

    /// Add `n` to outstanding demand, clamping at [`UNBOUNDED`], then
    /// forward the request unchanged.
    pub fn request_more(&self, n: u64) {
        // fetch_update never returns Err with a closure that always
        // produces Some, so the result is ignorable.
        let _ = self
            .demand
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_add(n))
            });
        self.upstream.request_more(n);
    }

    /// Account for one chunk delivered downstream.
    ///
    /// Underflow means the producer delivered without permission; the
    /// counter is left untouched and the violation is reported.
    /// An unbounded ledger stays unbounded.
    pub fn chunk_delivered(&self) -> Result<(), TransferError> {
        self.demand
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| match current {
                0 => None,
                UNBOUNDED => Some(UNBOUNDED),
                n => Some(n - 1),
            })
            .map(|_| ())
            .map_err(|_| TransferError::DemandUnderflow)
    }

    /// Current outstanding demand. Diagnostics and tests only — never
    /// use this to gate delivery.
    pub fn demand(&self) -> u64 {
        self.demand.load(Ordering::SeqCst)
    }

    /// Forwarded verbatim to the upstream source.
    pub fn cancel(&self) {
        self.upstream.cancel();
    }
}
