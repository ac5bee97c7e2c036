//! Terminable stream — a live network byte source with two distinct
//! termination modes.
//!
//! `close()` drains whatever the transport still has buffered so the
//! underlying connection can go back to its pool; `abort()` stops
//! reading immediately and marks the connection unusable. Both are
//! idempotent, and exactly one terminal transition wins under
//! concurrent calls. The winning thread is the only one that touches
//! the connection lease.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use tokio::sync::{mpsc, watch};

use stratus_core::{Chunk, TransportError};

// ── Lifecycle ─────────────────────────────────────────────────────────────────

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;
const ABORTED: u8 = 3;

/// Stream lifecycle. `Closed` and `Aborted` are terminal and mutually
/// exclusive; whichever is reached first sticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Open,
    Closing,
    Closed,
    Aborted,
}

impl Lifecycle {
    fn from_u8(raw: u8) -> Self {
        match raw {
            OPEN => Lifecycle::Open,
            CLOSING => Lifecycle::Closing,
            CLOSED => Lifecycle::Closed,
            _ => Lifecycle::Aborted,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Lifecycle::Closed | Lifecycle::Aborted)
    }
}

// ── Lease ─────────────────────────────────────────────────────────────────────

/// Handle to the pooled connection behind the stream. The pool
/// collaborator implements this; the stream decides which way it goes.
pub trait ConnectionLease: Send {
    /// Return the connection to the pool for reuse.
    fn reuse(self: Box<Self>);

    /// Destroy the connection instead of pooling it.
    fn discard(self: Box<Self>);
}

// ── Transport signal ──────────────────────────────────────────────────────────

/// What the stream currently wants from the transport task feeding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Deliver chunks as demand allows.
    Flow,
    /// A graceful close is in progress: flush everything that remains
    /// without waiting for demand, then finish.
    Drain,
    /// Aborted: stop reading the socket immediately.
    Stop,
}

/// Producer-side view of the stream's termination signals. The
/// transport task selects on this and reacts as soon as the consumer
/// closes or aborts.
#[derive(Clone)]
pub struct TransportSignal(watch::Receiver<Directive>);

impl TransportSignal {
    pub fn directive(&self) -> Directive {
        *self.0.borrow()
    }

    /// Resolves once the stream is aborted or dropped.
    pub async fn stopped(&mut self) {
        // An Err means the stream side is gone, which stops us just the same.
        let _ = self.0.wait_for(|d| *d == Directive::Stop).await;
    }

    /// Resolves with the first non-`Flow` directive.
    pub async fn interrupted(&mut self) -> Directive {
        match self.0.wait_for(|d| *d != Directive::Flow).await {
            Ok(directive) => *directive,
            Err(_) => Directive::Stop,
        }
    }
}

// ── Stream ────────────────────────────────────────────────────────────────────

/// Wraps the transport's ordered chunk sequence and the connection
/// lease it rides on, exposing `close` and `abort` as idempotent,
/// mutually exclusive termination operations.
pub struct TerminableStream {
    state: AtomicU8,
    chunks: tokio::sync::Mutex<mpsc::Receiver<Result<Chunk, TransportError>>>,
    directive: watch::Sender<Directive>,
    lease: Mutex<Option<Box<dyn ConnectionLease>>>,
}

impl TerminableStream {
    /// Wrap a transport channel and its connection lease. The returned
    /// [`TransportSignal`] goes to the producer task feeding the channel.
    pub fn new(
        chunks: mpsc::Receiver<Result<Chunk, TransportError>>,
        lease: Box<dyn ConnectionLease>,
    ) -> (Self, TransportSignal) {
        let (directive_tx, directive_rx) = watch::channel(Directive::Flow);
        let stream = Self {
            state: AtomicU8::new(OPEN),
            chunks: tokio::sync::Mutex::new(chunks),
            directive: directive_tx,
            lease: Mutex::new(Some(lease)),
        };
        (stream, TransportSignal(directive_rx))
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Next chunk in transport order, `None` at end of stream or after
    /// a terminal state (reads past termination are inertly empty).
    ///
    /// A transport error forces the stream into `Aborted` and discards
    /// the connection; an errored connection is never reused.
    pub async fn next_chunk(&self) -> Result<Option<Chunk>, TransportError> {
        if self.lifecycle() != Lifecycle::Open {
            return Ok(None);
        }
        let mut rx = self.chunks.lock().await;
        if self.lifecycle() != Lifecycle::Open {
            return Ok(None);
        }
        match rx.recv().await {
            Some(Ok(chunk)) => {
                // An abort that raced the recv wins: the chunk is dropped,
                // not delivered into a torn-down pipeline.
                if self.lifecycle() == Lifecycle::Aborted {
                    return Ok(None);
                }
                Ok(Some(chunk))
            }
            Some(Err(e)) => {
                self.terminate(ABORTED);
                Err(e)
            }
            None => Ok(None),
        }
    }

    /// Graceful termination: drain undelivered bytes so the connection
    /// can be pooled, then release it for reuse.
    ///
    /// Blocks proportional to the remaining body; callers needing
    /// bounded latency should prefer [`abort`](Self::abort). Drain
    /// errors are logged and swallowed, teardown still completes, but
    /// an errored connection is discarded rather than pooled.
    pub async fn close(&self) -> Lifecycle {
        if self
            .state
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Someone else is closing or already terminated us.
            return self.lifecycle();
        }

        // Tell the transport to flush the rest without waiting for
        // demand; the drain below consumes it.
        let _ = self.directive.send(Directive::Drain);

        let mut saw_error = false;
        {
            let mut rx = self.chunks.lock().await;
            while let Some(item) = rx.recv().await {
                match item {
                    Ok(chunk) => {
                        tracing::trace!(sequence = chunk.sequence, len = chunk.len(), "drained chunk");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "transport error while draining, teardown continues");
                        saw_error = true;
                    }
                }
            }
        }

        // An abort during the drain wins the terminal state; it has
        // already taken the lease.
        if self
            .state
            .compare_exchange(CLOSING, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return self.lifecycle();
        }

        if let Some(lease) = self.take_lease() {
            if saw_error {
                lease.discard();
            } else {
                lease.reuse();
            }
        }
        Lifecycle::Closed
    }

    /// Immediate termination: stop reading, mark the connection
    /// non-reusable, release it for destruction. O(1) in the remaining
    /// byte count, which is the property that distinguishes it from
    /// [`close`](Self::close).
    pub fn abort(&self) -> Lifecycle {
        self.terminate(ABORTED)
    }

    /// First-wins transition into a terminal state from `Open` or
    /// `Closing`. The winner signals the producer and takes the lease.
    fn terminate(&self, target: u8) -> Lifecycle {
        let won = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| match current {
                OPEN | CLOSING => Some(target),
                _ => None,
            })
            .is_ok();

        if won {
            let _ = self.directive.send(Directive::Stop);
            if let Some(lease) = self.take_lease() {
                lease.discard();
            }
            return Lifecycle::from_u8(target);
        }
        self.lifecycle()
    }

    fn take_lease(&self) -> Option<Box<dyn ConnectionLease>> {
        self.lease
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }
}
