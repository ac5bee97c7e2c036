//! Transfer materializer — the consumer-side state machine that turns
//! an ordered chunk stream into its destination form.
//!
//! One transfer, one materializer, one result future. Whatever terminal
//! path the transfer takes (clean end, checksum mismatch, sink failure,
//! transport error, abort), the future completes exactly once; later
//! completion attempts are no-ops logged at debug level.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, Notify};

use stratus_core::checksum::{self, ChecksumResolver, Constructor, RollingChecksum};
use stratus_core::{Chunk, DeclaredChecksum, Outcome, ResponseMetadata, TransferError};

use crate::sink::{Destination, DestinationSpec, SinkKind, Tap};

// ── Result types ──────────────────────────────────────────────────────────────

/// Whether the body's integrity was actually checked. Capability absence
/// (no resolvable implementation of the declared algorithm) skips
/// verification rather than failing, and callers can see that here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Computed digest matched the declared value.
    Verified,
    /// No declared checksum, or no implementation available for it.
    Skipped,
}

/// The success value a finished transfer resolves to.
#[derive(Debug)]
pub struct Materialized {
    pub destination: Destination,
    pub bytes_written: u64,
    pub verification: Verification,
}

/// Transfer state machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    Preparing,
    AwaitingHeader,
    Streaming,
    Completed,
    Failed,
}

impl TransferPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferPhase::Completed | TransferPhase::Failed)
    }
}

/// What happened to a chunk offered to [`ResponseMaterializer::on_body_chunk`].
/// Rejected chunks were not appended anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkFate {
    Accepted,
    Rejected,
}

// ── Abort flag ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct AbortFlag {
    flag: AtomicBool,
    notify: Notify,
}

impl AbortFlag {
    pub(crate) fn trigger(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub(crate) fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub(crate) async fn triggered(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

// ── Result future ─────────────────────────────────────────────────────────────

/// Single-assignment result future for one transfer.
///
/// Await it with [`wait`](Self::wait); cancel the transfer with
/// [`abort`](Self::abort), which promptly stops chunk delivery and
/// completes the future with a cancellation-class failure.
pub struct TransferHandle {
    rx: oneshot::Receiver<Outcome<Materialized>>,
    abort: Arc<AbortFlag>,
}

impl TransferHandle {
    /// Resolves with the transfer's single terminal outcome.
    pub async fn wait(self) -> Outcome<Materialized> {
        match self.rx.await {
            Ok(outcome) => outcome,
            // The materializer was dropped without reaching a terminal
            // state. That is a driver bug, not a transport condition.
            Err(_) => Outcome::Failure(TransferError::Protocol(
                "transfer dropped without completing",
            )),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn abort(&self) {
        self.abort.trigger();
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_set()
    }
}

/// Completed-exactly-once cell in front of the oneshot sender.
struct Completion {
    tx: Option<oneshot::Sender<Outcome<Materialized>>>,
}

impl Completion {
    fn unarmed() -> Self {
        Self { tx: None }
    }

    fn new() -> (Self, oneshot::Receiver<Outcome<Materialized>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    fn complete(&mut self, outcome: Outcome<Materialized>) {
        match self.tx.take() {
            // The handle may have been dropped; completion is still the
            // terminal bookkeeping step, so a dead receiver is fine.
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => {
                tracing::debug!("result future already completed, ignoring second completion");
            }
        }
    }
}

// ── Materializer ──────────────────────────────────────────────────────────────

/// Drives one transfer through `prepare → on_response_header →
/// on_body_chunk* → {on_stream_end | on_error}`.
pub struct ResponseMaterializer {
    phase: TransferPhase,
    spec: DestinationSpec,
    sink: Option<SinkKind>,
    rolling: Option<Box<dyn RollingChecksum>>,
    declared: Option<DeclaredChecksum>,
    content_length: Option<u64>,
    bytes_written: u64,
    require_verification: bool,
    resolver: Option<Arc<ChecksumResolver>>,
    completion: Completion,
    abort: Arc<AbortFlag>,
    early_failure: Option<TransferError>,
}

impl ResponseMaterializer {
    pub fn new(spec: DestinationSpec) -> Self {
        Self {
            phase: TransferPhase::Preparing,
            spec,
            sink: None,
            rolling: None,
            declared: None,
            content_length: None,
            bytes_written: 0,
            require_verification: false,
            resolver: None,
            completion: Completion::unarmed(),
            abort: Arc::new(AbortFlag::default()),
            early_failure: None,
        }
    }

    /// Treat an unverifiable declared checksum as a failure instead of
    /// skipping verification.
    pub fn require_verification(mut self) -> Self {
        self.require_verification = true;
        self
    }

    /// Resolve checksum implementations through `resolver` instead of
    /// the process-wide table. Used by tests and embedders with their
    /// own candidate ordering.
    pub fn with_resolver(mut self, resolver: Arc<ChecksumResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn phase(&self) -> TransferPhase {
        self.phase
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// True once the handle requested cancellation.
    pub fn abort_requested(&self) -> bool {
        self.abort.is_set()
    }

    /// Resolves when the handle requests cancellation. Drivers select
    /// on this against the next chunk.
    pub async fn abort_triggered(&self) {
        self.abort.triggered().await;
    }

    /// Allocate the destination sink and arm the result future.
    /// Callable before any bytes arrive.
    pub async fn prepare(&mut self) -> (TransferHandle, Tap) {
        let (completion, rx) = Completion::new();
        let handle = TransferHandle {
            rx,
            abort: self.abort.clone(),
        };

        if let Some(cause) = self.early_failure.take() {
            // on_error arrived before prepare; deliver it through the
            // future the caller is about to hold.
            let mut completion = completion;
            completion.complete(Outcome::Failure(cause));
            return (handle, Tap::None);
        }
        if self.phase != TransferPhase::Preparing {
            tracing::error!(phase = ?self.phase, "prepare called more than once");
            let mut completion = completion;
            completion.complete(Outcome::Failure(TransferError::Protocol(
                "prepare called more than once",
            )));
            return (handle, Tap::None);
        }

        self.completion = completion;
        match SinkKind::open(&self.spec).await {
            Ok((sink, tap)) => {
                self.sink = Some(sink);
                self.phase = TransferPhase::AwaitingHeader;
                (handle, tap)
            }
            Err(e) => {
                self.phase = TransferPhase::Failed;
                self.completion.complete(Outcome::Failure(e.into()));
                (handle, Tap::None)
            }
        }
    }

    /// Record response metadata and set up the running checksum.
    ///
    /// A declared algorithm with no resolvable implementation is a
    /// warning and verification is skipped, unless the caller opted
    /// into [`require_verification`](Self::require_verification).
    pub async fn on_response_header(&mut self, meta: ResponseMetadata) {
        match self.phase {
            TransferPhase::AwaitingHeader => {}
            TransferPhase::Completed | TransferPhase::Failed => {
                tracing::debug!("response header after terminal state, ignoring");
                return;
            }
            TransferPhase::Preparing | TransferPhase::Streaming => {
                self.fail(TransferError::Protocol(
                    "response header outside the awaiting-header phase",
                ))
                .await;
                return;
            }
        }

        self.content_length = meta.content_length;
        if let Some(declared) = meta.declared_checksum {
            match self.resolve(declared.algorithm) {
                Some(ctor) => {
                    self.rolling = Some(ctor());
                    self.declared = Some(declared);
                }
                None if self.require_verification => {
                    self.fail(TransferError::VerificationUnavailable {
                        algorithm: declared.algorithm,
                    })
                    .await;
                    return;
                }
                None => {
                    tracing::warn!(
                        algorithm = %declared.algorithm,
                        "declared checksum algorithm unavailable, verification skipped"
                    );
                }
            }
        }
        self.phase = TransferPhase::Streaming;
    }

    /// Append one chunk to the sink and fold it into the running
    /// checksum. Chunks offered after a terminal state (including a
    /// pending abort) are rejected, never appended.
    pub async fn on_body_chunk(&mut self, chunk: Chunk) -> ChunkFate {
        if self.abort.is_set() && !self.phase.is_terminal() {
            self.fail(TransferError::Aborted).await;
            return ChunkFate::Rejected;
        }
        match self.phase {
            TransferPhase::Streaming => {}
            TransferPhase::Completed | TransferPhase::Failed => {
                tracing::debug!(sequence = chunk.sequence, "chunk after terminal state, rejected");
                return ChunkFate::Rejected;
            }
            TransferPhase::Preparing | TransferPhase::AwaitingHeader => {
                self.fail(TransferError::Protocol("body chunk before response header"))
                    .await;
                return ChunkFate::Rejected;
            }
        }

        let Some(sink) = self.sink.as_mut() else {
            self.fail(TransferError::Protocol("streaming with no sink allocated"))
                .await;
            return ChunkFate::Rejected;
        };

        if let Err(e) = sink.write_chunk(&chunk.payload).await {
            self.fail(e.into()).await;
            return ChunkFate::Rejected;
        }
        if let Some(rolling) = self.rolling.as_mut() {
            rolling.update(&chunk.payload);
        }
        self.bytes_written += chunk.len() as u64;
        ChunkFate::Accepted
    }

    /// Verify integrity, seal the sink, and complete the result future
    /// with the materialized value.
    pub async fn on_stream_end(&mut self) {
        match self.phase {
            TransferPhase::Streaming => {}
            TransferPhase::Completed | TransferPhase::Failed => {
                tracing::debug!("stream end after terminal state, ignoring");
                return;
            }
            TransferPhase::Preparing | TransferPhase::AwaitingHeader => {
                self.fail(TransferError::Protocol("stream end before response header"))
                    .await;
                return;
            }
        }

        let verification = match (&self.declared, &self.rolling) {
            (Some(declared), Some(rolling)) => {
                let computed = rolling.digest_hex();
                if !declared.matches(&computed) {
                    let cause = TransferError::ChecksumMismatch {
                        algorithm: declared.algorithm,
                        declared: declared.value.clone(),
                        computed,
                    };
                    self.fail(cause).await;
                    return;
                }
                Verification::Verified
            }
            _ => Verification::Skipped,
        };

        let Some(sink) = self.sink.take() else {
            self.fail(TransferError::Protocol("stream end with no sink allocated"))
                .await;
            return;
        };
        match sink.finalize().await {
            Ok(destination) => {
                self.phase = TransferPhase::Completed;
                self.completion.complete(Outcome::Value(Materialized {
                    destination,
                    bytes_written: self.bytes_written,
                    verification,
                }));
            }
            Err(e) => {
                self.phase = TransferPhase::Failed;
                self.completion.complete(Outcome::Failure(e.into()));
            }
        }
    }

    /// Terminal error path from any non-terminal state: best-effort
    /// sink release, then exceptional completion.
    pub async fn on_error(&mut self, cause: TransferError) {
        if self.phase.is_terminal() {
            tracing::debug!(%cause, "error after terminal state, ignoring");
            return;
        }
        if self.phase == TransferPhase::Preparing {
            // The future is not armed yet; hold the cause for prepare.
            self.phase = TransferPhase::Failed;
            self.early_failure = Some(cause);
            return;
        }
        self.fail(cause).await;
    }

    fn resolve(&self, algorithm: checksum::ChecksumAlgorithm) -> Option<Constructor> {
        match &self.resolver {
            Some(resolver) => resolver.resolve(algorithm),
            None => checksum::resolve(algorithm),
        }
    }

    async fn fail(&mut self, cause: TransferError) {
        if let Some(sink) = self.sink.take() {
            sink.discard(&cause.to_string()).await;
        }
        self.phase = TransferPhase::Failed;
        self.completion.complete(Outcome::Failure(cause));
    }
}
