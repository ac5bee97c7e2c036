//! Shared harness: an in-memory transport with pull-based flow control
//! and a connection-lease probe.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Semaphore};

use stratus_core::{Chunk, TransportError};
use stratus_stream::{
    ConnectionLease, DemandLedger, Directive, PullSource, TerminableStream, TransportSignal,
};

// ── Lease probe ───────────────────────────────────────────────────────────────

pub const FATE_PENDING: u8 = 0;
pub const FATE_REUSED: u8 = 1;
pub const FATE_DISCARDED: u8 = 2;

/// Records which way the connection went, and asserts it only goes once.
pub struct LeaseProbe(Arc<AtomicU8>);

impl ConnectionLease for LeaseProbe {
    fn reuse(self: Box<Self>) {
        let prev = self.0.swap(FATE_REUSED, Ordering::SeqCst);
        assert_eq!(prev, FATE_PENDING, "lease released twice");
    }

    fn discard(self: Box<Self>) {
        let prev = self.0.swap(FATE_DISCARDED, Ordering::SeqCst);
        assert_eq!(prev, FATE_PENDING, "lease released twice");
    }
}

// ── Pull source ───────────────────────────────────────────────────────────────

/// Demand grants arrive as semaphore permits; the producer takes one
/// permit per chunk. `cancel` closes the semaphore, which reads as a
/// stop on the producer side.
#[derive(Clone)]
pub struct SemaphorePull(Arc<Semaphore>);

impl PullSource for SemaphorePull {
    fn request_more(&self, n: u64) {
        // Semaphore permits are capped well below u64::MAX; clamp the
        // unbounded sentinel instead of overflowing.
        self.0.add_permits(n.min(1 << 16) as usize);
    }

    fn cancel(&self) {
        self.0.close();
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

pub struct StubTransport {
    pub stream: TerminableStream,
    pub ledger: DemandLedger<SemaphorePull>,
    pub lease_fate: Arc<AtomicU8>,
    /// How many items the producer actually sent before finishing or
    /// being stopped.
    pub sent: Arc<AtomicU64>,
}

/// Spawn a producer that plays back `items`, honoring demand while the
/// stream flows, flushing without demand on drain, and quitting
/// immediately on stop.
pub fn stub_transport(items: Vec<Result<Bytes, TransportError>>) -> StubTransport {
    let lease_fate = Arc::new(AtomicU8::new(FATE_PENDING));
    let sent = Arc::new(AtomicU64::new(0));

    let (tx, rx) = mpsc::channel(2);
    let (stream, signal) = TerminableStream::new(rx, Box::new(LeaseProbe(lease_fate.clone())));

    let permits = Arc::new(Semaphore::new(0));
    let ledger = DemandLedger::new(SemaphorePull(permits.clone()));

    tokio::spawn(produce(items, tx, signal, permits, sent.clone()));

    StubTransport {
        stream,
        ledger,
        lease_fate,
        sent,
    }
}

async fn produce(
    items: Vec<Result<Bytes, TransportError>>,
    tx: mpsc::Sender<Result<Chunk, TransportError>>,
    mut signal: TransportSignal,
    permits: Arc<Semaphore>,
    sent: Arc<AtomicU64>,
) {
    let mut seq = 0u64;
    let mut items = items.into_iter();

    while let Some(item) = items.next() {
        tokio::select! {
            directive = signal.interrupted() => {
                if directive == Directive::Stop {
                    return;
                }
                // Drain: flush this and everything left without demand.
                if send_item(&tx, &mut signal, item, &mut seq, &sent).await.is_err() {
                    return;
                }
                for item in items.by_ref() {
                    if send_item(&tx, &mut signal, item, &mut seq, &sent).await.is_err() {
                        return;
                    }
                }
                return;
            }
            permit = permits.acquire() => {
                match permit {
                    Ok(p) => p.forget(),
                    // Cancelled demand reads as a stop.
                    Err(_) => return,
                }
                if send_item(&tx, &mut signal, item, &mut seq, &sent).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn send_item(
    tx: &mpsc::Sender<Result<Chunk, TransportError>>,
    signal: &mut TransportSignal,
    item: Result<Bytes, TransportError>,
    seq: &mut u64,
    sent: &Arc<AtomicU64>,
) -> Result<(), ()> {
    let msg = item.map(|payload| {
        let chunk = Chunk::new(*seq, payload);
        *seq += 1;
        chunk
    });
    tokio::select! {
        _ = signal.stopped() => Err(()),
        delivered = tx.send(msg) => match delivered {
            Ok(()) => {
                sent.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(_) => Err(()),
        },
    }
}

// ── Bodies and digests ────────────────────────────────────────────────────────

/// Deterministic body split into the given chunk sizes. Returns the
/// chunk items for the transport and the whole body for assertions.
pub fn patterned_body(sizes: &[usize]) -> (Vec<Result<Bytes, TransportError>>, Vec<u8>) {
    let mut body = Vec::new();
    let mut items = Vec::new();
    let mut counter = 0u8;
    for &size in sizes {
        let chunk: Vec<u8> = (0..size)
            .map(|_| {
                counter = counter.wrapping_add(41);
                counter
            })
            .collect();
        body.extend_from_slice(&chunk);
        items.push(Ok(Bytes::from(chunk)));
    }
    (items, body)
}

pub fn crc32_hex(data: &[u8]) -> String {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hex::encode(hasher.finalize().to_be_bytes())
}

pub fn crc32c_hex(data: &[u8]) -> String {
    hex::encode(crc32c::crc32c(data).to_be_bytes())
}
