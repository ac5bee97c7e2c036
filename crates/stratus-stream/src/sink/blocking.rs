//! Blocking-read materialization — hands streamed chunks to a reader
//! on another thread through a Condvar-guarded queue.
//!
//! The reader observes bytes in delivery order with no loss. End of
//! stream and errors both unblock a pending read; an error is surfaced
//! on that and every later read call, never silently dropped.

use std::collections::VecDeque;
use std::io::Read;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use bytes::{Buf, Bytes};

struct State {
    queue: VecDeque<Bytes>,
    finished: bool,
    error: Option<String>,
}

struct Shared {
    state: Mutex<State>,
    available: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Producer half: the materializer enqueues chunks here.
pub struct BlockingQueue(Arc<Shared>);

/// Consumer half: a plain [`std::io::Read`] over the delivered bytes.
pub struct BlockingReader {
    shared: Arc<Shared>,
    current: Option<Bytes>,
}

/// A connected queue/reader pair.
pub fn channel() -> (BlockingQueue, BlockingReader) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            queue: VecDeque::new(),
            finished: false,
            error: None,
        }),
        available: Condvar::new(),
    });
    (
        BlockingQueue(shared.clone()),
        BlockingReader {
            shared,
            current: None,
        },
    )
}

impl BlockingQueue {
    pub fn push(&self, chunk: Bytes) {
        let mut state = self.0.lock();
        state.queue.push_back(chunk);
        self.0.available.notify_all();
    }

    /// Mark end-of-data. Pending and future reads drain the queue and
    /// then see EOF.
    pub fn finish(&self) {
        let mut state = self.0.lock();
        state.finished = true;
        self.0.available.notify_all();
    }

    /// Mark the stream failed. Queued bytes are still readable; once
    /// the queue is empty every read reports the error.
    pub fn fail(&self, message: String) {
        let mut state = self.0.lock();
        state.error = Some(message);
        self.0.available.notify_all();
    }
}

impl Read for BlockingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if let Some(chunk) = self.current.as_mut() {
                if chunk.has_remaining() {
                    let n = chunk.remaining().min(buf.len());
                    chunk.copy_to_slice(&mut buf[..n]);
                    return Ok(n);
                }
                self.current = None;
            }

            let mut state = self.shared.lock();
            loop {
                if let Some(chunk) = state.queue.pop_front() {
                    drop(state);
                    self.current = Some(chunk);
                    break;
                }
                if let Some(message) = &state.error {
                    return Err(std::io::Error::other(message.clone()));
                }
                if state.finished {
                    return Ok(0);
                }
                state = self
                    .shared
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }
}
