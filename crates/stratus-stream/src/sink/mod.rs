//! Materialization sinks — the four destination forms a transfer can
//! take, behind one write/finalize/discard contract shape.

mod blocking;
mod file;

pub use blocking::BlockingReader;
pub use file::{FailurePolicy, OverwritePolicy};

use std::path::PathBuf;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use self::blocking::BlockingQueue;
use self::file::FileSink;

/// The caller's choice of destination, made before any bytes arrive.
#[derive(Debug, Clone)]
pub enum DestinationSpec {
    /// Accumulate the whole body in memory.
    Buffer,
    /// Stream the body to a file.
    File {
        path: PathBuf,
        overwrite: OverwritePolicy,
        on_failure: FailurePolicy,
    },
    /// Republish chunks to a channel subscriber as they arrive.
    Publish { capacity: usize },
    /// Expose the body to a blocking reader on another thread.
    Blocking,
}

/// Consumer-side handle produced at prepare time for the destinations
/// that hand data out while the transfer is still running.
pub enum Tap {
    /// Buffer and file destinations deliver through the result future only.
    None,
    /// Receiving end of the publish destination.
    Publisher(mpsc::Receiver<Bytes>),
    /// Reader end of the blocking destination.
    Blocking(BlockingReader),
}

/// What a completed transfer materialized into.
#[derive(Debug)]
pub enum Destination {
    /// The fully buffered body.
    Buffer(Bytes),
    /// Path of the written file.
    File(PathBuf),
    /// All chunks were republished; the subscriber saw end-of-stream.
    Published,
    /// All bytes were handed to the blocking reader.
    BlockingRead,
}

pub(crate) enum SinkKind {
    Buffer(BytesMut),
    File(FileSink),
    Publish(mpsc::Sender<Bytes>),
    Blocking(BlockingQueue),
}

impl SinkKind {
    /// Allocate the destination. Callable before any bytes arrive.
    pub(crate) async fn open(spec: &DestinationSpec) -> std::io::Result<(SinkKind, Tap)> {
        match spec {
            DestinationSpec::Buffer => Ok((SinkKind::Buffer(BytesMut::new()), Tap::None)),
            DestinationSpec::File {
                path,
                overwrite,
                on_failure,
            } => {
                let sink = FileSink::open(path, *overwrite, *on_failure).await?;
                Ok((SinkKind::File(sink), Tap::None))
            }
            DestinationSpec::Publish { capacity } => {
                let (tx, rx) = mpsc::channel(*capacity);
                Ok((SinkKind::Publish(tx), Tap::Publisher(rx)))
            }
            DestinationSpec::Blocking => {
                let (queue, reader) = blocking::channel();
                Ok((SinkKind::Blocking(queue), Tap::Blocking(reader)))
            }
        }
    }

    /// Append one chunk to the destination.
    pub(crate) async fn write_chunk(&mut self, chunk: &Bytes) -> std::io::Result<()> {
        match self {
            SinkKind::Buffer(buf) => {
                buf.extend_from_slice(chunk);
                Ok(())
            }
            SinkKind::File(sink) => sink.write(chunk).await,
            SinkKind::Publish(tx) => tx.send(chunk.clone()).await.map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "publish subscriber dropped its receiver",
                )
            }),
            SinkKind::Blocking(queue) => {
                queue.push(chunk.clone());
                Ok(())
            }
        }
    }

    /// Seal the destination after a successful stream end.
    pub(crate) async fn finalize(self) -> std::io::Result<Destination> {
        match self {
            SinkKind::Buffer(buf) => Ok(Destination::Buffer(buf.freeze())),
            SinkKind::File(sink) => Ok(Destination::File(sink.finish().await?)),
            SinkKind::Publish(tx) => {
                // Dropping the sender is end-of-stream for the subscriber.
                drop(tx);
                Ok(Destination::Published)
            }
            SinkKind::Blocking(queue) => {
                queue.finish();
                Ok(Destination::BlockingRead)
            }
        }
    }

    /// Best-effort release after a failed transfer. `cause` reaches
    /// destinations with a live consumer on the other side.
    pub(crate) async fn discard(self, cause: &str) {
        match self {
            SinkKind::Buffer(_) => {}
            SinkKind::File(sink) => sink.discard().await,
            SinkKind::Publish(tx) => drop(tx),
            SinkKind::Blocking(queue) => queue.fail(cause.to_string()),
        }
    }
}
