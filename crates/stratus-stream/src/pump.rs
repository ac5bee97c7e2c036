//! Pump — the consumer loop an orchestration layer runs per request.
//!
//! Forwards chunks from a [`TerminableStream`] into a
//! [`ResponseMaterializer`], keeping the demand ledger honest and
//! mapping stream end, transport errors, and cancellation onto the
//! materializer's terminal operations. The stream is closed gracefully
//! on a clean end and aborted on every other path.

use stratus_core::TransferError;

use crate::demand::{DemandLedger, PullSource};
use crate::materialize::{ChunkFate, ResponseMaterializer};
use crate::terminate::{Lifecycle, TerminableStream};

/// Drive one prepared transfer to its terminal state.
///
/// The caller has already run `prepare` and `on_response_header`; the
/// outcome is delivered through the transfer handle, not returned here.
pub async fn pump<S: PullSource>(
    stream: &TerminableStream,
    ledger: &DemandLedger<S>,
    materializer: &mut ResponseMaterializer,
) {
    loop {
        if materializer.abort_requested() {
            cancel(stream, ledger, materializer).await;
            return;
        }
        ledger.request_more(1);

        tokio::select! {
            _ = materializer.abort_triggered() => {
                cancel(stream, ledger, materializer).await;
                return;
            }
            next = stream.next_chunk() => match next {
                Ok(Some(chunk)) => {
                    if let Err(violation) = ledger.chunk_delivered() {
                        ledger.cancel();
                        stream.abort();
                        materializer.on_error(violation).await;
                        return;
                    }
                    if materializer.on_body_chunk(chunk).await == ChunkFate::Rejected {
                        // The materializer already reached its terminal
                        // state and reported the cause; just tear down.
                        ledger.cancel();
                        stream.abort();
                        return;
                    }
                }
                Ok(None) => {
                    if stream.lifecycle() == Lifecycle::Aborted {
                        materializer.on_error(TransferError::Aborted).await;
                    } else {
                        materializer.on_stream_end().await;
                        stream.close().await;
                    }
                    return;
                }
                Err(e) => {
                    // next_chunk already forced the stream into Aborted
                    // and discarded the connection.
                    ledger.cancel();
                    materializer.on_error(e.into()).await;
                    return;
                }
            }
        }
    }
}

async fn cancel<S: PullSource>(
    stream: &TerminableStream,
    ledger: &DemandLedger<S>,
    materializer: &mut ResponseMaterializer,
) {
    ledger.cancel();
    stream.abort();
    materializer.on_error(TransferError::Aborted).await;
}
