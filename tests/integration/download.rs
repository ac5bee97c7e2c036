//! End-to-end materialization scenarios against the stub transport.

use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use stratus_core::{ChecksumAlgorithm, DeclaredChecksum, ResponseMetadata, TransferError};
use stratus_stream::{
    pump, Destination, DestinationSpec, FailurePolicy, Materialized, OverwritePolicy,
    ResponseMaterializer, Tap, Verification,
};

use crate::infra::*;

/// The canonical three-chunk body used across destination forms.
const CHUNK_SIZES: &[usize] = &[4096, 4096, 10];
const TOTAL_BYTES: u64 = 8202;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("stratus-it-{}-{name}", std::process::id()))
}

fn crc32c_meta(body: &[u8]) -> ResponseMetadata {
    ResponseMetadata::new(
        Some(body.len() as u64),
        Some(DeclaredChecksum::new(ChecksumAlgorithm::Crc32C, crc32c_hex(body))),
    )
}

async fn run_to_outcome(
    spec: DestinationSpec,
    meta: ResponseMetadata,
) -> (StubTransport, Result<Materialized, TransferError>, Tap, Vec<u8>) {
    let (items, body) = patterned_body(CHUNK_SIZES);
    let transport = stub_transport(items);

    let mut mat = ResponseMaterializer::new(spec);
    let (handle, tap) = mat.prepare().await;
    mat.on_response_header(meta).await;
    pump(&transport.stream, &transport.ledger, &mut mat).await;

    let outcome = handle.wait().await.into_result();
    (transport, outcome, tap, body)
}

#[tokio::test]
async fn buffer_download_verifies_and_reuses_connection() {
    let (items, body) = patterned_body(CHUNK_SIZES);
    let transport = stub_transport(items);

    let mut mat = ResponseMaterializer::new(DestinationSpec::Buffer);
    let (handle, _tap) = mat.prepare().await;
    mat.on_response_header(crc32c_meta(&body)).await;
    pump(&transport.stream, &transport.ledger, &mut mat).await;

    let materialized = handle.wait().await.into_result().unwrap();
    assert_eq!(materialized.bytes_written, TOTAL_BYTES);
    assert_eq!(materialized.verification, Verification::Verified);
    match materialized.destination {
        Destination::Buffer(bytes) => assert_eq!(&bytes[..], &body[..]),
        other => panic!("expected buffer, got {other:?}"),
    }

    // Graceful end: the connection goes back to the pool.
    assert_eq!(transport.lease_fate.load(Ordering::SeqCst), FATE_REUSED);

    // The pump requested one chunk per iteration: three grants were
    // consumed by deliveries, the final grant saw end-of-stream.
    assert_eq!(transport.ledger.demand(), 1);
}

#[tokio::test]
async fn file_download_lands_all_bytes_on_disk() -> anyhow::Result<()> {
    let path = temp_path("file-happy");
    let _ = std::fs::remove_file(&path);

    let (items, body) = patterned_body(CHUNK_SIZES);
    let transport = stub_transport(items);

    let mut mat = ResponseMaterializer::new(DestinationSpec::File {
        path: path.clone(),
        overwrite: OverwritePolicy::CreateNew,
        on_failure: FailurePolicy::Preserve,
    });
    let (handle, _tap) = mat.prepare().await;
    mat.on_response_header(crc32c_meta(&body)).await;
    pump(&transport.stream, &transport.ledger, &mut mat).await;

    let materialized = handle.wait().await.into_result()?;
    assert_eq!(materialized.verification, Verification::Verified);
    match &materialized.destination {
        Destination::File(written) => assert_eq!(written, &path),
        other => panic!("expected file, got {other:?}"),
    }

    let on_disk = std::fs::read(&path)?;
    assert_eq!(on_disk.len() as u64, TOTAL_BYTES);
    assert_eq!(on_disk, body);

    let _ = std::fs::remove_file(&path);
    Ok(())
}

#[tokio::test]
async fn blocking_download_delivers_in_order_then_eof() {
    let (items, body) = patterned_body(CHUNK_SIZES);
    let transport = stub_transport(items);

    let mut mat = ResponseMaterializer::new(DestinationSpec::Blocking);
    let (handle, tap) = mat.prepare().await;
    let mut reader = match tap {
        Tap::Blocking(reader) => reader,
        _ => panic!("expected blocking tap"),
    };

    // A consumer thread reads while the pipeline is still streaming.
    let consumer = std::thread::spawn(move || {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).map(|_| out)
    });

    mat.on_response_header(crc32c_meta(&body)).await;
    pump(&transport.stream, &transport.ledger, &mut mat).await;

    let materialized = handle.wait().await.into_result().unwrap();
    assert_eq!(materialized.bytes_written, TOTAL_BYTES);

    let consumed = consumer.join().unwrap().unwrap();
    assert_eq!(consumed.len() as u64, TOTAL_BYTES);
    assert_eq!(consumed, body);
}

#[tokio::test]
async fn publisher_download_republishes_chunks_in_order() {
    let (transport, outcome, tap, body) = run_to_outcome(
        DestinationSpec::Publish { capacity: 8 },
        ResponseMetadata::new(Some(TOTAL_BYTES), None),
    )
    .await;

    let materialized = outcome.unwrap();
    assert_eq!(materialized.bytes_written, TOTAL_BYTES);
    // No declared checksum on this one; that is visible on the result.
    assert_eq!(materialized.verification, Verification::Skipped);
    assert_eq!(transport.lease_fate.load(Ordering::SeqCst), FATE_REUSED);

    let mut rx = match tap {
        Tap::Publisher(rx) => rx,
        _ => panic!("expected publisher tap"),
    };
    let mut republished = Vec::new();
    let mut sizes = Vec::new();
    while let Some(chunk) = rx.recv().await {
        sizes.push(chunk.len());
        republished.extend_from_slice(&chunk);
    }
    assert_eq!(sizes, CHUNK_SIZES);
    assert_eq!(republished, body);
}

#[tokio::test]
async fn transport_error_mid_body_discards_connection() {
    let (mut items, _body) = patterned_body(&[4096]);
    items.push(Err(stratus_core::TransportError::new("connection reset")));
    let transport = stub_transport(items);

    let mut mat = ResponseMaterializer::new(DestinationSpec::Buffer);
    let (handle, _tap) = mat.prepare().await;
    mat.on_response_header(ResponseMetadata::default()).await;
    pump(&transport.stream, &transport.ledger, &mut mat).await;

    let failure = handle.wait().await.into_result().unwrap_err();
    assert!(matches!(failure, TransferError::Transport(_)), "got {failure}");
    assert!(!failure.is_checksum_mismatch());

    // An errored connection never goes back to the pool.
    assert_eq!(transport.lease_fate.load(Ordering::SeqCst), FATE_DISCARDED);
}

#[tokio::test]
async fn checksum_mismatch_applies_partial_file_policy() {
    // Declared digest belongs to a different body.
    let bad_meta = ResponseMetadata::new(
        Some(TOTAL_BYTES),
        Some(DeclaredChecksum::new(
            ChecksumAlgorithm::Crc32,
            crc32_hex(b"not the body that will arrive"),
        )),
    );

    // Default policy: the partial artifact is preserved.
    let preserved = temp_path("mismatch-preserved");
    let _ = std::fs::remove_file(&preserved);
    let (items, _body) = patterned_body(CHUNK_SIZES);
    let transport = stub_transport(items);
    let mut mat = ResponseMaterializer::new(DestinationSpec::File {
        path: preserved.clone(),
        overwrite: OverwritePolicy::CreateNew,
        on_failure: FailurePolicy::Preserve,
    });
    let (handle, _tap) = mat.prepare().await;
    mat.on_response_header(bad_meta.clone()).await;
    pump(&transport.stream, &transport.ledger, &mut mat).await;
    let failure = handle.wait().await.into_result().unwrap_err();
    assert!(failure.is_checksum_mismatch(), "got {failure}");
    assert!(preserved.exists(), "partial file should be preserved");
    let _ = std::fs::remove_file(&preserved);

    // Opt-in removal.
    let removed = temp_path("mismatch-removed");
    let _ = std::fs::remove_file(&removed);
    let (items, _body) = patterned_body(CHUNK_SIZES);
    let transport = stub_transport(items);
    let mut mat = ResponseMaterializer::new(DestinationSpec::File {
        path: removed.clone(),
        overwrite: OverwritePolicy::CreateNew,
        on_failure: FailurePolicy::Remove,
    });
    let (handle, _tap) = mat.prepare().await;
    mat.on_response_header(bad_meta).await;
    pump(&transport.stream, &transport.ledger, &mut mat).await;
    assert!(handle.wait().await.into_result().unwrap_err().is_checksum_mismatch());
    assert!(!removed.exists(), "partial file should be removed");
}
