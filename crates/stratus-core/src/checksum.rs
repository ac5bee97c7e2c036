//! Checksum resolution — picks the best available implementation of a
//! named algorithm from an ordered candidate list, once per process.
//!
//! Each algorithm carries its candidates most-preferred first. The first
//! call for an algorithm probes them in order; a probe miss is logged at
//! debug level and the next candidate is tried. The result, including
//! "nothing available", is cached for the process lifetime — a failed
//! environment is assumed stable, so later calls never re-probe.

use std::collections::HashMap;
use std::sync::OnceLock;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

// ── Algorithms ────────────────────────────────────────────────────────────────

/// A checksum algorithm a response may declare for integrity validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChecksumAlgorithm {
    Crc32,
    Crc32C,
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumAlgorithm::Crc32 => write!(f, "CRC32"),
            ChecksumAlgorithm::Crc32C => write!(f, "CRC32C"),
        }
    }
}

/// Incremental checksum state, fed one body chunk at a time.
pub trait RollingChecksum: Send {
    fn update(&mut self, data: &[u8]);

    /// The digest over everything fed so far, big-endian.
    fn digest(&self) -> Vec<u8>;

    /// Hex rendering of [`digest`](Self::digest), for comparison against
    /// declared values and for log output.
    fn digest_hex(&self) -> String {
        hex::encode(self.digest())
    }
}

/// Constructs a fresh rolling state for a resolved algorithm.
pub type Constructor = fn() -> Box<dyn RollingChecksum>;

// ── Implementations ───────────────────────────────────────────────────────────

struct Crc32Rolling(crc32fast::Hasher);

impl RollingChecksum for Crc32Rolling {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn digest(&self) -> Vec<u8> {
        self.0.clone().finalize().to_be_bytes().to_vec()
    }
}

fn new_crc32() -> Box<dyn RollingChecksum> {
    Box::new(Crc32Rolling(crc32fast::Hasher::new()))
}

#[cfg(feature = "crc32c")]
struct Crc32cRolling(u32);

#[cfg(feature = "crc32c")]
impl RollingChecksum for Crc32cRolling {
    fn update(&mut self, data: &[u8]) {
        self.0 = crc32c::crc32c_append(self.0, data);
    }

    fn digest(&self) -> Vec<u8> {
        self.0.to_be_bytes().to_vec()
    }
}

#[cfg(feature = "crc32c")]
fn new_crc32c() -> Box<dyn RollingChecksum> {
    Box::new(Crc32cRolling(0))
}

// ── Candidates ────────────────────────────────────────────────────────────────

/// One provider in an algorithm's preference order. The probe either
/// locates a working backing implementation or reports absence; absence
/// is an expected outcome, not an error.
pub struct Candidate {
    name: &'static str,
    probe: Box<dyn Fn() -> Option<Constructor> + Send + Sync>,
}

impl Candidate {
    pub fn new(
        name: &'static str,
        probe: impl Fn() -> Option<Constructor> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            probe: Box::new(probe),
        }
    }
}

// ── Resolver ──────────────────────────────────────────────────────────────────

/// Per-algorithm candidate probing with a cached, at-most-once resolution.
///
/// Concurrent first calls for the same algorithm coalesce on the cache
/// entry lock: exactly one probe sequence runs, and every caller observes
/// its result.
pub struct ChecksumResolver {
    candidates: HashMap<ChecksumAlgorithm, Vec<Candidate>>,
    resolved: DashMap<ChecksumAlgorithm, Option<Constructor>>,
}

impl ChecksumResolver {
    /// Resolver over an explicit candidate table. Exposed so tests can
    /// inject probes; production code goes through [`resolve`].
    pub fn with_candidates(candidates: HashMap<ChecksumAlgorithm, Vec<Candidate>>) -> Self {
        Self {
            candidates,
            resolved: DashMap::new(),
        }
    }

    /// The built-in candidate table.
    ///
    /// CRC32 is backed by crc32fast, which dispatches to SIMD at runtime
    /// and falls back to its software tables, so the probe always lands.
    /// CRC32C is backed by the crc32c crate when the `crc32c` feature is
    /// on; with the feature off the algorithm has no candidates and
    /// resolves to nothing.
    pub fn builtin() -> Self {
        let mut table: HashMap<ChecksumAlgorithm, Vec<Candidate>> = HashMap::new();

        table.insert(
            ChecksumAlgorithm::Crc32,
            vec![Candidate::new("crc32fast", || Some(new_crc32 as Constructor))],
        );

        #[allow(unused_mut)]
        let mut crc32c_candidates: Vec<Candidate> = Vec::new();
        #[cfg(feature = "crc32c")]
        crc32c_candidates.push(Candidate::new("crc32c-accelerated", || {
            Some(new_crc32c as Constructor)
        }));
        table.insert(ChecksumAlgorithm::Crc32C, crc32c_candidates);

        Self::with_candidates(table)
    }

    /// Resolve `algorithm` to a constructor for its best available
    /// implementation, or `None` if no candidate is usable here.
    ///
    /// The first call per algorithm runs the probe sequence; every later
    /// call is a pure cache read, even when the first call found nothing.
    pub fn resolve(&self, algorithm: ChecksumAlgorithm) -> Option<Constructor> {
        *self
            .resolved
            .entry(algorithm)
            .or_insert_with(|| self.probe_candidates(algorithm))
    }

    fn probe_candidates(&self, algorithm: ChecksumAlgorithm) -> Option<Constructor> {
        let candidates = self.candidates.get(&algorithm)?;
        for candidate in candidates {
            match (candidate.probe)() {
                Some(ctor) => {
                    tracing::debug!(%algorithm, provider = candidate.name, "checksum provider selected");
                    return Some(ctor);
                }
                None => {
                    tracing::debug!(
                        %algorithm,
                        provider = candidate.name,
                        "checksum provider unavailable, trying next candidate"
                    );
                }
            }
        }
        tracing::debug!(%algorithm, "no checksum provider available, verification will be skipped");
        None
    }
}

/// Process-wide resolution over the built-in candidate table.
pub fn resolve(algorithm: ChecksumAlgorithm) -> Option<Constructor> {
    static GLOBAL: OnceLock<ChecksumResolver> = OnceLock::new();
    GLOBAL.get_or_init(ChecksumResolver::builtin).resolve(algorithm)
}
