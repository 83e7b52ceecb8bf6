//! Chunk store — content-addressed, compressed, replicated chunks with
//! per-replica verification and silent repair.
//!
//! Compression is a single fixed codec — gzip via `flate2`, skipped below a
//! size threshold where header overhead would dominate — rather than a
//! pluggable registry, since nothing here negotiates codec identity per
//! chunk. Content addressing uses SHA-256 of the plaintext (see
//! `crate::digest`).

use std::collections::HashMap;
use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::allocator::SpaceAllocator;
use crate::device::Device;
use crate::digest::sha256;
use crate::error::EngineError;

/// Content address of a chunk: SHA-256 of its plaintext bytes.
pub type ChunkId = [u8; 32];

/// On-disk record for one deduplicated chunk.
///
/// Deliberately carries only sizing and checksum metadata — never the
/// decompressed payload. Re-reading from the device on demand avoids
/// doubling memory at rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub plaintext_len: u32,
    pub stored_len: u32,
    pub stored_checksum: [u8; 32],
    pub refcount: u32,
    /// Block-aligned offsets of each replica, length N >= 2.
    pub replicas: Vec<u64>,
}

impl ChunkRecord {
    fn is_compressed(&self) -> bool {
        self.stored_len != self.plaintext_len
    }
}

/// Compress `plaintext` with gzip if it is at least `threshold` bytes and
/// doing so does not grow the data. Returns the bytes to store and whether
/// they are compressed (tracked implicitly by `stored_len != plaintext_len`
/// at the call site).
fn compress_for_storage(plaintext: &[u8], threshold: usize) -> Vec<u8> {
    if plaintext.len() < threshold {
        return plaintext.to_vec();
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    let compressed = match encoder.write_all(plaintext).and_then(|_| encoder.finish()) {
        Ok(bytes) => bytes,
        Err(_) => return plaintext.to_vec(),
    };
    if compressed.len() >= plaintext.len() {
        plaintext.to_vec()
    } else {
        compressed
    }
}

fn decompress(stored: &[u8]) -> Result<Vec<u8>, EngineError> {
    let mut decoder = GzDecoder::new(stored);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| EngineError::DecompressionFailed(e.to_string()))?;
    Ok(out)
}

/// Outcome of verifying (and possibly repairing) one chunk's replicas.
#[derive(Debug, Clone)]
pub struct RepairOutcome {
    /// Bytes read from the first good replica, still in stored form.
    pub authoritative_stored_bytes: Option<Vec<u8>>,
    /// Indices (into `replicas`) of replicas that were bad and rewritten.
    pub repaired_indices: Vec<usize>,
    /// True if every replica failed verification.
    pub unrecoverable: bool,
}

/// Read-only outcome of classifying every replica good/bad against
/// `stored_checksum`. Performs no device writes.
#[derive(Debug, Clone)]
pub struct ClassifyOutcome {
    /// Bytes read from the first good replica, still in stored form.
    pub authoritative_stored_bytes: Option<Vec<u8>>,
    /// Indices (into `replicas`) of replicas that failed verification.
    pub bad_indices: Vec<usize>,
}

/// Read every replica of `record` and classify each as good or bad against
/// `stored_checksum`. No writes occur here — callers that hold the engine's
/// shared read lock for this span can release it before deciding whether to
/// repair, per the engine's "shared lock for lookup+read, exclusive only for
/// the repair write" concurrency contract.
pub fn classify_replicas(device: &dyn Device, record: &ChunkRecord) -> ClassifyOutcome {
    let mut good: Option<Vec<u8>> = None;
    let mut bad_indices = Vec::new();

    for (idx, &offset) in record.replicas.iter().enumerate() {
        match device.read(offset, record.stored_len as u64) {
            Ok(bytes) if sha256(&bytes) == record.stored_checksum => {
                if good.is_none() {
                    good = Some(bytes);
                }
            }
            _ => bad_indices.push(idx),
        }
    }

    ClassifyOutcome {
        authoritative_stored_bytes: good,
        bad_indices,
    }
}

/// Overwrite every replica at `bad_indices` with `authoritative` bytes.
/// Best-effort: a failed rewrite is simply omitted from the returned list,
/// matching the "failures logged but not fatal" repair policy.
pub fn repair_bad_replicas(
    device: &dyn Device,
    record: &ChunkRecord,
    authoritative: &[u8],
    bad_indices: &[usize],
) -> Vec<usize> {
    let mut repaired_indices = Vec::new();
    for &idx in bad_indices {
        let offset = record.replicas[idx];
        if device.write(offset, authoritative).is_ok() {
            repaired_indices.push(idx);
        }
        // Write failures are logged by the caller (which has a tracing
        // span open) and otherwise swallowed — repair is best-effort.
    }
    repaired_indices
}

/// Classify then repair in one call, with no lock span of its own — for
/// callers (the full-pass integrity scan, tests, benches) that already hold
/// whatever lock they need for the whole call.
pub fn verify_and_repair(device: &dyn Device, record: &ChunkRecord) -> RepairOutcome {
    let classify = classify_replicas(device, record);
    let repaired_indices = match &classify.authoritative_stored_bytes {
        Some(authoritative) => repair_bad_replicas(device, record, authoritative, &classify.bad_indices),
        None => Vec::new(),
    };
    RepairOutcome {
        unrecoverable: classify.authoritative_stored_bytes.is_none(),
        authoritative_stored_bytes: classify.authoritative_stored_bytes,
        repaired_indices,
    }
}

/// Decompress (if needed) already-classified stored bytes for one chunk.
pub fn decompress_chunk(record: &ChunkRecord, stored: Vec<u8>) -> Result<Vec<u8>, EngineError> {
    if record.is_compressed() {
        decompress(&stored)
    } else {
        Ok(stored)
    }
}

/// Fully read and decompress one chunk, repairing bad replicas along the
/// way. Returns [`EngineError::ChunkUnrecoverable`] if every replica failed.
pub fn read_chunk(
    device: &dyn Device,
    id: &ChunkId,
    record: &ChunkRecord,
) -> Result<(Vec<u8>, Vec<usize>), EngineError> {
    let outcome = verify_and_repair(device, record);
    let Some(stored) = outcome.authoritative_stored_bytes else {
        return Err(EngineError::ChunkUnrecoverable(*id));
    };
    let plaintext = decompress_chunk(record, stored)?;
    Ok((plaintext, outcome.repaired_indices))
}

/// Content-addressed, deduplicated chunk table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkTable {
    pub chunks: HashMap<ChunkId, ChunkRecord>,
}

/// Result of inserting one chunk during an object write.
pub struct InsertOutcome {
    pub id: ChunkId,
    /// True if this call created a brand-new chunk record (vs. a dedup hit
    /// that only bumped refcount).
    pub newly_created: bool,
}

impl ChunkTable {
    /// Insert (or dedup-bump) a single plaintext chunk.
    ///
    /// On dedup hit, refcount is incremented and no device I/O occurs. On
    /// miss, the plaintext is compressed (if eligible), `replica_count`
    /// identical copies are allocated and written, and a fresh record with
    /// refcount 1 is inserted.
    pub fn insert_chunk(
        &mut self,
        allocator: &mut SpaceAllocator,
        device: &dyn Device,
        plaintext: &[u8],
        replica_count: usize,
        compression_threshold: usize,
    ) -> Result<InsertOutcome, EngineError> {
        let id = sha256(plaintext);

        if let Some(existing) = self.chunks.get_mut(&id) {
            existing.refcount += 1;
            return Ok(InsertOutcome {
                id,
                newly_created: false,
            });
        }

        let stored = compress_for_storage(plaintext, compression_threshold);
        let stored_checksum = sha256(&stored);

        let mut replicas = Vec::with_capacity(replica_count);
        for _ in 0..replica_count {
            let offset = allocator.allocate(stored.len() as u64)?;
            device.write(offset, &stored)?;
            replicas.push(offset);
        }

        self.chunks.insert(
            id,
            ChunkRecord {
                plaintext_len: plaintext.len() as u32,
                stored_len: stored.len() as u32,
                stored_checksum,
                refcount: 1,
                replicas,
            },
        );

        Ok(InsertOutcome {
            id,
            newly_created: true,
        })
    }

    /// Decrement a chunk's refcount by one. When it reaches zero, free all
    /// of its replica extents and erase the record. Returns `true` if the
    /// chunk was erased.
    pub fn release_chunk(
        &mut self,
        allocator: &mut SpaceAllocator,
        id: &ChunkId,
    ) -> bool {
        let Some(record) = self.chunks.get_mut(id) else {
            return false;
        };
        if record.refcount > 1 {
            record.refcount -= 1;
            return false;
        }
        let record = self.chunks.remove(id).expect("checked above");
        for &offset in &record.replicas {
            allocator.free(offset, record.stored_len as u64);
        }
        true
    }

    pub fn get(&self, id: &ChunkId) -> Option<&ChunkRecord> {
        self.chunks.get(id)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
