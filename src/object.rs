//! Object index — the name/metadata layer above the chunk store.
//!
//! A flat `HashMap`-backed catalogue with a secondary `(owner, name)`
//! lookup: a caller-assigned name plus a system-assigned [`ObjectId`], an
//! ordered chunk list, tiering metadata, and the two read modes (strict and
//! graceful).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chunk::ChunkId;

/// Opaque, globally unique object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u128);

impl ObjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().as_u128())
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Storage tier an object is logically assigned to. Tiering here is a label
/// carried on the record, not a physical placement policy — `tier_rebalance`
/// is the only operation permitted to change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

impl Default for Tier {
    fn default() -> Self {
        Tier::Hot
    }
}

/// Millisecond wall clock.
fn unix_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Catalogue entry for one stored object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: ObjectId,
    pub name: String,
    pub owner: String,
    /// Total plaintext size across all chunks, in bytes.
    pub size: u64,
    /// SHA-256 over the full reassembled plaintext.
    pub checksum: [u8; 32],
    /// Ordered list of chunk content addresses making up this object.
    pub chunk_ids: Vec<ChunkId>,
    pub created_at: u64,
    pub modified_at: u64,
    pub access_count: u64,
    pub last_access: u64,
    pub tier: Tier,
    /// `stored_bytes / plaintext_bytes` across this object's chunks, for
    /// reporting only; always in `(0.0, 1.0]`, 1.0 meaning no compression
    /// took effect anywhere.
    pub compression_ratio: f64,
}

impl ObjectRecord {
    pub fn touch_access(&mut self) {
        self.access_count += 1;
        self.last_access = unix_time_millis();
    }
}

/// Conjunctive filter used by [`crate::engine::Engine::list`]:
/// `{name_substring, owner, size range, tier, created range,
/// min_access_count}`. Every `Some` field narrows the
/// result; `None` leaves that dimension unconstrained.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub owner: Option<String>,
    pub name_substring: Option<String>,
    pub size_min: Option<u64>,
    pub size_max: Option<u64>,
    pub tier: Option<Tier>,
    pub created_after: Option<u64>,
    pub created_before: Option<u64>,
    pub min_access_count: Option<u64>,
}

impl SearchFilter {
    pub fn matches(&self, record: &ObjectRecord) -> bool {
        if let Some(owner) = &self.owner {
            if &record.owner != owner {
                return false;
            }
        }
        if let Some(substring) = &self.name_substring {
            if !record.name.contains(substring.as_str()) {
                return false;
            }
        }
        if let Some(lo) = self.size_min {
            if record.size < lo {
                return false;
            }
        }
        if let Some(hi) = self.size_max {
            if record.size > hi {
                return false;
            }
        }
        if let Some(tier) = self.tier {
            if record.tier != tier {
                return false;
            }
        }
        if let Some(t0) = self.created_after {
            if record.created_at < t0 {
                return false;
            }
        }
        if let Some(t1) = self.created_before {
            if record.created_at > t1 {
                return false;
            }
        }
        if let Some(min_count) = self.min_access_count {
            if record.access_count < min_count {
                return false;
            }
        }
        true
    }
}

/// How a graceful read should fill bytes it could not recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    Zeros,
    /// Repeats the pattern's 4 bytes (big-endian) across the fill buffer.
    Pattern(u32),
    /// Omit the chunk's span entirely; the returned buffer is shorter than
    /// `size` by the sum of skipped chunk lengths.
    Skip,
}

impl Default for FillMode {
    fn default() -> Self {
        FillMode::Zeros
    }
}

/// Caller-supplied knobs for [`crate::engine::Engine::read_graceful`].
#[derive(Debug, Clone, Copy)]
pub struct GracefulReadOptions {
    /// Fail with [`crate::error::EngineError::RecoveryRateBelowThreshold`]
    /// if the fraction of recovered chunks falls below this value.
    pub min_recovery_rate: f64,
    pub fill: FillMode,
}

impl Default for GracefulReadOptions {
    fn default() -> Self {
        Self {
            min_recovery_rate: 0.0,
            fill: FillMode::Zeros,
        }
    }
}

/// Result of a graceful read: what was recovered, and a census of what
/// wasn't.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorruptionReport {
    pub object_id: ObjectId,
    pub total_chunks: usize,
    pub corrupted_chunks: usize,
    pub recovered_chunks: usize,
    /// `recovered_chunks / total_chunks * 100.0`, or `100.0` for an empty
    /// object.
    pub recovery_rate: f64,
    pub corrupted_chunk_ids: Vec<ChunkId>,
    /// False only when every corrupted chunk was filled with `Skip`, in
    /// which case the returned buffer omits those ranges entirely.
    pub partial_data_available: bool,
    /// Indices whose chunks needed at least one replica repaired in place.
    pub repaired_indices: Vec<usize>,
}

impl CorruptionReport {
    pub fn clean(object_id: ObjectId, total_chunks: usize) -> Self {
        Self {
            object_id,
            total_chunks,
            corrupted_chunks: 0,
            recovered_chunks: total_chunks,
            recovery_rate: 100.0,
            corrupted_chunk_ids: Vec::new(),
            partial_data_available: true,
            repaired_indices: Vec::new(),
        }
    }
}

/// Flat object catalogue, keyed by [`ObjectId`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectIndex {
    pub objects: HashMap<ObjectId, ObjectRecord>,
    /// Secondary index from (owner, name) to id. Names are unique *per
    /// owner*, not globally — the key is the pair.
    pub by_name: HashMap<(String, String), ObjectId>,
}

impl ObjectIndex {
    pub fn get(&self, id: &ObjectId) -> Option<&ObjectRecord> {
        self.objects.get(id)
    }

    pub fn get_by_name(&self, owner: &str, name: &str) -> Option<&ObjectRecord> {
        self.by_name
            .get(&(owner.to_string(), name.to_string()))
            .and_then(|id| self.objects.get(id))
    }

    /// Insert a brand-new record, or overwrite the existing record sharing
    /// its (owner, name), returning the superseded record's chunk ids (the
    /// caller is responsible for releasing them from the chunk table).
    pub fn upsert(&mut self, record: ObjectRecord) -> Option<Vec<ChunkId>> {
        let key = (record.owner.clone(), record.name.clone());
        let previous = self.by_name.insert(key, record.id);
        let superseded = previous.and_then(|old_id| {
            if old_id == record.id {
                None
            } else {
                self.objects.remove(&old_id).map(|r| r.chunk_ids)
            }
        });
        self.objects.insert(record.id, record);
        superseded
    }

    /// Remove a record by id, returning its chunk ids for release.
    pub fn remove(&mut self, id: &ObjectId) -> Option<Vec<ChunkId>> {
        let record = self.objects.remove(id)?;
        self.by_name.remove(&(record.owner.clone(), record.name.clone()));
        Some(record.chunk_ids)
    }

    pub fn list(&self, filter: &SearchFilter) -> Vec<&ObjectRecord> {
        self.objects
            .values()
            .filter(|r| filter.matches(r))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

pub fn new_record(
    name: String,
    owner: String,
    size: u64,
    checksum: [u8; 32],
    chunk_ids: Vec<ChunkId>,
    compression_ratio: f64,
) -> ObjectRecord {
    let now = unix_time_millis();
    ObjectRecord {
        id: ObjectId::new(),
        name,
        owner,
        size,
        checksum,
        chunk_ids,
        created_at: now,
        modified_at: now,
        access_count: 0,
        last_access: now,
        tier: Tier::Hot,
        compression_ratio,
    }
}
