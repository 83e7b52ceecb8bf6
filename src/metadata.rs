//! Metadata region — a fixed-size prefix of the device holding `S`
//! self-checksummed copies of the engine's in-memory state.
//!
//! A fixed header (version, timestamp, payload length) with explicit byte
//! offsets, a `byteorder` length/version prefix around a `serde_json`
//! payload, and a trailing checksum over everything that came before it —
//! easier to extend as the state grows than a hand-packed binary layout,
//! and this region is read/written only a handful of times per process
//! lifetime, not on the hot path, so the extra bytes are free.
//!
//! ```text
//! section (within the region, every section is the same fixed size):
//!   offset  field            size
//!   0       version          4   (u32 LE)
//!   4       timestamp        8   (u64 LE, unix seconds)
//!   12      payload_len      8   (u64 LE)
//!   20      payload          payload_len  (serde_json, UTF-8)
//!   20+len  checksum         32  (SHA-256 over bytes [0, 20+len))
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::allocator::SpaceAllocator;
use crate::chunk::ChunkTable;
use crate::device::Device;
use crate::digest::sha256;
use crate::error::EngineError;
use crate::object::ObjectIndex;

const METADATA_FORMAT_VERSION: u32 = 1;
const SECTION_HEADER_LEN: u64 = 4 + 8 + 8;
const CHECKSUM_LEN: u64 = 32;

/// Everything the engine must durably persist to resume after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataState {
    pub allocator: SpaceAllocator,
    pub chunks: ChunkTable,
    pub objects: ObjectIndex,
}

fn encode_section(state: &MetadataState, timestamp: u64) -> Result<Vec<u8>, EngineError> {
    let payload = serde_json::to_vec(state)
        .map_err(|e| EngineError::Device(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

    let mut buf = Vec::with_capacity(SECTION_HEADER_LEN as usize + payload.len() + CHECKSUM_LEN as usize);
    buf.write_u32::<LittleEndian>(METADATA_FORMAT_VERSION).unwrap();
    buf.write_u64::<LittleEndian>(timestamp).unwrap();
    buf.write_u64::<LittleEndian>(payload.len() as u64).unwrap();
    buf.extend_from_slice(&payload);
    let checksum = sha256(&buf);
    buf.extend_from_slice(&checksum);
    Ok(buf)
}

struct DecodedSection {
    timestamp: u64,
    state: MetadataState,
}

/// Parse and checksum-verify one section's raw bytes. Any structural or
/// checksum failure yields `None` — callers treat a bad section as simply
/// absent, never as fatal on its own.
fn decode_section(raw: &[u8]) -> Option<DecodedSection> {
    if (raw.len() as u64) < SECTION_HEADER_LEN + CHECKSUM_LEN {
        return None;
    }
    let mut cursor = Cursor::new(raw);
    let version = cursor.read_u32::<LittleEndian>().ok()?;
    if version != METADATA_FORMAT_VERSION {
        return None;
    }
    let timestamp = cursor.read_u64::<LittleEndian>().ok()?;
    let payload_len = cursor.read_u64::<LittleEndian>().ok()?;

    let payload_start = SECTION_HEADER_LEN as usize;
    let payload_end = payload_start.checked_add(payload_len as usize)?;
    let checksummed_end = payload_end;
    if raw.len() < payload_end + CHECKSUM_LEN as usize {
        return None;
    }

    let stored_checksum = &raw[payload_end..payload_end + CHECKSUM_LEN as usize];
    if sha256(&raw[..checksummed_end]).as_slice() != stored_checksum {
        return None;
    }

    let payload = &raw[payload_start..payload_end];
    let state: MetadataState = serde_json::from_slice(payload).ok()?;
    Some(DecodedSection { timestamp, state })
}

/// The metadata region: `section_count` equally sized, independently
/// checksummed copies packed at the front of the device.
pub struct MetadataRegion {
    pub region_offset: u64,
    pub section_size: u64,
    pub section_count: usize,
}

impl MetadataRegion {
    pub fn new(region_offset: u64, region_size: u64, section_count: usize) -> Self {
        assert!(section_count >= 1, "metadata region needs at least one section");
        Self {
            region_offset,
            section_size: region_size / section_count as u64,
            section_count,
        }
    }

    pub fn region_size(&self) -> u64 {
        self.section_size * self.section_count as u64
    }

    fn section_offset(&self, index: usize) -> u64 {
        self.region_offset + index as u64 * self.section_size
    }

    /// Read the whole metadata prefix in a single device call and split it
    /// into sections in memory, rather than issuing one independent read
    /// per section at its own offset — that way the load sees one
    /// consistent snapshot of the prefix instead of several reads that
    /// could in principle race with something else touching the device.
    pub fn read_raw(&self, device: &dyn Device) -> Result<Vec<u8>, EngineError> {
        Ok(device.read(self.region_offset, self.region_size())?)
    }

    /// Load the state from the newest section that validates, given the
    /// whole-region bytes from [`Self::read_raw`]. Returns
    /// [`EngineError::MetadataCorrupted`] only if every section fails to
    /// decode or checksum — a single bad section among several good ones is
    /// transparently ignored in favor of whichever section still validates.
    pub fn load_from_raw(&self, raw: &[u8]) -> Result<MetadataState, EngineError> {
        let mut newest: Option<DecodedSection> = None;

        for i in 0..self.section_count {
            let start = (i as u64 * self.section_size) as usize;
            let end = start + self.section_size as usize;
            let Some(section_bytes) = raw.get(start..end) else {
                continue;
            };
            if let Some(decoded) = decode_section(section_bytes) {
                if newest.as_ref().map_or(true, |n| decoded.timestamp > n.timestamp) {
                    newest = Some(decoded);
                }
            }
        }

        newest.map(|d| d.state).ok_or(EngineError::MetadataCorrupted)
    }

    /// Convenience wrapper: read the region then load it. Tests exercise
    /// this; [`Engine::open`] uses [`Self::read_raw`] directly since it
    /// also needs the raw bytes to detect the all-zero "never initialized"
    /// case.
    pub fn load(&self, device: &dyn Device) -> Result<MetadataState, EngineError> {
        let raw = self.read_raw(device)?;
        self.load_from_raw(&raw)
    }

    /// Write `state` to every section, stamped with `timestamp`. All writes
    /// are attempted even if an earlier one fails, so a single bad section
    /// never blocks the others from being refreshed.
    pub fn save(
        &self,
        device: &dyn Device,
        state: &MetadataState,
        timestamp: u64,
    ) -> Result<(), EngineError> {
        let mut encoded = encode_section(state, timestamp)?;
        if (encoded.len() as u64) > self.section_size {
            return Err(EngineError::Device(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "encoded metadata section exceeds configured section size",
            )));
        }
        encoded.resize(self.section_size as usize, 0);

        let mut last_err = None;
        for i in 0..self.section_count {
            if let Err(e) = device.write(self.section_offset(i), &encoded) {
                last_err = Some(e);
            }
        }

        // Only fail the save if every section failed to write; a single
        // bad section is repaired by the next successful save.
        match last_err {
            Some(e) if self.section_count == 1 => Err(EngineError::Device(e)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::InMemoryDevice;

    fn empty_state() -> MetadataState {
        MetadataState {
            allocator: SpaceAllocator::new(65536, 1 << 20, 512),
            chunks: ChunkTable::default(),
            objects: ObjectIndex::default(),
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let device = InMemoryDevice::new(1 << 20);
        let region = MetadataRegion::new(0, 64 * 1024, 3);
        let state = empty_state();
        region.save(&device, &state, 100).unwrap();
        let loaded = region.load(&device).unwrap();
        assert_eq!(loaded.chunks.len(), state.chunks.len());
    }

    #[test]
    fn newest_valid_section_wins_on_load() {
        let device = InMemoryDevice::new(1 << 20);
        let region = MetadataRegion::new(0, 64 * 1024, 3);
        region.save(&device, &empty_state(), 100).unwrap();

        let mut later_state = empty_state();
        later_state.allocator = SpaceAllocator::new(65536, 2 << 20, 512);
        region.save(&device, &later_state, 200).unwrap();

        let loaded = region.load(&device).unwrap();
        assert_eq!(loaded.allocator.free_bytes(), later_state.allocator.free_bytes());
    }

    #[test]
    fn two_zeroed_sections_out_of_three_still_load() {
        let device = InMemoryDevice::new(1 << 20);
        let region = MetadataRegion::new(0, 64 * 1024, 3);
        region.save(&device, &empty_state(), 100).unwrap();

        device.corrupt(region.section_offset(0), region.section_size, 0);
        device.corrupt(region.section_offset(1), region.section_size, 0);

        let loaded = region.load(&device);
        assert!(loaded.is_ok());
    }

    #[test]
    fn all_sections_corrupted_is_metadata_corrupted() {
        let device = InMemoryDevice::new(1 << 20);
        let region = MetadataRegion::new(0, 64 * 1024, 3);
        region.save(&device, &empty_state(), 100).unwrap();

        for i in 0..3 {
            device.corrupt(region.section_offset(i), region.section_size, 0xAA);
        }

        let result = region.load(&device);
        assert!(matches!(result, Err(EngineError::MetadataCorrupted)));
    }
}
