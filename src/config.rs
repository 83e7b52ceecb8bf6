//! Engine configuration.
//!
//! A plain struct with a `Default` impl carrying the engine's defaults — no
//! config file format is introduced, since configuration is a
//! programmatic concern of whatever embeds the engine, not the core.

use std::time::Duration;

/// Tunable parameters of the storage engine. All defaults match the values
/// named throughout the design: 4 KiB chunks, 2 replicas, a 3-way
/// metadata region, 512-byte block alignment, and a 60-second scrub cadence.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Size of each fixed chunking window, in bytes.
    pub chunk_size: usize,
    /// Number of replicas written per chunk (N >= 2).
    pub replica_count: usize,
    /// Number of equally sized metadata sections (S).
    pub metadata_sections: usize,
    /// Total size in bytes of the metadata region prefix (M).
    pub metadata_region_size: u64,
    /// Allocator block alignment in bytes.
    pub block_alignment: u64,
    /// Minimum plaintext chunk size eligible for compression.
    pub compression_threshold: usize,
    /// Background scrubber cadence.
    pub scrub_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            replica_count: 2,
            metadata_sections: 3,
            metadata_region_size: 64 * 1024,
            block_alignment: 512,
            compression_threshold: 100,
            scrub_interval: Duration::from_secs(60),
        }
    }
}

impl EngineConfig {
    /// The "enterprise profile" variant named in the design: a 128 KiB
    /// metadata region with five sections instead of three.
    pub fn enterprise() -> Self {
        Self {
            metadata_sections: 5,
            metadata_region_size: 128 * 1024,
            ..Self::default()
        }
    }

    /// High-redundancy variant: R >= 3 replicas per chunk.
    pub fn with_replica_count(mut self, replica_count: usize) -> Self {
        assert!(replica_count >= 2, "replica_count must be >= 2");
        self.replica_count = replica_count;
        self
    }
}
