//! # vaultfs — fault-tolerant, content-addressed block storage engine
//!
//! Layered on a flat byte-addressable [`Device`], the engine stores opaque
//! byte objects such that, given a bounded rate of random byte corruption,
//! objects can still be read back bit-identical — or, when lossless
//! recovery is impossible, reconstructed with an auditable per-chunk damage
//! report.
//!
//! Five components compose bottom-up:
//! - [`allocator`] — free-extent tracking over the data region.
//! - [`chunk`] — content-addressed, compressed, replicated chunks.
//! - [`object`] — the name/metadata layer above the chunk store.
//! - [`metadata`] — the self-checksummed, multi-section persistence layer.
//! - [`engine`] — ties the above together behind the public `Engine` API.

pub mod allocator;
pub mod chunk;
pub mod config;
pub mod device;
pub mod digest;
pub mod engine;
pub mod error;
pub mod events;
pub mod metadata;
pub mod object;
pub mod scrubber;

pub use config::EngineConfig;
pub use device::{Device, FileDevice, InMemoryDevice};
pub use engine::{DefragReport, Engine, IntegrityReport};
pub use error::EngineError;
pub use events::{EngineEvent, EventSink};
pub use object::{
    CorruptionReport, FillMode, GracefulReadOptions, ObjectId, ObjectRecord, SearchFilter, Tier,
};
pub use scrubber::ScrubStats;
