//! Typed event surface.
//!
//! A closed enum plus a single callback registration, rather than a
//! string-keyed `.on`/`.emit` dispatch table, so callers pattern-match
//! instead of parsing event names. Every event fires strictly after the
//! state change it describes; nothing in the engine depends on a sink
//! being installed at all.

use crate::object::{CorruptionReport, ObjectId};

/// A notable state transition inside the engine, delivered after the fact.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Opened,
    ObjectWritten { id: ObjectId, size: u64 },
    ObjectRead { id: ObjectId },
    ObjectDeleted { id: ObjectId },
    /// A read (strict or graceful) triggered at least one replica repair.
    ChunkRepaired { repaired_replicas: usize },
    /// A graceful read completed with a non-empty corruption report.
    DegradedRead { report: Box<CorruptionReport> },
    ScrubCompleted { chunks_scanned: usize, repaired: usize, unrecoverable: usize },
    DefragmentCompleted { bytes_reclaimed: u64 },
    TierRebalanced { id: ObjectId, new_tier: crate::object::Tier },
    ShuttingDown,
    Terminated,
}

/// A callback invoked for every [`EngineEvent`]. Boxed so the engine can hold
/// it behind a single trait object rather than being generic over a closure
/// type.
pub type EventSink = Box<dyn Fn(&EngineEvent) + Send + Sync>;
