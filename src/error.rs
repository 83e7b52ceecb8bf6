//! Error taxonomy for the storage engine.
//!
//! Every variant is a distinct kind the caller can discriminate, matching the
//! propagation policy: allocator/device errors abort the current operation
//! and propagate unchanged; chunk read failures are classified separately
//! from object-level failures so callers can tell "this one chunk is gone"
//! from "the whole object is unreadable".

use std::io;
use thiserror::Error;

use crate::chunk::ChunkId;
use crate::object::CorruptionReport;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("device I/O error: {0}")]
    Device(#[from] io::Error),

    #[error("allocator exhausted: no free extent and no high-water room remains")]
    OutOfSpace,

    #[error("metadata region is corrupted: no section validated")]
    MetadataCorrupted,

    #[error("object not found")]
    ObjectNotFound,

    #[error("chunk referenced by object has no table entry")]
    ChunkMissing,

    #[error("all replicas of chunk {} failed verification", hex::encode(.0))]
    ChunkUnrecoverable(ChunkId),

    #[error("reassembled object checksum does not match the stored global checksum")]
    GlobalChecksumMismatch,

    #[error("recovery rate {:.1}% below requested minimum", .0.recovery_rate)]
    RecoveryRateBelowThreshold(Box<CorruptionReport>),

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),
}
