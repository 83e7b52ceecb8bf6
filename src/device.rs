//! The byte-addressable device the engine is layered on.
//!
//! `Device` is the one genuinely external collaborator the core consumes —
//! everything else (allocator, chunk store, object index, metadata region)
//! is implemented against this trait alone. Two implementations are
//! provided: an in-memory device for tests and tools, and a fixed-size
//! file-backed device for real use.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A flat, fixed-size, byte-addressable random-access store.
///
/// Implementations must reject any `read`/`write` whose range exceeds
/// `size()` and must never silently truncate or wrap. Corruption is modeled
/// as arbitrary byte substitutions within already-written regions; a
/// conforming `Device` never lies about lengths.
pub trait Device: Send + Sync {
    /// Exact-length read. Fails if `offset + length > size()`.
    fn read(&self, offset: u64, length: u64) -> io::Result<Vec<u8>>;

    /// Exact-length write. Fails if `offset + data.len() > size()`.
    fn write(&self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Total addressable bytes.
    fn size(&self) -> u64;
}

fn check_bounds(offset: u64, length: u64, size: u64) -> io::Result<()> {
    let end = offset
        .checked_add(length)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "offset + length overflows"))?;
    if end > size {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("range {offset}..{end} exceeds device size {size}"),
        ));
    }
    Ok(())
}

// ── In-memory device ────────────────────────────────────────────────────────

/// An in-memory `Device` backed by a fixed-size byte buffer.
///
/// Used by tests and by tools that want to exercise the engine without
/// touching the filesystem. Internally guarded by a mutex so `Device`'s
/// `Send + Sync` bound holds regardless of how the engine shares it.
/// `Clone` is shallow — clones share the same backing buffer, which is what
/// lets a test reopen an engine over "the same disk".
#[derive(Clone)]
pub struct InMemoryDevice {
    bytes: Arc<Mutex<Vec<u8>>>,
    size: u64,
}

impl InMemoryDevice {
    /// Create a zeroed device of exactly `size` bytes.
    pub fn new(size: u64) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(vec![0u8; size as usize])),
            size,
        }
    }

    /// Corrupt `length` bytes starting at `offset` with `pattern`.
    ///
    /// Test-only helper for fault-tolerance scenarios: models "a bounded
    /// rate of random byte corruption" without requiring an actual faulty
    /// disk.
    pub fn corrupt(&self, offset: u64, length: u64, pattern: u8) {
        let mut guard = self.bytes.lock().unwrap();
        let start = offset as usize;
        let end = (offset + length) as usize;
        for b in &mut guard[start..end] {
            *b = pattern;
        }
    }
}

impl Device for InMemoryDevice {
    fn read(&self, offset: u64, length: u64) -> io::Result<Vec<u8>> {
        check_bounds(offset, length, self.size)?;
        let guard = self.bytes.lock().unwrap();
        let start = offset as usize;
        let end = start + length as usize;
        Ok(guard[start..end].to_vec())
    }

    fn write(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        check_bounds(offset, data.len() as u64, self.size)?;
        let mut guard = self.bytes.lock().unwrap();
        let start = offset as usize;
        guard[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }
}

// ── File-backed device ──────────────────────────────────────────────────────

/// A `Device` backed by a regular file, pre-sized with `set_len`.
///
/// `Clone` shares the same open file descriptor through an `Arc`, the same
/// way [`InMemoryDevice`] shares its buffer — needed so the engine can hand
/// a device handle to the background scrubber thread.
#[derive(Clone)]
pub struct FileDevice {
    file: Arc<Mutex<File>>,
    size: u64,
}

impl FileDevice {
    /// Open (creating if absent) a file at `path` and size it to exactly
    /// `size` bytes, zero-extending if it is currently smaller.
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len(size)?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            size,
        })
    }

    /// Open an existing, already-sized file.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            size,
        })
    }
}

impl Device for FileDevice {
    fn read(&self, offset: u64, length: u64) -> io::Result<Vec<u8>> {
        check_bounds(offset, length, self.size)?;
        let mut guard = self.file.lock().unwrap();
        guard.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; length as usize];
        guard.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        check_bounds(offset, data.len() as u64, self.size)?;
        let mut guard = self.file.lock().unwrap();
        guard.seek(SeekFrom::Start(offset))?;
        guard.write_all(data)
    }

    fn size(&self) -> u64 {
        self.size
    }
}
