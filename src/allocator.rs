//! Space allocator — first-fit over a free list, high-water fallback.
//!
//! Insertion-order first-fit, split on partial fit, and boundary coalescing
//! on free. A buddy allocator was considered and rejected — chunk sizes
//! cluster tightly around `chunk_size` plus gzip variance, so first-fit
//! wins on simplicity without a measurable fragmentation cost at this scale.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// A contiguous run of free bytes within the data region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeExtent {
    pub offset: u64,
    pub length: u64,
}

/// Tracks free space within `[data_region_start, device_size)` and serves
/// block-aligned allocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceAllocator {
    block_align: u64,
    data_region_start: u64,
    data_region_end: u64,
    free_list: Vec<FreeExtent>,
    high_water: u64,
}

fn round_up(size: u64, align: u64) -> u64 {
    if align <= 1 {
        return size;
    }
    size.div_ceil(align) * align
}

impl SpaceAllocator {
    /// A fresh allocator over `[data_region_start, data_region_end)`.
    pub fn new(data_region_start: u64, data_region_end: u64, block_align: u64) -> Self {
        Self {
            block_align: block_align.max(1),
            data_region_start,
            data_region_end,
            free_list: Vec::new(),
            high_water: data_region_start,
        }
    }

    pub fn free_list(&self) -> &[FreeExtent] {
        &self.free_list
    }

    pub fn high_water(&self) -> u64 {
        self.high_water
    }

    /// Sum of bytes currently in the free list.
    pub fn free_bytes(&self) -> u64 {
        self.free_list.iter().map(|e| e.length).sum()
    }

    /// Allocate `size` bytes, block-aligned up, and return the low offset.
    ///
    /// First-fit scans the free list in insertion order. On a miss, the
    /// allocation is served immediately after the high-water mark. Fails
    /// with [`EngineError::OutOfSpace`] only when neither path fits inside
    /// the data region.
    pub fn allocate(&mut self, size: u64) -> Result<u64, EngineError> {
        let size = round_up(size.max(1), self.block_align);

        for i in 0..self.free_list.len() {
            let extent = self.free_list[i];
            if extent.length >= size {
                let offset = extent.offset;
                if extent.length == size {
                    self.free_list.remove(i);
                } else {
                    self.free_list[i] = FreeExtent {
                        offset: offset + size,
                        length: extent.length - size,
                    };
                }
                return Ok(offset);
            }
        }

        // Miss: extend the logical used region from the high-water mark.
        let offset = self.high_water;
        let end = offset
            .checked_add(size)
            .ok_or(EngineError::OutOfSpace)?;
        if end > self.data_region_end {
            return Err(EngineError::OutOfSpace);
        }
        self.high_water = end;
        Ok(offset)
    }

    /// Return `size` bytes at `offset` to the free list, coalescing with
    /// any extent sharing a boundary. A zero-length free is a no-op.
    pub fn free(&mut self, offset: u64, size: u64) {
        let size = round_up(size, self.block_align);
        if size == 0 {
            return;
        }

        let mut merged = FreeExtent { offset, length: size };
        let mut i = 0;
        while i < self.free_list.len() {
            let e = self.free_list[i];
            let touches = e.offset + e.length == merged.offset || merged.offset + merged.length == e.offset;
            if touches {
                let lo = merged.offset.min(e.offset);
                let hi = (merged.offset + merged.length).max(e.offset + e.length);
                merged = FreeExtent { offset: lo, length: hi - lo };
                self.free_list.remove(i);
                // Restart the scan: the enlarged extent may now touch an
                // extent that did not touch the original insertion.
                i = 0;
                continue;
            }
            i += 1;
        }
        self.free_list.push(merged);
    }

    /// Sort the free list by offset and coalesce any adjacent extents not
    /// already merged. Returns the number of bytes that became part of a
    /// larger contiguous extent during this pass (zero on a dry second
    /// call, which is how idempotence is verified).
    pub fn defragment(&mut self) -> u64 {
        if self.free_list.is_empty() {
            return 0;
        }
        self.free_list.sort_by_key(|e| e.offset);

        let mut reclaimed = 0u64;
        let mut merged: Vec<FreeExtent> = Vec::with_capacity(self.free_list.len());
        for extent in self.free_list.drain(..) {
            match merged.last_mut() {
                Some(prev) if prev.offset + prev.length == extent.offset => {
                    prev.length += extent.length;
                    reclaimed += extent.length;
                }
                _ => merged.push(extent),
            }
        }
        self.free_list = merged;
        reclaimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_uses_high_water_when_free_list_empty() {
        let mut a = SpaceAllocator::new(100, 1000, 1);
        assert_eq!(a.allocate(50).unwrap(), 100);
        assert_eq!(a.allocate(50).unwrap(), 150);
    }

    #[test]
    fn allocate_rounds_up_to_block_alignment() {
        let mut a = SpaceAllocator::new(0, 1000, 512);
        let off = a.allocate(10).unwrap();
        assert_eq!(off, 0);
        assert_eq!(a.high_water(), 512);
    }

    #[test]
    fn free_then_allocate_reuses_extent_first_fit() {
        let mut a = SpaceAllocator::new(0, 1000, 1);
        let first = a.allocate(100).unwrap();
        let _second = a.allocate(100).unwrap();
        a.free(first, 100);
        // First-fit should reuse the freed extent rather than extend high water.
        let third = a.allocate(50).unwrap();
        assert_eq!(third, first);
    }

    #[test]
    fn free_coalesces_adjacent_extents() {
        let mut a = SpaceAllocator::new(0, 1000, 1);
        let o1 = a.allocate(100).unwrap();
        let o2 = a.allocate(100).unwrap();
        let o3 = a.allocate(100).unwrap();
        a.free(o1, 100);
        a.free(o3, 100);
        a.free(o2, 100);
        assert_eq!(a.free_list().len(), 1);
        assert_eq!(a.free_list()[0], FreeExtent { offset: o1, length: 300 });
    }

    #[test]
    fn free_zero_size_is_noop() {
        let mut a = SpaceAllocator::new(0, 1000, 1);
        a.free(10, 0);
        assert!(a.free_list().is_empty());
    }

    #[test]
    fn out_of_space_when_beyond_device_end() {
        let mut a = SpaceAllocator::new(0, 100, 1);
        assert!(a.allocate(101).is_err());
    }

    #[test]
    fn defragment_is_idempotent() {
        let mut a = SpaceAllocator::new(0, 1000, 1);
        let o1 = a.allocate(100).unwrap();
        let o2 = a.allocate(100).unwrap();
        a.free(o1, 100);
        a.free(o2, 100);
        let first_pass = a.defragment();
        assert!(first_pass > 0);
        let second_pass = a.defragment();
        assert_eq!(second_pass, 0);
    }
}
