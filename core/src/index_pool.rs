//! Bitmap free-list allocator for slot indices.
//!
//! [`IndexPool`] hands out indices in `0..size`. Indices are grouped into
//! 64-bit blocks, each with an occupancy mask. Blocks that still have at
//! least one free bit are linked into a free list, so both allocation and
//! deallocation touch a single block.
//!
//! # Example
//!
//! ```
//! use frameflow_core::index_pool::IndexPool;
//!
//! let mut pool = IndexPool::new(4);
//! let a = pool.allocate().unwrap();
//! let b = pool.allocate().unwrap();
//! assert_ne!(a, b);
//!
//! pool.deallocate(a);
//! assert!(!pool.is_allocated(a));
//! ```

use crate::pool::PoolError;

const BLOCK_BITS: usize = u64::BITS as usize;
const NIL: usize = usize::MAX;

/// Allocator of unique indices below a growable upper bound.
#[derive(Debug, Clone)]
pub struct IndexPool {
    /// Occupancy masks, one bit per index. Bits past `size` stay set.
    blocks: Vec<u64>,
    /// Free list links, indexed by block. `NIL` terminates the list.
    next_free: Vec<usize>,
    /// First block of the free list.
    free_head: usize,
    size: usize,
    allocated: usize,
}

impl IndexPool {
    /// Create a pool handing out indices in `0..size`.
    pub fn new(size: usize) -> Self {
        let mut pool = Self {
            blocks: Vec::new(),
            next_free: Vec::new(),
            free_head: NIL,
            size: 0,
            allocated: 0,
        };
        pool.resize(size);
        pool
    }

    /// Number of indices managed by the pool.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of indices currently handed out.
    pub fn allocated_count(&self) -> usize {
        self.allocated
    }

    /// Whether every index is handed out.
    pub fn is_full(&self) -> bool {
        self.free_head == NIL
    }

    /// Whether `index` is currently handed out.
    pub fn is_allocated(&self, index: usize) -> bool {
        index < self.size && self.blocks[index / BLOCK_BITS] & (1 << (index % BLOCK_BITS)) != 0
    }

    /// Take the lowest free index of the first block on the free list.
    ///
    /// Returns [`PoolError::Exhausted`] when no index is free.
    pub fn allocate(&mut self) -> Result<usize, PoolError> {
        let block = self.free_head;
        if block == NIL {
            return Err(PoolError::Exhausted { size: self.size });
        }

        let bits = self.blocks[block];
        let bit = (!bits).trailing_zeros() as usize;
        let bits = bits | (1 << bit);
        self.blocks[block] = bits;

        if bits == u64::MAX {
            self.free_head = self.next_free[block];
            self.next_free[block] = NIL;
        }

        self.allocated += 1;
        Ok(block * BLOCK_BITS + bit)
    }

    /// Return `index` to the pool.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range or not currently allocated.
    pub fn deallocate(&mut self, index: usize) {
        assert!(
            index < self.size,
            "index {index} out of range for pool of size {}",
            self.size
        );

        let block = index / BLOCK_BITS;
        let mask = 1u64 << (index % BLOCK_BITS);
        let bits = self.blocks[block];
        assert!(bits & mask != 0, "index {index} is not allocated");

        // A full block is off the free list and has to be linked back.
        if bits == u64::MAX {
            self.next_free[block] = self.free_head;
            self.free_head = block;
        }

        self.blocks[block] = bits & !mask;
        self.allocated -= 1;
    }

    /// Change the number of managed indices.
    ///
    /// Growing keeps every outstanding index valid. Shrinking below an
    /// outstanding index is a caller error.
    pub fn resize(&mut self, new_size: usize) {
        debug_assert!(
            (new_size..self.size).all(|index| !self.is_allocated(index)),
            "cannot shrink index pool below an outstanding index"
        );

        let block_count = new_size.div_ceil(BLOCK_BITS);

        // Reopen the previous tail block's masked bits.
        if let Some(last) = self.blocks.last_mut() {
            let used = self.size % BLOCK_BITS;
            if used != 0 {
                *last &= (1u64 << used) - 1;
            }
        }

        self.blocks.resize(block_count, 0);
        self.next_free.resize(block_count, NIL);

        let used = new_size % BLOCK_BITS;
        if used != 0 {
            if let Some(last) = self.blocks.last_mut() {
                *last |= !((1u64 << used) - 1);
            }
        }

        self.size = new_size;
        self.allocated = self.blocks.iter().map(|b| b.count_ones() as usize).sum::<usize>()
            - (block_count * BLOCK_BITS - new_size);
        self.rebuild_free_list();
    }

    /// Release every index.
    pub fn clear(&mut self) {
        let size = self.size;
        self.blocks.clear();
        self.next_free.clear();
        self.size = 0;
        self.resize(size);
    }

    fn rebuild_free_list(&mut self) {
        self.free_head = NIL;
        for block in (0..self.blocks.len()).rev() {
            if self.blocks[block] != u64::MAX {
                self.next_free[block] = self.free_head;
                self.free_head = block;
            } else {
                self.next_free[block] = NIL;
            }
        }
    }
}
