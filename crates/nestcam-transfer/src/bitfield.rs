//! Tracks which chunk indices of the current transfer have arrived.
//!
//! Sized from the declared `total` of the first chunk, one bit per index.
//! The codec caps `total` at `MAX_CHUNKS`, so a bitfield never exceeds 8 KiB.

/// Compact bitfield over the index range `[0, total)`.
#[derive(Debug, Clone)]
pub struct IndexBitfield {
    bits: Vec<u64>,
    total: u32,
    received_count: u32,
}

impl IndexBitfield {
    /// Create an empty bitfield for a transfer of `total` chunks.
    pub fn new(total: u32) -> Self {
        Self {
            bits: vec![0u64; (total as usize).div_ceil(64)],
            total,
            received_count: 0,
        }
    }

    /// Mark an index as received. Returns true if it was newly received (not duplicate).
    #[inline]
    pub fn set(&mut self, index: u32) -> bool {
        if index >= self.total {
            return false;
        }
        let idx = index as usize;
        let mask = 1u64 << (idx % 64);
        let word = &mut self.bits[idx / 64];
        if *word & mask != 0 {
            return false; // already set
        }
        *word |= mask;
        self.received_count += 1;
        true
    }

    #[inline]
    pub fn get(&self, index: u32) -> bool {
        if index >= self.total {
            return false;
        }
        let idx = index as usize;
        self.bits[idx / 64] & (1u64 << (idx % 64)) != 0
    }

    /// True once every index in `[0, total)` has been seen.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.received_count >= self.total
    }

    #[inline]
    pub fn received(&self) -> u32 {
        self.received_count
    }

    /// Indices still outstanding, in ascending order.
    pub fn missing(&self) -> Vec<u32> {
        (0..self.total).filter(|&i| !self.get(i)).collect()
    }
}
