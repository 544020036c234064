//! Block-based bump allocator with large-value overflow and defragmentation.
//!
//! Small allocations are served in O(1) from the current block's head; we
//! never scan blocks for a best fit, since a first-fit scan would be
//! cache-unfriendly on large heaps. Fragmentation accumulates only through
//! value churn and is detected with two counters, making compaction an
//! opt-in batch operation with amortized linear cost.

use std::io::{self, Read};

use tokio::io::{AsyncRead, AsyncReadExt};

use super::block::{Block, BLOCK_SIZE};
use super::value::{BlockSlice, Value};

/// Reusable bytes exceeding this fraction of `BLOCK_SIZE` make a block (or
/// the allocator as a whole) eligible for defragmentation.
pub const FRAGMENTATION_THRESHOLD: f64 = 0.2;

/// Owns the ordered list of blocks backing one Shard's small allocations.
pub struct Allocator {
    blocks: Vec<Block>,
    current_index: usize,
    reusable: u64,
}

impl Allocator {
    pub fn new() -> Self {
        Self {
            blocks: vec![Block::new()],
            current_index: 0,
            reusable: 0,
        }
    }

    /// Reads `size` bytes from `reader` and stores them, returning the
    /// resulting `Value`. Payloads larger than `BLOCK_SIZE` are always
    /// `Large`; IO errors from `reader` propagate unchanged.
    pub fn allocate<R: Read>(&mut self, reader: &mut R, size: usize) -> io::Result<Value> {
        if size > BLOCK_SIZE {
            let mut buf = vec![0u8; size];
            reader.read_exact(&mut buf)?;
            return Ok(Value::Large(buf));
        }

        let (block_index, start, end) = self.next_small_slot(size);
        reader.read_exact(self.blocks[block_index].bytes_mut(start, end))?;
        Ok(Value::Small(BlockSlice { block_index, start, end }))
    }

    /// Async counterpart of [`Allocator::allocate`], used on the Connection
    /// hand-off path where the reader is the buffered half of a TCP socket
    /// rather than a synchronous source.
    pub async fn allocate_async<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut R,
        size: usize,
    ) -> io::Result<Value> {
        if size > BLOCK_SIZE {
            let mut buf = vec![0u8; size];
            reader.read_exact(&mut buf).await?;
            return Ok(Value::Large(buf));
        }

        let (block_index, start, end) = self.next_small_slot(size);
        reader
            .read_exact(self.blocks[block_index].bytes_mut(start, end))
            .await?;
        Ok(Value::Small(BlockSlice { block_index, start, end }))
    }

    /// Advances `current_index` past full/fragmented/too-small blocks and
    /// reserves `size` bytes in the first block that can take them,
    /// appending a fresh block if none of the existing ones fit. Shared by
    /// the sync and async allocation paths; the caller performs the actual
    /// read into the returned range.
    fn next_small_slot(&mut self, size: usize) -> (usize, u32, u32) {
        loop {
            if self.current_index >= self.blocks.len() {
                self.blocks.push(Block::new());
            }

            let idx = self.current_index;
            let block = &mut self.blocks[idx];

            if block.is_fragmented() || block.remaining() == 0 {
                self.current_index += 1;
                continue;
            }

            if block.remaining() < size {
                let tail = block.remaining() as u32;
                block.release_tail(tail);
                self.reusable += tail as u64;
                self.current_index += 1;
                continue;
            }

            let (start, end) = block.reserve(size);
            return (idx, start, end);
        }
    }

    /// Releases a value's bytes back to the allocator's reusable pool.
    /// `Large` values have no effect beyond being dropped by the caller.
    pub fn release(&mut self, value: &Value) {
        if let Value::Small(slice) = value {
            let size = slice.len() as u32;
            self.blocks[slice.block_index].release(size);
            self.reusable += size as u64;
        }
    }

    /// True once cumulative reusable bytes exceed `BLOCK_SIZE * 0.2`.
    pub fn should_defragment(&self) -> bool {
        self.reusable as f64 / BLOCK_SIZE as f64 >= FRAGMENTATION_THRESHOLD
    }

    /// Compacts live data: marks blocks above the per-block fragmentation
    /// threshold, relocates every live `Small` value referencing a
    /// fragmented block into a non-fragmented one, then resets the
    /// fragmented blocks and the allocator's counters.
    ///
    /// `entries` yields a mutable reference to every live value in the
    /// owning Map; values are updated in place when relocated.
    pub fn defragment<'a>(&mut self, entries: impl Iterator<Item = &'a mut Value>) {
        for block in &mut self.blocks {
            if block.reusable() as f64 / BLOCK_SIZE as f64 >= FRAGMENTATION_THRESHOLD {
                block.mark_fragmented();
            }
        }

        self.current_index = 0;

        for value in entries {
            let relocate = matches!(value, Value::Small(slice) if self.blocks[slice.block_index].is_fragmented());
            if !relocate {
                continue;
            }
            if let Value::Small(slice) = value {
                let bytes = self.blocks[slice.block_index]
                    .bytes(slice.start, slice.end)
                    .to_vec();
                let mut cursor = io::Cursor::new(bytes.as_slice());
                let new_value = self
                    .allocate(&mut cursor, bytes.len())
                    .expect("in-memory cursor read cannot fail");
                *value = new_value;
            }
        }

        for block in &mut self.blocks {
            if block.is_fragmented() {
                block.reset();
            }
        }

        self.current_index = 0;
        self.reusable = 0;
    }

    #[cfg(test)]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[cfg(test)]
    pub fn reusable_bytes(&self) -> u64 {
        self.reusable
    }

    pub fn bytes_of<'a>(&'a self, value: &'a Value) -> &'a [u8] {
        match value {
            Value::Small(slice) => self.blocks[slice.block_index].bytes(slice.start, slice.end),
            Value::Large(bytes) => bytes.as_slice(),
        }
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}
