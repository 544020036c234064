//! In-memory storage: the Robin Hood [`map`] keyed on precomputed hashes,
//! backed by the block [`allocator`] that owns the actual value bytes.

pub mod allocator;
pub mod block;
pub mod map;
pub mod value;
