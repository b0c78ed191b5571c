//! Shared-memory placement primitives for the LoLa binding: memory-mapped
//! file wrappers and an offset-pointer arena that remains valid across
//! process boundaries.

mod arena;
mod mmap;

pub use arena::{OffsetPtr, ShmArena};
pub use mmap::{MmapFile, MmapFileMut};
