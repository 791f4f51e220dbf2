//! Allocation policies.
//!
//! A policy decides how the bytes behind a [`BufferObject`](crate::BufferObject)
//! are obtained, resized and released. The default is a zero-filled heap block.

use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::error::{MemoryError, Result};

/// Strategy for obtaining and releasing buffer memory
pub trait AllocationPolicy: Send + Sync + fmt::Debug {
    /// Short name used in logs and errors
    fn name(&self) -> &'static str;

    /// Obtain a block of exactly `size` bytes
    fn allocate(&self, size: usize) -> Result<Vec<u8>>;

    /// Resize `block` in place; the common prefix is preserved
    fn reallocate(&self, block: &mut Vec<u8>, new_size: usize) -> Result<()>;

    /// Give a block back
    fn release(&self, block: Vec<u8>) {
        drop(block);
    }
}

/// Zero-filled heap allocation
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapPolicy;

impl AllocationPolicy for HeapPolicy {
    fn name(&self) -> &'static str {
        "heap"
    }

    fn allocate(&self, size: usize) -> Result<Vec<u8>> {
        let mut block = Vec::new();
        block
            .try_reserve_exact(size)
            .map_err(|_| MemoryError::AllocationFailed {
                size,
                policy: self.name(),
            })?;
        block.resize(size, 0);
        Ok(block)
    }

    fn reallocate(&self, block: &mut Vec<u8>, new_size: usize) -> Result<()> {
        if new_size > block.len() {
            block
                .try_reserve_exact(new_size - block.len())
                .map_err(|_| MemoryError::AllocationFailed {
                    size: new_size,
                    policy: self.name(),
                })?;
            block.resize(new_size, 0);
        } else {
            block.truncate(new_size);
            block.shrink_to_fit();
        }
        Ok(())
    }
}

/// Refuses every allocation.
///
/// Attached to buffers that wrap externally provided memory and must never
/// be resized.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAllocPolicy;

impl AllocationPolicy for NoAllocPolicy {
    fn name(&self) -> &'static str {
        "no_alloc"
    }

    fn allocate(&self, size: usize) -> Result<Vec<u8>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        Err(MemoryError::AllocationFailed {
            size,
            policy: self.name(),
        })
    }

    fn reallocate(&self, block: &mut Vec<u8>, new_size: usize) -> Result<()> {
        if new_size == block.len() {
            return Ok(());
        }
        Err(MemoryError::AllocationFailed {
            size: new_size,
            policy: self.name(),
        })
    }
}

static HEAP: LazyLock<Arc<dyn AllocationPolicy>> = LazyLock::new(|| Arc::new(HeapPolicy));
static NO_ALLOC: LazyLock<Arc<dyn AllocationPolicy>> = LazyLock::new(|| Arc::new(NoAllocPolicy));

/// Shared heap policy
pub fn heap() -> Arc<dyn AllocationPolicy> {
    HEAP.clone()
}

/// Shared no-alloc policy
pub fn no_alloc() -> Arc<dyn AllocationPolicy> {
    NO_ALLOC.clone()
}
