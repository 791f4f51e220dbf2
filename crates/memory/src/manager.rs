//! Buffer manager hooks.
//!
//! Every buffer belongs to the manager that was current when it was created.
//! Each request is offered to that manager first; returning [`Action::Default`]
//! hands it back to the buffer's own behavior.

use std::fmt;
use std::sync::{Arc, LazyLock};

use parking_lot::{RwLock, RwLockReadGuard};
use tracing::info;

use crate::buffer::{BufferId, BufferSlot, WeakBuffer};
use crate::error::{MemoryError, Result};
use crate::lock::outstanding_locks;

/// Outcome of a manager hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// The manager performed the request
    Handled,
    /// Fall through to the buffer's default behavior
    Default,
}

/// Interceptor for buffer lifecycle requests.
///
/// Hooks run while the buffer's own state is held; an implementation must not
/// block on another buffer's state while holding its own internal locks.
pub trait BufferManager: Send + Sync {
    fn name(&self) -> &'static str;

    fn register_buffer(&self, _buffer: WeakBuffer) {}

    fn unregister_buffer(&self, _id: BufferId) {}

    fn allocate_buffer(&self, _id: BufferId, _slot: &mut BufferSlot, _size: usize) -> Result<Action> {
        Ok(Action::Default)
    }

    fn reallocate_buffer(
        &self,
        _id: BufferId,
        _slot: &mut BufferSlot,
        _new_size: usize,
    ) -> Result<Action> {
        Ok(Action::Default)
    }

    /// Called after external memory was installed
    fn set_buffer(&self, _id: BufferId, _slot: &BufferSlot) {}

    fn destroy_buffer(&self, _id: BufferId, _slot: &mut BufferSlot) -> Result<Action> {
        Ok(Action::Default)
    }

    /// Called with both buffers' state held, after their contents were exchanged
    fn swap_buffers(&self, _a: BufferId, _b: BufferId) {}

    /// Called on every `lock()`; the buffer must be resident when this returns
    fn lock_buffer(&self, _id: BufferId, _slot: &mut BufferSlot) -> Result<()> {
        Ok(())
    }

    /// Called when the last lock on a buffer is released
    fn unlock_buffer(&self, _id: BufferId) {}

    fn stats(&self) -> ManagerStats {
        ManagerStats::default()
    }
}

impl fmt::Debug for dyn BufferManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferManager").field("name", &self.name()).finish()
    }
}

/// Manager that declines every request
#[derive(Debug, Default, Clone, Copy)]
pub struct NullManager;

impl BufferManager for NullManager {
    fn name(&self) -> &'static str {
        "null"
    }
}

/// Memory accounting snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    pub buffers: usize,
    pub managed_bytes: usize,
    pub resident_bytes: usize,
    pub spilled_bytes: usize,
    pub spill_count: u64,
    pub restore_count: u64,
}

impl fmt::Display for ManagerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "buffers={} managed={}B resident={}B spilled={}B spills={} restores={}",
            self.buffers,
            self.managed_bytes,
            self.resident_bytes,
            self.spilled_bytes,
            self.spill_count,
            self.restore_count
        )
    }
}

static CURRENT: LazyLock<RwLock<Arc<dyn BufferManager>>> =
    LazyLock::new(|| RwLock::new(Arc::new(NullManager)));

/// Manager new buffers attach to
pub fn current() -> Arc<dyn BufferManager> {
    CURRENT.read().clone()
}

/// Held while a first lock is taken, so `set_current` never observes a lock
/// count that is about to rise. Recursive so a manager hook may lock again.
pub(crate) fn installation_guard() -> RwLockReadGuard<'static, Arc<dyn BufferManager>> {
    CURRENT.read_recursive()
}

/// Replace the process-wide manager, returning the previous one.
///
/// Refused while any buffer lock is outstanding; lock acquisition waits for
/// the swap to finish. Buffers keep the manager they
/// were created with; once the returned handle is dropped they fall back to
/// default behavior.
pub fn set_current(manager: Arc<dyn BufferManager>) -> Result<Arc<dyn BufferManager>> {
    let mut current = CURRENT.write();
    let outstanding = outstanding_locks();
    if outstanding > 0 {
        return Err(MemoryError::ManagerInUse { outstanding });
    }
    info!(from = current.name(), to = manager.name(), "buffer manager replaced");
    Ok(std::mem::replace(&mut *current, manager))
}
