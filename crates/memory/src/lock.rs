//! Scoped buffer locks.
//!
//! A lock keeps the buffer's memory resident and reachable. Cloning a lock
//! bumps the buffer's lock count; when the last clone goes away the manager
//! receives `unlock_buffer`.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::buffer::{self, BufferId, BufferInner, BufferView, BufferViewMut};
use crate::error::{MemoryError, Result};

static OUTSTANDING_LOCKS: AtomicUsize = AtomicUsize::new(0);

/// Locks currently held across every buffer in the process
pub fn outstanding_locks() -> usize {
    OUTSTANDING_LOCKS.load(Ordering::Acquire)
}

pub(crate) struct LockHandle {
    id: BufferId,
    inner: Option<Arc<BufferInner>>,
}

impl LockHandle {
    pub(crate) fn acquire(inner: Arc<BufferInner>) -> Self {
        inner.locks.fetch_add(1, Ordering::AcqRel);
        OUTSTANDING_LOCKS.fetch_add(1, Ordering::AcqRel);
        Self {
            id: inner.id,
            inner: Some(inner),
        }
    }

    fn inner(&self) -> Result<&BufferInner> {
        self.inner
            .as_deref()
            .ok_or(MemoryError::NotLocked { id: self.id })
    }

    fn release(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        OUTSTANDING_LOCKS.fetch_sub(1, Ordering::AcqRel);
        if inner.locks.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(manager) = inner.manager() {
                manager.unlock_buffer(inner.id);
            }
        }
    }
}

impl Clone for LockHandle {
    fn clone(&self) -> Self {
        match &self.inner {
            Some(inner) => Self::acquire(inner.clone()),
            None => Self {
                id: self.id,
                inner: None,
            },
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Read-write lock on a [`BufferObject`](crate::BufferObject)
#[derive(Clone)]
pub struct Lock(LockHandle);

impl Lock {
    pub(crate) fn new(handle: LockHandle) -> Self {
        Self(handle)
    }

    pub fn buffer_id(&self) -> BufferId {
        self.0.id
    }

    /// `false` after [`reset`](Self::reset)
    pub fn is_active(&self) -> bool {
        self.0.inner.is_some()
    }

    pub fn as_slice(&self) -> Result<BufferView<'_>> {
        buffer::read_view(self.0.inner()?)
    }

    /// Fails with `ReadOnlyView` when the buffer wraps memory it does not own
    pub fn as_mut_slice(&self) -> Result<BufferViewMut<'_>> {
        buffer::write_view(self.0.inner()?)
    }

    /// Release before the end of scope
    pub fn reset(&mut self) {
        self.0.release();
    }
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("buffer", &self.0.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Read-only lock on a [`BufferObject`](crate::BufferObject)
#[derive(Clone)]
pub struct ConstLock(LockHandle);

impl ConstLock {
    pub(crate) fn new(handle: LockHandle) -> Self {
        Self(handle)
    }

    pub fn buffer_id(&self) -> BufferId {
        self.0.id
    }

    pub fn is_active(&self) -> bool {
        self.0.inner.is_some()
    }

    pub fn as_slice(&self) -> Result<BufferView<'_>> {
        buffer::read_view(self.0.inner()?)
    }

    pub fn reset(&mut self) {
        self.0.release();
    }
}

impl From<Lock> for ConstLock {
    fn from(lock: Lock) -> Self {
        Self(lock.0)
    }
}

impl fmt::Debug for ConstLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstLock")
            .field("buffer", &self.0.id)
            .field("active", &self.is_active())
            .finish()
    }
}
