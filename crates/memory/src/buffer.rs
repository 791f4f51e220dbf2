//! BufferObject - 可加锁的字节缓冲区
//!
//! 内存只能在持有锁 ([`Lock`] / [`ConstLock`]) 时访问。
//! 每个操作先交给所属的 [`BufferManager`]，管理器可以接管或交回默认行为。

use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut, Range};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use tracing::{trace, warn};

use crate::error::{MemoryError, Result};
use crate::lock::{ConstLock, Lock, LockHandle};
use crate::manager::{self, Action, BufferManager};
use crate::policy::{self, AllocationPolicy};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique buffer identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        Self(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}

pub(crate) enum Block {
    Empty,
    Owned(Vec<u8>),
    View(Bytes),
    Spilled,
}

/// Mutable state of one buffer, handed to manager hooks.
///
/// `Block::Empty` holds exactly when `size == 0`; a spilled block keeps its size.
pub struct BufferSlot {
    id: BufferId,
    block: Block,
    size: usize,
    policy: Arc<dyn AllocationPolicy>,
    owner: bool,
}

impl BufferSlot {
    fn new(id: BufferId) -> Self {
        Self {
            id,
            block: Block::Empty,
            size: 0,
            policy: policy::heap(),
            owner: true,
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.block, Block::Empty)
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn is_resident(&self) -> bool {
        !matches!(self.block, Block::Spilled)
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Allocate `size` bytes with the slot's policy, dropping any previous block
    pub fn allocate_block(&mut self, size: usize) -> Result<()> {
        self.release();
        if size == 0 {
            return Ok(());
        }
        let block = self.policy.allocate(size)?;
        self.block = Block::Owned(block);
        self.size = size;
        Ok(())
    }

    /// Resize the owned block, preserving its prefix
    pub fn reallocate_block(&mut self, new_size: usize) -> Result<()> {
        match self.block {
            Block::View(_) => return Err(MemoryError::NotOwner { id: self.id }),
            Block::Spilled => return Err(MemoryError::NotResident { id: self.id }),
            Block::Empty => return self.allocate_block(new_size),
            Block::Owned(_) if new_size == 0 => {
                self.release();
                return Ok(());
            }
            Block::Owned(_) => {}
        }
        if let Block::Owned(block) = &mut self.block {
            self.policy.reallocate(block, new_size)?;
        }
        self.size = new_size;
        Ok(())
    }

    /// Take the owned bytes out, leaving the slot spilled.
    ///
    /// Returns `None` for views, empty slots and already spilled slots.
    pub fn evict(&mut self) -> Option<Vec<u8>> {
        if !self.owner {
            return None;
        }
        match mem::replace(&mut self.block, Block::Spilled) {
            Block::Owned(bytes) => Some(bytes),
            other => {
                self.block = other;
                None
            }
        }
    }

    /// Put spilled bytes back
    pub fn restore(&mut self, bytes: Vec<u8>) -> Result<()> {
        if self.is_resident() {
            return Ok(());
        }
        if bytes.len() != self.size {
            return Err(MemoryError::CorruptSpill {
                id: self.id,
                expected: self.size,
                actual: bytes.len(),
            });
        }
        self.block = Block::Owned(bytes);
        Ok(())
    }

    /// Free owned memory through the policy; the slot becomes empty and owning
    pub fn release(&mut self) {
        if let Block::Owned(bytes) = mem::replace(&mut self.block, Block::Empty) {
            self.policy.release(bytes);
        }
        self.size = 0;
        self.owner = true;
    }

    fn bytes(&self) -> Option<&[u8]> {
        match &self.block {
            Block::Empty => Some(<&[u8]>::default()),
            Block::Owned(bytes) => Some(bytes.as_slice()),
            Block::View(bytes) => Some(&bytes[..]),
            Block::Spilled => None,
        }
    }

    fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.block {
            Block::Empty => Some(<&mut [u8]>::default()),
            Block::Owned(bytes) => Some(bytes.as_mut_slice()),
            Block::View(_) | Block::Spilled => None,
        }
    }

    fn check_writable(&self) -> Result<()> {
        match self.block {
            Block::View(_) => Err(MemoryError::ReadOnlyView { id: self.id }),
            Block::Spilled => Err(MemoryError::NotResident { id: self.id }),
            Block::Empty | Block::Owned(_) => Ok(()),
        }
    }

    fn swap_contents(&mut self, other: &mut BufferSlot) {
        mem::swap(&mut self.block, &mut other.block);
        mem::swap(&mut self.size, &mut other.size);
        mem::swap(&mut self.policy, &mut other.policy);
        mem::swap(&mut self.owner, &mut other.owner);
    }
}

impl fmt::Debug for BufferSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let block = match self.block {
            Block::Empty => "empty",
            Block::Owned(_) => "owned",
            Block::View(_) => "view",
            Block::Spilled => "spilled",
        };
        f.debug_struct("BufferSlot")
            .field("id", &self.id)
            .field("block", &block)
            .field("size", &self.size)
            .field("policy", &self.policy.name())
            .finish()
    }
}

pub(crate) struct BufferInner {
    pub(crate) id: BufferId,
    pub(crate) slot: RwLock<BufferSlot>,
    pub(crate) locks: AtomicUsize,
    manager: Weak<dyn BufferManager>,
}

impl BufferInner {
    pub(crate) fn manager(&self) -> Option<Arc<dyn BufferManager>> {
        self.manager.upgrade()
    }
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        let manager = self.manager.upgrade();
        let id = self.id;
        let slot = self.slot.get_mut();
        if !slot.is_empty() {
            let action = match &manager {
                Some(m) => m.destroy_buffer(id, slot).unwrap_or_else(|err| {
                    warn!(buffer = %id, error = %err, "destroy hook failed");
                    Action::Default
                }),
                None => Action::Default,
            };
            if action == Action::Default {
                slot.release();
            }
        }
        if let Some(m) = manager {
            m.unregister_buffer(id);
        }
    }
}

/// Non-owning handle a manager keeps for every registered buffer
#[derive(Clone)]
pub struct WeakBuffer {
    id: BufferId,
    inner: Weak<BufferInner>,
}

impl WeakBuffer {
    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    pub fn upgrade(&self) -> Option<BufferObject> {
        self.inner.upgrade().map(|inner| BufferObject { inner })
    }

    /// Run `f` on the slot if the buffer is alive, not busy and has no active lock.
    ///
    /// Never blocks: a buffer whose state is held by another thread is skipped.
    pub fn with_unlocked_slot<R>(&self, f: impl FnOnce(&mut BufferSlot) -> R) -> Option<R> {
        let inner = self.inner.upgrade()?;
        let result = {
            let mut slot = inner.slot.try_write()?;
            if inner.locks.load(Ordering::Acquire) > 0 {
                return None;
            }
            f(&mut slot)
        };
        Some(result)
    }
}

impl fmt::Debug for WeakBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakBuffer")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Read-only view of locked buffer memory
pub struct BufferView<'a>(MappedRwLockReadGuard<'a, [u8]>);

impl Deref for BufferView<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl<'a> BufferView<'a> {
    /// Narrow the view to `range`; `None` when out of bounds
    pub fn slice(self, range: Range<usize>) -> Option<BufferView<'a>> {
        MappedRwLockReadGuard::try_map(self.0, |bytes| bytes.get(range))
            .ok()
            .map(BufferView)
    }
}

/// Mutable view of locked buffer memory
pub struct BufferViewMut<'a>(MappedRwLockWriteGuard<'a, [u8]>);

impl<'a> BufferViewMut<'a> {
    /// Narrow the view to `range`; `None` when out of bounds
    pub fn slice(self, range: Range<usize>) -> Option<BufferViewMut<'a>> {
        MappedRwLockWriteGuard::try_map(self.0, |bytes| bytes.get_mut(range))
            .ok()
            .map(BufferViewMut)
    }
}

impl Deref for BufferViewMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl DerefMut for BufferViewMut<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

pub(crate) fn read_view(inner: &BufferInner) -> Result<BufferView<'_>> {
    if inner.locks.load(Ordering::Acquire) == 0 {
        return Err(MemoryError::NotLocked { id: inner.id });
    }
    RwLockReadGuard::try_map(inner.slot.read(), BufferSlot::bytes)
        .map(BufferView)
        .map_err(|_| MemoryError::NotResident { id: inner.id })
}

pub(crate) fn write_view(inner: &BufferInner) -> Result<BufferViewMut<'_>> {
    if inner.locks.load(Ordering::Acquire) == 0 {
        return Err(MemoryError::NotLocked { id: inner.id });
    }
    let slot = inner.slot.write();
    slot.check_writable()?;
    RwLockWriteGuard::try_map(slot, BufferSlot::bytes_mut)
        .map(BufferViewMut)
        .map_err(|_| MemoryError::NotResident { id: inner.id })
}

/// 字节缓冲区
///
/// - 仅在持有锁时可访问内存 (`get_buffer` / `Lock::as_slice`)
/// - 可包装外部内存 (`set_external_buffer`)，非所有者不可重分配
/// - 所有操作先交给所属管理器 (创建时的 [`manager::current`])
pub struct BufferObject {
    pub(crate) inner: Arc<BufferInner>,
}

impl BufferObject {
    /// Empty buffer attached to the process-wide current manager
    pub fn new() -> Self {
        Self::with_manager(manager::current())
    }

    /// Empty buffer attached to `manager`
    pub fn with_manager(manager: Arc<dyn BufferManager>) -> Self {
        Self::with_weak_manager(Arc::downgrade(&manager))
    }

    /// Empty buffer attached to a manager that may already be gone
    pub fn with_weak_manager(manager: Weak<dyn BufferManager>) -> Self {
        let id = BufferId::next();
        let inner = Arc::new(BufferInner {
            id,
            slot: RwLock::new(BufferSlot::new(id)),
            locks: AtomicUsize::new(0),
            manager,
        });
        if let Some(m) = inner.manager() {
            m.register_buffer(WeakBuffer {
                id,
                inner: Arc::downgrade(&inner),
            });
        }
        Self { inner }
    }

    pub fn id(&self) -> BufferId {
        self.inner.id
    }

    pub fn downgrade(&self) -> WeakBuffer {
        WeakBuffer {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn manager(&self) -> Option<Arc<dyn BufferManager>> {
        self.inner.manager()
    }

    pub fn manager_weak(&self) -> Weak<dyn BufferManager> {
        self.inner.manager.clone()
    }

    pub fn size(&self) -> usize {
        self.inner.slot.read().size
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slot.read().is_empty()
    }

    pub fn is_owner(&self) -> bool {
        self.inner.slot.read().owner
    }

    pub fn is_resident(&self) -> bool {
        self.inner.slot.read().is_resident()
    }

    pub fn lock_count(&self) -> usize {
        self.inner.locks.load(Ordering::Acquire)
    }

    /// Allocate `size` bytes with `policy`.
    ///
    /// Fails with `NotOwner` if the buffer currently wraps memory it does not own.
    pub fn allocate(&self, size: usize, policy: Arc<dyn AllocationPolicy>) -> Result<()> {
        let manager = self.inner.manager();
        let mut slot = self.inner.slot.write();
        if !slot.is_empty() {
            if !slot.owner {
                return Err(MemoryError::NotOwner { id: self.id() });
            }
            self.release_slot(manager.as_deref(), &mut slot);
        }
        slot.policy = policy;

        let action = match &manager {
            Some(m) => m.allocate_buffer(self.id(), &mut slot, size)?,
            None => Action::Default,
        };
        if action == Action::Default {
            slot.allocate_block(size)?;
        }

        trace!(buffer = %self.id(), size, policy = slot.policy.name(), "buffer allocated");
        Ok(())
    }

    /// Resize, preserving the common prefix. Empty buffers are allocated.
    pub fn reallocate(&self, new_size: usize) -> Result<()> {
        let manager = self.inner.manager();
        let mut slot = self.inner.slot.write();
        if !slot.owner {
            return Err(MemoryError::NotOwner { id: self.id() });
        }

        let action = match &manager {
            Some(m) => m.reallocate_buffer(self.id(), &mut slot, new_size)?,
            None => Action::Default,
        };
        if action == Action::Default {
            slot.reallocate_block(new_size)?;
        }

        trace!(buffer = %self.id(), size = new_size, "buffer reallocated");
        Ok(())
    }

    /// Replace the contents with externally provided memory.
    ///
    /// With `take_ownership` the bytes are adopted and may later be resized or
    /// spilled; otherwise the buffer becomes a read-only view over `data`.
    pub fn set_external_buffer(
        &self,
        data: Bytes,
        policy: Arc<dyn AllocationPolicy>,
        take_ownership: bool,
    ) -> Result<()> {
        let manager = self.inner.manager();
        let mut slot = self.inner.slot.write();
        self.release_slot(manager.as_deref(), &mut slot);

        slot.policy = policy;
        if !data.is_empty() {
            slot.size = data.len();
            if take_ownership {
                slot.block = Block::Owned(Vec::from(data));
            } else {
                slot.block = Block::View(data);
                slot.owner = false;
            }
        }

        if let Some(m) = &manager {
            m.set_buffer(self.id(), &slot);
        }
        Ok(())
    }

    /// Release the memory; the buffer becomes empty. Idempotent.
    pub fn destroy(&self) {
        let manager = self.inner.manager();
        let mut slot = self.inner.slot.write();
        self.release_slot(manager.as_deref(), &mut slot);
    }

    fn release_slot(&self, manager: Option<&dyn BufferManager>, slot: &mut BufferSlot) {
        if slot.is_empty() {
            return;
        }
        let action = match manager {
            Some(m) => m.destroy_buffer(self.id(), slot).unwrap_or_else(|err| {
                warn!(buffer = %self.id(), error = %err, "destroy hook failed");
                Action::Default
            }),
            None => Action::Default,
        };
        if action == Action::Default {
            slot.release();
        }
    }

    fn acquire(&self) -> Result<LockHandle> {
        let _installing = manager::installation_guard();
        let manager = self.inner.manager();
        let mut slot = self.inner.slot.write();
        if let Some(m) = &manager {
            m.lock_buffer(self.id(), &mut slot)?;
        }
        if !slot.is_resident() {
            return Err(MemoryError::NotResident { id: self.id() });
        }
        let handle = LockHandle::acquire(self.inner.clone());
        drop(slot);
        Ok(handle)
    }

    /// Lock for read-write access. A spilled buffer is restored first.
    pub fn lock(&self) -> Result<Lock> {
        self.acquire().map(Lock::new)
    }

    /// Lock for read-only access
    pub fn lock_const(&self) -> Result<ConstLock> {
        self.acquire().map(ConstLock::new)
    }

    /// Read the memory. Fails with `NotLocked` unless some lock is active.
    pub fn get_buffer(&self) -> Result<BufferView<'_>> {
        read_view(&self.inner)
    }

    /// Write the memory. Fails with `NotLocked` unless some lock is active.
    pub fn get_buffer_mut(&self) -> Result<BufferViewMut<'_>> {
        write_view(&self.inner)
    }

    /// Exchange contents and ownership with `other`. Refused while either side is locked.
    pub fn swap(&self, other: &BufferObject) -> Result<()> {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return Ok(());
        }

        let (first, second) = if self.id() < other.id() {
            (&self.inner, &other.inner)
        } else {
            (&other.inner, &self.inner)
        };
        let mut a = first.slot.write();
        let mut b = second.slot.write();
        for inner in [first, second] {
            let count = inner.locks.load(Ordering::Acquire);
            if count > 0 {
                return Err(MemoryError::Locked {
                    id: inner.id,
                    count,
                });
            }
        }
        a.swap_contents(&mut b);

        if let Some(m) = self.inner.manager() {
            m.swap_buffers(self.id(), other.id());
        }
        if !Weak::ptr_eq(&self.inner.manager, &other.inner.manager) {
            if let Some(m) = other.inner.manager() {
                m.swap_buffers(other.id(), self.id());
            }
        }

        trace!(a = %self.id(), b = %other.id(), "buffers swapped");
        Ok(())
    }

    /// Copy the contents into a fresh owning buffer under the same manager
    pub fn deep_copy(&self) -> Result<BufferObject> {
        let policy = {
            let slot = self.inner.slot.read();
            if slot.owner {
                slot.policy.clone()
            } else {
                policy::heap()
            }
        };

        let copy = BufferObject::with_weak_manager(self.inner.manager.clone());
        let source = self.lock_const()?;
        let bytes = source.as_slice()?;
        if bytes.is_empty() {
            return Ok(copy);
        }

        copy.allocate(bytes.len(), policy)?;
        let target = copy.lock()?;
        target.as_mut_slice()?.copy_from_slice(&bytes);
        drop(target);
        drop(bytes);
        Ok(copy)
    }
}

impl Default for BufferObject {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BufferObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferObject")
            .field("id", &self.inner.id)
            .field("locks", &self.lock_count())
            .field("slot", &*self.inner.slot.read())
            .finish()
    }
}
