//! SpillManager - 将未锁定的缓冲区转储到磁盘
//!
//! 转储条件：缓冲区存活、拥有内存、非空、无活动锁且未被其他线程占用。
//! 加锁时同步恢复；管理器销毁时恢复所有仍在磁盘上的缓冲区。

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use metrics::counter;
use parking_lot::Mutex;
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, error, info, trace, warn};

use contracts::DumpPolicyKind;

use crate::buffer::{BufferId, BufferObject, BufferSlot, WeakBuffer};
use crate::error::{MemoryError, Result};
use crate::manager::{Action, BufferManager, ManagerStats};

/// When the spill manager moves buffers to disk on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpPolicy {
    /// Only explicit [`SpillManager::dump`] calls
    Never,
    /// As soon as the last lock is released
    Always,
    /// Least recently used unlocked buffers, whenever resident bytes exceed the barrier
    Barrier { max_resident_bytes: usize },
}

impl DumpPolicy {
    pub fn from_config(kind: DumpPolicyKind, barrier_bytes: usize) -> Self {
        match kind {
            DumpPolicyKind::Never => Self::Never,
            DumpPolicyKind::Always => Self::Always,
            DumpPolicyKind::Barrier => Self::Barrier {
                max_resident_bytes: barrier_bytes,
            },
        }
    }
}

impl fmt::Display for DumpPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => write!(f, "never"),
            Self::Always => write!(f, "always"),
            Self::Barrier { max_resident_bytes } => write!(f, "barrier({max_resident_bytes}B)"),
        }
    }
}

enum SpillDir {
    Temp(TempDir),
    Fixed(PathBuf),
}

impl SpillDir {
    fn path(&self) -> &Path {
        match self {
            Self::Temp(dir) => dir.path(),
            Self::Fixed(path) => path,
        }
    }
}

struct Entry {
    handle: WeakBuffer,
    size: usize,
    spilled: Option<NamedTempFile>,
    last_access: u64,
}

#[derive(Default)]
struct SpillState {
    entries: HashMap<BufferId, Entry>,
    clock: u64,
    spill_count: u64,
    restore_count: u64,
}

impl SpillState {
    fn touch(&mut self, id: BufferId) {
        self.clock += 1;
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.last_access = self.clock;
        }
    }

    fn resident_bytes(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.spilled.is_none())
            .map(|e| e.size)
            .sum()
    }

    /// Resident entries, least recently used first
    fn lru_candidates(&self, except: Option<BufferId>) -> Vec<(BufferId, WeakBuffer)> {
        let mut candidates: Vec<_> = self
            .entries
            .iter()
            .filter(|(id, e)| Some(**id) != except && e.spilled.is_none() && e.size > 0)
            .map(|(id, e)| (e.last_access, *id, e.handle.clone()))
            .collect();
        candidates.sort_by_key(|(last_access, id, _)| (*last_access, *id));
        candidates
            .into_iter()
            .map(|(_, id, handle)| (id, handle))
            .collect()
    }
}

/// Buffer manager that moves unlocked buffers to temporary files
pub struct SpillManager {
    policy: DumpPolicy,
    dir: SpillDir,
    state: Mutex<SpillState>,
}

impl SpillManager {
    /// Spill into a fresh temporary directory, removed with the manager
    pub fn new(policy: DumpPolicy) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("tlsync-spill-").tempdir()?;
        Ok(Self::with_spill_dir(policy, SpillDir::Temp(dir)))
    }

    /// Spill into `path`, creating it if needed. The directory is left in place.
    pub fn in_dir(policy: DumpPolicy, path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        fs::create_dir_all(&path)?;
        Ok(Self::with_spill_dir(policy, SpillDir::Fixed(path)))
    }

    fn with_spill_dir(policy: DumpPolicy, dir: SpillDir) -> Self {
        info!(policy = %policy, dir = %dir.path().display(), "spill manager created");
        Self {
            policy,
            dir,
            state: Mutex::new(SpillState::default()),
        }
    }

    pub fn policy(&self) -> DumpPolicy {
        self.policy
    }

    pub fn spill_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Spill `buffer` now. Returns `false` when it is locked, busy, empty,
    /// not owning, already spilled or not managed here.
    pub fn dump(&self, buffer: &BufferObject) -> Result<bool> {
        let id = buffer.id();
        match buffer
            .downgrade()
            .with_unlocked_slot(|slot| self.spill_slot(id, slot))
        {
            Some(result) => result.map(|freed| freed > 0),
            None => Ok(false),
        }
    }

    /// Bring `buffer` back into memory. Returns `false` if it was resident.
    pub fn restore(&self, buffer: &BufferObject) -> Result<bool> {
        let mut slot = buffer.inner.slot.write();
        if slot.is_resident() {
            return Ok(false);
        }
        self.restore_slot(buffer.id(), &mut slot)?;
        Ok(true)
    }

    /// One-line description for logs and CLI output
    pub fn describe(&self) -> String {
        format!(
            "spill manager [{}] at {}: {}",
            self.policy,
            self.spill_dir().display(),
            self.stats()
        )
    }

    fn write_spill(&self, id: BufferId, bytes: &[u8]) -> Result<NamedTempFile> {
        let write = || -> std::io::Result<NamedTempFile> {
            let mut file = tempfile::Builder::new()
                .prefix("buffer-")
                .suffix(".spill")
                .tempfile_in(self.dir.path())?;
            file.write_all(bytes)?;
            file.flush()?;
            Ok(file)
        };
        write().map_err(|source| MemoryError::Spill { id, source })
    }

    /// Move the slot's bytes to disk; returns the number of bytes freed
    fn spill_slot(&self, id: BufferId, slot: &mut BufferSlot) -> Result<usize> {
        if !self.state.lock().entries.contains_key(&id) {
            return Ok(0);
        }
        let Some(bytes) = slot.evict() else {
            return Ok(0);
        };

        let file = match self.write_spill(id, &bytes) {
            Ok(file) => file,
            Err(err) => {
                slot.restore(bytes)?;
                return Err(err);
            }
        };
        let freed = bytes.len();
        drop(bytes);

        {
            let mut state = self.state.lock();
            state.spill_count += 1;
            if let Some(entry) = state.entries.get_mut(&id) {
                entry.spilled = Some(file);
            }
        }

        counter!("tlsync_spill_total").increment(1);
        debug!(buffer = %id, bytes = freed, "buffer spilled");
        Ok(freed)
    }

    fn restore_slot(&self, id: BufferId, slot: &mut BufferSlot) -> Result<()> {
        let file = self
            .state
            .lock()
            .entries
            .get_mut(&id)
            .and_then(|entry| entry.spilled.take());
        let Some(file) = file else {
            return Err(MemoryError::NotResident { id });
        };

        let restored = fs::read(file.path())
            .map_err(|source| MemoryError::Spill { id, source })
            .and_then(|bytes| slot.restore(bytes));
        if let Err(err) = restored {
            if let Some(entry) = self.state.lock().entries.get_mut(&id) {
                entry.spilled = Some(file);
            }
            return Err(err);
        }
        drop(file);

        {
            let mut state = self.state.lock();
            state.restore_count += 1;
            state.touch(id);
        }

        counter!("tlsync_restore_total").increment(1);
        debug!(buffer = %id, bytes = slot.size(), "buffer restored");
        Ok(())
    }

    /// Spill least recently used buffers until `needed` more bytes fit under the barrier
    fn make_room(&self, needed: usize, except: Option<BufferId>) {
        let DumpPolicy::Barrier { max_resident_bytes } = self.policy else {
            return;
        };

        let (mut resident, candidates) = {
            let state = self.state.lock();
            (state.resident_bytes(), state.lru_candidates(except))
        };

        for (id, handle) in candidates {
            if resident + needed <= max_resident_bytes {
                break;
            }
            match handle.with_unlocked_slot(|slot| self.spill_slot(id, slot)) {
                Some(Ok(freed)) => resident = resident.saturating_sub(freed),
                Some(Err(err)) => warn!(buffer = %id, error = %err, "spill failed"),
                None => trace!(buffer = %id, "buffer busy, not spilled"),
            }
        }

        if resident + needed > max_resident_bytes {
            debug!(
                resident,
                needed,
                barrier = max_resident_bytes,
                "resident bytes above barrier; remaining buffers are locked"
            );
        }
    }

    fn record_size(&self, id: BufferId, size: usize) {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get_mut(&id) {
            entry.size = size;
        }
        state.touch(id);
    }
}

impl BufferManager for SpillManager {
    fn name(&self) -> &'static str {
        "spill"
    }

    fn register_buffer(&self, buffer: WeakBuffer) {
        let mut state = self.state.lock();
        state.entries.insert(
            buffer.id(),
            Entry {
                handle: buffer,
                size: 0,
                spilled: None,
                last_access: 0,
            },
        );
    }

    fn unregister_buffer(&self, id: BufferId) {
        let removed = self.state.lock().entries.remove(&id);
        drop(removed);
    }

    fn allocate_buffer(&self, id: BufferId, slot: &mut BufferSlot, size: usize) -> Result<Action> {
        self.make_room(size, Some(id));
        slot.allocate_block(size)?;
        self.record_size(id, size);
        Ok(Action::Handled)
    }

    fn reallocate_buffer(
        &self,
        id: BufferId,
        slot: &mut BufferSlot,
        new_size: usize,
    ) -> Result<Action> {
        if !slot.is_resident() {
            self.restore_slot(id, slot)?;
        }
        self.make_room(new_size.saturating_sub(slot.size()), Some(id));
        slot.reallocate_block(new_size)?;
        self.record_size(id, new_size);
        Ok(Action::Handled)
    }

    fn set_buffer(&self, id: BufferId, slot: &BufferSlot) {
        self.record_size(id, slot.size());
    }

    fn destroy_buffer(&self, id: BufferId, _slot: &mut BufferSlot) -> Result<Action> {
        let file = {
            let mut state = self.state.lock();
            state.entries.get_mut(&id).and_then(|entry| {
                entry.size = 0;
                entry.spilled.take()
            })
        };
        drop(file);
        Ok(Action::Default)
    }

    fn swap_buffers(&self, a: BufferId, b: BufferId) {
        let mut state = self.state.lock();
        if !(state.entries.contains_key(&a) && state.entries.contains_key(&b)) {
            warn!(a = %a, b = %b, "swap involves a buffer this manager does not track");
            return;
        }
        let (size, spilled) = match state.entries.get_mut(&a) {
            Some(first) => (first.size, first.spilled.take()),
            None => return,
        };
        let (size, spilled) = match state.entries.get_mut(&b) {
            Some(second) => (
                std::mem::replace(&mut second.size, size),
                std::mem::replace(&mut second.spilled, spilled),
            ),
            None => return,
        };
        if let Some(first) = state.entries.get_mut(&a) {
            first.size = size;
            first.spilled = spilled;
        }
        state.touch(a);
        state.touch(b);
    }

    fn lock_buffer(&self, id: BufferId, slot: &mut BufferSlot) -> Result<()> {
        if !slot.is_resident() {
            self.make_room(slot.size(), Some(id));
            self.restore_slot(id, slot)?;
        } else {
            self.state.lock().touch(id);
        }
        Ok(())
    }

    fn unlock_buffer(&self, id: BufferId) {
        match self.policy {
            DumpPolicy::Never => {}
            DumpPolicy::Always => {
                let handle = self.state.lock().entries.get(&id).map(|e| e.handle.clone());
                let Some(handle) = handle else { return };
                if let Some(Err(err)) = handle.with_unlocked_slot(|slot| self.spill_slot(id, slot)) {
                    warn!(buffer = %id, error = %err, "spill on unlock failed");
                }
            }
            DumpPolicy::Barrier { .. } => self.make_room(0, None),
        }
    }

    fn stats(&self) -> ManagerStats {
        let state = self.state.lock();
        let mut stats = ManagerStats {
            buffers: state.entries.len(),
            spill_count: state.spill_count,
            restore_count: state.restore_count,
            ..ManagerStats::default()
        };
        for entry in state.entries.values() {
            stats.managed_bytes += entry.size;
            if entry.spilled.is_some() {
                stats.spilled_bytes += entry.size;
            } else {
                stats.resident_bytes += entry.size;
            }
        }
        stats
    }
}

impl Drop for SpillManager {
    fn drop(&mut self) {
        let spilled: Vec<_> = self
            .state
            .get_mut()
            .entries
            .iter_mut()
            .filter_map(|(id, entry)| {
                entry
                    .spilled
                    .take()
                    .map(|file| (*id, entry.handle.clone(), file))
            })
            .collect();

        for (id, handle, file) in spilled {
            let Some(buffer) = handle.upgrade() else {
                continue;
            };
            let mut slot = buffer.inner.slot.write();
            let restored = fs::read(file.path())
                .map_err(|source| MemoryError::Spill { id, source })
                .and_then(|bytes| slot.restore(bytes));
            match restored {
                Ok(()) => debug!(buffer = %id, "spilled buffer restored on shutdown"),
                Err(err) => error!(buffer = %id, error = %err, "spilled buffer lost on shutdown"),
            }
        }
    }
}

impl fmt::Debug for SpillManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpillManager")
            .field("policy", &self.policy)
            .field("dir", &self.spill_dir())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy;
    use std::sync::Arc;

    fn filled(manager: &Arc<SpillManager>, bytes: &[u8]) -> BufferObject {
        let b = BufferObject::with_manager(manager.clone());
        b.allocate(bytes.len(), policy::heap()).unwrap();
        b.lock()
            .unwrap()
            .as_mut_slice()
            .unwrap()
            .copy_from_slice(bytes);
        b
    }

    fn contents(b: &BufferObject) -> Vec<u8> {
        b.lock_const().unwrap().as_slice().unwrap().to_vec()
    }

    fn spill_files(manager: &SpillManager) -> usize {
        fs::read_dir(manager.spill_dir()).unwrap().count()
    }

    #[test]
    fn test_dump_and_restore_on_lock() {
        let manager = Arc::new(SpillManager::new(DumpPolicy::Never).unwrap());
        let b = filled(&manager, &[1, 2, 3, 4, 5, 6, 7, 8]);

        assert!(manager.dump(&b).unwrap());
        assert!(!b.is_resident());
        assert_eq!(b.size(), 8);
        let stats = manager.stats();
        assert_eq!(stats.spilled_bytes, 8);
        assert_eq!(stats.spill_count, 1);
        assert_eq!(spill_files(&manager), 1);

        // dumping twice is a no-op
        assert!(!manager.dump(&b).unwrap());

        assert_eq!(contents(&b), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(b.is_resident());
        assert_eq!(manager.stats().restore_count, 1);
        assert_eq!(spill_files(&manager), 0);
    }

    #[test]
    fn test_locked_buffer_is_not_dumped() {
        let manager = Arc::new(SpillManager::new(DumpPolicy::Never).unwrap());
        let b = filled(&manager, &[1, 2]);
        let lock = b.lock().unwrap();
        assert!(!manager.dump(&b).unwrap());
        drop(lock);
        assert!(manager.dump(&b).unwrap());
        assert!(manager.restore(&b).unwrap());
        assert!(!manager.restore(&b).unwrap());
    }

    #[test]
    fn test_always_spills_on_unlock() {
        let manager = Arc::new(SpillManager::new(DumpPolicy::Always).unwrap());
        let b = filled(&manager, &[4, 3, 2, 1]);
        assert!(!b.is_resident());

        let lock = b.lock().unwrap();
        assert!(b.is_resident());
        assert_eq!(&*lock.as_slice().unwrap(), &[4, 3, 2, 1]);
        drop(lock);
        assert!(!b.is_resident());
    }

    #[test]
    fn test_barrier_spills_least_recently_used() {
        let policy = DumpPolicy::Barrier {
            max_resident_bytes: 16,
        };
        let manager = Arc::new(SpillManager::new(policy).unwrap());
        let a = filled(&manager, &[1; 8]);
        let b = filled(&manager, &[2; 8]);
        let c = filled(&manager, &[3; 8]);

        assert!(!a.is_resident());
        assert!(b.is_resident());
        assert!(c.is_resident());

        assert_eq!(contents(&a), vec![1; 8]);
        assert!(!b.is_resident());
        assert!(c.is_resident());
        assert!(manager.stats().resident_bytes <= 16);
    }

    #[test]
    fn test_barrier_never_spills_locked_buffers() {
        let policy = DumpPolicy::Barrier {
            max_resident_bytes: 4,
        };
        let manager = Arc::new(SpillManager::new(policy).unwrap());
        let a = filled(&manager, &[1; 4]);
        let held = a.lock().unwrap();
        let b = filled(&manager, &[2; 4]);

        assert!(a.is_resident());
        assert_eq!(&*held.as_slice().unwrap(), &[1; 4]);
        drop(held);
        assert_eq!(contents(&b), vec![2; 4]);
    }

    #[test]
    fn test_swap_follows_spill_file() {
        let manager = Arc::new(SpillManager::new(DumpPolicy::Never).unwrap());
        let a = filled(&manager, &[7; 4]);
        let b = filled(&manager, &[9; 2]);
        assert!(manager.dump(&a).unwrap());

        a.swap(&b).unwrap();
        assert!(a.is_resident());
        assert!(!b.is_resident());
        assert_eq!(contents(&a), vec![9; 2]);
        assert_eq!(contents(&b), vec![7; 4]);
    }

    #[test]
    fn test_destroy_removes_spill_file() {
        let manager = Arc::new(SpillManager::new(DumpPolicy::Never).unwrap());
        let b = filled(&manager, &[5; 16]);
        assert!(manager.dump(&b).unwrap());
        assert_eq!(spill_files(&manager), 1);

        b.destroy();
        assert!(b.is_empty());
        assert_eq!(spill_files(&manager), 0);
        assert_eq!(manager.stats().managed_bytes, 0);
    }

    #[test]
    fn test_drop_restores_spilled_buffers() {
        let manager = Arc::new(SpillManager::new(DumpPolicy::Never).unwrap());
        let b = filled(&manager, &[6; 3]);
        assert!(manager.dump(&b).unwrap());

        drop(manager);
        assert!(b.is_resident());
        assert_eq!(contents(&b), vec![6; 3]);
    }

    #[test]
    fn test_fixed_directory_and_describe() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(SpillManager::in_dir(DumpPolicy::Always, dir.path().join("spill")).unwrap());
        let _b = filled(&manager, &[1; 4]);
        assert_eq!(spill_files(&manager), 1);
        assert!(manager.describe().contains("always"));
    }
}
