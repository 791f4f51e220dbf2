//! # Memory
//!
//! Buffer objects, scoped locks and pluggable buffer managers.
//!
//! 负责：
//! - 内存分配策略 (`AllocationPolicy`)
//! - 带引用计数锁的 `BufferObject`
//! - 可插拔的 `BufferManager` 钩子 (默认直通)
//! - 将未锁定缓冲区转储到磁盘的 `SpillManager`
//!
//! ## 使用示例
//!
//! ```
//! use memory::{policy, BufferObject};
//!
//! let buffer = BufferObject::new();
//! buffer.allocate(16, policy::heap()).unwrap();
//!
//! // memory is only reachable while a lock is held
//! assert!(buffer.get_buffer().is_err());
//! let lock = buffer.lock().unwrap();
//! assert_eq!(lock.as_slice().unwrap().len(), 16);
//! ```

mod buffer;
mod error;
mod lock;
pub mod manager;
pub mod policy;
mod spill;

pub use buffer::{BufferId, BufferObject, BufferSlot, BufferView, BufferViewMut, WeakBuffer};
pub use error::{MemoryError, Result};
pub use lock::{outstanding_locks, ConstLock, Lock};
pub use manager::{Action, BufferManager, ManagerStats, NullManager};
pub use policy::{AllocationPolicy, HeapPolicy, NoAllocPolicy};
pub use spill::{DumpPolicy, SpillManager};
