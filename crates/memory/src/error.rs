//! Memory 错误类型

use thiserror::Error;

use contracts::ContractError;

use crate::BufferId;

/// 缓冲区内存错误
#[derive(Debug, Error)]
pub enum MemoryError {
    /// 未加锁时访问内存
    #[error("buffer {id} not locked")]
    NotLocked { id: BufferId },

    /// 非所有者尝试分配/重分配
    #[error("buffer {id} does not own its memory")]
    NotOwner { id: BufferId },

    /// 对外部只读视图进行写访问
    #[error("buffer {id} is a read-only view over external memory")]
    ReadOnlyView { id: BufferId },

    /// 缓冲区已转储且无法恢复
    #[error("buffer {id} is not resident")]
    NotResident { id: BufferId },

    /// 存在活动锁时拒绝的操作
    #[error("buffer {id} has {count} active locks")]
    Locked { id: BufferId, count: usize },

    /// 分配策略失败
    #[error("{policy} policy failed to allocate {size} bytes")]
    AllocationFailed { size: usize, policy: &'static str },

    /// 存在未释放的锁时更换管理器
    #[error("cannot replace buffer manager while {outstanding} locks are outstanding")]
    ManagerInUse { outstanding: usize },

    /// 转储文件长度与缓冲区不符
    #[error("spill file for buffer {id} holds {actual} bytes, expected {expected}")]
    CorruptSpill {
        id: BufferId,
        expected: usize,
        actual: usize,
    },

    /// 转储/恢复 I/O 失败
    #[error("spill io failed for buffer {id}")]
    Spill {
        id: BufferId,
        #[source]
        source: std::io::Error,
    },
}

impl From<MemoryError> for ContractError {
    fn from(err: MemoryError) -> Self {
        ContractError::resource(err)
    }
}

/// Memory Result 类型别名
pub type Result<T> = std::result::Result<T, MemoryError>;
