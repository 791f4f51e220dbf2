//! PipelineBlueprint - Config Loader 输出
//!
//! 描述完整的管道配置：内存管理器、时间线池、模拟生产者、同步器。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use validator::Validate;

use crate::{ContractError, ElementDescriptor, FusionKind, SynchronizerConfig};

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// 完整的管道配置蓝图
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PipelineBlueprint {
    /// 配置版本
    #[serde(default)]
    pub version: ConfigVersion,

    /// 缓冲区管理器设置
    #[serde(default)]
    #[validate(nested)]
    pub memory: MemoryConfig,

    /// 时间线池定义
    #[validate(length(min = 1, message = "at least one timeline is required"), nested)]
    pub timelines: Vec<TimelineConfig>,

    /// 模拟生产者 (可选)
    #[serde(default)]
    #[validate(nested)]
    pub producers: Vec<ProducerConfig>,

    /// 同步器配置
    #[validate(nested)]
    pub sync: SyncConfig,
}

/// 缓冲区管理器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MemoryConfig {
    /// 管理器类型
    #[serde(default)]
    pub manager: ManagerKind,

    /// 转储策略 (仅 spill 管理器)
    #[serde(default)]
    pub dump_policy: DumpPolicyKind,

    /// barrier 策略的常驻内存上限 (字节)
    #[serde(default = "default_barrier_bytes")]
    #[validate(range(min = 1))]
    pub barrier_bytes: usize,

    /// 转储目录 (None = 系统临时目录)
    #[serde(default)]
    pub spill_dir: Option<PathBuf>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            manager: ManagerKind::default(),
            dump_policy: DumpPolicyKind::default(),
            barrier_bytes: default_barrier_bytes(),
            spill_dir: None,
        }
    }
}

fn default_barrier_bytes() -> usize {
    64 * 1024 * 1024
}

/// 缓冲区管理器类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerKind {
    /// 直通，不拦截任何操作
    #[default]
    Null,
    /// 将未锁定的缓冲区转储到磁盘
    Spill,
}

/// 转储策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpPolicyKind {
    /// 从不自动转储
    #[default]
    Never,
    /// 最后一个锁释放后立即转储
    Always,
    /// 常驻字节超过 barrier 时转储最久未访问的缓冲区
    Barrier,
}

/// 时间线配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TimelineConfig {
    /// 唯一名称
    #[validate(length(min = 1, message = "timeline name cannot be empty"))]
    pub name: String,

    /// 池容量 (保留元素上限)
    #[validate(range(min = 1))]
    pub capacity: usize,

    /// 每个子元素的字节数
    #[validate(range(min = 1))]
    pub element_size: usize,

    /// 每个元素的子元素数量 (<= 64)
    #[validate(range(min = 1, max = 64))]
    pub max_elements: usize,

    /// 池满且全部锁定时的策略
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

impl TimelineConfig {
    /// 元素描述符
    pub fn descriptor(&self) -> Result<ElementDescriptor, ContractError> {
        ElementDescriptor::new(self.element_size, self.max_elements)
    }
}

/// Policy when a push finds the pool full and every retained element locked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Publish anyway; the pool shrinks back on later pushes once readers unlock
    #[default]
    Grow,
    /// Refuse the push with `PoolExhausted`
    Reject,
}

/// 模拟生产者配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProducerConfig {
    /// 目标时间线
    #[validate(length(min = 1))]
    pub timeline: String,

    /// 负载类型
    #[serde(default)]
    pub kind: ProducerKind,

    /// 发布频率 (Hz)
    #[validate(range(min = 0.1, max = 10000.0))]
    pub frequency_hz: f64,

    /// 模拟时钟起点 (毫秒)
    #[serde(default)]
    pub start_ms: f64,

    /// 每 N 帧遮挡一次子元素 (None = 从不遮挡)
    #[serde(default)]
    #[validate(range(min = 1))]
    pub occlusion_period: Option<u64>,
}

/// 模拟负载类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerKind {
    /// 每个子元素为一个 f32 坐标点 (x, y[, z])
    #[default]
    Markers,
    /// 每个子元素为一个 4x4 f32 刚体变换矩阵
    Matrices,
}

/// 同步器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SyncConfig {
    /// 输入时间线
    #[validate(length(min = 1, message = "sync needs at least one input"))]
    pub inputs: Vec<String>,

    /// 输出时间线
    #[validate(length(min = 1))]
    pub output: String,

    /// 融合策略
    #[serde(default)]
    pub fusion: FusionKind,

    /// 匹配容差 (毫秒)
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub tolerance_ms: Option<f64>,

    /// 定时同步频率 (Hz)，None = 每次 push 触发
    #[serde(default)]
    #[validate(range(min = 0.1, max = 1000.0))]
    pub framerate_hz: Option<f64>,

    /// 各输入的查询延迟 (毫秒)
    #[serde(default)]
    pub delays_ms: HashMap<String, f64>,
}

impl PipelineBlueprint {
    /// Look up a timeline definition by name
    pub fn timeline(&self, name: &str) -> Option<&TimelineConfig> {
        self.timelines.iter().find(|t| t.name == name)
    }

    /// Build the runtime synchronizer configuration
    pub fn to_synchronizer_config(&self) -> SynchronizerConfig {
        SynchronizerConfig {
            fusion: self.sync.fusion,
            tolerance_ms: self.sync.tolerance_ms,
            framerate_hz: self.sync.framerate_hz,
            delays_ms: self
                .sync
                .delays_ms
                .iter()
                .map(|(name, delay)| (name.as_str().into(), *delay))
                .collect(),
        }
    }
}
