//! Ingestion 错误类型

use contracts::{ContractError, ProducerKind};
use thiserror::Error;

/// Ingestion 错误
#[derive(Debug, Error)]
pub enum IngestionError {
    /// 时间线拒绝了样本
    #[error("failed to publish to timeline {timeline}: {source}")]
    PublishFailed {
        /// 目标时间线
        timeline: String,
        #[source]
        source: ContractError,
    },

    /// 负载类型与时间线布局不兼容
    #[error("{kind:?} samples do not fit timeline {timeline} (element size {element_size})")]
    UnsupportedLayout {
        timeline: String,
        kind: ProducerKind,
        element_size: usize,
    },

    /// 配置无效
    #[error("invalid producer config for {timeline}: {message}")]
    InvalidConfig { timeline: String, message: String },

    /// 生产者已在运行
    #[error("producer for {timeline} is already running")]
    AlreadyRunning {
        /// 目标时间线
        timeline: String,
    },

    /// 目标时间线未注册
    #[error("no producer registered for timeline {timeline}")]
    UnknownTimeline { timeline: String },
}

impl IngestionError {
    pub(crate) fn publish(timeline: &str, source: ContractError) -> Self {
        Self::PublishFailed {
            timeline: timeline.to_string(),
            source,
        }
    }
}

/// Ingestion Result 类型别名
pub type Result<T> = std::result::Result<T, IngestionError>;
