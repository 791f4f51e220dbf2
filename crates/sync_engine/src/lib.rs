//! # Sync Engine
//!
//! 多生产者时间线同步器。
//!
//! 负责：
//! - 在多个输入时间线之间选取共同参考时刻 (各输入最新时间戳的最小值)
//! - 按参考时刻 (减去各输入延迟) 查找最近邻元素
//! - 按子元素融合 (`First` / `MeanF32` / `RigidTransform`) 并发布到输出时间线
//! - 事件驱动或定时驱动的异步 worker
//!
//! ## 使用示例
//!
//! ```
//! use std::sync::Arc;
//!
//! use contracts::{ElementDescriptor, SynchronizerConfig, Timestamp};
//! use sync_engine::Synchronizer;
//! use timeline::Timeline;
//!
//! let layout = ElementDescriptor::new(4, 1).unwrap();
//! let make = |name: &str| {
//!     let timeline = Timeline::new(name);
//!     timeline.init_pool_size(8, layout).unwrap();
//!     Arc::new(timeline)
//! };
//! let (camera, tracker, fused) = (make("camera"), make("tracker"), make("fused"));
//!
//! for (timeline, ms) in [(&camera, 0.0), (&camera, 50.0), (&tracker, 10.0), (&tracker, 60.0)] {
//!     let mut element = timeline.create_buffer(Timestamp::from_millis(ms)).unwrap();
//!     element.set_element(0, &[1, 2, 3, 4]).unwrap();
//!     timeline.push(element).unwrap();
//! }
//!
//! let mut sync = Synchronizer::new(
//!     vec![camera, tracker],
//!     fused.clone(),
//!     SynchronizerConfig::default(),
//! )
//! .unwrap();
//!
//! let outcome = sync.synchronize().unwrap();
//! assert_eq!(outcome.report().unwrap().reference, Timestamp::from_millis(50.0));
//! assert!(fused.get(Timestamp::from_millis(50.0)).unwrap().is_some());
//! ```

mod fusion;
mod synchronizer;
mod worker;

pub use fusion::{fusion_for, FirstPresent, Fusion, MeanF32, RigidTransform, MATRIX_BYTES};
pub use synchronizer::Synchronizer;
pub use worker::{SyncWorker, SyncWorkerHandle};

// Re-export contracts types
pub use contracts::{FusionKind, SkipReason, SourceMatch, SyncOutcome, SyncReport, SynchronizerConfig};
