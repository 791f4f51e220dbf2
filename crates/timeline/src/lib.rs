//! # Timeline
//!
//! 有界、按时间戳索引的缓冲池。
//!
//! 负责：
//! - 按描述符分配元素 (`create_buffer`)，发布前对读者不可见
//! - 原子发布 (`push`)，超出容量时淘汰最旧的未锁定元素
//! - 精确 / 最近邻 / 最新查询
//! - 向订阅者广播 `Pushed` / `Cleared` 事件
//!
//! ## 使用示例
//!
//! ```
//! use contracts::{ElementDescriptor, Timestamp};
//! use timeline::Timeline;
//!
//! let timeline = Timeline::new("markers");
//! timeline
//!     .init_pool_size(4, ElementDescriptor::new(8, 2).unwrap())
//!     .unwrap();
//!
//! let mut element = timeline.create_buffer(Timestamp::from_millis(10.0)).unwrap();
//! element.set_element(0, &[1u8; 8]).unwrap();
//! timeline.push(element).unwrap();
//!
//! let newest = timeline.get_newest().unwrap().unwrap();
//! assert!(newest.is_present(0));
//! assert!(!newest.is_present(1));
//! ```

mod element;
mod timeline;

pub use element::{ElementLock, TimelineElement};
pub use timeline::{Timeline, EVENT_CAPACITY};
