//! # Contracts
//!
//! Shared interface contracts for the timeline engine.
//! Every other crate in the workspace depends on this one; it depends on none of them.
//!
//! ## Time Model
//! - Timestamps are milliseconds stored as `f64` (see [`Timestamp`])
//! - A timeline keys its elements by strictly distinct timestamps
//! - `frame_id` in [`SyncReport`] is a diagnostic sequence number only

mod blueprint;
mod descriptor;
mod error;
mod event;
mod sync;
mod sync_config;
mod timeline_id;
mod timestamp;

pub use blueprint::*;
pub use descriptor::{ElementDescriptor, MAX_SUB_ELEMENTS};
pub use error::*;
pub use event::*;
pub use sync::*;
pub use sync_config::*;
pub use timeline_id::TimelineId;
pub use timestamp::Timestamp;
