//! Timeline notifications and pool statistics.

use serde::{Deserialize, Serialize};

use crate::Timestamp;

/// Notification broadcast by a timeline to its subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEvent {
    /// An element became visible at this timestamp.
    Pushed(Timestamp),
    /// Every element was dropped; newest is reset to none.
    Cleared,
}

/// Counters describing one timeline's pool (for diagnostics).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineStats {
    /// Retained elements right now
    pub len: usize,

    /// Configured capacity (0 before init)
    pub capacity: usize,

    /// Successful publications
    pub pushed: u64,

    /// Elements evicted to respect capacity
    pub evicted: u64,

    /// Publications refused (duplicate timestamp or exhausted pool)
    pub rejected: u64,

    /// Element payloads reused from the free list
    pub recycled: u64,

    /// Highest `len` observed; above `capacity` only under transient overflow
    pub overflow_peak: usize,

    /// Oldest retained timestamp
    pub oldest: Option<Timestamp>,

    /// Newest retained timestamp
    pub newest: Option<Timestamp>,
}
