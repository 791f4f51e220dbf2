//! SyncReport - Synchronizer output
//!
//! Result of one synchronization cycle across several input timelines.

use serde::{Deserialize, Serialize};

use crate::{TimelineId, Timestamp};

/// Outcome of one synchronization cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// At least one sub-slot was fused and published.
    Published(SyncReport),

    /// The reference advanced but no input had any sub-slot present.
    NothingPresent(SyncReport),

    /// Cycle aborted before lookup.
    Skipped(SkipReason),
}

impl SyncOutcome {
    /// Report of a cycle that reached the lookup stage.
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Published(report) | Self::NothingPresent(report) => Some(report),
            Self::Skipped(_) => None,
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, Self::Published(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }

    /// Label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Published(_) => "published",
            Self::NothingPresent(_) => "nothing_present",
            Self::Skipped(SkipReason::InsufficientData { .. }) => "insufficient_data",
            Self::Skipped(SkipReason::NotAdvanced { .. }) => "not_advanced",
        }
    }
}

/// Why a cycle was skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// These inputs have never been pushed to (or were cleared).
    InsufficientData { empty: Vec<TimelineId> },

    /// Reference did not move past the last processed one.
    NotAdvanced {
        reference: Timestamp,
        last: Timestamp,
    },
}

/// One synchronization cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Cycle sequence number (monotonically increasing over processed cycles)
    pub frame_id: u64,

    /// Chosen instant: minimum of every input's newest timestamp
    pub reference: Timestamp,

    /// Per-input lookup result, in input order
    pub sources: Vec<SourceMatch>,

    /// Sub-slots with at least one producer present (fused this cycle)
    pub fused_slots: Vec<usize>,

    /// Sub-slots no producer reported this cycle
    pub missing_slots: Vec<usize>,
}

impl SyncReport {
    /// Every sub-slot had at least one producer.
    pub fn all_slots_found(&self) -> bool {
        self.missing_slots.is_empty()
    }

    /// Inputs whose lookup produced no usable element.
    pub fn unmatched_sources(&self) -> impl Iterator<Item = &SourceMatch> {
        self.sources.iter().filter(|s| s.matched.is_none())
    }
}

/// Lookup result for one input timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMatch {
    /// Input timeline
    pub timeline: TimelineId,

    /// Instant queried (reference minus the input's delay)
    pub requested: Timestamp,

    /// Timestamp of the element used, `None` if empty or outside tolerance
    pub matched: Option<Timestamp>,

    /// Presence mask of the matched element (0 when unmatched)
    pub present_mask: u64,
}

impl SourceMatch {
    /// Distance between the matched element and the requested instant.
    pub fn alignment_error_ms(&self) -> Option<f64> {
        self.matched.map(|m| m.distance(self.requested))
    }
}
