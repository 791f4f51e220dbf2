//! Synchronizer configuration contracts that can be shared across crates.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::TimelineId;

/// Synchronizer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynchronizerConfig {
    /// How present sub-slots from several inputs are combined
    #[serde(default)]
    pub fusion: FusionKind,

    /// Matches farther than this from the requested instant count as absent
    #[serde(default)]
    pub tolerance_ms: Option<f64>,

    /// Timer-driven mode: synchronize at this rate instead of on every push
    #[serde(default)]
    pub framerate_hz: Option<f64>,

    /// Per-input lookup delay: the input is queried at `reference - delay`
    #[serde(default)]
    pub delays_ms: HashMap<TimelineId, f64>,
}

impl SynchronizerConfig {
    /// Delay for one input, 0 when unset.
    pub fn delay_for(&self, timeline: &str) -> f64 {
        self.delays_ms.get(timeline).copied().unwrap_or(0.0)
    }
}

/// Strategy for combining one sub-slot reported by several inputs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionKind {
    /// Bytes of the first present input, in input order
    #[default]
    First,
    /// Lane-wise mean, payload read as native-endian `f32`
    MeanF32,
    /// Average of 4x4 row-major `f32` rigid transforms
    RigidTransform,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_lookup() {
        let mut config = SynchronizerConfig::default();
        config.delays_ms.insert("camera".into(), 33.0);
        assert_eq!(config.delay_for("camera"), 33.0);
        assert_eq!(config.delay_for("tracker"), 0.0);
    }

    #[test]
    fn test_fusion_serde() {
        let kind: FusionKind = serde_json::from_str("\"rigid_transform\"").unwrap();
        assert_eq!(kind, FusionKind::RigidTransform);
        assert_eq!(FusionKind::default(), FusionKind::First);
    }
}
