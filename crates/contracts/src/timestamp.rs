//! Timestamp - totally ordered millisecond instant
//!
//! Wraps an `f64` so it can key ordered maps. Non-finite values can be
//! constructed but are rejected by every timeline operation.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Millisecond timestamp.
///
/// Ordering uses [`f64::total_cmp`], so the type is `Ord` and `Eq`.
/// `-0.0` and `+0.0` compare and hash as the same instant.
///
/// # Examples
/// ```
/// use contracts::Timestamp;
///
/// let a = Timestamp::from_millis(10.0);
/// let b = Timestamp::from_millis(60.0);
/// assert!(a < b);
/// assert_eq!(a.distance(b), 50.0);
/// ```
#[derive(Clone, Copy, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(f64);

impl Timestamp {
    /// Origin of the time axis.
    pub const ZERO: Timestamp = Timestamp(0.0);

    #[inline]
    pub const fn from_millis(ms: f64) -> Self {
        Self(ms)
    }

    #[inline]
    pub const fn as_millis(self) -> f64 {
        self.0
    }

    /// `true` unless the value is NaN or infinite.
    #[inline]
    pub fn is_valid(self) -> bool {
        self.0.is_finite()
    }

    /// Absolute distance in milliseconds.
    #[inline]
    pub fn distance(self, other: Timestamp) -> f64 {
        (self.0 - other.0).abs()
    }

    /// Shift by a signed number of milliseconds.
    #[inline]
    pub fn offset(self, delta_ms: f64) -> Timestamp {
        Timestamp(self.0 + delta_ms)
    }

    /// Comparison key with the sign of zero dropped
    #[inline]
    fn key(self) -> f64 {
        self.0 + 0.0
    }
}

impl PartialEq for Timestamp {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.key().total_cmp(&other.key()) == Ordering::Equal
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().total_cmp(&other.key())
    }
}

impl std::hash::Hash for Timestamp {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().to_bits().hash(state)
    }
}

impl From<f64> for Timestamp {
    #[inline]
    fn from(ms: f64) -> Self {
        Self(ms)
    }
}

impl From<u32> for Timestamp {
    #[inline]
    fn from(ms: u32) -> Self {
        Self(f64::from(ms))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}ms", self.0)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}
