//! Layered error definitions
//!
//! Categorized by how callers react to them:
//! - configuration: fatal, detected at init (descriptor, pool sizing, parsing)
//! - resource: recoverable misuse of buffer memory (not locked, not owner)
//! - pool: rejected publications (duplicate timestamp, exhausted pool)
//!
//! Missing data is never an error; lookups return `Option`.

use thiserror::Error;

use crate::Timestamp;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    /// Element descriptor rejected
    #[error("invalid element descriptor ({element_size} bytes x {max_elements}): {message}")]
    InvalidDescriptor {
        element_size: usize,
        max_elements: usize,
        message: String,
    },

    /// Data operation on a timeline that was never sized
    #[error("timeline '{timeline}' is not initialized (call init_pool_size first)")]
    Uninitialized { timeline: String },

    /// Cooperating timelines disagree on capacity or descriptor
    #[error("timeline '{timeline}' does not match its peers: {message}")]
    TimelineMismatch { timeline: String, message: String },

    // ===== Pool Errors =====
    /// Timestamp is NaN or infinite
    #[error("invalid timestamp: {value}")]
    InvalidTimestamp { value: f64 },

    /// An element is already published at this timestamp
    #[error("timeline '{timeline}' already holds an element at {timestamp}")]
    DuplicateTimestamp {
        timeline: String,
        timestamp: Timestamp,
    },

    /// Pool full and every retained element is locked
    #[error("timeline '{timeline}' is full: {locked} of {capacity} elements are locked")]
    PoolExhausted {
        timeline: String,
        capacity: usize,
        locked: usize,
    },

    /// Element was created by a different timeline or descriptor
    #[error("element does not fit timeline '{timeline}': {message}")]
    ForeignElement { timeline: String, message: String },

    /// Sub-element index outside the descriptor
    #[error("sub-element index {index} out of range (max {max_elements})")]
    ElementIndex { index: usize, max_elements: usize },

    /// Sub-element payload of the wrong length
    #[error("sub-element {index} expects {expected} bytes, got {actual}")]
    ElementSize {
        index: usize,
        expected: usize,
        actual: usize,
    },

    // ===== Resource Errors =====
    /// Buffer memory misuse (not locked, not owner, read-only view, ...)
    #[error("resource error: {message}")]
    Resource {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create timeline mismatch error
    pub fn timeline_mismatch(timeline: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TimelineMismatch {
            timeline: timeline.into(),
            message: message.into(),
        }
    }

    /// Create resource error wrapping a lower-level cause
    pub fn resource<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Resource {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Fatal errors detected while wiring timelines together
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ConfigParse { .. }
                | Self::ConfigValidation { .. }
                | Self::InvalidDescriptor { .. }
                | Self::Uninitialized { .. }
                | Self::TimelineMismatch { .. }
        )
    }

    /// Recoverable buffer-memory misuse
    pub fn is_resource(&self) -> bool {
        matches!(self, Self::Resource { .. })
    }
}
