//! # Ingestion
//!
//! Mock producers feeding timelines.
//!
//! Responsibilities:
//! - Generate deterministic marker / rigid-transform samples
//! - Publish them into their timeline at a configured rate on a simulated clock
//! - Occlude sub-elements on a fixed schedule to exercise partial presence
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::IngestionPipeline;
//!
//! let mut pipeline = IngestionPipeline::new();
//! for producer in &blueprint.producers {
//!     pipeline.register(producer.clone(), timelines[&producer.timeline].clone())?;
//! }
//! pipeline.start_all()?;
//! // ...
//! pipeline.shutdown().await;
//! ```

mod config;
mod error;
mod mock;
mod pipeline;
pub mod sample;

// Re-exports
pub use config::{MetricsSnapshot, ProducerMetrics};
pub use contracts::{ProducerConfig, ProducerKind};
pub use error::{IngestionError, Result};
pub use mock::MockProducer;
pub use pipeline::IngestionPipeline;
