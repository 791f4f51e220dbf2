//! Ingestion Pipeline main entry

use std::collections::HashMap;
use std::sync::Arc;

use contracts::ProducerConfig;
use timeline::Timeline;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::config::MetricsSnapshot;
use crate::error::{IngestionError, Result};
use crate::mock::MockProducer;

/// Ingestion Pipeline
///
/// Owns every mock producer, one per target timeline, and their background tasks.
#[derive(Default)]
pub struct IngestionPipeline {
    /// Registered producers, keyed by timeline name
    producers: HashMap<String, MockProducer>,

    /// Background tasks of started producers
    tasks: Vec<JoinHandle<()>>,
}

impl IngestionPipeline {
    /// Create new Ingestion Pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a producer for `timeline`
    #[instrument(
        name = "ingestion_register_producer",
        skip(self, config, timeline),
        fields(timeline = %config.timeline, kind = ?config.kind)
    )]
    pub fn register(&mut self, config: ProducerConfig, timeline: Arc<Timeline>) -> Result<()> {
        let name = config.timeline.clone();
        let producer = MockProducer::new(config, timeline)?;
        debug!(timeline = %name, "registered producer");
        self.producers.insert(name, producer);
        Ok(())
    }

    /// Start all registered producers
    #[instrument(name = "ingestion_start_all", skip(self))]
    pub fn start_all(&mut self) -> Result<()> {
        info!(count = self.producers.len(), "starting all producers");
        for producer in self.producers.values() {
            if !producer.is_running() {
                self.tasks.push(producer.start()?);
            }
        }
        Ok(())
    }

    /// Stop all producers
    #[instrument(name = "ingestion_stop_all", skip(self))]
    pub fn stop_all(&self) {
        info!(count = self.producers.len(), "stopping all producers");
        for producer in self.producers.values() {
            producer.stop();
        }
    }

    /// Stop all producers and wait for their tasks to exit
    pub async fn shutdown(&mut self) {
        self.stop_all();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }

    /// Publish one frame from the producer of `timeline`
    pub fn produce_next(&self, timeline: &str) -> Result<contracts::Timestamp> {
        self.producer(timeline)?.produce_next()
    }

    pub fn producer(&self, timeline: &str) -> Result<&MockProducer> {
        self.producers
            .get(timeline)
            .ok_or_else(|| IngestionError::UnknownTimeline {
                timeline: timeline.to_string(),
            })
    }

    /// Get registered producer count
    pub fn producer_count(&self) -> usize {
        self.producers.len()
    }

    /// Check if the producer of `timeline` is running
    pub fn is_running(&self, timeline: &str) -> bool {
        self.producers
            .get(timeline)
            .map(|p| p.is_running())
            .unwrap_or(false)
    }

    /// Totals over every producer
    pub fn metrics(&self) -> MetricsSnapshot {
        self.producers
            .values()
            .map(|p| p.metrics().snapshot())
            .fold(MetricsSnapshot::default(), |acc, s| acc + s)
    }
}

impl Drop for IngestionPipeline {
    fn drop(&mut self) {
        self.stop_all();
    }
}
