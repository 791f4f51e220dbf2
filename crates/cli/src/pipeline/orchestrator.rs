//! Pipeline orchestrator - coordinates all components.
//!
//! Installs the configured buffer manager, builds every timeline, starts the
//! mock producers and drives the synchronizer until a stop condition is met.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{ManagerKind, MemoryConfig, PipelineBlueprint, SyncOutcome};
use ingestion::IngestionPipeline;
use memory::{BufferManager, DumpPolicy, NullManager, SpillManager};
use observability::{record_memory_usage, SyncMetricsAggregator};
use sync_engine::{SyncWorker, Synchronizer};
use timeline::Timeline;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::PipelineStats;
use crate::error::{CliError, Result};

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The validated pipeline blueprint
    pub blueprint: PipelineBlueprint,

    /// Maximum number of frames to publish (None = unlimited)
    pub max_frames: Option<u64>,

    /// Pipeline timeout (None = no timeout)
    pub timeout: Option<Duration>,

    /// Capacity of the sync outcome queue
    pub buffer_size: usize,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Why the processing loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    MaxFrames,
    Timeout,
    Signal,
    WorkerExited,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run until `max_frames`, the timeout, or `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<PipelineStats> {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)
                .map_err(|e| CliError::pipeline_execution(format!("{e:#}")))?;
            info!("Metrics endpoint available on port {}", port);
        }

        // Buffer manager: every timeline below attaches to it
        let manager = build_manager(&blueprint.memory)?;
        let previous = memory::manager::set_current(manager.clone())?;
        info!(manager = manager.name(), "Buffer manager installed");

        let timelines = build_timelines(blueprint, &manager)?;
        info!(count = timelines.len(), "Timelines initialized");

        // Producers
        let mut ingestion = IngestionPipeline::new();
        for producer in &blueprint.producers {
            let timeline = lookup(&timelines, &producer.timeline)?;
            ingestion.register(producer.clone(), timeline)?;
        }
        let active_producers = ingestion.producer_count();
        if active_producers == 0 {
            warn!("No producers configured - inputs will stay empty");
        }

        // Synchronizer
        let inputs = blueprint
            .sync
            .inputs
            .iter()
            .map(|name| lookup(&timelines, name))
            .collect::<Result<Vec<_>>>()?;
        let output = lookup(&timelines, &blueprint.sync.output)?;
        let sync_config = blueprint.to_synchronizer_config();
        info!(
            inputs = ?blueprint.sync.inputs,
            output = %blueprint.sync.output,
            fusion = ?sync_config.fusion,
            tolerance_ms = ?sync_config.tolerance_ms,
            framerate_hz = ?sync_config.framerate_hz,
            "Synchronizer configured"
        );
        let synchronizer = Synchronizer::new(inputs, output, sync_config)?;

        let (outcome_tx, mut outcome_rx) = mpsc::channel(self.config.buffer_size.max(1));
        let worker = SyncWorker::new(synchronizer, outcome_tx).spawn();

        ingestion.start_all()?;
        info!(max_frames = ?self.config.max_frames, "Pipeline running");

        let mut stats = PipelineStats {
            active_producers,
            manager: manager.name().to_string(),
            ..Default::default()
        };
        let reason = process_outcomes(
            &mut outcome_rx,
            &mut stats.sync_metrics,
            &mut stats.frames_published,
            self.config.max_frames,
            self.config.timeout,
            manager.as_ref(),
            shutdown,
        )
        .await;
        info!(reason = ?reason, "Shutting down pipeline...");

        ingestion.shutdown().await;
        drop(outcome_rx);
        let synchronizer = worker
            .stop()
            .await
            .map_err(|e| CliError::pipeline_execution(format!("sync worker failed: {e}")))?;

        stats.last_frame_id = synchronizer.frame_id();
        stats.samples_produced = ingestion.metrics().samples_published;
        stats.timelines = blueprint
            .timelines
            .iter()
            .filter_map(|t| timelines.get(&t.name).map(|tl| (t.name.clone(), tl.stats())))
            .collect();
        stats.memory = manager.stats();
        stats.duration = start_time.elapsed();

        // Timelines go first so their buffers unregister from the manager
        drop(synchronizer);
        drop(timelines);
        if let Err(e) = memory::manager::set_current(previous) {
            warn!(error = %e, "Could not restore previous buffer manager");
        }

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            fps = format!("{:.2}", stats.fps()),
            "Pipeline shutdown complete"
        );
        Ok(stats)
    }
}

/// Consume sync outcomes until a stop condition
async fn process_outcomes(
    outcomes: &mut mpsc::Receiver<SyncOutcome>,
    aggregator: &mut SyncMetricsAggregator,
    published: &mut u64,
    max_frames: Option<u64>,
    timeout: Option<Duration>,
    manager: &dyn BufferManager,
    shutdown: impl Future<Output = ()>,
) -> StopReason {
    let deadline = async {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            outcome = outcomes.recv() => {
                let Some(outcome) = outcome else {
                    return StopReason::WorkerExited;
                };
                aggregator.update(&outcome);

                match &outcome {
                    SyncOutcome::Published(report) => {
                        *published += 1;
                        let memory = manager.stats();
                        record_memory_usage(memory.resident_bytes, memory.spilled_bytes);
                        info!(
                            frame_id = report.frame_id,
                            reference = %report.reference,
                            fused = report.fused_slots.len(),
                            missing = report.missing_slots.len(),
                            unmatched = report.unmatched_sources().count(),
                            "Synced frame published"
                        );
                    }
                    SyncOutcome::NothingPresent(report) => {
                        debug!(frame_id = report.frame_id, reference = %report.reference, "No sub-slot present");
                    }
                    SyncOutcome::Skipped(reason) => {
                        debug!(reason = ?reason, "Sync cycle skipped");
                    }
                }

                if max_frames.is_some_and(|max| *published >= max) {
                    info!(frames = *published, "Reached max frames limit");
                    return StopReason::MaxFrames;
                }
            }
            _ = &mut deadline => {
                warn!(timeout_secs = ?timeout.map(|t| t.as_secs_f64()), "Pipeline timed out");
                return StopReason::Timeout;
            }
            _ = &mut shutdown => {
                warn!("Received shutdown signal, stopping pipeline...");
                return StopReason::Signal;
            }
        }
    }
}

/// Buffer manager described by the memory section
fn build_manager(config: &MemoryConfig) -> Result<Arc<dyn BufferManager>> {
    match config.manager {
        ManagerKind::Null => Ok(Arc::new(NullManager)),
        ManagerKind::Spill => {
            let policy = DumpPolicy::from_config(config.dump_policy, config.barrier_bytes);
            let manager = match &config.spill_dir {
                Some(dir) => SpillManager::in_dir(policy, dir)?,
                None => SpillManager::new(policy)?,
            };
            info!("{}", manager.describe());
            Ok(Arc::new(manager))
        }
    }
}

fn build_timelines(
    blueprint: &PipelineBlueprint,
    manager: &Arc<dyn BufferManager>,
) -> Result<HashMap<String, Arc<Timeline>>> {
    blueprint
        .timelines
        .iter()
        .map(|config| {
            let timeline = Timeline::from_config(config, manager.clone())?;
            debug!(
                timeline = %config.name,
                capacity = config.capacity,
                element_size = config.element_size,
                max_elements = config.max_elements,
                overflow = ?config.overflow,
                "Timeline created"
            );
            Ok((config.name.clone(), Arc::new(timeline)))
        })
        .collect()
}

fn lookup(timelines: &HashMap<String, Arc<Timeline>>, name: &str) -> Result<Arc<Timeline>> {
    timelines.get(name).cloned().ok_or_else(|| {
        CliError::pipeline_execution(format!("timeline '{name}' is not defined"))
    })
}
