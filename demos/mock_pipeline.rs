//! Mock Pipeline Demo
//!
//! Three marker producers feed their timelines through a spill manager with a
//! small residency barrier; the synchronizer averages them into `fused`.
//!
//! Run with: cargo run -p demos --bin mock_pipeline [-- pipeline.toml]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use config_loader::ConfigLoader;
use contracts::{
    ConfigVersion, DumpPolicyKind, FusionKind, ManagerKind, MemoryConfig, OverflowPolicy,
    PipelineBlueprint, ProducerConfig, ProducerKind, SyncConfig, SyncOutcome, TimelineConfig,
};
use ingestion::IngestionPipeline;
use memory::{BufferManager, DumpPolicy, SpillManager};
use observability::{LogFormat, ObservabilityConfig, SyncMetricsAggregator};
use sync_engine::{SyncWorker, Synchronizer};
use timeline::Timeline;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_with_config(ObservabilityConfig::from_verbosity(
        0,
        false,
        LogFormat::Pretty,
    ))?;

    tracing::info!("Starting Mock Pipeline Demo");

    // ==== Stage 1: Use default config or load from file ====
    let blueprint = if let Some(path) = std::env::args().nth(1) {
        tracing::info!(path = %path, "Loading blueprint config");
        ConfigLoader::load_from_path(std::path::Path::new(&path))?
    } else {
        create_demo_blueprint()
    };

    // ==== Stage 2: Buffer manager and timelines ====
    let memory_config = &blueprint.memory;
    let spill = Arc::new(SpillManager::new(DumpPolicy::from_config(
        memory_config.dump_policy,
        memory_config.barrier_bytes,
    ))?);
    let manager: Arc<dyn BufferManager> = spill.clone();

    let mut timelines = HashMap::new();
    for config in &blueprint.timelines {
        let timeline = Timeline::from_config(config, manager.clone())?;
        timelines.insert(config.name.clone(), Arc::new(timeline));
    }
    tracing::info!(count = timelines.len(), "Timelines initialized");

    // ==== Stage 3: Producers ====
    let mut ingestion = IngestionPipeline::new();
    for producer in &blueprint.producers {
        let timeline = timelines
            .get(&producer.timeline)
            .context("producer targets an unknown timeline")?;
        ingestion.register(producer.clone(), timeline.clone())?;
    }

    // ==== Stage 4: Synchronizer ====
    let inputs = blueprint
        .sync
        .inputs
        .iter()
        .map(|name| timelines.get(name).cloned().context("unknown input"))
        .collect::<Result<Vec<_>>>()?;
    let output = timelines
        .get(&blueprint.sync.output)
        .cloned()
        .context("unknown output")?;
    let synchronizer = Synchronizer::new(inputs, output, blueprint.to_synchronizer_config())?;

    let (tx, mut rx) = mpsc::channel(100);
    let worker = SyncWorker::new(synchronizer, tx).spawn();

    // ==== Stage 5: Start Pipeline ====
    ingestion.start_all()?;
    let target_frames = 50u64;
    tracing::info!("Running pipeline, target: {} published frames", target_frames);

    let mut aggregator = SyncMetricsAggregator::new();
    let result = tokio::time::timeout(Duration::from_secs(30), async {
        while aggregator.published < target_frames {
            let Some(outcome) = rx.recv().await else {
                break;
            };
            aggregator.update(&outcome);
            if let SyncOutcome::Published(report) = &outcome {
                tracing::info!(
                    frame_id = report.frame_id,
                    reference = %report.reference,
                    fused = report.fused_slots.len(),
                    missing = report.missing_slots.len(),
                    "Synced frame published"
                );
            }
        }
    })
    .await;

    // ==== Stage 6: Cleanup ====
    tracing::info!("Shutting down...");
    ingestion.shutdown().await;
    drop(rx);
    let synchronizer = worker.stop().await?;

    if result.is_err() {
        tracing::warn!("Pipeline timed out");
    }
    tracing::info!(
        frames = synchronizer.frame_id(),
        output_len = synchronizer.output().len(),
        "Pipeline completed"
    );
    println!("{}", aggregator.summary());
    println!("{}", spill.describe());

    Ok(())
}

fn create_demo_blueprint() -> PipelineBlueprint {
    let timeline = |name: &str| TimelineConfig {
        name: name.to_string(),
        capacity: 32,
        element_size: 12,
        max_elements: 4,
        overflow: OverflowPolicy::Grow,
    };
    let producer = |name: &str, frequency_hz: f64, occlusion_period: Option<u64>| ProducerConfig {
        timeline: name.to_string(),
        kind: ProducerKind::Markers,
        frequency_hz,
        start_ms: 0.0,
        occlusion_period,
    };

    PipelineBlueprint {
        version: ConfigVersion::V1,
        memory: MemoryConfig {
            manager: ManagerKind::Spill,
            dump_policy: DumpPolicyKind::Barrier,
            barrier_bytes: 4 * 1024,
            spill_dir: None,
        },
        timelines: vec![
            timeline("left_camera"),
            timeline("right_camera"),
            timeline("mocap"),
            timeline("fused"),
        ],
        producers: vec![
            producer("left_camera", 30.0, None),
            producer("right_camera", 30.0, Some(7)),
            producer("mocap", 120.0, Some(3)),
        ],
        sync: SyncConfig {
            inputs: vec![
                "left_camera".to_string(),
                "right_camera".to_string(),
                "mocap".to_string(),
            ],
            output: "fused".to_string(),
            fusion: FusionKind::MeanF32,
            tolerance_ms: Some(20.0),
            framerate_hz: Some(30.0),
            delays_ms: HashMap::from([("mocap".to_string(), 4.0)]),
        },
    }
}
