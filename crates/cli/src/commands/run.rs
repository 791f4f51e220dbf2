//! `run` command implementation.

use anyhow::{Context, Result};
use config_loader::{ConfigLoader, ConfigOverrides};
use contracts::PipelineBlueprint;
use std::time::Duration;
use tracing::info;

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let overrides = overrides(args);
    let blueprint = ConfigLoader::load_with_overrides(&args.config, &overrides)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    info!(
        timelines = blueprint.timelines.len(),
        producers = blueprint.producers.len(),
        inputs = blueprint.sync.inputs.len(),
        manager = ?blueprint.memory.manager,
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    let pipeline_config = PipelineConfig {
        blueprint,
        max_frames: (args.max_frames > 0).then_some(args.max_frames),
        timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
        buffer_size: args.buffer_size,
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
    };

    info!("Starting pipeline...");
    let stats = Pipeline::new(pipeline_config)
        .run(shutdown_signal())
        .await
        .context("Pipeline execution failed")?;

    info!(
        frames_published = stats.frames_published,
        duration_secs = stats.duration.as_secs_f64(),
        fps = format!("{:.2}", stats.fps()),
        "Pipeline completed"
    );
    stats.print_summary();

    info!("tlsync finished");
    Ok(())
}

/// File settings replaced from the command line
fn overrides(args: &RunArgs) -> ConfigOverrides {
    let overrides = ConfigOverrides {
        framerate_hz: args.framerate,
        spill_dir: args.spill_dir.clone(),
    };
    if !overrides.is_empty() {
        info!(?overrides, "Applying CLI overrides");
    }
    overrides
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &PipelineBlueprint) {
    println!("\n=== Configuration Summary ===\n");
    println!("Memory:");
    println!("  Manager: {:?}", blueprint.memory.manager);
    println!("  Dump policy: {:?}", blueprint.memory.dump_policy);

    println!("\nTimelines ({}):", blueprint.timelines.len());
    for timeline in &blueprint.timelines {
        println!(
            "  - {} (capacity {}, {} x {} bytes, {:?})",
            timeline.name,
            timeline.capacity,
            timeline.max_elements,
            timeline.element_size,
            timeline.overflow
        );
    }

    if !blueprint.producers.is_empty() {
        println!("\nProducers ({}):", blueprint.producers.len());
        for producer in &blueprint.producers {
            println!(
                "  - {} ({:?}, {} Hz)",
                producer.timeline, producer.kind, producer.frequency_hz
            );
        }
    }

    let sync = &blueprint.sync;
    println!("\nSync Settings:");
    println!("  Inputs: {:?}", sync.inputs);
    println!("  Output: {}", sync.output);
    println!("  Fusion: {:?}", sync.fusion);
    match sync.framerate_hz {
        Some(hz) => println!("  Timer: {} Hz", hz),
        None => println!("  Timer: every push"),
    }

    println!();
}
