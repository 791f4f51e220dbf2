//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::PipelineBlueprint;
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    memory: MemoryInfo,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    timelines: Vec<TimelineInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    producers: Vec<ProducerInfo>,
    sync_settings: SyncInfo,
}

#[derive(Serialize)]
struct MemoryInfo {
    manager: String,
    dump_policy: String,
    barrier_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    spill_dir: Option<String>,
}

#[derive(Serialize)]
struct TimelineInfo {
    name: String,
    capacity: usize,
    element_size: usize,
    max_elements: usize,
    /// Payload bytes of one element
    element_bytes: usize,
    overflow: String,
}

#[derive(Serialize)]
struct ProducerInfo {
    timeline: String,
    kind: String,
    frequency_hz: f64,
    start_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    occlusion_period: Option<u64>,
}

#[derive(Serialize)]
struct SyncInfo {
    inputs: Vec<String>,
    output: String,
    fusion: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tolerance_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    framerate_hz: Option<f64>,
    #[serde(skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    delays_ms: std::collections::BTreeMap<String, f64>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

fn build_config_info(blueprint: &PipelineBlueprint, args: &InfoArgs) -> ConfigInfo {
    let memory = &blueprint.memory;

    let (timelines, producers) = if args.timelines {
        let timelines = blueprint
            .timelines
            .iter()
            .map(|t| TimelineInfo {
                name: t.name.clone(),
                capacity: t.capacity,
                element_size: t.element_size,
                max_elements: t.max_elements,
                element_bytes: t.element_size * t.max_elements,
                overflow: format!("{:?}", t.overflow),
            })
            .collect();
        let producers = blueprint
            .producers
            .iter()
            .map(|p| ProducerInfo {
                timeline: p.timeline.clone(),
                kind: format!("{:?}", p.kind),
                frequency_hz: p.frequency_hz,
                start_ms: p.start_ms,
                occlusion_period: p.occlusion_period,
            })
            .collect();
        (timelines, producers)
    } else {
        (Vec::new(), Vec::new())
    };

    let sync = &blueprint.sync;
    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        memory: MemoryInfo {
            manager: format!("{:?}", memory.manager),
            dump_policy: format!("{:?}", memory.dump_policy),
            barrier_bytes: memory.barrier_bytes,
            spill_dir: memory.spill_dir.as_ref().map(|d| d.display().to_string()),
        },
        timelines,
        producers,
        sync_settings: SyncInfo {
            inputs: sync.inputs.clone(),
            output: sync.output.clone(),
            fusion: format!("{:?}", sync.fusion),
            tolerance_ms: sync.tolerance_ms,
            framerate_hz: sync.framerate_hz,
            delays_ms: sync
                .delays_ms
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        },
    }
}

fn print_config_info(blueprint: &PipelineBlueprint, args: &InfoArgs) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                  tlsync Configuration                        ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let memory = &blueprint.memory;
    println!("💾 Memory");
    println!("   ├─ Version: {:?}", blueprint.version);
    println!("   ├─ Manager: {:?}", memory.manager);
    println!("   ├─ Dump policy: {:?}", memory.dump_policy);
    println!("   ├─ Barrier: {} bytes", memory.barrier_bytes);
    match &memory.spill_dir {
        Some(dir) => println!("   └─ Spill dir: {}", dir.display()),
        None => println!("   └─ Spill dir: (temporary)"),
    }

    println!("\n🗂  Timelines ({})", blueprint.timelines.len());
    for (i, timeline) in blueprint.timelines.iter().enumerate() {
        let is_last = i == blueprint.timelines.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };

        println!("   {} {}", prefix, timeline.name);
        if args.timelines {
            println!(
                "   {}  ├─ {} x {} bytes, capacity {}, overflow {:?}",
                child_prefix,
                timeline.max_elements,
                timeline.element_size,
                timeline.capacity,
                timeline.overflow
            );
            match blueprint
                .producers
                .iter()
                .find(|p| p.timeline == timeline.name)
            {
                Some(p) => println!(
                    "   {}  └─ producer: {:?} @ {} Hz",
                    child_prefix, p.kind, p.frequency_hz
                ),
                None => println!("   {}  └─ producer: none", child_prefix),
            }
        }
    }

    let sync = &blueprint.sync;
    println!("\n⚙️  Sync Settings");
    println!("   ├─ Inputs: {:?}", sync.inputs);
    println!("   ├─ Output: {}", sync.output);
    println!("   ├─ Fusion: {:?}", sync.fusion);
    if let Some(tolerance) = sync.tolerance_ms {
        println!("   ├─ Tolerance: {} ms", tolerance);
    }
    for (name, delay) in &sync.delays_ms {
        println!("   ├─ Delay {}: {} ms", name, delay);
    }
    match sync.framerate_hz {
        Some(hz) => println!("   └─ Timer: {} Hz", hz),
        None => println!("   └─ Timer: every push"),
    }

    println!();
}
