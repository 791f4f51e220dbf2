//! Pipeline statistics and metrics.

use std::time::Duration;

use contracts::TimelineStats;
use memory::ManagerStats;
use observability::SyncMetricsAggregator;

/// Statistics from a pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Frames published into the output timeline
    pub frames_published: u64,

    /// Samples pushed by the mock producers
    pub samples_produced: u64,

    /// Total duration of the pipeline run
    pub duration: Duration,

    /// Number of producers that were active
    pub active_producers: usize,

    /// Last frame id handed out by the synchronizer
    pub last_frame_id: u64,

    /// Pool counters per timeline, in configuration order
    pub timelines: Vec<(String, TimelineStats)>,

    /// Buffer manager in use
    pub manager: String,

    /// Memory accounting at shutdown
    pub memory: ManagerStats,

    /// Synchronizer metrics aggregator
    pub sync_metrics: SyncMetricsAggregator,
}

impl PipelineStats {
    /// Published frames per second
    pub fn fps(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.frames_published as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                    Pipeline Statistics                       ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Frames published: {}", self.frames_published);
        println!("   ├─ Samples produced: {}", self.samples_produced);
        println!("   ├─ FPS: {:.2}", self.fps());
        println!("   ├─ Last frame id: {}", self.last_frame_id);
        println!("   └─ Active producers: {}", self.active_producers);

        if !self.timelines.is_empty() {
            println!("\n🗂  Timelines");
            for (i, (name, stats)) in self.timelines.iter().enumerate() {
                let prefix = if i == self.timelines.len() - 1 {
                    "└─"
                } else {
                    "├─"
                };
                println!(
                    "   {} {}: len={}/{} pushed={} evicted={} rejected={} recycled={} peak={}",
                    prefix,
                    name,
                    stats.len,
                    stats.capacity,
                    stats.pushed,
                    stats.evicted,
                    stats.rejected,
                    stats.recycled,
                    stats.overflow_peak
                );
            }
        }

        println!("\n💾 Memory ({})", self.manager);
        println!("   └─ {}", self.memory);

        println!("\n{}", self.sync_metrics.summary());
    }
}
