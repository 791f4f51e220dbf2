//! 同步指标收集模块
//!
//! 基于 SyncOutcome 收集和统计同步器的运行指标。

use std::collections::{BTreeMap, HashMap};

use contracts::{SkipReason, SyncOutcome};
use metrics::{counter, gauge, histogram};

/// 从 SyncOutcome 记录指标
///
/// 每个同步周期结束时调用。
///
/// # Example
///
/// ```ignore
/// use observability::metrics::record_sync_outcome;
///
/// let outcome = synchronizer.synchronize()?;
/// record_sync_outcome(&outcome);
/// ```
pub fn record_sync_outcome(outcome: &SyncOutcome) {
    counter!("tlsync_sync_cycles_total", "outcome" => outcome.label()).increment(1);

    let Some(report) = outcome.report() else {
        return;
    };

    // 周期序号 (用于检测跳帧)
    gauge!("tlsync_last_frame_id").set(report.frame_id as f64);
    gauge!("tlsync_last_reference_ms").set(report.reference.as_millis());

    histogram!("tlsync_fused_slots").record(report.fused_slots.len() as f64);
    if !report.all_slots_found() {
        counter!("tlsync_cycles_with_missing_slots_total").increment(1);
    }

    for source in &report.sources {
        match source.alignment_error_ms() {
            Some(error_ms) => {
                histogram!(
                    "tlsync_alignment_error_ms",
                    "timeline" => source.timeline.to_string()
                )
                .record(error_ms);
            }
            None => {
                counter!(
                    "tlsync_source_unmatched_total",
                    "timeline" => source.timeline.to_string()
                )
                .increment(1);
            }
        }
    }
}

/// 记录单次同步耗时
pub fn record_sync_latency_ms(latency_ms: f64) {
    histogram!("tlsync_sync_latency_ms").record(latency_ms);
}

/// 记录缓冲区管理器的内存占用
pub fn record_memory_usage(resident_bytes: usize, spilled_bytes: usize) {
    gauge!("tlsync_resident_bytes").set(resident_bytes as f64);
    gauge!("tlsync_spilled_bytes").set(spilled_bytes as f64);
}

/// 同步指标聚合器
///
/// 在内存中聚合指标，便于统计和输出摘要。
#[derive(Debug, Clone, Default)]
pub struct SyncMetricsAggregator {
    /// 总周期数 (含跳过)
    pub total_cycles: u64,

    /// 发布了融合结果的周期
    pub published: u64,

    /// 参考时间推进但没有任何子元素的周期
    pub nothing_present: u64,

    /// 因输入为空跳过
    pub skipped_insufficient: u64,

    /// 因参考时间未推进跳过
    pub skipped_not_advanced: u64,

    /// 存在缺失子元素的周期
    pub cycles_with_missing: u64,

    /// 每周期融合子元素数量统计
    pub fused_stats: RunningStats,

    /// 各时间线对齐误差统计 (毫秒)
    pub alignment_stats: HashMap<String, RunningStats>,

    /// 各时间线未匹配次数
    pub unmatched_counts: HashMap<String, u64>,
}

impl SyncMetricsAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新聚合统计
    pub fn update(&mut self, outcome: &SyncOutcome) {
        self.total_cycles += 1;

        match outcome {
            SyncOutcome::Published(_) => self.published += 1,
            SyncOutcome::NothingPresent(_) => self.nothing_present += 1,
            SyncOutcome::Skipped(SkipReason::InsufficientData { .. }) => {
                self.skipped_insufficient += 1
            }
            SyncOutcome::Skipped(SkipReason::NotAdvanced { .. }) => self.skipped_not_advanced += 1,
        }

        let Some(report) = outcome.report() else {
            return;
        };

        if !report.all_slots_found() {
            self.cycles_with_missing += 1;
        }
        self.fused_stats.push(report.fused_slots.len() as f64);

        for source in &report.sources {
            let name = source.timeline.to_string();
            match source.alignment_error_ms() {
                Some(error_ms) => self.alignment_stats.entry(name).or_default().push(error_ms),
                None => *self.unmatched_counts.entry(name).or_insert(0) += 1,
            }
        }
    }

    /// 处理过的周期 (未跳过)
    pub fn processed(&self) -> u64 {
        self.published + self.nothing_present
    }

    /// 生成摘要报告
    pub fn summary(&self) -> MetricsSummary {
        let processed = self.processed();
        MetricsSummary {
            total_cycles: self.total_cycles,
            published: self.published,
            nothing_present: self.nothing_present,
            skipped: self.skipped_insufficient + self.skipped_not_advanced,
            publish_rate: if self.total_cycles > 0 {
                self.published as f64 / self.total_cycles as f64 * 100.0
            } else {
                0.0
            },
            missing_rate: if processed > 0 {
                self.cycles_with_missing as f64 / processed as f64 * 100.0
            } else {
                0.0
            },
            fused_slots: StatsSummary::from(&self.fused_stats),
            alignment_error_ms: self
                .alignment_stats
                .iter()
                .map(|(name, stats)| (name.clone(), StatsSummary::from(stats)))
                .collect(),
            unmatched_counts: self
                .unmatched_counts
                .iter()
                .map(|(name, count)| (name.clone(), *count))
                .collect(),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_cycles: u64,
    pub published: u64,
    pub nothing_present: u64,
    pub skipped: u64,
    pub publish_rate: f64,
    pub missing_rate: f64,
    pub fused_slots: StatsSummary,
    pub alignment_error_ms: BTreeMap<String, StatsSummary>,
    pub unmatched_counts: BTreeMap<String, u64>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Sync Metrics Summary ===")?;
        writeln!(f, "Total cycles: {}", self.total_cycles)?;
        writeln!(
            f,
            "Published: {} ({:.2}%)",
            self.published, self.publish_rate
        )?;
        writeln!(f, "Nothing present: {}", self.nothing_present)?;
        writeln!(f, "Skipped: {}", self.skipped)?;
        writeln!(f, "Cycles with missing slots: {:.2}%", self.missing_rate)?;
        writeln!(f, "Fused slots: {}", self.fused_slots)?;

        if !self.alignment_error_ms.is_empty() {
            writeln!(f, "Alignment error (ms):")?;
            for (timeline, stats) in &self.alignment_error_ms {
                writeln!(f, "  {}: {}", timeline, stats)?;
            }
        }

        if !self.unmatched_counts.is_empty() {
            writeln!(f, "Unmatched lookups:")?;
            for (timeline, count) in &self.unmatched_counts {
                writeln!(f, "  {}: {}", timeline, count)?;
            }
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
