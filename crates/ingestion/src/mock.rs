//! Mock 生产者
//!
//! 按配置频率向时间线发布确定性的模拟样本，用于演示与测试。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use contracts::{ContractError, ProducerConfig, Timestamp};
use metrics::counter;
use timeline::Timeline;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::config::ProducerMetrics;
use crate::error::{IngestionError, Result};
use crate::sample;

/// Mock 生产者
///
/// 第 `seq` 帧的时间戳为 `start_ms + seq * 1000 / frequency_hz`（模拟时钟，
/// 与真实时间无关）；配置了 `occlusion_period` 时，每 N 帧省略一个子元素。
pub struct MockProducer {
    config: ProducerConfig,
    timeline: Arc<Timeline>,
    running: Arc<AtomicBool>,
    seq: Arc<AtomicU64>,
    metrics: Arc<ProducerMetrics>,
}

impl MockProducer {
    /// 创建生产者，检查负载类型与时间线布局是否兼容
    pub fn new(config: ProducerConfig, timeline: Arc<Timeline>) -> Result<Self> {
        if !config.frequency_hz.is_finite() || config.frequency_hz <= 0.0 {
            return Err(IngestionError::InvalidConfig {
                timeline: config.timeline.clone(),
                message: format!("frequency must be positive, got {}", config.frequency_hz),
            });
        }
        let descriptor = timeline
            .descriptor()
            .ok_or_else(|| IngestionError::publish(&config.timeline, uninitialized(&timeline)))?;
        if !sample::fits(config.kind, descriptor.element_size) {
            return Err(IngestionError::UnsupportedLayout {
                timeline: config.timeline.clone(),
                kind: config.kind,
                element_size: descriptor.element_size,
            });
        }

        Ok(Self {
            config,
            timeline,
            running: Arc::new(AtomicBool::new(false)),
            seq: Arc::new(AtomicU64::new(0)),
            metrics: Arc::new(ProducerMetrics::new()),
        })
    }

    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<ProducerMetrics> {
        self.metrics.clone()
    }

    /// Simulated timestamp of frame `seq`
    pub fn timestamp_of(&self, seq: u64) -> Timestamp {
        timestamp_of(&self.config, seq)
    }

    /// Publish the next frame synchronously
    pub fn produce_next(&self) -> Result<Timestamp> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        publish(&self.config, &self.timeline, &self.metrics, seq)
    }

    /// 启动后台任务，按 `frequency_hz` 持续发布
    pub fn start(&self) -> Result<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(IngestionError::AlreadyRunning {
                timeline: self.config.timeline.clone(),
            });
        }

        let config = self.config.clone();
        let timeline = self.timeline.clone();
        let running = self.running.clone();
        let seq = self.seq.clone();
        let metrics = self.metrics.clone();

        Ok(tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs_f64(1.0 / config.frequency_hz));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            debug!(
                timeline = %config.timeline,
                kind = ?config.kind,
                frequency_hz = config.frequency_hz,
                "mock producer started"
            );

            while running.load(Ordering::Relaxed) {
                interval.tick().await;
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                let n = seq.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = publish(&config, &timeline, &metrics, n) {
                    warn!(timeline = %config.timeline, error = %e, "mock sample dropped");
                }
            }

            debug!(timeline = %config.timeline, "mock producer stopped");
        }))
    }

    /// 停止后台任务
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// 检查是否正在运行
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

fn timestamp_of(config: &ProducerConfig, seq: u64) -> Timestamp {
    Timestamp::from_millis(config.start_ms + seq as f64 * 1000.0 / config.frequency_hz)
}

fn uninitialized(timeline: &Timeline) -> ContractError {
    ContractError::Uninitialized {
        timeline: timeline.name().to_string(),
    }
}

fn fill_and_push(
    config: &ProducerConfig,
    timeline: &Timeline,
    metrics: &ProducerMetrics,
    seq: u64,
    ts: Timestamp,
) -> std::result::Result<(), ContractError> {
    let mut element = timeline.create_buffer(ts)?;
    let descriptor = element.descriptor();
    let occluded = sample::occluded_slot(seq, config.occlusion_period, descriptor.max_elements);

    for slot in 0..descriptor.max_elements {
        if Some(slot) == occluded {
            metrics.record_occluded();
            continue;
        }
        element.element_mut(slot, |out| sample::fill(config.kind, ts.as_millis(), slot, out))?;
    }
    timeline.push(element)
}

fn publish(
    config: &ProducerConfig,
    timeline: &Timeline,
    metrics: &ProducerMetrics,
    seq: u64,
) -> Result<Timestamp> {
    let ts = timestamp_of(config, seq);
    match fill_and_push(config, timeline, metrics, seq, ts) {
        Ok(()) => {
            metrics.record_published();
            counter!("tlsync_samples_published_total", "timeline" => config.timeline.clone())
                .increment(1);
            trace!(timeline = %config.timeline, seq, ts = %ts, "mock sample published");
            Ok(ts)
        }
        Err(e) => {
            metrics.record_error();
            Err(IngestionError::publish(&config.timeline, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ElementDescriptor, ProducerKind};

    fn producer(kind: ProducerKind, element_size: usize, occlusion: Option<u64>) -> MockProducer {
        let timeline = Timeline::new("markers");
        timeline
            .init_pool_size(16, ElementDescriptor::new(element_size, 3).unwrap())
            .unwrap();
        let config = ProducerConfig {
            timeline: "markers".into(),
            kind,
            frequency_hz: 50.0,
            start_ms: 100.0,
            occlusion_period: occlusion,
        };
        MockProducer::new(config, Arc::new(timeline)).unwrap()
    }

    #[test]
    fn test_simulated_clock() {
        let p = producer(ProducerKind::Markers, 8, None);
        assert_eq!(p.produce_next().unwrap(), Timestamp::from_millis(100.0));
        assert_eq!(p.produce_next().unwrap(), Timestamp::from_millis(120.0));
        assert_eq!(p.timestamp_of(10), Timestamp::from_millis(300.0));

        let newest = p.timeline().get_newest().unwrap().unwrap();
        assert_eq!(newest.timestamp(), Timestamp::from_millis(120.0));
        assert_eq!(newest.present_count(), 3);
        assert_eq!(p.metrics().snapshot().samples_published, 2);
    }

    #[test]
    fn test_occlusion() {
        let p = producer(ProducerKind::Markers, 8, Some(2));
        p.produce_next().unwrap();
        p.produce_next().unwrap();

        let first = p.timeline().get(Timestamp::from_millis(100.0)).unwrap().unwrap();
        let second = p.timeline().get(Timestamp::from_millis(120.0)).unwrap().unwrap();
        assert_eq!(first.mask(), 0b111);
        assert_eq!(second.mask(), 0b110);
        assert_eq!(p.metrics().snapshot().occluded_slots, 1);
    }

    #[test]
    fn test_layout_checked() {
        let timeline = Timeline::new("t");
        timeline
            .init_pool_size(4, ElementDescriptor::new(8, 1).unwrap())
            .unwrap();
        let config = ProducerConfig {
            timeline: "t".into(),
            kind: ProducerKind::Matrices,
            frequency_hz: 10.0,
            start_ms: 0.0,
            occlusion_period: None,
        };
        assert!(matches!(
            MockProducer::new(config.clone(), Arc::new(timeline)),
            Err(IngestionError::UnsupportedLayout { element_size: 8, .. })
        ));

        let uninit = Arc::new(Timeline::new("t"));
        assert!(matches!(
            MockProducer::new(config, uninit),
            Err(IngestionError::PublishFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_background_producer() {
        let p = producer(ProducerKind::Matrices, 64, None);
        let handle = p.start().unwrap();
        assert!(p.is_running());
        assert!(matches!(p.start(), Err(IngestionError::AlreadyRunning { .. })));

        tokio::time::timeout(Duration::from_secs(2), async {
            while p.timeline().len() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        p.stop();
        handle.await.unwrap();
        assert!(!p.is_running());
        assert_eq!(
            p.timeline().timestamps()[..3],
            [
                Timestamp::from_millis(100.0),
                Timestamp::from_millis(120.0),
                Timestamp::from_millis(140.0)
            ]
        );
    }
}
