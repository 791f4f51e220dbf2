//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 跨 crate 的 e2e 测试：配置 → 时间线 → 生产者 → 同步器
//! - 转储管理器与时间线的协同

#[cfg(test)]
mod contract_tests {
    use contracts::{SkipReason, SyncOutcome, Timestamp};

    #[test]
    fn test_contracts_compile() {
        let _ = contracts::ConfigVersion::V1;
    }

    #[test]
    fn test_outcome_json_shape() {
        let outcome = SyncOutcome::Skipped(SkipReason::NotAdvanced {
            reference: Timestamp::from_millis(50.0),
            last: Timestamp::from_millis(50.0),
        });
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["skipped"]["not_advanced"]["reference"], 50.0);

        let empty = SyncOutcome::Skipped(SkipReason::InsufficientData {
            empty: vec!["camera".into()],
        });
        let json = serde_json::to_value(&empty).unwrap();
        assert_eq!(json["skipped"]["insufficient_data"]["empty"][0], "camera");
        assert_eq!(empty.label(), "insufficient_data");
    }

    #[test]
    fn test_sample_config_is_valid() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/pipeline.toml");
        let blueprint = config_loader::ConfigLoader::load_from_path(&path).unwrap();
        assert_eq!(blueprint.sync.output, "fused");
        assert_eq!(blueprint.producers.len(), 2);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{PipelineBlueprint, SyncOutcome, Timestamp};
    use ingestion::{IngestionPipeline, MockProducer};
    use memory::{BufferManager, DumpPolicy, NullManager, SpillManager};
    use observability::SyncMetricsAggregator;
    use sync_engine::{SyncWorker, Synchronizer};
    use timeline::Timeline;
    use tokio::sync::mpsc;

    const MATRIX_PIPELINE: &str = r#"
[[timelines]]
name = "camera"
capacity = 16
element_size = 64
max_elements = 3

[[timelines]]
name = "tracker"
capacity = 16
element_size = 64
max_elements = 3

[[timelines]]
name = "fused"
capacity = 16
element_size = 64
max_elements = 3

[[producers]]
timeline = "camera"
kind = "matrices"
frequency_hz = 50.0

[[producers]]
timeline = "tracker"
kind = "matrices"
frequency_hz = 50.0
occlusion_period = 2

[sync]
inputs = ["camera", "tracker"]
output = "fused"
fusion = "rigid_transform"
"#;

    fn build(
        blueprint: &PipelineBlueprint,
        manager: &Arc<dyn BufferManager>,
    ) -> HashMap<String, Arc<Timeline>> {
        blueprint
            .timelines
            .iter()
            .map(|config| {
                let timeline = Timeline::from_config(config, manager.clone()).unwrap();
                (config.name.clone(), Arc::new(timeline))
            })
            .collect()
    }

    fn synchronizer(
        blueprint: &PipelineBlueprint,
        timelines: &HashMap<String, Arc<Timeline>>,
    ) -> Synchronizer {
        let inputs = blueprint
            .sync
            .inputs
            .iter()
            .map(|name| timelines[name].clone())
            .collect();
        Synchronizer::new(
            inputs,
            timelines[&blueprint.sync.output].clone(),
            blueprint.to_synchronizer_config(),
        )
        .unwrap()
    }

    fn floats(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect()
    }

    /// Config -> producers -> synchronizer, stepped by hand on the simulated clock
    #[test]
    fn test_e2e_deterministic_matrices() {
        let blueprint = ConfigLoader::load_from_str(MATRIX_PIPELINE, ConfigFormat::Toml).unwrap();
        let manager: Arc<dyn BufferManager> = Arc::new(NullManager);
        let timelines = build(&blueprint, &manager);

        let camera = MockProducer::new(blueprint.producers[0].clone(), timelines["camera"].clone())
            .unwrap();
        let tracker =
            MockProducer::new(blueprint.producers[1].clone(), timelines["tracker"].clone())
                .unwrap();
        let mut sync = synchronizer(&blueprint, &timelines);
        let mut aggregator = SyncMetricsAggregator::new();

        for _ in 0..4 {
            camera.produce_next().unwrap();
            tracker.produce_next().unwrap();
            let outcome = sync.synchronize().unwrap();
            aggregator.update(&outcome);
            assert!(outcome.is_published());
        }

        let fused = &timelines["fused"];
        assert_eq!(
            fused.timestamps(),
            vec![
                Timestamp::from_millis(0.0),
                Timestamp::from_millis(20.0),
                Timestamp::from_millis(40.0),
                Timestamp::from_millis(60.0)
            ]
        );

        // tracker drops a slot every second frame; camera still covers it
        let frame = fused.get(Timestamp::from_millis(20.0)).unwrap().unwrap();
        assert_eq!(frame.mask(), 0b111);
        let tracker_frame = timelines["tracker"]
            .get(Timestamp::from_millis(20.0))
            .unwrap()
            .unwrap();
        assert_eq!(tracker_frame.mask(), 0b110);

        // both inputs carry the same transform, so the average is that transform
        let expected = timelines["camera"]
            .get(Timestamp::from_millis(40.0))
            .unwrap()
            .unwrap()
            .element(1)
            .unwrap()
            .unwrap();
        let actual = fused
            .get(Timestamp::from_millis(40.0))
            .unwrap()
            .unwrap()
            .element(1)
            .unwrap()
            .unwrap();
        for (a, e) in floats(&actual).iter().zip(floats(&expected)) {
            assert!((a - e).abs() < 1e-5, "{a} != {e}");
        }

        let summary = aggregator.summary();
        assert_eq!(summary.total_cycles, 4);
        assert_eq!(summary.published, 4);
        assert_eq!(sync.frame_id(), 4);
    }

    /// Buffers spill to disk once unlocked and come back intact on the next read
    #[test]
    fn test_e2e_spill_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let spill = Arc::new(SpillManager::in_dir(DumpPolicy::Always, dir.path()).unwrap());
        let manager: Arc<dyn BufferManager> = spill.clone();

        let blueprint = ConfigLoader::load_from_str(MATRIX_PIPELINE, ConfigFormat::Toml).unwrap();
        let timelines = build(&blueprint, &manager);
        let camera = MockProducer::new(blueprint.producers[0].clone(), timelines["camera"].clone())
            .unwrap();
        let tracker =
            MockProducer::new(blueprint.producers[1].clone(), timelines["tracker"].clone())
                .unwrap();
        let mut sync = synchronizer(&blueprint, &timelines);

        camera.produce_next().unwrap();
        tracker.produce_next().unwrap();
        assert!(sync.synchronize().unwrap().is_published());

        let stats = manager.stats();
        assert!(stats.spill_count > 0, "nothing spilled: {stats}");
        assert!(stats.spilled_bytes > 0);

        // a read restores the payload
        let element = timelines["camera"].get_newest().unwrap().unwrap();
        let bytes = element.element(0).unwrap().unwrap();
        assert_eq!(floats(&bytes)[15], 1.0);
        assert!(manager.stats().restore_count > 0);

        drop(sync);
        drop(element);
        drop(camera);
        drop(tracker);
        drop(timelines);
        assert_eq!(spill.stats().buffers, 0);
    }

    /// Background producers and worker, stopped once enough frames were published
    #[tokio::test]
    async fn test_e2e_async_pipeline() {
        let toml = MATRIX_PIPELINE
            .replace("frequency_hz = 50.0", "frequency_hz = 200.0")
            .replace("[sync]\n", "[sync]\nframerate_hz = 100.0\n");
        let blueprint = ConfigLoader::load_from_str(&toml, ConfigFormat::Toml).unwrap();
        assert_eq!(blueprint.sync.framerate_hz, Some(100.0));

        let manager: Arc<dyn BufferManager> = Arc::new(NullManager);
        let timelines = build(&blueprint, &manager);

        let mut ingestion = IngestionPipeline::new();
        for producer in &blueprint.producers {
            ingestion
                .register(producer.clone(), timelines[&producer.timeline].clone())
                .unwrap();
        }

        let (tx, mut rx) = mpsc::channel(64);
        let worker = SyncWorker::new(synchronizer(&blueprint, &timelines), tx).spawn();
        ingestion.start_all().unwrap();

        let mut aggregator = SyncMetricsAggregator::new();
        let target = 5u64;
        let result = tokio::time::timeout(Duration::from_secs(5), async {
            while aggregator.published < target {
                let Some(outcome) = rx.recv().await else {
                    break;
                };
                aggregator.update(&outcome);
            }
        })
        .await;

        ingestion.shutdown().await;
        drop(rx);
        let sync = worker.stop().await.unwrap();

        assert!(result.is_ok(), "Pipeline timed out");
        assert!(aggregator.published >= target);
        assert!(sync.output().len() as u64 >= target.min(16));

        // published references strictly increase
        let stamps = sync.output().timestamps();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
        assert!(ingestion.metrics().occluded_slots > 0);
    }

    /// Reference only advances with the slowest input
    #[test]
    fn test_e2e_slowest_input_paces_output() {
        let toml = MATRIX_PIPELINE.replacen("frequency_hz = 50.0", "frequency_hz = 100.0", 1);
        let blueprint = ConfigLoader::load_from_str(&toml, ConfigFormat::Toml).unwrap();
        let manager: Arc<dyn BufferManager> = Arc::new(NullManager);
        let timelines = build(&blueprint, &manager);

        // camera at 100 Hz, tracker at 50 Hz
        let camera = MockProducer::new(blueprint.producers[0].clone(), timelines["camera"].clone())
            .unwrap();
        let tracker =
            MockProducer::new(blueprint.producers[1].clone(), timelines["tracker"].clone())
                .unwrap();
        let mut sync = synchronizer(&blueprint, &timelines);

        for _ in 0..4 {
            camera.produce_next().unwrap();
        }
        tracker.produce_next().unwrap();
        tracker.produce_next().unwrap();

        let outcome = sync.synchronize().unwrap();
        let SyncOutcome::Published(report) = outcome else {
            panic!("expected a published frame, got {outcome:?}");
        };
        // camera newest 30, tracker newest 20
        assert_eq!(report.reference, Timestamp::from_millis(20.0));
        assert_eq!(report.sources[0].matched, Some(Timestamp::from_millis(20.0)));
        assert_eq!(report.sources[1].matched, Some(Timestamp::from_millis(20.0)));

        assert!(sync.synchronize().unwrap().is_skipped());
    }
}
