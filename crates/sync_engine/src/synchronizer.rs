//! Multi-producer synchronizer.

use std::sync::Arc;
use std::time::Instant;

use contracts::{
    ContractError, ElementDescriptor, SkipReason, SourceMatch, SyncOutcome, SyncReport,
    SynchronizerConfig, TimelineId, Timestamp,
};
use timeline::{ElementLock, Timeline, TimelineElement};
use tracing::{debug, instrument, trace, warn};

use crate::fusion::{fusion_for, Fusion};

/// Picks a common instant across several input timelines and publishes the
/// fused sub-slots into an output timeline.
///
/// Every cycle:
/// 1. newest timestamp of each input; any empty input skips the cycle
/// 2. `reference = min(newest)`
/// 3. skip unless `reference` moved past the last processed one
/// 4. closest element per input around `reference - delay`
/// 5. fuse every sub-slot with at least one present producer and publish
///    the result at `reference`
/// 6. remember `reference`
#[derive(Debug)]
pub struct Synchronizer {
    inputs: Vec<Arc<Timeline>>,
    output: Arc<Timeline>,
    descriptor: ElementDescriptor,
    delays_ms: Vec<f64>,
    tolerance_ms: Option<f64>,
    fusion: Box<dyn Fusion>,
    config: SynchronizerConfig,
    last_reference: Option<Timestamp>,
    frame_id: u64,
}

impl Synchronizer {
    /// Validate the timeline set and build a synchronizer.
    ///
    /// Inputs must be initialized with the same capacity and element layout;
    /// the output must share the element size and hold at least as many
    /// sub-elements.
    pub fn new(
        inputs: Vec<Arc<Timeline>>,
        output: Arc<Timeline>,
        config: SynchronizerConfig,
    ) -> Result<Self, ContractError> {
        let Some(first) = inputs.first() else {
            return Err(ContractError::config_validation(
                "sync.inputs",
                "at least one input timeline is required",
            ));
        };

        let (capacity, descriptor) = pool_layout(first)?;
        for input in &inputs[1..] {
            let (other_capacity, other_descriptor) = pool_layout(input)?;
            if other_capacity != capacity || other_descriptor != descriptor {
                return Err(ContractError::timeline_mismatch(
                    input.name().as_str(),
                    format!(
                        "capacity {} / layout {}x{} differs from '{}' ({} / {}x{})",
                        other_capacity,
                        other_descriptor.max_elements,
                        other_descriptor.element_size,
                        first.name(),
                        capacity,
                        descriptor.max_elements,
                        descriptor.element_size
                    ),
                ));
            }
        }

        if inputs
            .iter()
            .any(|input| Arc::ptr_eq(input, &output) || input.name() == output.name())
        {
            return Err(ContractError::config_validation(
                "sync.output",
                format!("output '{}' is also an input", output.name()),
            ));
        }
        let (_, output_descriptor) = pool_layout(&output)?;
        if output_descriptor.element_size != descriptor.element_size
            || output_descriptor.max_elements < descriptor.max_elements
        {
            return Err(ContractError::timeline_mismatch(
                output.name().as_str(),
                format!(
                    "output layout {}x{} cannot hold inputs of {}x{}",
                    output_descriptor.max_elements,
                    output_descriptor.element_size,
                    descriptor.max_elements,
                    descriptor.element_size
                ),
            ));
        }

        if let Some(tolerance) = config.tolerance_ms {
            if !tolerance.is_finite() || tolerance < 0.0 {
                return Err(ContractError::config_validation(
                    "sync.tolerance_ms",
                    format!("must be a non-negative number, got {tolerance}"),
                ));
            }
        }
        if let Some(framerate) = config.framerate_hz {
            if !framerate.is_finite() || framerate <= 0.0 {
                return Err(ContractError::config_validation(
                    "sync.framerate_hz",
                    format!("must be positive, got {framerate}"),
                ));
            }
        }

        for name in config.delays_ms.keys() {
            if !inputs.iter().any(|input| input.name() == name) {
                warn!(timeline = %name, "delay configured for a timeline that is not an input");
            }
        }
        let delays_ms = inputs
            .iter()
            .map(|input| checked_delay(input.name(), config.delay_for(input.name())))
            .collect::<Result<Vec<_>, _>>()?;

        let fusion = fusion_for(config.fusion, descriptor.element_size)?;

        debug!(
            inputs = inputs.len(),
            output = %output.name(),
            fusion = fusion.name(),
            element_size = descriptor.element_size,
            max_elements = descriptor.max_elements,
            "synchronizer configured"
        );

        Ok(Self {
            inputs,
            output,
            descriptor,
            delays_ms,
            tolerance_ms: config.tolerance_ms,
            fusion,
            config,
            last_reference: None,
            frame_id: 0,
        })
    }

    pub fn inputs(&self) -> &[Arc<Timeline>] {
        &self.inputs
    }

    pub fn output(&self) -> &Arc<Timeline> {
        &self.output
    }

    pub fn config(&self) -> &SynchronizerConfig {
        &self.config
    }

    /// Reference of the last processed cycle
    pub fn last_reference(&self) -> Option<Timestamp> {
        self.last_reference
    }

    /// Number of processed cycles so far
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// Change the lookup delay of one input; applies from the next cycle.
    ///
    /// Negative delays are clamped to 0 like at construction.
    pub fn set_delay(&mut self, timeline: &TimelineId, delay_ms: f64) -> Result<(), ContractError> {
        let Some(index) = self.inputs.iter().position(|input| input.name() == timeline) else {
            return Err(ContractError::config_validation(
                "sync.delays_ms",
                format!("'{timeline}' is not an input of this synchronizer"),
            ));
        };
        let delay = checked_delay(timeline, delay_ms)?;
        self.delays_ms[index] = delay;
        self.config.delays_ms.insert(timeline.clone(), delay);
        debug!(timeline = %timeline, delay, "input delay changed");
        Ok(())
    }

    /// Current lookup delay of an input, `None` if it is not an input
    pub fn delay(&self, timeline: &TimelineId) -> Option<f64> {
        self.inputs
            .iter()
            .position(|input| input.name() == timeline)
            .map(|index| self.delays_ms[index])
    }

    /// Forget the last processed reference, e.g. after an input was cleared
    pub fn reset(&mut self) {
        debug!(last = ?self.last_reference, "synchronizer reset");
        self.last_reference = None;
    }

    /// Run one synchronization cycle and record its metrics.
    #[instrument(
        name = "synchronizer_cycle",
        level = "trace",
        skip(self),
        fields(output = %self.output.name(), frame_id = self.frame_id)
    )]
    pub fn synchronize(&mut self) -> Result<SyncOutcome, ContractError> {
        let started = Instant::now();
        let outcome = self.run_cycle()?;
        observability::record_sync_latency_ms(started.elapsed().as_secs_f64() * 1000.0);
        observability::record_sync_outcome(&outcome);
        Ok(outcome)
    }

    fn run_cycle(&mut self) -> Result<SyncOutcome, ContractError> {
        // 1. newest per input
        let mut newest = Vec::with_capacity(self.inputs.len());
        let mut empty = Vec::new();
        for input in &self.inputs {
            if input.descriptor() != Some(self.descriptor) {
                return Err(ContractError::timeline_mismatch(
                    input.name().as_str(),
                    "element layout changed after the synchronizer was built",
                ));
            }
            match input.get_newest_timestamp()? {
                Some(ts) => newest.push(ts),
                None => empty.push(input.name().clone()),
            }
        }
        if !empty.is_empty() {
            trace!(empty = ?empty, "inputs without data");
            return Ok(SyncOutcome::Skipped(SkipReason::InsufficientData { empty }));
        }

        // 2. reference
        let Some(reference) = newest.into_iter().min() else {
            return Ok(SyncOutcome::Skipped(SkipReason::InsufficientData { empty }));
        };

        // 3. must advance
        if let Some(last) = self.last_reference {
            if reference <= last {
                return Ok(SyncOutcome::Skipped(SkipReason::NotAdvanced { reference, last }));
            }
        }

        // 4. lookup
        let mut sources = Vec::with_capacity(self.inputs.len());
        let mut locks: Vec<Option<ElementLock>> = Vec::with_capacity(self.inputs.len());
        for (input, delay) in self.inputs.iter().zip(&self.delays_ms) {
            let requested = reference.offset(-delay);
            let candidate = input.get_closest(requested)?;
            let element = candidate.filter(|element| match self.tolerance_ms {
                Some(tolerance) if element.timestamp().distance(requested) > tolerance => {
                    trace!(
                        timeline = %input.name(),
                        requested = %requested,
                        found = %element.timestamp(),
                        tolerance,
                        "closest element outside tolerance"
                    );
                    false
                }
                _ => true,
            });
            let lock = element.map(|element| element.lock()).transpose()?;

            sources.push(SourceMatch {
                timeline: input.name().clone(),
                requested,
                matched: lock.as_ref().map(ElementLock::timestamp),
                present_mask: lock.as_ref().map(ElementLock::mask).unwrap_or(0),
            });
            locks.push(lock);
        }

        // 5. fuse
        let (fused_slots, missing_slots, element) = self.fuse(reference, &locks)?;
        drop(locks);

        self.frame_id += 1;
        let report = SyncReport {
            frame_id: self.frame_id,
            reference,
            sources,
            fused_slots,
            missing_slots,
        };

        let outcome = match element {
            Some(element) => {
                // a reference seen again after reset() replaces the earlier result
                if self.output.get(reference)?.is_some() {
                    self.output.pop(reference)?;
                }
                self.output.push(element)?;
                trace!(
                    reference = %reference,
                    fused = report.fused_slots.len(),
                    missing = report.missing_slots.len(),
                    "fused element published"
                );
                SyncOutcome::Published(report)
            }
            None => {
                debug!(reference = %reference, "no sub-slot present in any input");
                SyncOutcome::NothingPresent(report)
            }
        };

        // 6. remember
        self.last_reference = Some(reference);
        Ok(outcome)
    }

    /// Fuse each sub-slot present in at least one locked source.
    ///
    /// The output element is only drawn once the first slot is known to be present.
    fn fuse(
        &self,
        reference: Timestamp,
        locks: &[Option<ElementLock>],
    ) -> Result<(Vec<usize>, Vec<usize>, Option<TimelineElement>), ContractError> {
        let mut fused = Vec::new();
        let mut missing = Vec::new();
        let mut output: Option<TimelineElement> = None;

        for slot in 0..self.descriptor.max_elements {
            let mut views = Vec::with_capacity(locks.len());
            for lock in locks.iter().flatten() {
                if let Some(view) = lock.slot(slot)? {
                    views.push(view);
                }
            }
            if views.is_empty() {
                missing.push(slot);
                continue;
            }

            let element = match output.take() {
                Some(element) => element,
                None => self.output.create_buffer(reference)?,
            };
            let element = output.insert(element);
            let bytes: Vec<&[u8]> = views.iter().map(|view| &**view).collect();
            element.element_mut(slot, |out| self.fusion.fuse(&bytes, out))?;
            fused.push(slot);
        }

        Ok((fused, missing, output))
    }
}

fn pool_layout(timeline: &Timeline) -> Result<(usize, ElementDescriptor), ContractError> {
    match (timeline.capacity(), timeline.descriptor()) {
        (Some(capacity), Some(descriptor)) => Ok((capacity, descriptor)),
        _ => Err(ContractError::Uninitialized {
            timeline: timeline.name().to_string(),
        }),
    }
}

fn checked_delay(timeline: &TimelineId, delay: f64) -> Result<f64, ContractError> {
    if !delay.is_finite() {
        return Err(ContractError::config_validation(
            "sync.delays_ms",
            format!("delay for '{timeline}' is not a number"),
        ));
    }
    if delay < 0.0 {
        warn!(timeline = %timeline, delay, "negative delay clamped to 0");
    }
    Ok(delay.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{FusionKind, TimelineId};

    fn timeline(name: &str, capacity: usize, element_size: usize, max: usize) -> Arc<Timeline> {
        let timeline = Timeline::new(name);
        timeline
            .init_pool_size(capacity, ElementDescriptor::new(element_size, max).unwrap())
            .unwrap();
        Arc::new(timeline)
    }

    fn push(timeline: &Timeline, ms: f64, slots: &[(usize, u8)]) {
        let mut element = timeline.create_buffer(Timestamp::from_millis(ms)).unwrap();
        for (slot, value) in slots {
            let size = element.descriptor().element_size;
            element.set_element(*slot, &vec![*value; size]).unwrap();
        }
        timeline.push(element).unwrap();
    }

    fn setup(config: SynchronizerConfig) -> (Arc<Timeline>, Arc<Timeline>, Synchronizer) {
        let a = timeline("a", 4, 2, 2);
        let b = timeline("b", 4, 2, 2);
        let out = timeline("out", 4, 2, 2);
        let sync = Synchronizer::new(vec![a.clone(), b.clone()], out, config).unwrap();
        (a, b, sync)
    }

    #[test]
    fn test_reference_is_min_of_newest() {
        let (a, b, mut sync) = setup(SynchronizerConfig::default());
        push(&a, 0.0, &[(0, 1)]);
        push(&a, 50.0, &[(0, 2)]);
        push(&b, 10.0, &[(1, 3)]);
        push(&b, 60.0, &[(1, 4)]);

        let outcome = sync.synchronize().unwrap();
        let report = outcome.report().unwrap();
        assert!(outcome.is_published());
        assert_eq!(report.reference, Timestamp::from_millis(50.0));
        assert_eq!(report.sources[0].matched, Some(Timestamp::from_millis(50.0)));
        assert_eq!(report.sources[1].matched, Some(Timestamp::from_millis(60.0)));
        assert_eq!(report.fused_slots, vec![0, 1]);
        assert!(report.all_slots_found());

        let fused = sync.output().get(Timestamp::from_millis(50.0)).unwrap().unwrap();
        assert_eq!(fused.element(0).unwrap(), Some(vec![2, 2]));
        assert_eq!(fused.element(1).unwrap(), Some(vec![4, 4]));

        // nothing new
        let again = sync.synchronize().unwrap();
        assert!(matches!(
            again,
            SyncOutcome::Skipped(SkipReason::NotAdvanced { .. })
        ));
        assert_eq!(sync.output().len(), 1);
    }

    #[test]
    fn test_empty_input_skips() {
        let (a, _b, mut sync) = setup(SynchronizerConfig::default());
        push(&a, 5.0, &[(0, 1)]);

        match sync.synchronize().unwrap() {
            SyncOutcome::Skipped(SkipReason::InsufficientData { empty }) => {
                assert_eq!(empty, vec![TimelineId::from("b")]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(sync.last_reference(), None);
    }

    #[test]
    fn test_first_present_in_input_order() {
        let (a, b, mut sync) = setup(SynchronizerConfig::default());
        push(&a, 10.0, &[(0, 7)]);
        push(&b, 10.0, &[(0, 9), (1, 5)]);

        sync.synchronize().unwrap();
        let fused = sync.output().get_newest().unwrap().unwrap();
        assert_eq!(fused.element(0).unwrap(), Some(vec![7, 7]));
        assert_eq!(fused.element(1).unwrap(), Some(vec![5, 5]));
    }

    #[test]
    fn test_missing_slots_are_skipped() {
        let a = timeline("a", 4, 1, 3);
        let b = timeline("b", 4, 1, 3);
        let out = timeline("out", 4, 1, 3);
        let mut sync =
            Synchronizer::new(vec![a.clone(), b.clone()], out, SynchronizerConfig::default())
                .unwrap();
        push(&a, 1.0, &[(0, 1)]);
        push(&b, 1.0, &[]);

        let outcome = sync.synchronize().unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.fused_slots, vec![0]);
        assert_eq!(report.missing_slots, vec![1, 2]);
        assert!(!report.all_slots_found());

        let fused = sync.output().get_newest().unwrap().unwrap();
        assert_eq!(fused.mask(), 0b001);
    }

    #[test]
    fn test_nothing_present_publishes_nothing() {
        let (a, b, mut sync) = setup(SynchronizerConfig::default());
        push(&a, 1.0, &[]);
        push(&b, 2.0, &[]);

        let outcome = sync.synchronize().unwrap();
        assert!(matches!(outcome, SyncOutcome::NothingPresent(_)));
        assert!(sync.output().is_empty());
        assert_eq!(sync.last_reference(), Some(Timestamp::from_millis(1.0)));
    }

    #[test]
    fn test_delay_and_tolerance() {
        let config = SynchronizerConfig {
            tolerance_ms: Some(5.0),
            delays_ms: [(TimelineId::from("b"), 40.0)].into_iter().collect(),
            ..Default::default()
        };
        let (a, b, mut sync) = setup(config);
        push(&a, 100.0, &[(0, 1)]);
        push(&b, 58.0, &[(1, 2)]);
        push(&b, 120.0, &[(1, 3)]);

        let outcome = sync.synchronize().unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.reference, Timestamp::from_millis(100.0));
        assert_eq!(report.sources[1].requested, Timestamp::from_millis(60.0));
        assert_eq!(report.sources[1].matched, Some(Timestamp::from_millis(58.0)));

        // b's closest to 90 is 120, outside tolerance
        push(&a, 130.0, &[(0, 4)]);
        push(&b, 200.0, &[(1, 5)]);
        let outcome = sync.synchronize().unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.reference, Timestamp::from_millis(130.0));
        assert_eq!(report.sources[0].matched, Some(Timestamp::from_millis(130.0)));
        assert_eq!(report.sources[1].requested, Timestamp::from_millis(90.0));
        assert_eq!(report.sources[1].matched, None);
        assert_eq!(report.unmatched_sources().count(), 1);
        assert_eq!(report.missing_slots, vec![1]);
    }

    #[test]
    fn test_reset_republishes_reference() {
        let (a, b, mut sync) = setup(SynchronizerConfig::default());
        push(&a, 10.0, &[(0, 1)]);
        push(&b, 10.0, &[(1, 2)]);
        assert!(sync.synchronize().unwrap().is_published());

        sync.reset();
        let outcome = sync.synchronize().unwrap();
        assert!(outcome.is_published());
        assert_eq!(outcome.report().unwrap().frame_id, 2);
        assert_eq!(sync.output().len(), 1);
    }

    #[test]
    fn test_sources_unlocked_after_cycle() {
        let (a, b, mut sync) = setup(SynchronizerConfig::default());
        push(&a, 10.0, &[(0, 1)]);
        push(&b, 10.0, &[(1, 2)]);
        sync.synchronize().unwrap();

        let element = a.get_newest().unwrap().unwrap();
        assert!(!element.is_locked());
    }

    #[test]
    fn test_mismatched_inputs_rejected() {
        let a = timeline("a", 4, 2, 2);
        let b = timeline("b", 8, 2, 2);
        let out = timeline("out", 4, 2, 2);
        let err = Synchronizer::new(vec![a.clone(), b], out.clone(), SynchronizerConfig::default())
            .unwrap_err();
        assert!(matches!(err, ContractError::TimelineMismatch { .. }));
        assert!(err.is_configuration());

        let c = timeline("c", 4, 4, 2);
        let err =
            Synchronizer::new(vec![a.clone(), c], out.clone(), SynchronizerConfig::default())
                .unwrap_err();
        assert!(matches!(err, ContractError::TimelineMismatch { .. }));

        let small_out = timeline("small", 4, 2, 1);
        assert!(Synchronizer::new(vec![a.clone()], small_out, SynchronizerConfig::default())
            .is_err());

        let uninit = Arc::new(Timeline::new("u"));
        let err = Synchronizer::new(vec![a.clone(), uninit], out.clone(), Default::default())
            .unwrap_err();
        assert!(matches!(err, ContractError::Uninitialized { .. }));

        assert!(Synchronizer::new(vec![], out.clone(), Default::default()).is_err());
        assert!(Synchronizer::new(vec![a.clone()], a.clone(), Default::default()).is_err());

        let config = SynchronizerConfig {
            fusion: FusionKind::RigidTransform,
            ..Default::default()
        };
        assert!(Synchronizer::new(vec![a], out, config).is_err());
    }

    #[test]
    fn test_negative_delay_clamped() {
        let config = SynchronizerConfig {
            delays_ms: [(TimelineId::from("a"), -20.0)].into_iter().collect(),
            ..Default::default()
        };
        let (a, b, mut sync) = setup(config);
        push(&a, 10.0, &[(0, 1)]);
        push(&b, 10.0, &[(1, 1)]);
        let outcome = sync.synchronize().unwrap();
        assert_eq!(
            outcome.report().unwrap().sources[0].requested,
            Timestamp::from_millis(10.0)
        );
    }

    #[test]
    fn test_set_delay_at_runtime() {
        let (a, b, mut sync) = setup(SynchronizerConfig::default());
        let a_name = a.name().clone();
        assert_eq!(sync.delay(&a_name), Some(0.0));

        push(&a, 10.0, &[(0, 1)]);
        push(&a, 30.0, &[(0, 3)]);
        push(&b, 30.0, &[(1, 1)]);
        sync.set_delay(&a_name, 20.0).unwrap();

        let outcome = sync.synchronize().unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.sources[0].requested, Timestamp::from_millis(10.0));
        assert_eq!(report.sources[0].matched, Some(Timestamp::from_millis(10.0)));

        sync.set_delay(&a_name, -5.0).unwrap();
        assert_eq!(sync.delay(&a_name), Some(0.0));
        assert_eq!(sync.config().delay_for(&a_name), 0.0);

        assert!(sync.set_delay(&a_name, f64::NAN).is_err());
        assert!(sync.set_delay(&TimelineId::from("nope"), 1.0).is_err());
        assert_eq!(sync.delay(&TimelineId::from("nope")), None);
    }
}
