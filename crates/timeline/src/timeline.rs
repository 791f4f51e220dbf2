//! Timeline pool.
//!
//! Elements are keyed by timestamp in an ordered map behind one mutex per
//! timeline. Publication and eviction happen under that mutex; notifications
//! go out after it is released.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use contracts::{
    ContractError, ElementDescriptor, OverflowPolicy, TimelineConfig, TimelineEvent, TimelineId,
    TimelineStats, Timestamp,
};
use memory::BufferManager;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, instrument, trace};

use crate::element::TimelineElement;

/// Buffered notifications per subscriber before the oldest are dropped
pub const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct PoolConfig {
    capacity: usize,
    descriptor: ElementDescriptor,
}

#[derive(Default)]
struct TimelineState {
    config: Option<PoolConfig>,
    overflow: OverflowPolicy,
    entries: BTreeMap<Timestamp, Arc<TimelineElement>>,
    free: Vec<TimelineElement>,
    pushed: u64,
    evicted: u64,
    rejected: u64,
    recycled: u64,
    overflow_peak: usize,
}

impl TimelineState {
    fn config(&self, name: &TimelineId) -> Result<PoolConfig, ContractError> {
        self.config.ok_or_else(|| ContractError::Uninitialized {
            timeline: name.to_string(),
        })
    }

    fn oldest_unlocked(&self) -> Option<Timestamp> {
        self.entries
            .iter()
            .find(|(_, element)| !element.is_locked())
            .map(|(ts, _)| *ts)
    }

    /// Nearest entry; on a tie the later timestamp wins
    fn closest(&self, target: Timestamp) -> Option<&Arc<TimelineElement>> {
        let before = self.entries.range(..=target).next_back();
        let after = self.entries.range(target..).next();
        match (before, after) {
            (Some((before_ts, before)), Some((after_ts, after))) => {
                if after_ts.distance(target) <= before_ts.distance(target) {
                    Some(after)
                } else {
                    Some(before)
                }
            }
            (Some((_, element)), None) | (None, Some((_, element))) => Some(element),
            (None, None) => None,
        }
    }

    /// Keep unshared, unlocked payloads for reuse, up to `capacity` of them
    fn retire(&mut self, elements: impl IntoIterator<Item = Arc<TimelineElement>>) {
        let Some(config) = self.config else {
            return;
        };
        for element in elements {
            // an `ElementLock` can outlive every `Arc` of its element
            if element.is_locked() {
                continue;
            }
            if let Ok(element) = Arc::try_unwrap(element) {
                if self.free.len() < config.capacity && element.descriptor() == config.descriptor {
                    self.free.push(element);
                }
            }
        }
    }
}

/// 有界时间线缓冲池
///
/// - `Uninitialized` → `init_pool_size` → 可用
/// - 超出容量时淘汰最旧的未锁定元素；全部锁定时按 [`OverflowPolicy`] 处理
/// - 每次成功 `push` 后广播一次 `Pushed(ts)`
pub struct Timeline {
    name: TimelineId,
    manager: Weak<dyn BufferManager>,
    state: Mutex<TimelineState>,
    events: broadcast::Sender<TimelineEvent>,
}

impl Timeline {
    /// Timeline whose payloads attach to the process-wide current manager
    pub fn new(name: impl Into<TimelineId>) -> Self {
        Self::with_manager(name, memory::manager::current())
    }

    pub fn with_manager(name: impl Into<TimelineId>, manager: Arc<dyn BufferManager>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            name: name.into(),
            manager: Arc::downgrade(&manager),
            state: Mutex::new(TimelineState::default()),
            events,
        }
    }

    /// Build and initialize a timeline from its configuration
    pub fn from_config(
        config: &TimelineConfig,
        manager: Arc<dyn BufferManager>,
    ) -> Result<Self, ContractError> {
        let timeline = Self::with_manager(config.name.as_str(), manager);
        timeline.init_pool_size(config.capacity, config.descriptor()?)?;
        timeline.set_overflow_policy(config.overflow);
        Ok(timeline)
    }

    #[inline]
    pub fn name(&self) -> &TimelineId {
        &self.name
    }

    /// Set capacity and element layout.
    ///
    /// May be called again; the layout can only change while the pool is empty.
    pub fn init_pool_size(
        &self,
        capacity: usize,
        descriptor: ElementDescriptor,
    ) -> Result<(), ContractError> {
        if capacity == 0 {
            return Err(ContractError::config_validation(
                "capacity",
                format!("timeline '{}' needs a capacity > 0", self.name),
            ));
        }
        descriptor.validate()?;

        let mut state = self.state.lock();
        if let Some(current) = state.config {
            if current.descriptor != descriptor && !state.entries.is_empty() {
                return Err(ContractError::timeline_mismatch(
                    self.name.as_str(),
                    "cannot change the element layout of a non-empty timeline",
                ));
            }
        }
        state.config = Some(PoolConfig {
            capacity,
            descriptor,
        });
        state.free.clear();
        drop(state);

        debug!(
            timeline = %self.name,
            capacity,
            element_size = descriptor.element_size,
            max_elements = descriptor.max_elements,
            "timeline pool initialized"
        );
        Ok(())
    }

    pub fn set_overflow_policy(&self, policy: OverflowPolicy) {
        self.state.lock().overflow = policy;
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.state.lock().overflow
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().config.is_some()
    }

    /// Capacity, `None` before init
    pub fn capacity(&self) -> Option<usize> {
        self.state.lock().config.map(|c| c.capacity)
    }

    /// Element layout, `None` before init
    pub fn descriptor(&self) -> Option<ElementDescriptor> {
        self.state.lock().config.map(|c| c.descriptor)
    }

    /// Draw a zeroed element for `timestamp`. It stays invisible until pushed.
    pub fn create_buffer(&self, timestamp: Timestamp) -> Result<TimelineElement, ContractError> {
        if !timestamp.is_valid() {
            return Err(ContractError::InvalidTimestamp {
                value: timestamp.as_millis(),
            });
        }

        let (descriptor, recycled) = {
            let mut state = self.state.lock();
            let config = state.config(&self.name)?;
            let recycled = state.free.pop();
            if recycled.is_some() {
                state.recycled += 1;
            }
            (config.descriptor, recycled)
        };

        match recycled {
            Some(mut element) => {
                element.recycle(timestamp)?;
                Ok(element)
            }
            None => TimelineElement::allocate(timestamp, descriptor, self.manager.clone()),
        }
    }

    /// Publish `element` under its timestamp.
    ///
    /// When the pool is full the oldest unlocked entries are evicted first.
    /// If every retained entry is locked the overflow policy decides between
    /// publishing past capacity and refusing with `PoolExhausted`.
    #[instrument(
        name = "timeline_push",
        level = "trace",
        skip(self, element),
        fields(timeline = %self.name, ts = %element.timestamp())
    )]
    pub fn push(&self, element: TimelineElement) -> Result<(), ContractError> {
        let timestamp = element.timestamp();
        if !timestamp.is_valid() {
            return Err(ContractError::InvalidTimestamp {
                value: timestamp.as_millis(),
            });
        }

        let (len, capacity, evicted) = {
            let mut state = self.state.lock();
            let config = state.config(&self.name)?;

            if element.descriptor() != config.descriptor {
                state.rejected += 1;
                return Err(ContractError::ForeignElement {
                    timeline: self.name.to_string(),
                    message: format!(
                        "layout {}x{} does not match {}x{}",
                        element.descriptor().max_elements,
                        element.descriptor().element_size,
                        config.descriptor.max_elements,
                        config.descriptor.element_size
                    ),
                });
            }
            if state.entries.contains_key(&timestamp) {
                state.rejected += 1;
                return Err(ContractError::DuplicateTimestamp {
                    timeline: self.name.to_string(),
                    timestamp,
                });
            }

            let mut evicted = Vec::new();
            while state.entries.len() >= config.capacity {
                let Some(oldest) = state.oldest_unlocked() else {
                    break;
                };
                if let Some(element) = state.entries.remove(&oldest) {
                    evicted.push(element);
                }
            }
            let evicted_count = evicted.len();
            state.evicted += evicted_count as u64;
            state.retire(evicted);

            if state.entries.len() >= config.capacity && state.overflow == OverflowPolicy::Reject {
                state.rejected += 1;
                return Err(ContractError::PoolExhausted {
                    timeline: self.name.to_string(),
                    capacity: config.capacity,
                    locked: state.entries.len(),
                });
            }

            state.entries.insert(timestamp, Arc::new(element));
            state.pushed += 1;
            let len = state.entries.len();
            state.overflow_peak = state.overflow_peak.max(len);
            (len, config.capacity, evicted_count)
        };

        let label = self.name.to_string();
        counter!("tlsync_timeline_pushed_total", "timeline" => label.clone()).increment(1);
        if evicted > 0 {
            counter!("tlsync_timeline_evicted_total", "timeline" => label.clone())
                .increment(evicted as u64);
        }
        gauge!("tlsync_timeline_len", "timeline" => label).set(len as f64);

        if len > capacity {
            debug!(
                timeline = %self.name,
                len,
                capacity,
                "pool over capacity: every older element is locked"
            );
        }

        // no subscribers is fine
        let _ = self.events.send(TimelineEvent::Pushed(timestamp));
        trace!(timeline = %self.name, ts = %timestamp, len, evicted, "element published");
        Ok(())
    }

    /// Exact match
    pub fn get(&self, timestamp: Timestamp) -> Result<Option<Arc<TimelineElement>>, ContractError> {
        let state = self.state.lock();
        state.config(&self.name)?;
        Ok(state.entries.get(&timestamp).cloned())
    }

    /// Entry minimizing `|entry - timestamp|`; ties go to the later entry
    pub fn get_closest(
        &self,
        timestamp: Timestamp,
    ) -> Result<Option<Arc<TimelineElement>>, ContractError> {
        let state = self.state.lock();
        state.config(&self.name)?;
        Ok(state.closest(timestamp).cloned())
    }

    pub fn get_newest(&self) -> Result<Option<Arc<TimelineElement>>, ContractError> {
        let state = self.state.lock();
        state.config(&self.name)?;
        Ok(state.entries.last_key_value().map(|(_, e)| e.clone()))
    }

    pub fn get_newest_timestamp(&self) -> Result<Option<Timestamp>, ContractError> {
        let state = self.state.lock();
        state.config(&self.name)?;
        Ok(state.entries.last_key_value().map(|(ts, _)| *ts))
    }

    /// Remove and return the entry at `timestamp`
    pub fn pop(&self, timestamp: Timestamp) -> Result<Option<Arc<TimelineElement>>, ContractError> {
        let mut state = self.state.lock();
        state.config(&self.name)?;
        Ok(state.entries.remove(&timestamp))
    }

    /// Drop every entry and broadcast `Cleared`.
    ///
    /// Payloads still shared or locked by a reader stay with that reader and
    /// are never recycled.
    pub fn clear(&self) -> Result<(), ContractError> {
        let dropped = {
            let mut state = self.state.lock();
            state.config(&self.name)?;
            let entries = std::mem::take(&mut state.entries);
            let dropped = entries.len();
            state.retire(entries.into_values());
            dropped
        };

        let _ = self.events.send(TimelineEvent::Cleared);
        gauge!("tlsync_timeline_len", "timeline" => self.name.to_string()).set(0.0);
        debug!(timeline = %self.name, dropped, "timeline cleared");
        Ok(())
    }

    /// Independent deep copy of the layout and every retained entry.
    ///
    /// The copy has no subscribers.
    pub fn copy(&self) -> Result<Timeline, ContractError> {
        let (config, overflow, snapshot) = {
            let state = self.state.lock();
            let config = state.config(&self.name)?;
            let snapshot: Vec<_> = state.entries.values().cloned().collect();
            (config, state.overflow, snapshot)
        };

        let mut entries = BTreeMap::new();
        for element in snapshot {
            let copy = element.deep_copy()?;
            entries.insert(copy.timestamp(), Arc::new(copy));
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Timeline {
            name: self.name.clone(),
            manager: self.manager.clone(),
            state: Mutex::new(TimelineState {
                config: Some(config),
                overflow,
                entries,
                ..TimelineState::default()
            }),
            events,
        })
    }

    /// Receive `Pushed` / `Cleared` notifications from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TimelineEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Retained timestamps, oldest first
    pub fn timestamps(&self) -> Vec<Timestamp> {
        self.state.lock().entries.keys().copied().collect()
    }

    pub fn stats(&self) -> TimelineStats {
        let state = self.state.lock();
        TimelineStats {
            len: state.entries.len(),
            capacity: state.config.map(|c| c.capacity).unwrap_or(0),
            pushed: state.pushed,
            evicted: state.evicted,
            rejected: state.rejected,
            recycled: state.recycled,
            overflow_peak: state.overflow_peak,
            oldest: state.entries.first_key_value().map(|(ts, _)| *ts),
            newest: state.entries.last_key_value().map(|(ts, _)| *ts),
        }
    }
}

impl fmt::Debug for Timeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Timeline")
            .field("name", &self.name)
            .field("config", &state.config)
            .field("overflow", &state.overflow)
            .field("len", &state.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory::NullManager;

    fn ts(ms: f64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn timeline(capacity: usize) -> Timeline {
        let t = Timeline::with_manager("test", Arc::new(NullManager));
        t.init_pool_size(capacity, ElementDescriptor::new(4, 2).unwrap())
            .unwrap();
        t
    }

    fn push(t: &Timeline, ms: f64, value: u8) {
        let mut element = t.create_buffer(ts(ms)).unwrap();
        element.set_element(0, &[value; 4]).unwrap();
        t.push(element).unwrap();
    }

    #[test]
    fn test_uninitialized_rejects_data_operations() {
        let t = Timeline::with_manager("raw", Arc::new(NullManager));
        assert!(!t.is_initialized());
        assert!(matches!(t.get(ts(0.0)), Err(ContractError::Uninitialized { .. })));
        assert!(t.create_buffer(ts(0.0)).unwrap_err().is_configuration());
        assert!(t.get_newest_timestamp().is_err());
        assert!(t.clear().is_err());
        assert!(t.init_pool_size(0, ElementDescriptor::new(4, 2).unwrap()).is_err());
    }

    #[test]
    fn test_pool_bound_evicts_oldest() {
        let t = timeline(3);
        for i in 0..5 {
            push(&t, i as f64 * 10.0, i);
        }
        assert_eq!(t.len(), 3);
        assert_eq!(t.timestamps(), vec![ts(20.0), ts(30.0), ts(40.0)]);

        let stats = t.stats();
        assert_eq!(stats.pushed, 5);
        assert_eq!(stats.evicted, 2);
        assert_eq!(stats.overflow_peak, 3);
        assert_eq!(stats.oldest, Some(ts(20.0)));
    }

    #[test]
    fn test_exact_get() {
        let t = timeline(4);
        push(&t, 20.0, 2);
        let hit = t.get(ts(20.0)).unwrap().unwrap();
        assert_eq!(hit.element(0).unwrap(), Some(vec![2; 4]));
        assert!(t.get(ts(25.0)).unwrap().is_none());
    }

    #[test]
    fn test_get_closest_prefers_later_on_tie() {
        let t = timeline(4);
        assert!(t.get_closest(ts(1.0)).unwrap().is_none());

        push(&t, 10.0, 1);
        push(&t, 20.0, 2);
        let closest = |ms| t.get_closest(ts(ms)).unwrap().unwrap().timestamp();
        assert_eq!(closest(15.0), ts(20.0));
        assert_eq!(closest(14.0), ts(10.0));
        assert_eq!(closest(16.0), ts(20.0));
        assert_eq!(closest(-5.0), ts(10.0));
        assert_eq!(closest(100.0), ts(20.0));
        assert_eq!(closest(10.0), ts(10.0));
    }

    #[test]
    fn test_newest_and_pop() {
        let t = timeline(4);
        assert_eq!(t.get_newest_timestamp().unwrap(), None);
        push(&t, 10.0, 1);
        push(&t, 30.0, 3);
        assert_eq!(t.get_newest_timestamp().unwrap(), Some(ts(30.0)));
        assert_eq!(t.get_newest().unwrap().unwrap().timestamp(), ts(30.0));

        let popped = t.pop(ts(30.0)).unwrap().unwrap();
        assert_eq!(popped.element(0).unwrap(), Some(vec![3; 4]));
        assert_eq!(t.get_newest_timestamp().unwrap(), Some(ts(10.0)));
        assert!(t.pop(ts(30.0)).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_and_invalid_timestamps() {
        let t = timeline(4);
        push(&t, 10.0, 1);
        let again = t.create_buffer(ts(10.0)).unwrap();
        assert!(matches!(
            t.push(again),
            Err(ContractError::DuplicateTimestamp { .. })
        ));
        assert_eq!(t.stats().rejected, 1);
        assert!(matches!(
            t.create_buffer(ts(f64::NAN)),
            Err(ContractError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn test_foreign_element_rejected() {
        let a = timeline(2);
        let b = Timeline::with_manager("wide", Arc::new(NullManager));
        b.init_pool_size(2, ElementDescriptor::new(8, 2).unwrap())
            .unwrap();
        let element = a.create_buffer(ts(1.0)).unwrap();
        assert!(matches!(
            b.push(element),
            Err(ContractError::ForeignElement { .. })
        ));
    }

    #[test]
    fn test_locked_entry_survives_eviction() {
        let t = timeline(2);
        push(&t, 0.0, 1);
        push(&t, 10.0, 2);
        let reader = t.get(ts(0.0)).unwrap().unwrap().lock().unwrap();

        push(&t, 20.0, 3);
        assert_eq!(t.timestamps(), vec![ts(0.0), ts(20.0)]);
        assert_eq!(&*reader.slot(0).unwrap().unwrap(), &[1; 4]);
    }

    #[test]
    fn test_overflow_grow_then_trim() {
        let t = timeline(2);
        push(&t, 0.0, 1);
        push(&t, 10.0, 2);
        let first = t.get(ts(0.0)).unwrap().unwrap().lock().unwrap();
        let second = t.get(ts(10.0)).unwrap().unwrap().lock().unwrap();

        push(&t, 20.0, 3);
        assert_eq!(t.len(), 3);
        assert_eq!(t.stats().overflow_peak, 3);
        assert_eq!(&*first.slot(0).unwrap().unwrap(), &[1; 4]);
        assert_eq!(&*second.slot(0).unwrap().unwrap(), &[2; 4]);

        drop(first);
        drop(second);
        push(&t, 30.0, 4);
        assert_eq!(t.timestamps(), vec![ts(20.0), ts(30.0)]);
    }

    #[test]
    fn test_overflow_reject() {
        let t = timeline(1);
        t.set_overflow_policy(OverflowPolicy::Reject);
        push(&t, 0.0, 1);
        let held = t.get(ts(0.0)).unwrap().unwrap().lock().unwrap();

        let element = t.create_buffer(ts(10.0)).unwrap();
        assert!(matches!(
            t.push(element),
            Err(ContractError::PoolExhausted { capacity: 1, locked: 1, .. })
        ));
        assert_eq!(t.timestamps(), vec![ts(0.0)]);
        assert_eq!(&*held.slot(0).unwrap().unwrap(), &[1; 4]);

        drop(held);
        push(&t, 10.0, 2);
        assert_eq!(t.timestamps(), vec![ts(10.0)]);
    }

    #[test]
    fn test_copy_is_independent() {
        let t = timeline(4);
        push(&t, 10.0, 5);
        let copy = t.copy().unwrap();

        t.clear().unwrap();
        push(&t, 20.0, 6);

        assert_eq!(copy.timestamps(), vec![ts(10.0)]);
        let kept = copy.get(ts(10.0)).unwrap().unwrap();
        assert_eq!(kept.element(0).unwrap(), Some(vec![5; 4]));
        assert_eq!(t.timestamps(), vec![ts(20.0)]);
        assert_eq!(copy.capacity(), Some(4));
    }

    #[test]
    fn test_evicted_payload_is_recycled() {
        let t = timeline(1);
        push(&t, 0.0, 9);
        push(&t, 10.0, 8);

        let reused = t.create_buffer(ts(20.0)).unwrap();
        assert_eq!(t.stats().recycled, 1);
        assert_eq!(reused.mask(), 0);
        assert_eq!(reused.timestamp(), ts(20.0));
    }

    #[test]
    fn test_clear_keeps_locked_payload() {
        let t = timeline(2);
        push(&t, 0.0, 7);
        let reader = t.get(ts(0.0)).unwrap().unwrap().lock().unwrap();

        t.clear().unwrap();
        let mut next = t.create_buffer(ts(10.0)).unwrap();
        next.set_element(0, &[9; 4]).unwrap();

        assert_eq!(t.stats().recycled, 0);
        assert_eq!(&*reader.slot(0).unwrap().unwrap(), &[7; 4]);
    }

    #[test]
    fn test_signed_zero_is_one_key() {
        let t = timeline(4);
        push(&t, 0.0, 1);
        let element = t.create_buffer(ts(-0.0)).unwrap();
        assert!(matches!(
            t.push(element),
            Err(ContractError::DuplicateTimestamp { .. })
        ));
        assert_eq!(t.len(), 1);
        assert!(t.get(ts(-0.0)).unwrap().is_some());
    }

    #[test]
    fn test_layout_change_requires_empty_pool() {
        let t = timeline(2);
        push(&t, 0.0, 1);
        let wider = ElementDescriptor::new(8, 2).unwrap();
        assert!(matches!(
            t.init_pool_size(2, wider),
            Err(ContractError::TimelineMismatch { .. })
        ));
        t.init_pool_size(8, ElementDescriptor::new(4, 2).unwrap())
            .unwrap();
        assert_eq!(t.capacity(), Some(8));
        t.clear().unwrap();
        t.init_pool_size(2, wider).unwrap();
    }

    #[tokio::test]
    async fn test_events_follow_publication() {
        let t = timeline(2);
        let mut rx = t.subscribe();

        push(&t, 5.0, 1);
        assert_eq!(rx.recv().await.unwrap(), TimelineEvent::Pushed(ts(5.0)));
        assert_eq!(t.get_newest_timestamp().unwrap(), Some(ts(5.0)));

        t.clear().unwrap();
        assert_eq!(rx.recv().await.unwrap(), TimelineEvent::Cleared);
        assert_eq!(t.get_newest_timestamp().unwrap(), None);
    }
}
