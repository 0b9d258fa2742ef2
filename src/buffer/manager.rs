//! `BufferManager`: sensor name -> `RingBuffer`, and the threshold-over-time
//! predicate the emitted code calls into.

use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::buffer::ring_buffer::{RingBuffer, DEFAULT_CAPACITY};
use crate::dsl::ir::{ThresholdDirection, ThresholdMode};

/// Maps sensor name to its `RingBuffer`, created lazily on first write.
/// The map itself is a concurrent structure (`DashMap`); each sensor's
/// buffer is additionally guarded by its own lock so that `update` and
/// predicate reads on different sensors never contend with each other.
pub struct BufferManager {
    capacity: usize,
    buffers: DashMap<String, Mutex<RingBuffer>>,
    /// The timestamp of the most recent `update()`/`begin_cycle()` call.
    /// Generated rule code calls `above_for`/`below_for` with no explicit
    /// "now" — within one evaluation cycle "now" is whatever the driver
    /// last stamped onto the buffers, not a fresh wall-clock read.
    current_now: AtomicI64,
}

impl BufferManager {
    pub fn new(capacity: usize) -> Self {
        BufferManager { capacity: capacity.max(1), buffers: DashMap::new(), current_now: AtomicI64::new(0) }
    }

    /// Record a batch of `(sensor, value)` samples at a single shared
    /// timestamp — the cycle driver's `now`. Also becomes the "now" used by
    /// subsequent no-argument predicate queries until the next `update` or
    /// `begin_cycle` call.
    pub fn update(&self, values: impl IntoIterator<Item = (impl Into<String>, f64)>, now: i64) {
        for (name, value) in values {
            let name = name.into();
            let buf = self.buffers.entry(name).or_insert_with(|| Mutex::new(RingBuffer::new(self.capacity)));
            buf.lock().push(now, value);
        }
        self.current_now.store(now, Ordering::SeqCst);
    }

    /// Stamp `now` as the current cycle time without writing any samples —
    /// for cycles where the sensor store returned nothing new but temporal
    /// predicates must still advance.
    pub fn begin_cycle(&self, now: i64) {
        self.current_now.store(now, Ordering::SeqCst);
    }

    fn current_now(&self) -> i64 {
        self.current_now.load(Ordering::SeqCst)
    }

    /// Drops every sensor's history.
    pub fn clear(&self) {
        self.buffers.clear();
    }

    pub fn sensor_count(&self) -> usize {
        self.buffers.len()
    }

    /// `value` satisfies `threshold` per [`ThresholdDirection`]: strictly
    /// above for `Above`, strictly below for `Below`. Equal to the threshold
    /// never satisfies either direction.
    fn satisfies(direction: ThresholdDirection, threshold: f64, value: f64) -> bool {
        match direction {
            ThresholdDirection::Above => value > threshold,
            ThresholdDirection::Below => value < threshold,
        }
    }

    /// True iff `sensor`'s recent history satisfies `threshold` for at least
    /// `duration_ms`, evaluated at `now`, under `mode`:
    ///
    /// - `Strict`: every sample in `[now - duration, now]`, plus the guard
    ///   sample immediately preceding that window if one exists, satisfies
    ///   the threshold. A window with no samples and no guard is false.
    /// - `ExtendLastKnown`: the single most recent sample (regardless of
    ///   window) satisfies the threshold, and at least `duration_ms` has
    ///   elapsed since it was written.
    ///
    /// A sensor with no history at all is false under both modes. This is
    /// the explicit-`now` form used by tests; generated code calls
    /// [`Self::above_for`]/[`Self::below_for`] instead, which supply the
    /// manager's own notion of "now".
    pub fn threshold_over_time_at(
        &self,
        sensor: &str,
        threshold: f64,
        duration_ms: u32,
        mode: ThresholdMode,
        direction: ThresholdDirection,
        now: i64,
    ) -> bool {
        let Some(buf) = self.buffers.get(sensor) else { return false };
        let buf = buf.lock();
        let duration_ms = i64::from(duration_ms);

        match mode {
            ThresholdMode::Strict => {
                let window = buf.window(now, duration_ms);
                if window.is_empty() {
                    return false;
                }
                let window_ok = window.iter().all(|(_, v)| Self::satisfies(direction, threshold, *v));
                let guard_ok = buf
                    .guard_sample(now, duration_ms)
                    .map(|(_, v)| Self::satisfies(direction, threshold, v))
                    .unwrap_or(true);
                window_ok && guard_ok
            }
            ThresholdMode::ExtendLastKnown => match buf.latest() {
                Some((ts, v)) => {
                    Self::satisfies(direction, threshold, v) && crate::clock::age_ms(ts, now) >= duration_ms
                }
                None => false,
            },
        }
    }

    /// `above_for(sensor, threshold, duration_ms, mode)` as called from
    /// generated rule code — "now" is the manager's current cycle time.
    pub fn above_for(&self, sensor: &str, threshold: f64, duration_ms: u32, mode: ThresholdMode) -> bool {
        self.threshold_over_time_at(sensor, threshold, duration_ms, mode, ThresholdDirection::Above, self.current_now())
    }

    pub fn below_for(&self, sensor: &str, threshold: f64, duration_ms: u32, mode: ThresholdMode) -> bool {
        self.threshold_over_time_at(sensor, threshold, duration_ms, mode, ThresholdDirection::Below, self.current_now())
    }

    pub fn above_for_at(&self, sensor: &str, threshold: f64, duration_ms: u32, mode: ThresholdMode, now: i64) -> bool {
        self.threshold_over_time_at(sensor, threshold, duration_ms, mode, ThresholdDirection::Above, now)
    }

    pub fn below_for_at(&self, sensor: &str, threshold: f64, duration_ms: u32, mode: ThresholdMode, now: i64) -> bool {
        self.threshold_over_time_at(sensor, threshold, duration_ms, mode, ThresholdDirection::Below, now)
    }
}

impl Default for BufferManager {
    fn default() -> Self {
        BufferManager::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_strict_scenario() {
        let mgr = BufferManager::new(10);
        for (ts, v) in [(0, 35.0), (100, 35.0), (200, 35.0), (300, 35.0)] {
            mgr.update([("t", v)], ts);
        }
        assert!(mgr.above_for_at("t", 30.0, 300, ThresholdMode::Strict, 300));
    }

    #[test]
    fn threshold_strict_fails_on_intercalated_low_sample() {
        let mgr = BufferManager::new(10);
        for (ts, v) in [(0, 35.0), (100, 35.0), (150, 25.0), (200, 35.0), (300, 35.0)] {
            mgr.update([("t", v)], ts);
        }
        assert!(!mgr.above_for_at("t", 30.0, 300, ThresholdMode::Strict, 300));
    }

    #[test]
    fn threshold_extend_last_known_scenario() {
        let mgr = BufferManager::new(10);
        let t0 = 1_000_000i64;
        mgr.update([("t", 35.0)], t0);

        assert!(mgr.above_for_at("t", 30.0, 300, ThresholdMode::ExtendLastKnown, t0 + 400));
        assert!(!mgr.above_for_at("t", 30.0, 300, ThresholdMode::ExtendLastKnown, t0 + 200));
    }

    #[test]
    fn threshold_extend_last_known_false_once_value_drops_below() {
        let mgr = BufferManager::new(10);
        let t0 = 1_000_000i64;
        mgr.update([("t", 20.0)], t0);

        assert!(!mgr.above_for_at("t", 30.0, 300, ThresholdMode::ExtendLastKnown, t0 + 10_000));
    }

    #[test]
    fn unknown_sensor_is_always_false() {
        let mgr = BufferManager::new(10);
        assert!(!mgr.above_for_at("missing", 1.0, 100, ThresholdMode::Strict, 1000));
    }

    #[test]
    fn clear_drops_all_history() {
        let mgr = BufferManager::new(10);
        mgr.update([("t", 1.0)], 0);
        assert_eq!(mgr.sensor_count(), 1);
        mgr.clear();
        assert_eq!(mgr.sensor_count(), 0);
    }

    #[test]
    fn below_for_is_symmetric() {
        let mgr = BufferManager::new(10);
        for ts in [0, 100, 200] {
            mgr.update([("t", 5.0)], ts);
        }
        assert!(mgr.below_for_at("t", 10.0, 200, ThresholdMode::Strict, 200));
        assert!(!mgr.above_for_at("t", 10.0, 200, ThresholdMode::Strict, 200));
    }

    #[test]
    fn no_arg_predicate_uses_last_update_as_now() {
        let mgr = BufferManager::new(10);
        mgr.update([("t", 35.0)], 1_000);
        assert!(mgr.above_for("t", 30.0, 500, ThresholdMode::Strict));
        mgr.begin_cycle(1_000 + 10_000);
        assert!(!mgr.above_for("t", 30.0, 500, ThresholdMode::Strict));
    }
}
