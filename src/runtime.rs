//! Reference runtime harness: the periodic cycle driver.
//!
//! The production orchestrator's own scheduling internals are out of scope
//! for this crate — what lives here is the minimal, testable
//! shape of one cycle: bulk read, buffer update, evaluate, bulk write, with
//! cooperative cancellation and rate-limited overrun warnings. `RuleSet` is
//! a trait rather than a concrete type because the actual evaluation body
//! is [`crate::emitter`]-generated source compiled into the binary by an
//! external toolchain; this crate never invokes that toolchain itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::buffer::BufferManager;
use crate::clock::Clock;

/// A `(value, timestamp)` sample as returned by the sensor store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    pub value: f64,
    pub timestamp_ms: i64,
}

/// The key/value sensor store the driver reads from and writes to. Treated
/// as an external collaborator — this crate only specifies the interface.
pub trait SensorStore: Send + Sync {
    /// Bulk read. Sensors with no current value are simply absent from the
    /// result, never an error.
    fn get_many(&self, names: &[String]) -> HashMap<String, SensorSample>;

    /// Bulk write, each key stamped with the store's own "now" atomically.
    fn set_many(&self, values: &HashMap<String, f64>);
}

/// The compiled evaluation entry point: `evaluate(inputs, outputs, buffers)`.
/// Production wires this to the `fn evaluate` emitted by [`crate::emitter`]
/// once the generated source has been compiled into the binary; this trait
/// exists so the driver is testable without a real generated artifact.
pub trait RuleSet: Send + Sync {
    fn evaluate(&self, inputs: &HashMap<String, f64>, outputs: &mut HashMap<String, f64>, buffers: &BufferManager);

    /// Every sensor name the compiled rule set reads, so the driver knows
    /// what to bulk-read each cycle without scanning the manifest itself.
    fn input_sensors(&self) -> &[String];
}

/// Cooperative stop signal: setting it lets the current cycle finish and
/// the next timer wait return, rather than aborting mid-cycle.
#[derive(Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        StopSignal(Arc::new(AtomicBool::new(false)))
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Runs the fixed-cycle evaluation loop over a [`RuleSet`] and a
/// [`SensorStore`]. `BufferManager` is the only state shared across cycles
/// besides the store itself.
pub struct Driver<S, R, C> {
    store: S,
    rules: R,
    clock: C,
    buffers: BufferManager,
    cycle_time_ms: u64,
    overrun_warning_floor_ms: i64,
    last_overrun_warning_ms: Option<i64>,
    stop: StopSignal,
}

impl<S: SensorStore, R: RuleSet, C: Clock> Driver<S, R, C> {
    pub fn new(store: S, rules: R, clock: C, buffers: BufferManager, cycle_time_ms: u64) -> Self {
        Driver {
            store,
            rules,
            clock,
            buffers,
            cycle_time_ms,
            overrun_warning_floor_ms: 60_000,
            last_overrun_warning_ms: None,
            stop: StopSignal::new(),
        }
    }

    pub fn with_overrun_warning_floor_ms(mut self, floor_ms: i64) -> Self {
        self.overrun_warning_floor_ms = floor_ms;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn buffers(&self) -> &BufferManager {
        &self.buffers
    }

    /// Run one cycle: bulk read, buffer update, evaluate, bulk write.
    /// Returns the outputs written this cycle and how long the cycle took.
    pub fn run_cycle(&mut self) -> (HashMap<String, f64>, Duration) {
        let started = std::time::Instant::now();
        let now = self.clock.now_ms();

        let names = self.rules.input_sensors();
        let samples = self.store.get_many(names);

        if samples.is_empty() {
            self.buffers.begin_cycle(now);
        } else {
            let values: Vec<(String, f64)> = samples.iter().map(|(k, s)| (k.clone(), s.value)).collect();
            self.buffers.update(values, now);
        }

        let inputs: HashMap<String, f64> = samples.into_iter().map(|(k, s)| (k, s.value)).collect();
        let mut outputs = HashMap::new();
        self.rules.evaluate(&inputs, &mut outputs, &self.buffers);

        self.store.set_many(&outputs);

        let elapsed = started.elapsed();
        self.maybe_warn_overrun(elapsed, now);
        (outputs, elapsed)
    }

    /// Emits a rate-limited overrun warning (§5: "at most once per minute")
    /// when `elapsed` exceeds `cycle_time_ms`. `now` drives the rate limit
    /// so the floor is exercisable deterministically under a `ManualClock`.
    fn maybe_warn_overrun(&mut self, elapsed: Duration, now: i64) {
        if elapsed.as_millis() as u64 <= self.cycle_time_ms {
            return;
        }
        let should_warn = match self.last_overrun_warning_ms {
            None => true,
            Some(last) => crate::clock::age_ms(last, now) >= self.overrun_warning_floor_ms,
        };
        if should_warn {
            tracing::warn!(
                cycle_time_ms = self.cycle_time_ms,
                elapsed_ms = elapsed.as_millis() as u64,
                "evaluation cycle exceeded cycle_time",
            );
            self.last_overrun_warning_ms = Some(now);
        }
    }

    /// Runs cycles on a `tokio::time::interval` until `stop_signal()` is set.
    /// A cycle never overlaps its successor: the interval tick is the only
    /// pacing mechanism, and a cycle that overruns simply delays the next
    /// tick rather than skipping one (see [`Self::maybe_warn_overrun`]).
    pub async fn run(&mut self) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.cycle_time_ms));
        while !self.stop.is_stopped() {
            interval.tick().await;
            if self.stop.is_stopped() {
                break;
            }
            self.run_cycle();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Mutex;

    struct FixedStore {
        values: HashMap<String, SensorSample>,
        written: Mutex<HashMap<String, f64>>,
    }

    impl SensorStore for FixedStore {
        fn get_many(&self, names: &[String]) -> HashMap<String, SensorSample> {
            names.iter().filter_map(|n| self.values.get(n).map(|s| (n.clone(), *s))).collect()
        }
        fn set_many(&self, values: &HashMap<String, f64>) {
            self.written.lock().unwrap().extend(values.clone());
        }
    }

    struct DoubleRule;
    impl RuleSet for DoubleRule {
        fn evaluate(&self, inputs: &HashMap<String, f64>, outputs: &mut HashMap<String, f64>, _buffers: &BufferManager) {
            if let Some(v) = inputs.get("temperature") {
                outputs.insert("doubled".to_string(), v * 2.0);
            }
        }
        fn input_sensors(&self) -> &[String] {
            static NAMES: &[String] = &[];
            NAMES
        }
    }

    #[test]
    fn run_cycle_reads_evaluates_and_writes() {
        let mut values = HashMap::new();
        values.insert("temperature".to_string(), SensorSample { value: 21.0, timestamp_ms: 0 });
        let store = FixedStore { values, written: Mutex::new(HashMap::new()) };

        struct NamedRule;
        impl RuleSet for NamedRule {
            fn evaluate(&self, inputs: &HashMap<String, f64>, outputs: &mut HashMap<String, f64>, _b: &BufferManager) {
                if let Some(v) = inputs.get("temperature") {
                    outputs.insert("doubled".to_string(), v * 2.0);
                }
            }
            fn input_sensors(&self) -> &[String] {
                static NAMES: std::sync::OnceLock<Vec<String>> = std::sync::OnceLock::new();
                NAMES.get_or_init(|| vec!["temperature".to_string()])
            }
        }

        let clock = ManualClock::new(1_000);
        let mut driver = Driver::new(store, NamedRule, clock, BufferManager::default(), 100);
        let (outputs, _elapsed) = driver.run_cycle();
        assert_eq!(outputs.get("doubled"), Some(&42.0));
    }

    #[test]
    fn stop_signal_is_observable_after_stop() {
        let signal = StopSignal::new();
        assert!(!signal.is_stopped());
        signal.stop();
        assert!(signal.is_stopped());
    }

    #[test]
    fn overrun_warning_respects_one_per_minute_floor() {
        let store = FixedStore { values: HashMap::new(), written: Mutex::new(HashMap::new()) };
        let clock = ManualClock::new(0);
        let mut driver = Driver::new(store, DoubleRule, clock, BufferManager::default(), 1);

        driver.maybe_warn_overrun(Duration::from_millis(50), 0);
        assert_eq!(driver.last_overrun_warning_ms, Some(0));

        // Within the floor: no update to the recorded warning time.
        driver.maybe_warn_overrun(Duration::from_millis(50), 10_000);
        assert_eq!(driver.last_overrun_warning_ms, Some(0));

        // Past the floor: warning fires again.
        driver.maybe_warn_overrun(Duration::from_millis(50), 61_000);
        assert_eq!(driver.last_overrun_warning_ms, Some(61_000));
    }
}
