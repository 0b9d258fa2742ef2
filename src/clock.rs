//! Time source abstraction.
//!
//! The ring buffer, buffer manager, and runtime driver all need "now" in
//! Unix milliseconds, but none of them should call `SystemTime::now()`
//! directly — that makes temporal behavior (ring-buffer windowing, overrun
//! rate-limiting) impossible to exercise deterministically in tests. Every
//! caller is threaded a `&dyn Clock` instead.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of the current time, in Unix milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
    }
}

/// A clock whose value is set explicitly, for deterministic tests of
/// anything that reasons about elapsed time.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        ManualClock { now: AtomicI64::new(now_ms) }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// `now - timestamp`, saturating so malformed or future samples never panic
/// or wrap.
#[inline]
pub fn age_ms(timestamp: i64, now: i64) -> i64 {
    now.saturating_sub(timestamp)
}

/// Whether `timestamp` falls in the closed window `[now - duration_ms, now]`.
#[inline]
pub fn within_window(timestamp: i64, now: i64, duration_ms: i64) -> bool {
    let age = age_ms(timestamp, now);
    age >= 0 && age <= duration_ms
}
