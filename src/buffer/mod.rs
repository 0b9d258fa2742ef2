//! Temporal ring-buffer subsystem backing the `threshold_over_time` condition.

pub mod manager;
pub mod ring_buffer;

pub use crate::dsl::ir::ThresholdMode;
pub use manager::BufferManager;
pub use ring_buffer::{RingBuffer, DEFAULT_CAPACITY};
