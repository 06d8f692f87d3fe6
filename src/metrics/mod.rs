//! Lightweight run metrics: process memory for progress updates and
//! periodic throughput logging over explicit counters.

pub mod memory;
pub mod throughput;

pub use memory::{MemoryProbe, MemoryStats};
pub use throughput::ThroughputMonitor;
