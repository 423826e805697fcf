//! Tessel Metrics - lightweight instrumentation for the grid engine
//!
//! Named counters, rolling batch timers and a scope profiler used by the
//! topology parser and the worker dispatcher. Everything collapses to
//! zero-sized no-ops unless the `metrics` feature is enabled.
//!
//! # Feature Flags
//!
//! - `metrics` - Enable metrics collection (default: disabled)
//!
//! # Usage
//!
//! ```ignore
//! use tessel_metrics::{BatchTimer, SystemProfiler};
//!
//! let mut profiler = SystemProfiler::new();
//! let edges = profiler.time_phase("edges", || build_edges());
//! tracing::debug!(edges_ms = profiler.phase_ms("edges"));
//! ```

#[cfg(feature = "metrics")]
mod batch_timer;
#[cfg(feature = "metrics")]
mod counter;
#[cfg(feature = "metrics")]
mod ring_buffer;
#[cfg(feature = "metrics")]
mod system_profiler;

#[cfg(feature = "metrics")]
pub use batch_timer::BatchTimer;
#[cfg(feature = "metrics")]
pub use counter::Counter;
#[cfg(feature = "metrics")]
pub use ring_buffer::RingBuffer;
#[cfg(feature = "metrics")]
pub use system_profiler::SystemProfiler;

// ============================================================================
// No-op stubs when metrics disabled
// ============================================================================

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Default)]
pub struct BatchTimer;

#[cfg(not(feature = "metrics"))]
impl BatchTimer {
    pub fn new(_capacity: usize) -> Self { Self }
    pub fn record(&mut self, _elapsed: std::time::Duration, _items: usize) {}
    pub fn average_ms(&self) -> f64 { 0.0 }
    pub fn items_per_second(&self) -> f64 { 0.0 }
    pub fn samples(&self) -> usize { 0 }
}

#[cfg(not(feature = "metrics"))]
pub struct RingBuffer<T>(std::marker::PhantomData<T>);

#[cfg(not(feature = "metrics"))]
impl<T> RingBuffer<T> {
    pub fn new(_capacity: usize) -> Self { Self(std::marker::PhantomData) }
    pub fn push(&mut self, _value: T) {}
    pub fn len(&self) -> usize { 0 }
    pub fn is_empty(&self) -> bool { true }
    pub fn average(&self) -> T where T: Default { T::default() }
}

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Default)]
pub struct Counter;

#[cfg(not(feature = "metrics"))]
impl Counter {
    pub fn new() -> Self { Self }
    pub fn increment(&mut self, _name: &'static str, _value: usize) {}
    pub fn get(&self, _name: &str) -> usize { 0 }
    pub fn total(&self) -> usize { 0 }
}

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Default)]
pub struct SystemProfiler;

#[cfg(not(feature = "metrics"))]
impl SystemProfiler {
    pub fn new() -> Self { Self }
    pub fn time_phase<F, R>(&mut self, _phase: &'static str, f: F) -> R where F: FnOnce() -> R { f() }
    pub fn phase_time(&self, _phase: &str) -> std::time::Duration { std::time::Duration::ZERO }
    pub fn calls(&self, _phase: &str) -> u32 { 0 }
    pub fn phase_ms(&self, _phase: &str) -> f64 { 0.0 }
}
