//! Accumulated wall-clock timings for named phases

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PhaseStats {
    total: Duration,
    calls: u32,
}

#[derive(Debug, Default)]
pub struct SystemProfiler {
    phases: HashMap<&'static str, PhaseStats>,
}

impl SystemProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f`, adding its wall-clock time to `phase`.
    pub fn time_phase<F, R>(&mut self, phase: &'static str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        let stats = self.phases.entry(phase).or_default();
        stats.total += start.elapsed();
        stats.calls += 1;
        result
    }

    pub fn phase_time(&self, phase: &str) -> Duration {
        self.phases.get(phase).map_or(Duration::ZERO, |stats| stats.total)
    }

    pub fn calls(&self, phase: &str) -> u32 {
        self.phases.get(phase).map_or(0, |stats| stats.calls)
    }

    /// Milliseconds spent in `phase`, for log fields.
    pub fn phase_ms(&self, phase: &str) -> f64 {
        self.phase_time(phase).as_secs_f64() * 1000.0
    }
}
