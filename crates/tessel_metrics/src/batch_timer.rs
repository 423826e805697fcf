//! Rolling latency and throughput of dispatched batches

use super::ring_buffer::RingBuffer;
use std::time::Duration;

#[derive(Debug)]
pub struct BatchTimer {
    latencies: RingBuffer<Duration>,
    throughput: RingBuffer<f64>,
}

impl BatchTimer {
    pub fn new(capacity: usize) -> Self {
        Self {
            latencies: RingBuffer::new(capacity),
            throughput: RingBuffer::new(capacity),
        }
    }

    /// Record one completed batch of `items` cells.
    pub fn record(&mut self, elapsed: Duration, items: usize) {
        self.latencies.push(elapsed);
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            self.throughput.push(items as f64 / secs);
        }
    }

    pub fn average_ms(&self) -> f64 {
        self.latencies.average().as_secs_f64() * 1000.0
    }

    pub fn items_per_second(&self) -> f64 {
        self.throughput.average()
    }

    pub fn samples(&self) -> usize {
        self.latencies.len()
    }
}
