//! Fixed-size window of recent samples

use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug)]
pub struct RingBuffer<T> {
    window: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Adds a sample, evicting the oldest once the window is full.
    pub fn push(&mut self, sample: T) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

impl RingBuffer<Duration> {
    pub fn average(&self) -> Duration {
        match self.window.len() {
            0 => Duration::ZERO,
            n => self.window.iter().sum::<Duration>() / n as u32,
        }
    }
}

impl RingBuffer<f64> {
    pub fn average(&self) -> f64 {
        match self.window.len() {
            0 => 0.0,
            n => self.window.iter().sum::<f64>() / n as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_newest_samples() {
        let mut buffer = RingBuffer::<f64>::new(3);
        assert_eq!(buffer.average(), 0.0);
        for sample in [1.0, 2.0, 3.0, 10.0] {
            buffer.push(sample);
        }
        assert_eq!(buffer.len(), 3);
        assert!((buffer.average() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn averages_durations() {
        let mut buffer = RingBuffer::new(2);
        buffer.push(Duration::from_millis(10));
        buffer.push(Duration::from_millis(20));
        assert_eq!(buffer.average(), Duration::from_millis(15));
    }
}
