use std::collections::VecDeque;
use crate::types::Sample;
/// Rolling buffer of the most recent samples, oldest first.
///
/// Timestamp and value travel together as one `Sample`, so a push either lands whole or
/// not at all.
#[derive(Debug)]
pub struct SampleBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
}
impl SampleBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }
    pub fn len(&self) -> usize {
        self.samples.len()
    }
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
    pub fn push(&mut self, sample: Sample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }
    pub fn latest(&self) -> Option<Sample> {
        self.samples.back().copied()
    }
    /// Copies the most recent `count` samples (fewer if the buffer is shorter), oldest first.
    pub fn snapshot_range(&self, count: usize) -> Vec<Sample> {
        let skip = self.samples.len().saturating_sub(count);
        self.samples.iter().skip(skip).copied().collect()
    }
    pub fn snapshot(&self) -> Vec<Sample> {
        self.snapshot_range(self.samples.len())
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    fn sample_at(t0: Instant, i: u64, amps: f64) -> Sample {
        Sample::new(t0 + Duration::from_millis(i), amps)
    }
    #[test]
    fn overflow_keeps_most_recent_in_arrival_order() {
        let t0 = Instant::now();
        let mut buffer = SampleBuffer::with_capacity(100);
        for i in 0..250 {
            buffer.push(sample_at(t0, i, i as f64));
        }
        assert_eq!(buffer.len(), 100);
        let kept: Vec<f64> = buffer.snapshot().iter().map(|s| s.amps).collect();
        let expected: Vec<f64> = (150..250).map(|i| i as f64).collect();
        assert_eq!(kept, expected);
        assert!(buffer
            .snapshot()
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp));
    }
    #[test]
    fn snapshot_range_returns_tail() {
        let t0 = Instant::now();
        let mut buffer = SampleBuffer::with_capacity(10);
        for i in 0..5 {
            buffer.push(sample_at(t0, i, i as f64));
        }
        let tail = buffer.snapshot_range(2);
        assert_eq!(tail.iter().map(|s| s.amps).collect::<Vec<_>>(), vec![3.0, 4.0]);
        assert_eq!(buffer.snapshot_range(50).len(), 5);
        assert_eq!(buffer.latest().map(|s| s.amps), Some(4.0));
    }
    #[test]
    fn empty_buffer() {
        let mut buffer = SampleBuffer::with_capacity(0);
        assert!(buffer.is_empty());
        assert!(buffer.latest().is_none());
        assert!(buffer.snapshot_range(3).is_empty());
        // a zero capacity still holds the newest sample
        let t0 = Instant::now();
        buffer.push(sample_at(t0, 0, 1.0));
        buffer.push(sample_at(t0, 1, 2.0));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.latest().map(|s| s.amps), Some(2.0));
    }
    #[test]
    fn constant_stream_scenario() {
        let t0 = Instant::now();
        let mut buffer = SampleBuffer::with_capacity(1000);
        for i in 0..3000 {
            buffer.push(sample_at(t0, i, 0.001));
        }
        assert_eq!(buffer.len(), 1000);
        assert_eq!(buffer.snapshot()[0].timestamp, t0 + Duration::from_millis(2000));
    }
}
