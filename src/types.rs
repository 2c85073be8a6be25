// src/types.rs
use std::time::Instant;

/// One current reading, stamped when the read for it started.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub timestamp: Instant,
    pub amps: f64,
}

impl Sample {
    pub fn new(timestamp: Instant, amps: f64) -> Self {
        Self { timestamp, amps }
    }
}

// Session lifecycle as seen by the renderer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Streaming,
    Paused,
    Disconnected,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Aborted)
    }
}

/// Counters maintained by the ingest loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IngestStats {
    pub sample_count: u64,
    pub error_count: u64,
    pub line_count: u64,
    pub start_time: Instant,
    pub last_sample_time: Option<Instant>,
}

impl IngestStats {
    pub fn new(start_time: Instant) -> Self {
        Self {
            sample_count: 0,
            error_count: 0,
            line_count: 0,
            start_time,
            last_sample_time: None,
        }
    }

    /// Seconds since the last accepted sample, or since ingest started if none arrived yet.
    pub fn seconds_since_last_sample(&self, now: Instant) -> f64 {
        let reference = self.last_sample_time.unwrap_or(self.start_time);
        now.saturating_duration_since(reference).as_secs_f64()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayPoint {
    pub timestamp: Instant,
    pub amps: f64,
}

/// Fixed-size reduced view of the buffer, rebuilt on every pull.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DisplaySeries {
    pub points: Vec<DisplayPoint>,
}

impl DisplaySeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&DisplayPoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&DisplayPoint> {
        self.points.last()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        let total: f64 = self.points.iter().map(|p| p.amps).sum();
        Some(total / self.points.len() as f64)
    }
}

/// What the renderer gets on each refresh.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplayFrame {
    pub series: DisplaySeries,
    pub sps: f64,
}
