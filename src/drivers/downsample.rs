use std::time::{Duration, Instant};
use crate::config::ViewerConfig;
use crate::drivers::ReduceError;
use crate::types::{DisplayPoint, DisplaySeries, Sample};
/// Trailing window used for the throughput estimate.
pub const SPS_WINDOW: usize = 512;
/// With no sample for this long the stream counts as silent.
pub const SILENCE_THRESHOLD: Duration = Duration::from_secs(1);
/// Turns an arbitrarily deep buffer snapshot into a chart-sized series.
#[derive(Clone, Copy, Debug)]
pub struct DownsampleEngine {
    chart_max_samples: usize,
    supersample_cap: usize,
    use_median: bool,
}
impl DownsampleEngine {
    pub fn new(chart_max_samples: usize, supersample_cap: usize, use_median: bool) -> Self {
        Self {
            chart_max_samples,
            supersample_cap,
            use_median,
        }
    }
    pub fn from_config(config: &ViewerConfig) -> Self {
        Self::new(
            config.chart_max_samples,
            config.max_supersampling,
            config.median_filter,
        )
    }
    pub fn reduce(&self, snapshot: &[Sample]) -> Result<DisplaySeries, ReduceError> {
        reduce(
            snapshot,
            self.chart_max_samples,
            self.supersample_cap,
            self.use_median,
        )
    }
}
/// Reduces `snapshot` to exactly `chart_max_samples` points.
///
/// Output point `i` starts at `floor(S * i / M)` and aggregates up to `supersample_cap`
/// contiguous samples from there. It keeps the timestamp of its first sample so the x-axis
/// stays left-aligned.
pub fn reduce(
    snapshot: &[Sample],
    chart_max_samples: usize,
    supersample_cap: usize,
    use_median: bool,
) -> Result<DisplaySeries, ReduceError> {
    let len = snapshot.len();
    if len < 2 {
        return Err(ReduceError::InsufficientData(len));
    }
    let window = (len / chart_max_samples.max(1)).min(supersample_cap).max(1);
    let mut scratch = Vec::with_capacity(window);
    let points = (0..chart_max_samples)
        .map(|i| {
            let start = len * i / chart_max_samples;
            let end = (start + window).min(len);
            scratch.clear();
            scratch.extend(snapshot[start..end].iter().map(|s| s.amps));
            let amps = if use_median {
                median(&mut scratch)
            } else {
                mean(&scratch)
            };
            DisplayPoint {
                timestamp: snapshot[start].timestamp,
                amps,
            }
        })
        .collect();
    Ok(DisplaySeries { points })
}
/// Samples per second over the trailing `SPS_WINDOW` samples, measured up to `now`.
///
/// Reports exactly zero once the newest sample is `SILENCE_THRESHOLD` old.
pub fn samples_per_second(snapshot: &[Sample], now: Instant) -> f64 {
    let Some(newest) = snapshot.last() else {
        return 0.0;
    };
    if now.saturating_duration_since(newest.timestamp) >= SILENCE_THRESHOLD {
        return 0.0;
    }
    let count = snapshot.len().min(SPS_WINDOW);
    let oldest = snapshot[snapshot.len() - count].timestamp;
    let elapsed = now.saturating_duration_since(oldest).as_secs_f64();
    if elapsed > 0.0 {
        count as f64 / elapsed
    } else {
        0.0
    }
}
fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
