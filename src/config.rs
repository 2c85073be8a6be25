// src/config.rs
use std::fs;
use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::drivers::ConfigError;

/// Every tunable of a viewing session. Durations are in milliseconds so the JSON stays flat.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub port: String,
    pub baud: u32,
    pub read_timeout_ms: u64,
    /// Rolling window size. 100k samples is about 3 minutes of meter output.
    pub buffer_max_samples: usize,
    /// Points per refresh handed to the renderer.
    pub chart_max_samples: usize,
    /// Most raw samples folded into one displayed point.
    pub max_supersampling: usize,
    /// Median instead of mean: less noise, more CPU.
    pub median_filter: bool,
    pub refresh_interval_ms: u64,
    pub startup_timeout_ms: u64,
    pub data_timeout_ms: u64,
    pub max_error_count: u64,
    pub negative_floor: f64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud: 115_200,
            read_timeout_ms: 1000,
            buffer_max_samples: 100_000,
            chart_max_samples: 2048,
            max_supersampling: 16,
            median_filter: false,
            refresh_interval_ms: 66,
            startup_timeout_ms: 1000,
            data_timeout_ms: 500,
            max_error_count: 100,
            negative_floor: 1.0e-11,
        }
    }
}

impl ViewerConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chart_max_samples <= 10 {
            return Err(ConfigError::ChartTooSmall(self.chart_max_samples));
        }
        if self.buffer_max_samples < self.chart_max_samples {
            return Err(ConfigError::BufferSmallerThanChart {
                buffer: self.buffer_max_samples,
                chart: self.chart_max_samples,
            });
        }
        if self.max_supersampling == 0 {
            return Err(ConfigError::InvalidSupersampling);
        }
        if self.baud == 0 {
            return Err(ConfigError::InvalidBaud);
        }
        for (name, value) in [
            ("read timeout", self.read_timeout_ms),
            ("refresh interval", self.refresh_interval_ms),
            ("startup timeout", self.startup_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDuration(name));
            }
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn data_timeout(&self) -> Duration {
        Duration::from_millis(self.data_timeout_ms)
    }
}
