use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to open serial port '{port}' at {baud} baud: {source}")]
    Open {
        port: String,
        baud: u32,
        #[source]
        source: serialport::Error,
    },
    #[error("no data samples received within {0:?}")]
    NoData(Duration),
    #[error("failed to spawn ingest thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("session was already started; open a new session to reconnect")]
    AlreadyStarted,
    #[error("ingest failed before the first sample: {0}")]
    Stream(#[source] StreamError),
}

/// Conditions that end the ingest loop.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("serial I/O failure: {0}")]
    Io(#[from] io::Error),
    #[error(
        "error rate too high: {errors} errors, last valid sample received {gap_secs:.3} seconds ago"
    )]
    DataTimeout { errors: u64, gap_secs: f64 },
    #[error("ingest thread panicked")]
    Panicked,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReduceError {
    #[error("need at least 2 samples to build a display series, have {0}")]
    InsufficientData(usize),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("chart must display more than 10 samples, got {0}")]
    ChartTooSmall(usize),
    #[error("buffer size ({buffer}) cannot be smaller than the chart sample size ({chart})")]
    BufferSmallerThanChart { buffer: usize, chart: usize },
    #[error("supersampling cap must be at least 1")]
    InvalidSupersampling,
    #[error("baud rate must be greater than zero")]
    InvalidBaud,
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("failed to read config file: {0}")]
    Read(#[from] io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}
