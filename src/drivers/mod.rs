// src/drivers/mod.rs
// acquisition core: device link, decoding, buffering, reduction
pub mod buffer;
pub mod clock;
pub mod decoder;
pub mod downsample;
pub mod error;
pub mod ingest;
pub mod source;
// re-exported so callers don't need the module paths
pub use buffer::SampleBuffer;
pub use clock::{Clock, SystemClock};
pub use downsample::{samples_per_second, DownsampleEngine};
pub use error::{ConfigError, ConnectError, ReduceError, StreamError};
pub use ingest::{IngestPhase, IngestPolicy, IngestShared, StreamIngest};
pub use source::{DeviceConnection, SerialConnection, SimulatedConnection};
