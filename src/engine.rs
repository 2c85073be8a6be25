// src/engine.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use log::{debug, error, info};
use crate::config::ViewerConfig;
use crate::drivers::{
    samples_per_second, Clock, ConnectError, DeviceConnection, DownsampleEngine, IngestPhase,
    IngestPolicy, IngestShared, ReduceError, SerialConnection, StreamError, StreamIngest,
    SystemClock,
};
use crate::recorder::SampleSink;
use crate::types::{DisplayFrame, IngestStats, SessionState};

const LIVENESS_POLL: Duration = Duration::from_millis(10);

/// One connection to one meter: owns the ingest thread and answers the renderer's pulls.
pub struct DeviceSession {
    config: ViewerConfig,
    clock: Arc<dyn Clock>,
    shared: Arc<IngestShared>,
    stop: Arc<AtomicBool>,
    paused: AtomicBool,
    aborted: AtomicBool,
    engine: DownsampleEngine,
    sink: Option<Box<dyn SampleSink>>,
    worker: Option<JoinHandle<Result<(), StreamError>>>,
}

impl DeviceSession {
    pub fn new(config: ViewerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: ViewerConfig, clock: Arc<dyn Clock>) -> Self {
        let shared = Arc::new(IngestShared::new(config.buffer_max_samples, clock.as_ref()));
        Self {
            engine: DownsampleEngine::from_config(&config),
            config,
            clock,
            shared,
            stop: Arc::new(AtomicBool::new(false)),
            paused: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            sink: None,
            worker: None,
        }
    }

    /// Mirrors every accepted sample to `sink`. Takes effect at the next start.
    pub fn set_sink(&mut self, sink: Box<dyn SampleSink>) {
        self.sink = Some(sink);
    }

    pub fn start(&mut self, port: &str, baud: u32) -> Result<(), ConnectError> {
        if self.worker.is_some() || self.shared.phase() != IngestPhase::Idle {
            return Err(ConnectError::AlreadyStarted);
        }
        let conn = SerialConnection::open(port, baud, self.config.read_timeout()).map_err(|e| {
            error!("Error connecting to serial port: {e}");
            e
        })?;
        self.start_with(Box::new(conn))
    }

    /// Starts ingesting from an already open connection and waits for the first sample.
    pub fn start_with(&mut self, conn: Box<dyn DeviceConnection>) -> Result<(), ConnectError> {
        if self.worker.is_some() || self.shared.phase() != IngestPhase::Idle {
            return Err(ConnectError::AlreadyStarted);
        }
        self.shared.set_phase(IngestPhase::Starting);
        let ingest = StreamIngest::new(
            Arc::clone(&self.shared),
            Arc::clone(&self.stop),
            Arc::clone(&self.clock),
            IngestPolicy::from_config(&self.config),
        )
        .with_sink(self.sink.take());
        let handle = thread::Builder::new()
            .name("serial-ingest".into())
            .spawn(move || ingest.run(conn))
            .map_err(|e| {
                self.shared.set_phase(IngestPhase::Failed);
                ConnectError::Spawn(e)
            })?;
        self.worker = Some(handle);
        self.await_first_sample()
    }

    fn await_first_sample(&mut self) -> Result<(), ConnectError> {
        let timeout = self.config.startup_timeout();
        let deadline = Instant::now() + timeout;
        info!("Initializing data capture");
        loop {
            if self.shared.stats().sample_count > 0 {
                info!("Data capture running");
                return Ok(());
            }
            if self.shared.phase().is_finished() || Instant::now() >= deadline {
                break;
            }
            thread::sleep(LIVENESS_POLL);
        }
        self.aborted.store(true, Ordering::Relaxed);
        match self.shutdown() {
            Some(Err(e)) => {
                error!("Ingest failed before the first sample: {e}");
                Err(ConnectError::Stream(e))
            }
            _ => {
                error!("No data samples received within {timeout:?}. Aborting");
                Err(ConnectError::NoData(timeout))
            }
        }
    }

    /// Freezes what the renderer sees. Ingestion keeps filling the buffer.
    pub fn pause(&self) {
        debug!("pause");
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        debug!("resume");
        self.paused.store(false, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        if self.shutdown().is_some() {
            info!("Connection closed.");
        }
    }

    /// Signals the ingest thread and joins it, handing back how it ended. `None` if nothing
    /// was running.
    fn shutdown(&mut self) -> Option<Result<(), StreamError>> {
        self.stop.store(true, Ordering::Relaxed);
        let handle = self.worker.take()?;
        let outcome = handle.join().unwrap_or_else(|_| {
            self.shared.set_phase(IngestPhase::Failed);
            Err(StreamError::Panicked)
        });
        match &outcome {
            Ok(()) => debug!("Ingest thread finished"),
            Err(e) => debug!("Ingest thread ended with: {e}"),
        }
        Some(outcome)
    }

    pub fn is_streaming(&self) -> bool {
        self.worker.is_some()
            && !self.aborted.load(Ordering::Relaxed)
            && self.shared.phase() == IngestPhase::Running
    }

    pub fn state(&self) -> SessionState {
        if self.aborted.load(Ordering::Relaxed) {
            return SessionState::Aborted;
        }
        match self.shared.phase() {
            IngestPhase::Idle | IngestPhase::Stopping | IngestPhase::Failed => {
                SessionState::Disconnected
            }
            IngestPhase::Starting => SessionState::Connecting,
            IngestPhase::Running if self.shared.stats().sample_count == 0 => {
                SessionState::Connecting
            }
            IngestPhase::Running if self.is_paused() => SessionState::Paused,
            IngestPhase::Running => SessionState::Streaming,
        }
    }

    pub fn stats(&self) -> IngestStats {
        self.shared.stats()
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    /// Reduces the current buffer for display. `None` means skip this refresh: paused,
    /// no longer streaming, or not enough data yet.
    pub fn poll_display(&self) -> Option<DisplayFrame> {
        if self.is_paused() || !self.is_streaming() {
            return None;
        }
        // copy under the lock, reduce outside it
        let snapshot = self.shared.snapshot();
        let now = self.clock.now();
        match self.engine.reduce(&snapshot) {
            Ok(series) => Some(DisplayFrame {
                series,
                sps: samples_per_second(&snapshot, now),
            }),
            Err(ReduceError::InsufficientData(n)) => {
                debug!("Skipping refresh, {n} samples buffered");
                None
            }
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
