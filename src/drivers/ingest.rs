use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use log::{debug, error, info, warn};
use crate::config::ViewerConfig;
use crate::drivers::clock::Clock;
use crate::drivers::decoder::{ControlSignal, DecodeResult, LineDecoder};
use crate::drivers::source::{DeviceConnection, STREAM_TOGGLE};
use crate::drivers::{SampleBuffer, StreamError};
use crate::recorder::SampleSink;
use crate::types::{IngestStats, Sample};
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestPhase {
    Idle,
    Starting,
    Running,
    Stopping,
    Failed,
}
impl IngestPhase {
    pub fn is_finished(self) -> bool {
        matches!(self, IngestPhase::Stopping | IngestPhase::Failed)
    }
}
/// Buffer, counters and phase shared between the ingest thread and its readers.
///
/// Only the ingest thread writes. Readers take a lock just long enough to copy out.
#[derive(Debug)]
pub struct IngestShared {
    buffer: Mutex<SampleBuffer>,
    stats: Mutex<IngestStats>,
    phase: Mutex<IngestPhase>,
}
impl IngestShared {
    pub fn new(capacity: usize, clock: &dyn Clock) -> Self {
        Self {
            buffer: Mutex::new(SampleBuffer::with_capacity(capacity)),
            stats: Mutex::new(IngestStats::new(clock.now())),
            phase: Mutex::new(IngestPhase::Idle),
        }
    }
    pub fn snapshot(&self) -> Vec<Sample> {
        lock(&self.buffer).snapshot()
    }
    pub fn latest(&self) -> Option<Sample> {
        lock(&self.buffer).latest()
    }
    pub fn stats(&self) -> IngestStats {
        *lock(&self.stats)
    }
    pub fn phase(&self) -> IngestPhase {
        *lock(&self.phase)
    }
    pub(crate) fn set_phase(&self, phase: IngestPhase) {
        let mut current = lock(&self.phase);
        if *current != phase {
            debug!("Ingest phase {:?} -> {:?}", *current, phase);
            *current = phase;
        }
    }
}
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
/// When to give up on a noisy link, and how to treat odd readings.
#[derive(Clone, Copy, Debug)]
pub struct IngestPolicy {
    pub max_error_count: u64,
    pub data_timeout: Duration,
    pub negative_floor: f64,
    pub summary_every: u64,
}
impl Default for IngestPolicy {
    fn default() -> Self {
        Self {
            max_error_count: 100,
            data_timeout: Duration::from_millis(500),
            negative_floor: 1.0e-11,
            summary_every: 1000,
        }
    }
}
impl IngestPolicy {
    pub fn from_config(config: &ViewerConfig) -> Self {
        Self {
            max_error_count: config.max_error_count,
            data_timeout: config.data_timeout(),
            negative_floor: config.negative_floor,
            ..Self::default()
        }
    }
}
/// The read loop: device lines in, buffered samples out.
pub struct StreamIngest {
    decoder: LineDecoder,
    policy: IngestPolicy,
    shared: Arc<IngestShared>,
    stop: Arc<AtomicBool>,
    clock: Arc<dyn Clock>,
    sink: Option<Box<dyn SampleSink>>,
}
impl StreamIngest {
    pub fn new(
        shared: Arc<IngestShared>,
        stop: Arc<AtomicBool>,
        clock: Arc<dyn Clock>,
        policy: IngestPolicy,
    ) -> Self {
        Self {
            decoder: LineDecoder::new(),
            policy,
            shared,
            stop,
            clock,
            sink: None,
        }
    }
    pub fn with_sink(mut self, sink: Option<Box<dyn SampleSink>>) -> Self {
        self.sink = sink;
        self
    }
    /// Streams until stopped or failed, then switches streaming off and releases the link.
    pub fn run(mut self, mut conn: Box<dyn DeviceConnection>) -> Result<(), StreamError> {
        self.shared.set_phase(IngestPhase::Starting);
        let result = self
            .start_stream(conn.as_mut())
            .and_then(|()| self.read_loop(conn.as_mut()));
        match &result {
            Ok(()) => {
                info!("Streaming stopped on request");
                self.shared.set_phase(IngestPhase::Stopping);
            }
            Err(e) => {
                error!("Aborting stream: {e}");
                self.shared.set_phase(IngestPhase::Failed);
            }
        }
        // lets the meter power down if it is in auto-off mode
        info!("Telling device to stop USB streaming");
        if let Err(e) = conn.write(STREAM_TOGGLE) {
            warn!("Was not able to cleanly disconnect from the device: {e}");
        }
        conn.close();
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.finish() {
                warn!("Failed to finalize recording: {e}");
            }
        }
        info!("Serial streaming terminated");
        result
    }
    pub(crate) fn start_stream(
        &mut self,
        conn: &mut dyn DeviceConnection,
    ) -> Result<(), StreamError> {
        conn.write(STREAM_TOGGLE)?;
        conn.flush_input()?;
        *lock(&self.shared.stats) = IngestStats::new(self.clock.now());
        self.shared.set_phase(IngestPhase::Running);
        info!("Starting USB streaming loop");
        Ok(())
    }
    fn read_loop(&mut self, conn: &mut dyn DeviceConnection) -> Result<(), StreamError> {
        while !self.stop.load(Ordering::Relaxed) {
            // stamp before the read; closer to when the meter took the reading
            let ts = self.clock.now();
            let line = conn.read_line()?;
            self.process_line(ts, &line, conn)?;
        }
        Ok(())
    }
    pub(crate) fn process_line(
        &mut self,
        ts: std::time::Instant,
        line: &str,
        conn: &mut dyn DeviceConnection,
    ) -> Result<(), StreamError> {
        lock(&self.shared.stats).line_count += 1;
        match self.decoder.decode(line) {
            DecodeResult::Sample(value) => self.accept(ts, value, line),
            DecodeResult::Control(ControlSignal::LoggingDisabled) => {
                // left off by another process or a previous instance
                info!("USB logging was disabled. Re-enabling");
                conn.write(STREAM_TOGGLE)?;
            }
            DecodeResult::Control(ControlSignal::Other) => {
                debug!("Device status: '{}'", line.trim_end());
            }
            DecodeResult::Malformed(raw) => self.reject(&raw)?,
        }
        Ok(())
    }
    fn accept(&mut self, ts: std::time::Instant, value: f64, line: &str) {
        let amps = if value < 0.0 {
            warn!("Unexpected value='{}'", line.trim());
            self.policy.negative_floor
        } else {
            value
        };
        let failed = match self.sink.as_mut() {
            Some(sink) => sink.record(&Sample::new(ts, value)).err(),
            None => None,
        };
        if let Some(e) = failed {
            warn!("Recording failed, detaching recorder: {e}");
            self.sink = None;
        }
        lock(&self.shared.buffer).push(Sample::new(ts, amps));
        let (count, start_time) = {
            let mut stats = lock(&self.shared.stats);
            stats.sample_count += 1;
            stats.last_sample_time = Some(ts);
            (stats.sample_count, stats.start_time)
        };
        debug!("#{count}: {amps}");
        if self.policy.summary_every > 0 && count % self.policy.summary_every == 0 {
            let elapsed = self.clock.now().saturating_duration_since(start_time);
            info!(
                "Received {count} samples in {:.0}ms ({:.2} samples/second)",
                elapsed.as_secs_f64() * 1000.0,
                throughput(count, elapsed)
            );
        }
    }
    fn reject(&mut self, raw: &str) -> Result<(), StreamError> {
        let now = self.clock.now();
        let (errors, gap_secs) = {
            let mut stats = lock(&self.shared.stats);
            stats.error_count += 1;
            (stats.error_count, stats.seconds_since_last_sample(now))
        };
        error!("Invalid data format: '{}'", raw.trim_end());
        let stale = gap_secs > self.policy.data_timeout.as_secs_f64();
        if errors > self.policy.max_error_count && stale {
            return Err(StreamError::DataTimeout { errors, gap_secs });
        }
        Ok(())
    }
}
/// Samples per second over `elapsed`; zero when no time has passed.
fn throughput(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;
    use crate::drivers::clock::ManualClock;
    use crate::drivers::source::ScriptedConnection;
    struct CollectingSink(Arc<Mutex<Vec<f64>>>, Arc<AtomicBool>);
    impl SampleSink for CollectingSink {
        fn record(&mut self, sample: &Sample) -> io::Result<()> {
            self.0.lock().unwrap().push(sample.amps);
            Ok(())
        }
        fn finish(&mut self) -> io::Result<()> {
            self.1.store(true, Ordering::Relaxed);
            Ok(())
        }
    }
    struct BrokenSink {
        records: Arc<AtomicUsize>,
        finished: Arc<AtomicBool>,
    }
    impl SampleSink for BrokenSink {
        fn record(&mut self, _sample: &Sample) -> io::Result<()> {
            self.records.fetch_add(1, Ordering::Relaxed);
            Err(io::Error::new(io::ErrorKind::StorageFull, "disk full"))
        }
        fn finish(&mut self) -> io::Result<()> {
            self.finished.store(true, Ordering::Relaxed);
            Ok(())
        }
    }
    fn ingest_with(clock: ManualClock) -> (StreamIngest, Arc<IngestShared>, Arc<AtomicBool>) {
        let clock: Arc<dyn Clock> = Arc::new(clock);
        let shared = Arc::new(IngestShared::new(1000, clock.as_ref()));
        let stop = Arc::new(AtomicBool::new(false));
        let ingest = StreamIngest::new(
            Arc::clone(&shared),
            Arc::clone(&stop),
            clock,
            IngestPolicy::default(),
        );
        (ingest, shared, stop)
    }
    #[test]
    fn tolerates_a_burst_below_the_error_threshold() {
        let clock = ManualClock::new(Instant::now());
        let (mut ingest, shared, _) = ingest_with(clock.clone());
        let mut conn = ScriptedConnection::new(Vec::<String>::new());
        ingest.start_stream(&mut conn).unwrap();
        for _ in 0..50 {
            clock.advance(Duration::from_millis(1));
            ingest.process_line(clock.now(), "#!garbage\n", &mut conn).unwrap();
        }
        ingest.process_line(clock.now(), "0.002\n", &mut conn).unwrap();
        let stats = shared.stats();
        assert_eq!(stats.error_count, 50);
        assert_eq!(stats.sample_count, 1);
        assert_eq!(stats.line_count, 51);
        assert_eq!(shared.phase(), IngestPhase::Running);
    }
    #[test]
    fn errors_alone_do_not_abort_while_samples_are_recent() {
        let clock = ManualClock::new(Instant::now());
        let (mut ingest, shared, _) = ingest_with(clock.clone());
        let mut conn = ScriptedConnection::new(Vec::<String>::new());
        ingest.start_stream(&mut conn).unwrap();
        for _ in 0..500 {
            ingest.process_line(clock.now(), "0.002\n", &mut conn).unwrap();
            ingest.process_line(clock.now(), "\n", &mut conn).unwrap();
        }
        assert_eq!(shared.stats().error_count, 500);
    }
    #[test]
    fn sustained_garbage_aborts_and_disables_streaming_once() {
        let clock = ManualClock::ticking(Instant::now(), Duration::from_millis(10));
        let (ingest, shared, _) = ingest_with(clock);
        let conn = ScriptedConnection::new(vec!["\u{fffd}\u{fffd}\n"; 150]);
        let log = conn.log();
        let result = ingest.run(Box::new(conn));
        match result {
            Err(StreamError::DataTimeout { errors, gap_secs }) => {
                assert_eq!(errors, 101);
                assert!(gap_secs > 0.5);
            }
            other => panic!("expected data timeout, got {other:?}"),
        }
        assert_eq!(shared.phase(), IngestPhase::Failed);
        assert_eq!(shared.stats().sample_count, 0);
        let log = log.lock().unwrap();
        // enable, then a single disable on the way out
        assert_eq!(log.writes, vec![STREAM_TOGGLE.to_vec(), STREAM_TOGGLE.to_vec()]);
        assert_eq!(log.input_flushes, 1);
        assert!(log.closed);
    }
    #[test]
    fn negative_readings_are_floored() {
        let clock = ManualClock::new(Instant::now());
        let (mut ingest, shared, _) = ingest_with(clock.clone());
        let mut conn = ScriptedConnection::new(Vec::<String>::new());
        ingest.start_stream(&mut conn).unwrap();
        ingest.process_line(clock.now(), "-0.0005\r\n", &mut conn).unwrap();
        ingest.process_line(clock.now(), "0.0005\r\n", &mut conn).unwrap();
        let values: Vec<f64> = shared.snapshot().iter().map(|s| s.amps).collect();
        assert_eq!(values, vec![1.0e-11, 0.0005]);
        assert_eq!(shared.stats().sample_count, 2);
        assert_eq!(shared.stats().error_count, 0);
    }
    #[test]
    fn disabled_logging_is_switched_back_on() {
        let clock = ManualClock::new(Instant::now());
        let (mut ingest, shared, _) = ingest_with(clock.clone());
        let mut conn = ScriptedConnection::new(Vec::<String>::new());
        let log = conn.log();
        ingest.start_stream(&mut conn).unwrap();
        ingest
            .process_line(clock.now(), "USB_LOGGING_DISABLED\r\n", &mut conn)
            .unwrap();
        ingest
            .process_line(clock.now(), "USB_LOGGING_ENABLED\r\n", &mut conn)
            .unwrap();
        let stats = shared.stats();
        assert_eq!((stats.sample_count, stats.error_count, stats.line_count), (0, 0, 2));
        assert_eq!(log.lock().unwrap().writes.len(), 2);
        assert!(shared.snapshot().is_empty());
    }
    #[test]
    fn io_failure_is_fatal_and_still_tries_to_disable() {
        let clock = ManualClock::new(Instant::now());
        let (ingest, shared, _) = ingest_with(clock);
        let conn = ScriptedConnection::new(["0.001\n"]).then_fail(io::ErrorKind::BrokenPipe);
        let log = conn.log();
        let result = ingest.run(Box::new(conn));
        assert!(matches!(result, Err(StreamError::Io(_))));
        assert_eq!(shared.phase(), IngestPhase::Failed);
        assert_eq!(shared.stats().sample_count, 1);
        let log = log.lock().unwrap();
        assert_eq!(log.writes.len(), 2);
        assert!(log.closed);
    }
    #[test]
    fn failed_disable_write_is_tolerated() {
        let clock = ManualClock::new(Instant::now());
        let (ingest, shared, _) = ingest_with(clock);
        let conn = ScriptedConnection::new(["0.001\n"])
            .then_fail(io::ErrorKind::BrokenPipe)
            .fail_writes_after(1);
        let log = conn.log();
        assert!(matches!(ingest.run(Box::new(conn)), Err(StreamError::Io(_))));
        assert_eq!(shared.phase(), IngestPhase::Failed);
        let log = log.lock().unwrap();
        assert_eq!(log.writes.len(), 1);
        assert!(log.closed);
    }
    #[test]
    fn stop_flag_ends_the_loop_cleanly() {
        let clock = ManualClock::new(Instant::now());
        let (ingest, shared, stop) = ingest_with(clock);
        let conn = ScriptedConnection::new(Vec::<String>::new()).then_repeat("0.001\n");
        let log = conn.log();
        stop.store(true, Ordering::Relaxed);
        assert!(ingest.run(Box::new(conn)).is_ok());
        assert_eq!(shared.phase(), IngestPhase::Stopping);
        assert_eq!(log.lock().unwrap().writes.len(), 2);
    }
    #[test]
    fn sink_sees_raw_values_and_is_finished() {
        let clock = ManualClock::new(Instant::now());
        let (ingest, shared, _) = ingest_with(clock);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let finished = Arc::new(AtomicBool::new(false));
        let sink = CollectingSink(Arc::clone(&seen), Arc::clone(&finished));
        let ingest = ingest.with_sink(Some(Box::new(sink)));
        let conn = ScriptedConnection::new(["0.25\n", "-1e-9\n", "oops\n"])
            .then_fail(io::ErrorKind::UnexpectedEof);
        assert!(ingest.run(Box::new(conn)).is_err());
        assert_eq!(*seen.lock().unwrap(), vec![0.25, -1e-9]);
        assert!(finished.load(Ordering::Relaxed));
        assert_eq!(shared.snapshot().len(), 2);
        assert_eq!(shared.latest().map(|s| s.amps), Some(1.0e-11));
    }
    #[test]
    fn failing_sink_is_detached_and_ingest_continues() {
        let clock = ManualClock::new(Instant::now());
        let (ingest, shared, _) = ingest_with(clock);
        let records = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));
        let sink = BrokenSink {
            records: Arc::clone(&records),
            finished: Arc::clone(&finished),
        };
        let ingest = ingest.with_sink(Some(Box::new(sink)));
        let conn = ScriptedConnection::new(["0.1\n", "0.2\n", "0.3\n"])
            .then_fail(io::ErrorKind::UnexpectedEof);
        assert!(matches!(ingest.run(Box::new(conn)), Err(StreamError::Io(_))));
        assert_eq!(records.load(Ordering::Relaxed), 1);
        assert!(!finished.load(Ordering::Relaxed));
        let values: Vec<f64> = shared.snapshot().iter().map(|s| s.amps).collect();
        assert_eq!(values, vec![0.1, 0.2, 0.3]);
        assert_eq!(shared.stats().sample_count, 3);
    }
    #[test]
    fn thousand_samples_cross_the_summary_point() {
        let clock = ManualClock::new(Instant::now());
        let (mut ingest, shared, _) = ingest_with(clock.clone());
        let mut conn = ScriptedConnection::new(Vec::<String>::new());
        ingest.start_stream(&mut conn).unwrap();
        // no time passes, so the summary sees a zero elapsed time
        for _ in 0..1000 {
            ingest.process_line(clock.now(), "0.004\n", &mut conn).unwrap();
        }
        clock.advance(Duration::from_millis(500));
        for _ in 0..1000 {
            ingest.process_line(clock.now(), "0.004\n", &mut conn).unwrap();
        }
        let stats = shared.stats();
        assert_eq!((stats.sample_count, stats.error_count), (2000, 0));
        assert_eq!(shared.snapshot().len(), 1000);
    }
    #[test]
    fn throughput_guards_zero_elapsed() {
        assert_eq!(throughput(1000, Duration::ZERO), 0.0);
        assert_eq!(throughput(1000, Duration::from_secs(2)), 500.0);
    }
}
