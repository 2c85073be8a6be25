use std::io::{self, BufRead, BufReader, Write};
use std::thread;
use std::time::{Duration, Instant};
#[cfg(test)]
use std::collections::VecDeque;
#[cfg(test)]
use std::sync::{Arc, Mutex, PoisonError};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serialport::{ClearBuffer, SerialPort};
use crate::drivers::ConnectError;
/// Toggles USB streaming on the meter. The same byte switches it on and off.
pub const STREAM_TOGGLE: &[u8] = b"u";
/// Line-oriented link to a current meter.
///
/// `read_line` blocks for at most the read timeout the connection was opened with. On timeout
/// it returns whatever arrived so far, possibly an empty string.
pub trait DeviceConnection: Send {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;
    fn read_line(&mut self) -> io::Result<String>;
    fn flush_input(&mut self) -> io::Result<()>;
    fn close(self: Box<Self>);
}
pub struct SerialConnection {
    port_name: String,
    reader: BufReader<Box<dyn SerialPort>>,
    pending: Vec<u8>,
}
impl SerialConnection {
    pub fn open(port_name: &str, baud: u32, read_timeout: Duration) -> Result<Self, ConnectError> {
        info!("Trying to connect to port='{port_name}' baud='{baud}'");
        let port = serialport::new(port_name, baud)
            .timeout(read_timeout)
            .open()
            .map_err(|source| ConnectError::Open {
                port: port_name.to_string(),
                baud,
                source,
            })?;
        info!("Connected to {port_name} at baud {baud}");
        Ok(Self {
            port_name: port_name.to_string(),
            reader: BufReader::new(port),
            pending: Vec::new(),
        })
    }
    fn take_pending(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        line
    }
}
impl DeviceConnection for SerialConnection {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let port = self.reader.get_mut();
        port.write_all(bytes)?;
        port.flush()
    }
    fn read_line(&mut self) -> io::Result<String> {
        loop {
            match self.reader.read_until(b'\n', &mut self.pending) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "serial port closed",
                    ))
                }
                Ok(_) => return Ok(self.take_pending()),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(self.take_pending()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
    fn flush_input(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.reader.get_ref().clear(ClearBuffer::Input)?;
        Ok(())
    }
    fn close(self: Box<Self>) {
        debug!("Closing serial port {}", self.port_name);
    }
}
const SIM_ACTIVE_AMPS: f64 = 2.5e-3;
const SIM_SLEEP_AMPS: f64 = 4.0e-6;
const SIM_NOISE: f64 = 0.05;
const SIM_NEGATIVE_ODDS: f64 = 0.0005;
/// Stand-in meter for running without hardware.
///
/// Alternates between an active and a sleep load every second, with a little noise and the
/// odd negative reading the real noise floor produces.
pub struct SimulatedConnection {
    streaming: bool,
    period: Duration,
    read_timeout: Duration,
    started: Instant,
    rng: StdRng,
}
impl SimulatedConnection {
    pub fn new(sample_rate_hz: f64, read_timeout: Duration) -> Self {
        let period = Duration::from_secs_f64(1.0 / sample_rate_hz.max(1.0));
        Self {
            streaming: false,
            period,
            read_timeout,
            started: Instant::now(),
            rng: StdRng::from_entropy(),
        }
    }
    fn next_reading(&mut self) -> f64 {
        if self.rng.gen_bool(SIM_NEGATIVE_ODDS) {
            return -self.rng.gen_range(1.0e-10..1.0e-9);
        }
        let base = if self.started.elapsed().as_secs() % 2 == 0 {
            SIM_ACTIVE_AMPS
        } else {
            SIM_SLEEP_AMPS
        };
        base * (1.0 + self.rng.gen_range(-SIM_NOISE..SIM_NOISE))
    }
}
impl DeviceConnection for SimulatedConnection {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        for _ in bytes.iter().filter(|b| **b == STREAM_TOGGLE[0]) {
            self.streaming = !self.streaming;
            debug!("Simulated meter streaming={}", self.streaming);
        }
        Ok(())
    }
    fn read_line(&mut self) -> io::Result<String> {
        if !self.streaming {
            thread::sleep(self.read_timeout);
            return Ok(String::new());
        }
        thread::sleep(self.period);
        Ok(format!("{:e}\r\n", self.next_reading()))
    }
    fn flush_input(&mut self) -> io::Result<()> {
        Ok(())
    }
    fn close(self: Box<Self>) {}
}
/// Everything a `ScriptedConnection` was asked to do.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ConnectionLog {
    pub writes: Vec<Vec<u8>>,
    pub input_flushes: usize,
    pub closed: bool,
}
#[cfg(test)]
enum ScriptStep {
    Line(String),
    Fail(io::ErrorKind),
}
/// In-memory connection useful for tests. Once the script runs out it behaves like an idle
/// port: short sleep, then the repeat line (or an empty read).
#[cfg(test)]
pub struct ScriptedConnection {
    script: VecDeque<ScriptStep>,
    repeat: Option<String>,
    fail_writes_after: Option<usize>,
    log: Arc<Mutex<ConnectionLog>>,
}
#[cfg(test)]
impl ScriptedConnection {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: lines.into_iter().map(|l| ScriptStep::Line(l.into())).collect(),
            repeat: None,
            fail_writes_after: None,
            log: Arc::new(Mutex::new(ConnectionLog::default())),
        }
    }
    pub fn then_fail(mut self, kind: io::ErrorKind) -> Self {
        self.script.push_back(ScriptStep::Fail(kind));
        self
    }
    pub fn then_repeat(mut self, line: impl Into<String>) -> Self {
        self.repeat = Some(line.into());
        self
    }
    /// Accepts `count` writes, then fails every write after that.
    pub fn fail_writes_after(mut self, count: usize) -> Self {
        self.fail_writes_after = Some(count);
        self
    }
    pub fn log(&self) -> Arc<Mutex<ConnectionLog>> {
        Arc::clone(&self.log)
    }
    fn with_log<R>(&self, f: impl FnOnce(&mut ConnectionLog) -> R) -> R {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut log)
    }
}
#[cfg(test)]
impl DeviceConnection for ScriptedConnection {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let limit = self.fail_writes_after;
        self.with_log(|log| match limit {
            Some(limit) if log.writes.len() >= limit => {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"))
            }
            _ => {
                log.writes.push(bytes.to_vec());
                Ok(())
            }
        })
    }
    fn read_line(&mut self) -> io::Result<String> {
        match self.script.pop_front() {
            Some(ScriptStep::Line(line)) => Ok(line),
            Some(ScriptStep::Fail(kind)) => Err(io::Error::new(kind, "scripted failure")),
            None => {
                thread::sleep(Duration::from_millis(1));
                Ok(self.repeat.clone().unwrap_or_default())
            }
        }
    }
    fn flush_input(&mut self) -> io::Result<()> {
        self.with_log(|log| log.input_flushes += 1);
        Ok(())
    }
    fn close(self: Box<Self>) {
        self.with_log(|log| log.closed = true);
    }
}
