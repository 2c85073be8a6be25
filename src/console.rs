// src/console.rs
// headless stand-in for the live chart: one status line per refresh
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use log::{info, warn};
use crate::engine::DeviceSession;
use crate::types::{DisplayFrame, SessionState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Throughput {
    Nominal,
    Degraded,
    Poor,
}

impl Throughput {
    pub fn classify(sps: f64) -> Self {
        if sps > 500.0 {
            Throughput::Nominal
        } else if sps > 100.0 {
            Throughput::Degraded
        } else {
            Throughput::Poor
        }
    }

    fn marker(self) -> &'static str {
        match self {
            Throughput::Nominal => "",
            Throughput::Degraded => " (slow)",
            Throughput::Poor => " (stalled?)",
        }
    }
}

/// Human-readable current, e.g. `1.50 mA` or `12.0 µA`.
pub fn format_amps(amps: f64) -> String {
    let magnitude = amps.abs();
    if magnitude > 1.0 {
        format!("{amps:.3} A")
    } else if magnitude > 0.001 {
        format!("{:.2} mA", amps * 1e3)
    } else if magnitude > 0.000_001 {
        format!("{:.1} \u{00B5}A", amps * 1e6)
    } else {
        format!("{:.1} nA", amps * 1e9)
    }
}

pub fn status_line(frame: &DisplayFrame) -> String {
    let last = frame.series.last().map(|p| p.amps).unwrap_or(0.0);
    let avg = frame.series.mean().unwrap_or(0.0);
    format!(
        "{:.1} SPS{} | Last: {} | Avg: {}",
        frame.sps,
        Throughput::classify(frame.sps).marker(),
        format_amps(last),
        format_amps(avg)
    )
}

/// Flag raised by the first Ctrl-C. Replaces the default handler, so the process keeps
/// running until the monitor notices and the session shuts down.
pub fn interrupt_flag() -> io::Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let raised = Arc::clone(&flag);
    thread::Builder::new()
        .name("ctrl-c".into())
        .spawn(move || match runtime.block_on(tokio::signal::ctrl_c()) {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                raised.store(true, Ordering::Relaxed);
            }
            Err(e) => warn!("Unable to listen for Ctrl-C: {e}"),
        })?;
    Ok(flag)
}

/// Pulls a frame every refresh interval until the session stops streaming, `duration` runs
/// out or `interrupted` is raised.
pub fn run_monitor(
    session: &DeviceSession,
    duration: Option<Duration>,
    interrupted: &AtomicBool,
) -> io::Result<()> {
    let refresh = session.config().refresh_interval();
    let deadline = duration.map(|d| Instant::now() + d);
    let mut stdout = io::stdout();
    loop {
        if interrupted.load(Ordering::Relaxed) || deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        match session.state() {
            SessionState::Paused => write!(stdout, "\r<Paused>{:40}", "")?,
            state if state.is_terminal() => {
                writeln!(stdout, "\r<Disconnected>{:40}", "")?;
                break;
            }
            _ => {
                if let Some(frame) = session.poll_display() {
                    write!(stdout, "\r{:<72}", status_line(&frame))?;
                }
            }
        }
        stdout.flush()?;
        thread::sleep(refresh);
    }
    writeln!(stdout)?;
    Ok(())
}
