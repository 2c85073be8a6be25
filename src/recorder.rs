use std::io::{self, Write};
use std::path::Path;
use std::time::{Instant, SystemTime};
use chrono::{DateTime, Local};
use serde::Serialize;
use crate::types::Sample;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum RecordFormat {
    Csv,
    Json,
}

impl RecordFormat {
    /// `.csv` files get CSV, anything else JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => RecordFormat::Csv,
            _ => RecordFormat::Json,
        }
    }
}

/// Receives every accepted sample on the ingest thread.
pub trait SampleSink: Send {
    fn record(&mut self, sample: &Sample) -> io::Result<()>;
    fn finish(&mut self) -> io::Result<()>;
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    time: &'a str,
    amps: f64,
}

/// Mirrors samples to a writer as CSV lines or a JSON document.
pub struct DataRecorder<W: Write + Send> {
    writer: W,
    format: RecordFormat,
    anchor: Instant,
    anchor_wall: SystemTime,
    written: u64,
    finished: bool,
}

impl<W: Write + Send> DataRecorder<W> {
    pub fn new(writer: W, format: RecordFormat) -> io::Result<Self> {
        Self::with_anchor(writer, format, Instant::now(), SystemTime::now())
    }

    /// `anchor` and `anchor_wall` name the same moment; sample times are placed relative to it.
    pub fn with_anchor(
        mut writer: W,
        format: RecordFormat,
        anchor: Instant,
        anchor_wall: SystemTime,
    ) -> io::Result<Self> {
        match format {
            RecordFormat::Csv => writer.write_all(b"Timestamp, Amps\n")?,
            RecordFormat::Json => writer.write_all(b"{\n\"data\":[\n")?,
        }
        Ok(Self {
            writer,
            format,
            anchor,
            anchor_wall,
            written: 0,
            finished: false,
        })
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn wall_clock(&self, ts: Instant) -> SystemTime {
        match ts.checked_duration_since(self.anchor) {
            Some(after) => self.anchor_wall + after,
            None => self.anchor_wall - self.anchor.duration_since(ts),
        }
    }

    fn timestamp_text(&self, ts: Instant) -> String {
        DateTime::<Local>::from(self.wall_clock(ts))
            .format(TIME_FORMAT)
            .to_string()
    }
}

impl<W: Write + Send> SampleSink for DataRecorder<W> {
    fn record(&mut self, sample: &Sample) -> io::Result<()> {
        let time = self.timestamp_text(sample.timestamp);
        match self.format {
            RecordFormat::Csv => writeln!(self.writer, "{time},{}", sample.amps)?,
            RecordFormat::Json => {
                if self.written > 0 {
                    self.writer.write_all(b",\n")?;
                }
                let record = JsonRecord {
                    time: &time,
                    amps: sample.amps,
                };
                serde_json::to_writer(&mut self.writer, &record)?;
            }
        }
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        if self.format == RecordFormat::Json {
            self.writer.write_all(b"\n]\n}\n")?;
        }
        self.writer.flush()?;
        self.finished = true;
        log::info!("Recording finished, {} samples written", self.written);
        Ok(())
    }
}
