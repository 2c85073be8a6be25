// src/main.rs
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Duration;
use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, LevelFilter};
use current_viewer::config::ViewerConfig;
use current_viewer::console;
use current_viewer::drivers::SimulatedConnection;
use current_viewer::engine::DeviceSession;
use current_viewer::recorder::{DataRecorder, RecordFormat};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SIMULATED_RATE_HZ: f64 = 1000.0;

#[derive(Parser)]
#[command(
    name = "current-viewer",
    version,
    about = "CurrentRanger live current viewer (headless)"
)]
struct Cli {
    /// Serial port the meter is on (e.g. /dev/ttyACM0 or COM3)
    #[arg(short, long, required_unless_present = "simulate")]
    port: Option<String>,

    /// Serial baud rate [default: 115200]
    #[arg(short = 's', long)]
    baud: Option<u32>,

    /// Save every received sample to <OUT>
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Output format; guessed from the file extension when omitted
    #[arg(long, value_enum, requires = "out")]
    format: Option<RecordFormat>,

    /// Rolling buffer size in samples [default: 100000]
    #[arg(short, long)]
    buffer: Option<usize>,

    /// Samples per displayed frame [default: 2048]
    #[arg(short, long)]
    max_chart: Option<usize>,

    /// Refresh interval in milliseconds [default: 66]
    #[arg(short, long)]
    refresh: Option<u64>,

    /// Most raw samples aggregated into one displayed point [default: 16]
    #[arg(long)]
    supersampling: Option<usize>,

    /// Aggregate with the median instead of the mean
    #[arg(long)]
    median: bool,

    /// JSON config file; command line flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds instead of running until the device goes away or Ctrl-C
    #[arg(short, long)]
    duration: Option<u64>,

    /// Use a simulated meter instead of a serial port
    #[arg(long)]
    simulate: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Error,
        1 => LevelFilter::Warn,
        2 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn build_config(cli: &Cli) -> Result<ViewerConfig> {
    let mut config = match &cli.config {
        Some(path) => ViewerConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ViewerConfig::default(),
    };
    if let Some(port) = &cli.port {
        config.port = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.baud = baud;
    }
    if let Some(buffer) = cli.buffer {
        config.buffer_max_samples = buffer;
    }
    if let Some(max_chart) = cli.max_chart {
        config.chart_max_samples = max_chart;
    }
    if let Some(refresh) = cli.refresh {
        config.refresh_interval_ms = refresh;
    }
    if let Some(supersampling) = cli.supersampling {
        config.max_supersampling = supersampling;
    }
    config.median_filter |= cli.median;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn attach_recorder(session: &mut DeviceSession, cli: &Cli) -> Result<()> {
    let Some(path) = &cli.out else {
        return Ok(());
    };
    let format = cli.format.unwrap_or_else(|| {
        let guessed = RecordFormat::from_path(path);
        info!("Save format automatically set to {guessed:?} for {}", path.display());
        guessed
    });
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let recorder = DataRecorder::new(BufWriter::new(file), format)
        .with_context(|| format!("writing to {}", path.display()))?;
    session.set_sink(Box::new(recorder));
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    println!("CurrentViewer v{VERSION}");
    init_logging(cli.verbose);
    let config = build_config(&cli)?;
    info!(
        "CurrentViewer v{VERSION}. System: {}, Machine: {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );

    let interrupted = console::interrupt_flag().context("installing the Ctrl-C handler")?;
    let mut session = DeviceSession::new(config.clone());
    attach_recorder(&mut session, &cli)?;

    let started = if cli.simulate {
        let sim = SimulatedConnection::new(SIMULATED_RATE_HZ, config.read_timeout());
        session.start_with(Box::new(sim))
    } else {
        session.start(&config.port, config.baud)
    };
    if let Err(e) = started {
        session.stop();
        let target = if cli.simulate { "simulated meter" } else { config.port.as_str() };
        eprintln!(
            "Fatal: Could not connect to USB/BT COM port {target}. \
             Check the logs for more information"
        );
        bail!(e);
    }

    println!("Running with no GUI...");
    let duration = cli.duration.map(Duration::from_secs);
    let result = console::run_monitor(&session, duration, &interrupted);
    session.stop();
    let stats = session.stats();
    println!(
        "Done. {} samples, {} errors, {} lines.",
        stats.sample_count, stats.error_count, stats.line_count
    );
    result.context("writing status output")
}
