use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use acquisition::export::{recording_stem, write_snapshot};
use acquisition::{load_config, EegRecorder, SnapshotRequest};
use anyhow::Context;
use clap::Parser;
use eeg_sensor::{DeviceManager, MockConfig, MockDevice};
use eeg_types::{AcquisitionConfig, BatteryInfo};
use log::{info, warn};

/// Records from a synthetic EEG device and exports the result.
#[derive(Parser, Debug)]
#[command(name = "eeg_acquire", about = "EEG acquisition demo on a mock device")]
struct Args {
    /// JSON configuration file; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Recording length in seconds
    #[arg(short, long, default_value_t = 5.0)]
    duration: f64,

    /// Seconds between automatic annotations
    #[arg(long, default_value_t = 1.0)]
    annotate_every: f64,

    /// Only export the trailing window of this many seconds
    #[arg(long)]
    window: Option<f64>,

    /// Output directory; overrides the configured recordings directory
    #[arg(short, long)]
    export_dir: Option<PathBuf>,

    /// Sample rate of the mock device in Hz
    #[arg(long, default_value_t = 250)]
    sample_rate: u16,
}

enum DeviceEvent {
    Battery(BatteryInfo),
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path).with_context(|| format!("loading {}", path.display()))?,
        None => AcquisitionConfig::default(),
    };

    let chunk_size = config.chunk_size.max(1);
    let device = MockDevice::new(MockConfig {
        sample_rate: args.sample_rate,
        chunk_size,
        chunk_period: Some(Duration::from_secs_f64(
            chunk_size as f64 / f64::from(args.sample_rate.max(1)),
        )),
        ..MockConfig::default()
    });
    let manager = DeviceManager::new(Arc::new(device));

    let (tx, rx) = flume::unbounded();
    manager.set_battery_handler(Box::new(move |info| {
        let _ = tx.send(DeviceEvent::Battery(info));
    }));

    let export_dir = args
        .export_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.recordings_directory));
    let mut recorder = EegRecorder::setup(manager, config).context("device setup failed")?;
    info!("Battery at {}%", recorder.battery_level());
    recorder.start().context("could not start the stream")?;

    let started = Instant::now();
    let end = started + Duration::from_secs_f64(args.duration.max(0.0));
    let annotate_every = Duration::from_secs_f64(args.annotate_every.max(0.1));
    let mut next_marker = started + annotate_every;
    let mut markers = 0;

    loop {
        let now = Instant::now();
        if now >= end {
            break;
        }
        match rx.recv_timeout(next_marker.min(end).saturating_duration_since(now)) {
            Ok(DeviceEvent::Battery(info)) => info!("Battery at {}%", info.level),
            Err(flume::RecvTimeoutError::Timeout) => {}
            Err(flume::RecvTimeoutError::Disconnected) => {
                warn!("Device event channel closed");
                break;
            }
        }
        if Instant::now() >= next_marker {
            markers += 1;
            recorder.annotate(&format!("marker {}", markers))?;
            next_marker += annotate_every;
        }
    }

    recorder.stop()?;
    let request = match args.window {
        Some(seconds) => SnapshotRequest::last_seconds(seconds),
        None => SnapshotRequest::all(),
    };
    match recorder.snapshot(request)? {
        Some(snapshot) => {
            let stem = recording_stem("eeg", chrono::Local::now());
            let paths = write_snapshot(&export_dir, &stem, &snapshot)?;
            info!(
                "{:.1} s of data with {} annotations written to {}",
                snapshot.duration_seconds(),
                snapshot.annotations.len(),
                paths.data.display()
            );
        }
        None => warn!("No data was recorded"),
    }

    recorder.teardown();
    Ok(())
}
