//! Writes snapshots to disk as CSV plus a JSON sidecar.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::snapshot::{AnnotationOnset, Snapshot};

/// Files produced by [`write_snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub data: PathBuf,
    pub annotations: PathBuf,
    pub metadata: PathBuf,
}

/// Contents of the JSON sidecar: the handoff without the sample matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub channel_names: Vec<String>,
    pub channel_types: Vec<String>,
    pub sample_rate: f64,
    pub n_samples: usize,
    pub annotations: Vec<AnnotationOnset>,
    pub exported_at: String,
}

/// File stem for a recording started at `now`, e.g. `eeg_2024-05-01_14-03-09`.
pub fn recording_stem(prefix: &str, now: DateTime<Local>) -> String {
    format!("{}_{}", prefix, now.format("%Y-%m-%d_%H-%M-%S"))
}

/// Writes `<stem>.csv`, `<stem>_annotations.csv` and `<stem>.json` into
/// `dir`, creating it if needed.
pub fn write_snapshot(dir: &Path, stem: &str, snapshot: &Snapshot) -> Result<ExportPaths> {
    fs::create_dir_all(dir)?;
    let paths = ExportPaths {
        data: dir.join(format!("{}.csv", stem)),
        annotations: dir.join(format!("{}_annotations.csv", stem)),
        metadata: dir.join(format!("{}.json", stem)),
    };
    let handoff = snapshot.handoff();

    let mut writer = csv::Writer::from_writer(File::create(&paths.data)?);
    writer.write_record(&handoff.channel_names)?;
    for column in snapshot.data.columns() {
        writer.write_record(column.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;

    let mut writer = csv::Writer::from_writer(File::create(&paths.annotations)?);
    writer.write_record(["onset", "duration", "label"])?;
    for ((onset, duration), label) in handoff
        .onsets
        .iter()
        .zip(&handoff.durations)
        .zip(&handoff.labels)
    {
        writer.write_record([onset.to_string(), duration.to_string(), label.clone()])?;
    }
    writer.flush()?;

    let metadata = RecordingMetadata {
        channel_names: handoff.channel_names,
        channel_types: handoff.channel_types,
        sample_rate: handoff.sample_rate,
        n_samples: snapshot.n_samples(),
        annotations: snapshot.annotations.clone(),
        exported_at: Local::now().to_rfc3339(),
    };
    serde_json::to_writer_pretty(File::create(&paths.metadata)?, &metadata)?;

    info!(
        "Exported {} samples x {} channels to {}",
        snapshot.n_samples(),
        snapshot.n_channels(),
        paths.data.display()
    );
    Ok(paths)
}
