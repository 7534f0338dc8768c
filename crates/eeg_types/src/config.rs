//! Configuration types for an acquisition session

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::device::GainMode;

/// Buffering strategy of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferMode {
    /// Every chunk is kept until the session ends.
    #[default]
    Accumulate,
    /// Only the most recent fixed number of samples is kept.
    Rolling,
}

/// Buffer settings of a session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BufferConfig {
    #[serde(default)]
    pub mode: BufferMode,
    /// Total column count of a rolling buffer. Falls back to `zeros_at_start`.
    #[serde(default)]
    pub rolling_capacity_columns: Option<usize>,
    /// Zero columns placed in front of the first real sample.
    #[serde(default)]
    pub zeros_at_start: usize,
}

impl BufferConfig {
    pub fn accumulate(zeros_at_start: usize) -> Self {
        Self {
            mode: BufferMode::Accumulate,
            rolling_capacity_columns: None,
            zeros_at_start,
        }
    }

    pub fn rolling(capacity: usize, zeros_at_start: usize) -> Self {
        Self {
            mode: BufferMode::Rolling,
            rolling_capacity_columns: Some(capacity),
            zeros_at_start,
        }
    }

    /// Column count of the rolling matrix.
    pub fn rolling_capacity(&self) -> usize {
        self.rolling_capacity_columns.unwrap_or(self.zeros_at_start)
    }
}

/// Top-level acquisition configuration, usually read from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Substring of the advertised device name to connect to.
    #[serde(default)]
    pub device_name: String,
    /// Electrode index to electrode name.
    #[serde(default = "default_cap")]
    pub cap: BTreeMap<u16, String>,
    #[serde(flatten)]
    pub buffer: BufferConfig,
    /// Electrode indexes used as bias feedback.
    #[serde(default)]
    pub bias: Vec<u16>,
    /// Gain multiplier for EEG channels. Supported: 4, 6, 8, 12.
    #[serde(default = "default_gain")]
    pub gain: u32,
    /// How long to keep retrying the connection.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Samples per chunk requested from the driver.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_recordings_directory")]
    pub recordings_directory: String,
}

fn default_cap() -> BTreeMap<u16, String> {
    ["F3", "F4", "C3", "C4", "P3", "P4", "O1", "O2"]
        .iter()
        .enumerate()
        .map(|(i, name)| (i as u16, name.to_string()))
        .collect()
}

fn default_gain() -> u32 {
    8
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

fn default_chunk_size() -> usize {
    25
}

fn default_recordings_directory() -> String {
    "./recordings".to_string()
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            device_name: String::new(),
            cap: default_cap(),
            buffer: BufferConfig::default(),
            bias: Vec::new(),
            gain: default_gain(),
            connect_timeout_ms: default_connect_timeout_ms(),
            chunk_size: default_chunk_size(),
            recordings_directory: default_recordings_directory(),
        }
    }
}

impl AcquisitionConfig {
    /// Gain mode for the configured multiplier, if it is one the cap supports.
    pub fn gain_mode(&self) -> Option<GainMode> {
        match self.gain {
            4 | 6 | 8 | 12 => GainMode::from_multiplier(self.gain),
            _ => None,
        }
    }
}
