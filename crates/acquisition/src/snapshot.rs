//! Finalized, windowed views of a session's data.

use eeg_types::{Annotation, ChannelId, ChannelMap, ChannelSpec};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::buffer::{BufferOrigin, Materialized, Window};
use crate::error::{AcquisitionError, Result};

/// What part of a session to snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotRequest {
    /// Trailing span; `None` takes everything buffered.
    pub window: Option<Window>,
    pub include_annotations: bool,
}

impl Default for SnapshotRequest {
    fn default() -> Self {
        Self {
            window: None,
            include_annotations: true,
        }
    }
}

impl SnapshotRequest {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn last_seconds(seconds: f64) -> Self {
        Self {
            window: Some(Window::Seconds(seconds)),
            ..Self::default()
        }
    }

    pub fn last_samples(samples: usize) -> Self {
        Self {
            window: Some(Window::Samples(samples)),
            ..Self::default()
        }
    }

    pub fn without_annotations(self) -> Self {
        Self {
            include_annotations: false,
            ..self
        }
    }
}

/// An annotation placed on the time axis of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationOnset {
    pub label: String,
    /// Seconds from the first column of the snapshot. Negative when the
    /// marker precedes the window.
    pub onset: f64,
}

/// Immutable channels x samples view of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub data: Array2<f64>,
    /// Id and spec of every row of `data`.
    pub channels: Vec<(ChannelId, ChannelSpec)>,
    pub sample_rate: f64,
    pub annotations: Vec<AnnotationOnset>,
}

/// Converts sample-counter timestamps to seconds from the start of a
/// materialized matrix.
///
/// The counter value of the first real sample maps to the column right after
/// the padding; `offset` moves the reference to the first returned column.
pub fn onsets(
    annotations: &[Annotation],
    origin: BufferOrigin,
    offset: usize,
    sample_rate: f64,
) -> Vec<AnnotationOnset> {
    let correction = origin.first_counter.unwrap_or(0.0);
    let shift = offset as f64 / sample_rate;
    annotations
        .iter()
        .map(|a| AnnotationOnset {
            label: a.text.clone(),
            onset: (a.timestamp + origin.pad_columns as f64 - correction) / sample_rate - shift,
        })
        .collect()
}

/// Assembles a snapshot from a materialized buffer.
///
/// `channel_order[i]` is the buffer row holding the `i`-th channel of
/// `channels`; without an order the rows must already be in map order.
pub fn build(
    materialized: Materialized,
    annotations: &[Annotation],
    channel_order: Option<&[usize]>,
    channels: &ChannelMap,
    sample_rate: f64,
) -> Result<Snapshot> {
    let Materialized {
        matrix,
        offset,
        origin,
    } = materialized;

    let data = match channel_order {
        Some(order) => {
            let rows = matrix.nrows();
            if let Some(&index) = order.iter().find(|&&index| index >= rows) {
                return Err(AcquisitionError::InvalidChannelOrder { index, rows });
            }
            matrix.select(Axis(0), order)
        }
        None => matrix,
    };

    Ok(Snapshot {
        data,
        channels: channels.iter().map(|(id, spec)| (id, spec.clone())).collect(),
        sample_rate,
        annotations: onsets(annotations, origin, offset, sample_rate),
    })
}

/// Shape handed to a time-series container for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingHandoff {
    pub channel_names: Vec<String>,
    /// Container channel type per channel (`eeg`, `misc`, `stim`, `syst`).
    pub channel_types: Vec<String>,
    pub sample_rate: f64,
    /// One row per channel.
    pub data: Vec<Vec<f64>>,
    pub onsets: Vec<f64>,
    pub durations: Vec<f64>,
    pub labels: Vec<String>,
}

impl Snapshot {
    pub fn n_channels(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.n_samples() as f64 / self.sample_rate
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|(_, spec)| spec.name.clone()).collect()
    }

    pub fn handoff(&self) -> RecordingHandoff {
        RecordingHandoff {
            channel_names: self.channel_names(),
            channel_types: self
                .channels
                .iter()
                .map(|(_, spec)| spec.kind.container_type().to_string())
                .collect(),
            sample_rate: self.sample_rate,
            data: self.data.rows().into_iter().map(|row| row.to_vec()).collect(),
            onsets: self.annotations.iter().map(|a| a.onset).collect(),
            durations: vec![0.0; self.annotations.len()],
            labels: self.annotations.iter().map(|a| a.label.clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eeg_types::{ids, ChannelKind};
    use ndarray::array;

    fn marker(text: &str, timestamp: f64) -> Annotation {
        Annotation {
            text: text.to_string(),
            timestamp,
        }
    }

    #[test]
    fn onset_aligns_counter_with_padding() {
        let origin = BufferOrigin {
            pad_columns: 2,
            first_counter: Some(1000.0),
        };
        let result = onsets(&[marker("stimulus", 1250.0)], origin, 0, 250.0);
        assert!((result[0].onset - 1.008).abs() < 1e-12);
        assert_eq!(result[0].label, "stimulus");
    }

    #[test]
    fn window_offset_shifts_onsets_in_seconds() {
        let origin = BufferOrigin {
            pad_columns: 0,
            first_counter: Some(0.0),
        };
        let result = onsets(&[marker("a", 500.0)], origin, 250, 250.0);
        assert!((result[0].onset - 1.0).abs() < 1e-12);
    }

    fn two_channel_map() -> ChannelMap {
        let mut map = ChannelMap::new();
        map.insert(ids::ELECTRODE_MEASUREMENT, ChannelSpec::new("Fp1", ChannelKind::Eeg))
            .unwrap();
        map.insert(ids::SAMPLE_NUMBER, ChannelSpec::new("Sample", ChannelKind::SampleCounter))
            .unwrap();
        map
    }

    #[test]
    fn rows_follow_channel_order() {
        let materialized = Materialized {
            matrix: array![[0.0, 1.0], [10.0, 20.0]],
            offset: 0,
            origin: BufferOrigin {
                pad_columns: 0,
                first_counter: Some(0.0),
            },
        };
        let snapshot = build(materialized, &[], Some(&[1, 0]), &two_channel_map(), 250.0).unwrap();
        assert_eq!(snapshot.data, array![[10.0, 20.0], [0.0, 1.0]]);
        assert_eq!(snapshot.channel_names(), vec!["Fp1", "Sample"]);

        let handoff = snapshot.handoff();
        assert_eq!(handoff.channel_types, vec!["eeg", "syst"]);
        assert_eq!(handoff.data[0], vec![10.0, 20.0]);
    }

    #[test]
    fn out_of_range_order_is_rejected() {
        let materialized = Materialized {
            matrix: Array2::zeros((2, 3)),
            offset: 0,
            origin: BufferOrigin {
                pad_columns: 0,
                first_counter: None,
            },
        };
        let err = build(materialized, &[], Some(&[0, 2]), &two_channel_map(), 250.0).unwrap_err();
        assert!(matches!(err, AcquisitionError::InvalidChannelOrder { index: 2, rows: 2 }));
    }
}
