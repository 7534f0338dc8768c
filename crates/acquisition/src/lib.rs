//! EEG stream ingestion: sessions, buffers, annotations and snapshots
//!
//! A [`Session`] receives decoded chunks from the device dispatcher, keeps them
//! in an accumulating or rolling [`buffer`], and turns them on demand into a
//! channel-ordered [`Snapshot`] with annotation onsets aligned to the returned
//! matrix. [`EegRecorder`] wires a session to a [`eeg_sensor::DeviceManager`].

pub mod annotations;
pub mod buffer;
pub mod config;
pub mod error;
pub mod export;
pub mod recorder;
pub mod session;
pub mod snapshot;

pub use annotations::AnnotationLog;
pub use buffer::{AccumulateBuffer, Buffer, RollingBuffer, Window};
pub use config::load_config;
pub use error::{AcquisitionError, Result};
pub use recorder::EegRecorder;
pub use session::Session;
pub use snapshot::{AnnotationOnset, RecordingHandoff, Snapshot, SnapshotRequest};
