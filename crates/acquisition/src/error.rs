use eeg_sensor::DriverError;
use thiserror::Error;

/// Errors raised by sessions, snapshots and the recorder.
#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("Annotation text must not be empty")]
    EmptyAnnotation,

    #[error("Requested window of {requested} samples exceeds the rolling capacity of {capacity}")]
    WindowExceedsCapacity { requested: usize, capacity: usize },

    #[error("Chunk has {actual} channels, the session expects {expected}")]
    ChannelCountMismatch { expected: usize, actual: usize },

    #[error("Channel {channel} holds {actual} samples, the chunk declares {expected}")]
    ChunkLengthMismatch {
        channel: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Channel order refers to row {index}, the buffer has {rows} rows")]
    InvalidChannelOrder { index: usize, rows: usize },

    #[error("Driver channel order not resolved yet")]
    ChannelOrderPending,

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Matrix shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AcquisitionError>;
