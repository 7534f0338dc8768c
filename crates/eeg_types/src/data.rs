use serde::{Deserialize, Serialize};

/// Represents errors that can occur within a sensor driver.
///
/// These errors are intended to be propagated to the application to provide
/// feedback on the state of the hardware.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum SensorError {
    /// A hardware-related fault.
    #[error("Sensor hardware fault: {0}")]
    HardwareFault(String),
    /// The sensor was disconnected.
    #[error("Sensor disconnected")]
    Disconnected,
    /// The device streams a layout this library cannot read.
    #[error("Incompatible stream, update the device firmware")]
    IncompatibleStream,
    /// A driver-level error.
    #[error("Driver error: {0}")]
    DriverError(String),
}

/// Numeric kind of one decoded channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleType {
    /// 4-byte float.
    F32,
    /// 1-byte unsigned integer.
    U8,
    /// Platform-width unsigned integer, widened to `u64` on decode.
    Size,
    /// 8-byte float.
    F64,
}

impl SampleType {
    /// Width of one raw element in bytes.
    pub const fn width(&self) -> usize {
        match self {
            SampleType::F32 => 4,
            SampleType::U8 => 1,
            SampleType::Size => std::mem::size_of::<usize>(),
            SampleType::F64 => 8,
        }
    }
}

/// One channel's worth of decoded samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedArray {
    F32(Vec<f32>),
    U8(Vec<u8>),
    U64(Vec<u64>),
    F64(Vec<f64>),
}

impl TypedArray {
    pub fn len(&self) -> usize {
        match self {
            TypedArray::F32(v) => v.len(),
            TypedArray::U8(v) => v.len(),
            TypedArray::U64(v) => v.len(),
            TypedArray::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sample_type(&self) -> SampleType {
        match self {
            TypedArray::F32(_) => SampleType::F32,
            TypedArray::U8(_) => SampleType::U8,
            TypedArray::U64(_) => SampleType::Size,
            TypedArray::F64(_) => SampleType::F64,
        }
    }

    /// Sample `index` widened to `f64`.
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        match self {
            TypedArray::F32(v) => v.get(index).map(|&x| x as f64),
            TypedArray::U8(v) => v.get(index).map(|&x| x as f64),
            TypedArray::U64(v) => v.get(index).map(|&x| x as f64),
            TypedArray::F64(v) => v.get(index).copied(),
        }
    }

    /// Writes every sample, widened to `f64`, into `out`.
    ///
    /// `out` must be exactly `self.len()` long.
    pub fn write_f64(&self, out: &mut [f64]) {
        match self {
            TypedArray::F32(v) => out.iter_mut().zip(v).for_each(|(o, &x)| *o = x as f64),
            TypedArray::U8(v) => out.iter_mut().zip(v).for_each(|(o, &x)| *o = x as f64),
            TypedArray::U64(v) => out.iter_mut().zip(v).for_each(|(o, &x)| *o = x as f64),
            TypedArray::F64(v) => out.copy_from_slice(v),
        }
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.len()];
        self.write_f64(&mut out);
        out
    }
}

/// A decoded chunk: one array per streamed channel, all `len` samples long.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedChunk {
    pub channels: Vec<TypedArray>,
    pub len: usize,
}

impl TypedChunk {
    pub fn new(channels: Vec<TypedArray>, len: usize) -> Self {
        Self { channels, len }
    }

    /// Builds a chunk of `f64` rows, taking the length from the first row.
    pub fn from_f64_rows(rows: Vec<Vec<f64>>) -> Self {
        let len = rows.first().map_or(0, Vec::len);
        Self {
            channels: rows.into_iter().map(TypedArray::F64).collect(),
            len,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// First channel whose length disagrees with `len`, as `(index, actual)`.
    pub fn first_ragged_channel(&self) -> Option<(usize, usize)> {
        self.channels
            .iter()
            .enumerate()
            .find(|(_, ch)| ch.len() != self.len)
            .map(|(i, ch)| (i, ch.len()))
    }
}

/// A timestamped text marker. The timestamp lives in the sample-counter domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub text: String,
    pub timestamp: f64,
}
