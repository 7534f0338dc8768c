//! Sample buffers of a session.
//!
//! Both variants hold `rows x columns` data in the driver's channel order and
//! start with zero padding in front of the first real sample. Callers validate
//! chunk shape before appending.

use std::sync::Arc;

use eeg_types::{BufferConfig, BufferMode, TypedChunk};
use log::warn;
use ndarray::{s, Array2};

use crate::error::{AcquisitionError, Result};

/// Trailing span of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Window {
    Samples(usize),
    Seconds(f64),
}

impl Window {
    /// Sample count of the window; seconds are rounded to the nearest sample.
    pub fn to_samples(self, sample_rate: f64) -> Result<usize> {
        match self {
            Window::Samples(n) => Ok(n),
            Window::Seconds(secs) if secs.is_finite() && secs >= 0.0 => {
                Ok((secs * sample_rate).round() as usize)
            }
            Window::Seconds(secs) => Err(AcquisitionError::InvalidConfiguration(format!(
                "window of {} seconds",
                secs
            ))),
        }
    }
}

/// Position of the first real sample inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferOrigin {
    /// Zero columns in front of the first real sample.
    pub pad_columns: usize,
    /// Sample-counter value of the first real sample still held.
    pub first_counter: Option<f64>,
}

/// A matrix read out of a buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Materialized {
    pub matrix: Array2<f64>,
    /// Columns of the full buffer left out in front of `matrix`.
    pub offset: usize,
    pub origin: BufferOrigin,
}

/// Resolves a requested window against `total` columns; `None` and zero mean
/// everything.
fn window_start(total: usize, window: Option<usize>) -> usize {
    match window {
        Some(k) if k > 0 && k < total => total - k,
        _ => 0,
    }
}

/// Unbounded buffer: every chunk is kept and concatenated on demand.
#[derive(Debug, Clone)]
pub struct AccumulateBuffer {
    rows: usize,
    zeros_at_start: usize,
    chunks: Vec<Arc<TypedChunk>>,
    ingested: usize,
}

impl AccumulateBuffer {
    pub fn new(rows: usize, zeros_at_start: usize) -> Self {
        Self {
            rows,
            zeros_at_start,
            chunks: Vec::new(),
            ingested: 0,
        }
    }

    pub fn append(&mut self, chunk: TypedChunk) {
        self.ingested += chunk.len;
        self.chunks.push(Arc::new(chunk));
    }

    /// Column count including the padding.
    pub fn len(&self) -> usize {
        self.zeros_at_start + self.ingested
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn samples_ingested(&self) -> usize {
        self.ingested
    }

    /// Captures the current chunk list without copying sample data.
    pub fn view(&self) -> ChunkView {
        ChunkView {
            rows: self.rows,
            zeros_at_start: self.zeros_at_start,
            chunks: self.chunks.clone(),
            columns: self.len(),
        }
    }

    pub fn materialize(&self, window: Option<usize>, counter_row: usize) -> Result<Materialized> {
        self.view().materialize(window, counter_row)
    }
}

/// A frozen list of chunks, concatenated outside the session lock.
#[derive(Debug, Clone)]
pub struct ChunkView {
    rows: usize,
    zeros_at_start: usize,
    chunks: Vec<Arc<TypedChunk>>,
    columns: usize,
}

impl ChunkView {
    pub fn materialize(&self, window: Option<usize>, counter_row: usize) -> Result<Materialized> {
        let start = window_start(self.columns, window);
        let width = self.columns - start;
        let mut data = vec![0.0; self.rows * width];

        if width > 0 {
            for (row, out) in data.chunks_mut(width).enumerate() {
                let mut column = self.zeros_at_start;
                for chunk in &self.chunks {
                    let end = column + chunk.len;
                    if end > start {
                        let source = &chunk.channels[row];
                        if column >= start {
                            source.write_f64(&mut out[column - start..end - start]);
                        } else {
                            // Chunk straddles the window start
                            let values = source.to_f64_vec();
                            out[..end - start].copy_from_slice(&values[start - column..]);
                        }
                    }
                    column = end;
                }
            }
        }

        let first_counter = self
            .chunks
            .first()
            .and_then(|chunk| chunk.channels.get(counter_row))
            .and_then(|channel| channel.get_f64(0));

        Ok(Materialized {
            matrix: Array2::from_shape_vec((self.rows, width), data)?,
            offset: start,
            origin: BufferOrigin {
                pad_columns: self.zeros_at_start,
                first_counter,
            },
        })
    }
}

/// Fixed-width buffer holding only the most recent `capacity` columns.
#[derive(Debug, Clone)]
pub struct RollingBuffer {
    matrix: Array2<f64>,
    ingested: usize,
}

impl RollingBuffer {
    /// A `rows x capacity` buffer seeded with zeros.
    pub fn new(rows: usize, capacity: usize) -> Self {
        Self {
            matrix: Array2::zeros((rows, capacity)),
            ingested: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.matrix.ncols()
    }

    /// Shifts the content left by the chunk width and writes the chunk into
    /// the trailing columns. A chunk wider than the buffer keeps only its
    /// newest columns.
    pub fn append(&mut self, chunk: &TypedChunk) -> Result<()> {
        let width = chunk.len;
        let capacity = self.capacity();
        if width == 0 {
            return Ok(());
        }
        self.ingested += width;

        let keep = width.min(capacity);
        if width > capacity {
            warn!(
                "Chunk of {} samples exceeds rolling capacity {}, oldest samples dropped",
                width, capacity
            );
        }
        let mut incoming = Vec::with_capacity(self.matrix.nrows() * keep);
        for channel in &chunk.channels {
            let values = channel.to_f64_vec();
            incoming.extend_from_slice(&values[width - keep..]);
        }
        let incoming = Array2::from_shape_vec((self.matrix.nrows(), keep), incoming)?;

        if keep < capacity {
            let kept = self.matrix.slice(s![.., keep..]).to_owned();
            self.matrix.slice_mut(s![.., ..capacity - keep]).assign(&kept);
        }
        self.matrix.slice_mut(s![.., capacity - keep..]).assign(&incoming);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn samples_ingested(&self) -> usize {
        self.ingested
    }

    fn origin(&self, counter_row: usize) -> BufferOrigin {
        let pad_columns = self.capacity().saturating_sub(self.ingested);
        BufferOrigin {
            pad_columns,
            first_counter: self.matrix.get((counter_row, pad_columns)).copied(),
        }
    }

    /// The trailing `window` columns; a window wider than the buffer is
    /// refused.
    pub fn materialize(&self, window: Option<usize>, counter_row: usize) -> Result<Materialized> {
        let capacity = self.capacity();
        if let Some(requested) = window {
            if requested > capacity {
                return Err(AcquisitionError::WindowExceedsCapacity {
                    requested,
                    capacity,
                });
            }
        }
        let start = window_start(capacity, window);
        Ok(Materialized {
            matrix: self.matrix.slice(s![.., start..]).to_owned(),
            offset: start,
            origin: self.origin(counter_row),
        })
    }
}

/// The buffer of a session, in either strategy.
#[derive(Debug, Clone)]
pub enum Buffer {
    Accumulate(AccumulateBuffer),
    Rolling(RollingBuffer),
}

/// What a session reads under its data lock; finished outside of it.
pub enum Capture {
    Chunks(ChunkView),
    Ready(Materialized),
}

impl Capture {
    pub fn finish(self, window: Option<usize>, counter_row: usize) -> Result<Materialized> {
        match self {
            Capture::Chunks(view) => view.materialize(window, counter_row),
            Capture::Ready(materialized) => Ok(materialized),
        }
    }
}

impl Buffer {
    pub fn from_config(rows: usize, config: &BufferConfig) -> Result<Self> {
        match config.mode {
            BufferMode::Accumulate => Ok(Buffer::Accumulate(AccumulateBuffer::new(
                rows,
                config.zeros_at_start,
            ))),
            BufferMode::Rolling => {
                let capacity = config.rolling_capacity();
                if capacity == 0 {
                    return Err(AcquisitionError::InvalidConfiguration(
                        "rolling buffer needs a capacity above zero".to_string(),
                    ));
                }
                Ok(Buffer::Rolling(RollingBuffer::new(rows, capacity)))
            }
        }
    }

    pub fn append(&mut self, chunk: TypedChunk) -> Result<()> {
        match self {
            Buffer::Accumulate(buffer) => {
                buffer.append(chunk);
                Ok(())
            }
            Buffer::Rolling(buffer) => buffer.append(&chunk),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Buffer::Accumulate(buffer) => buffer.len(),
            Buffer::Rolling(buffer) => buffer.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn samples_ingested(&self) -> usize {
        match self {
            Buffer::Accumulate(buffer) => buffer.samples_ingested(),
            Buffer::Rolling(buffer) => buffer.samples_ingested(),
        }
    }

    /// Reads what a snapshot needs. Rolling data is copied here; accumulated
    /// chunks are only referenced.
    pub fn capture(&self, window: Option<usize>, counter_row: usize) -> Result<Capture> {
        match self {
            Buffer::Accumulate(buffer) => Ok(Capture::Chunks(buffer.view())),
            Buffer::Rolling(buffer) => Ok(Capture::Ready(buffer.materialize(window, counter_row)?)),
        }
    }

    pub fn materialize(&self, window: Option<usize>, counter_row: usize) -> Result<Materialized> {
        self.capture(window, counter_row)?.finish(window, counter_row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eeg_types::TypedArray;
    use ndarray::array;

    fn chunk(rows: &[&[f64]]) -> TypedChunk {
        TypedChunk::from_f64_rows(rows.iter().map(|r| r.to_vec()).collect())
    }

    #[test]
    fn accumulate_concatenates_after_padding() {
        let mut buffer = AccumulateBuffer::new(2, 2);
        buffer.append(chunk(&[&[10.0, 11.0], &[1.0, 2.0]]));
        buffer.append(chunk(&[&[12.0], &[3.0]]));
        assert_eq!(buffer.len(), 5);

        let out = buffer.materialize(None, 0).unwrap();
        assert_eq!(
            out.matrix,
            array![[0.0, 0.0, 10.0, 11.0, 12.0], [0.0, 0.0, 1.0, 2.0, 3.0]]
        );
        assert_eq!(out.offset, 0);
        assert_eq!(
            out.origin,
            BufferOrigin {
                pad_columns: 2,
                first_counter: Some(10.0)
            }
        );
    }

    #[test]
    fn accumulate_window_cuts_inside_a_chunk() {
        let mut buffer = AccumulateBuffer::new(1, 1);
        buffer.append(chunk(&[&[1.0, 2.0, 3.0]]));
        buffer.append(chunk(&[&[4.0, 5.0]]));

        let out = buffer.materialize(Some(3), 0).unwrap();
        assert_eq!(out.matrix, array![[3.0, 4.0, 5.0]]);
        assert_eq!(out.offset, 3);

        let everything = buffer.materialize(Some(100), 0).unwrap();
        assert_eq!(everything.matrix.ncols(), 6);
        assert_eq!(buffer.materialize(Some(0), 0).unwrap(), everything);
    }

    #[test]
    fn accumulate_widens_mixed_types() {
        let mut buffer = AccumulateBuffer::new(3, 0);
        buffer.append(TypedChunk::new(
            vec![
                TypedArray::U64(vec![7, 8]),
                TypedArray::F32(vec![0.5, 1.5]),
                TypedArray::U8(vec![1, 0]),
            ],
            2,
        ));
        let out = buffer.materialize(None, 0).unwrap();
        assert_eq!(out.matrix, array![[7.0, 8.0], [0.5, 1.5], [1.0, 0.0]]);
    }

    #[test]
    fn rolling_shifts_oldest_out() {
        let mut buffer = RollingBuffer::new(1, 4);
        buffer.append(&chunk(&[&[1.0, 2.0]])).unwrap();
        assert_eq!(buffer.materialize(None, 0).unwrap().matrix, array![[0.0, 0.0, 1.0, 2.0]]);
        buffer.append(&chunk(&[&[3.0, 4.0, 5.0]])).unwrap();
        let out = buffer.materialize(None, 0).unwrap();
        assert_eq!(out.matrix, array![[2.0, 3.0, 4.0, 5.0]]);
        assert_eq!(
            out.origin,
            BufferOrigin {
                pad_columns: 0,
                first_counter: Some(2.0)
            }
        );
    }

    #[test]
    fn rolling_keeps_newest_part_of_wide_chunk() {
        let mut buffer = RollingBuffer::new(1, 3);
        buffer.append(&chunk(&[&[1.0, 2.0, 3.0, 4.0, 5.0]])).unwrap();
        assert_eq!(buffer.materialize(None, 0).unwrap().matrix, array![[3.0, 4.0, 5.0]]);
        assert_eq!(buffer.samples_ingested(), 5);
    }

    #[test]
    fn rolling_refuses_windows_beyond_capacity() {
        let mut buffer = RollingBuffer::new(1, 3);
        buffer.append(&chunk(&[&[1.0]])).unwrap();
        let err = buffer.materialize(Some(4), 0).unwrap_err();
        assert!(matches!(
            err,
            AcquisitionError::WindowExceedsCapacity {
                requested: 4,
                capacity: 3
            }
        ));
        let out = buffer.materialize(Some(2), 0).unwrap();
        assert_eq!(out.matrix, array![[0.0, 1.0]]);
        assert_eq!(out.offset, 1);
        assert_eq!(out.origin.pad_columns, 2);
        assert_eq!(out.origin.first_counter, Some(1.0));
    }

    #[test]
    fn seconds_round_to_samples() {
        assert_eq!(Window::Seconds(0.5).to_samples(250.0).unwrap(), 125);
        assert_eq!(Window::Seconds(0.0021).to_samples(1000.0).unwrap(), 2);
        assert_eq!(Window::Samples(9).to_samples(250.0).unwrap(), 9);
        assert!(Window::Seconds(-1.0).to_samples(250.0).is_err());
        assert!(Window::Seconds(f64::NAN).to_samples(250.0).is_err());
    }

    #[test]
    fn zero_rolling_capacity_is_rejected() {
        let config = BufferConfig::rolling(0, 0);
        assert!(matches!(
            Buffer::from_config(2, &config),
            Err(AcquisitionError::InvalidConfiguration(_))
        ));
    }
}
