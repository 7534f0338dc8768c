//! One acquisition context: channel layout, buffer and annotations.

use std::sync::{Mutex, MutexGuard, PoisonError};

use eeg_types::{Annotation, BufferConfig, ChannelKind, ChannelMap, TypedChunk};
use log::{debug, info};

use crate::annotations::AnnotationLog;
use crate::buffer::Buffer;
use crate::error::{AcquisitionError, Result};
use crate::snapshot::{self, Snapshot, SnapshotRequest};

/// How buffer rows relate to the channel map.
#[derive(Debug, Clone, PartialEq)]
enum RowOrder {
    /// Rows arrive in map order.
    Map,
    /// Rows arrive in a driver order that is not known yet.
    Pending,
    /// Buffer row of every mapped channel, in map order.
    Driver(Vec<usize>),
}

/// State guarded by the session's data lock. Ingestion and snapshot reads
/// both go through it.
#[derive(Debug)]
struct SessionData {
    buffer: Buffer,
    row_order: RowOrder,
    /// Buffer row carrying the sample counter, unknown while the order is
    /// pending.
    counter_row: Option<usize>,
    /// Latest sample-counter value ingested.
    last_counter: Option<f64>,
}

/// Owns the buffer and annotation log of one device connection.
///
/// Chunks carry one row per mapped channel. Rows are taken to be in map order
/// unless [`Session::await_channel_order`] announces a driver-assigned order,
/// which [`Session::set_channel_order`] later supplies.
#[derive(Debug)]
pub struct Session {
    channels: ChannelMap,
    sample_rate: f64,
    buffer_config: BufferConfig,
    data: Mutex<SessionData>,
    annotations: AnnotationLog,
}

impl Session {
    pub fn new(channels: ChannelMap, buffer_config: BufferConfig, sample_rate: f64) -> Result<Self> {
        if channels.is_empty() {
            return Err(AcquisitionError::InvalidConfiguration(
                "session needs at least one channel".to_string(),
            ));
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(AcquisitionError::InvalidConfiguration(format!(
                "sample rate {}",
                sample_rate
            )));
        }
        let buffer = Buffer::from_config(channels.len(), &buffer_config)?;
        debug!(
            "Session with {} channels at {} Hz, {:?} buffer",
            channels.len(),
            sample_rate,
            buffer_config.mode
        );

        let counter_row = counter_position(&channels);
        Ok(Self {
            channels,
            sample_rate,
            buffer_config,
            data: Mutex::new(SessionData {
                buffer,
                row_order: RowOrder::Map,
                counter_row: Some(counter_row),
                last_counter: None,
            }),
            annotations: AnnotationLog::new(),
        })
    }

    fn data(&self) -> MutexGuard<'_, SessionData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn channels(&self) -> &ChannelMap {
        &self.channels
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn buffer_config(&self) -> &BufferConfig {
        &self.buffer_config
    }

    /// Appends one decoded chunk.
    ///
    /// Chunks whose shape does not match the session are rejected whole.
    pub fn ingest(&self, chunk: TypedChunk) -> Result<()> {
        let expected = self.channels.len();
        if chunk.channel_count() != expected {
            return Err(AcquisitionError::ChannelCountMismatch {
                expected,
                actual: chunk.channel_count(),
            });
        }
        if let Some((channel, actual)) = chunk.first_ragged_channel() {
            return Err(AcquisitionError::ChunkLengthMismatch {
                channel,
                expected: chunk.len,
                actual,
            });
        }

        let mut data = self.data();
        if let (Some(row), Some(last)) = (data.counter_row, chunk.len.checked_sub(1)) {
            if let Some(counter) = chunk.channels.get(row).and_then(|values| values.get_f64(last)) {
                data.last_counter = Some(counter);
            }
        }
        data.buffer.append(chunk)
    }

    /// Records `text` at the latest sample-counter value seen.
    pub fn annotate(&self, text: &str) -> Result<()> {
        let timestamp = self.data().last_counter.unwrap_or(0.0);
        self.annotate_at(text, timestamp)
    }

    /// Records `text` at an explicit sample-counter timestamp.
    pub fn annotate_at(&self, text: &str, timestamp: f64) -> Result<()> {
        self.annotations.append(text, timestamp)
    }

    pub fn annotations(&self) -> Vec<Annotation> {
        self.annotations.all()
    }

    pub fn clear_annotations(&self) {
        self.annotations.clear();
    }

    /// Announces that rows will arrive in a driver-assigned order.
    ///
    /// Until [`Session::set_channel_order`] supplies it, snapshots fail with
    /// [`AcquisitionError::ChannelOrderPending`] and ingestion does not track
    /// the sample counter. An order that is already resolved is kept.
    pub fn await_channel_order(&self) {
        let mut data = self.data();
        if data.row_order == RowOrder::Map {
            debug!("Waiting for the driver channel order");
            data.row_order = RowOrder::Pending;
            data.counter_row = None;
        }
    }

    /// Sets the buffer row of every mapped channel, in map order.
    ///
    /// The order is assigned by the driver once the stream is running.
    pub fn set_channel_order(&self, order: Vec<usize>) -> Result<()> {
        let rows = self.channels.len();
        if order.len() != rows {
            return Err(AcquisitionError::InvalidConfiguration(format!(
                "channel order has {} entries for {} channels",
                order.len(),
                rows
            )));
        }
        if let Some(&index) = order.iter().find(|&&index| index >= rows) {
            return Err(AcquisitionError::InvalidChannelOrder { index, rows });
        }

        let counter_row = order[counter_position(&self.channels)];
        debug!("Channel order {:?}, sample counter in row {}", order, counter_row);

        let mut data = self.data();
        if data.buffer.samples_ingested() > 0 {
            // Pick up the counter of chunks that arrived before the order
            let newest = data.buffer.materialize(Some(1), counter_row)?;
            if let Some(&counter) = newest.matrix.get((counter_row, 0)) {
                data.last_counter = Some(counter);
            }
        }
        data.row_order = RowOrder::Driver(order);
        data.counter_row = Some(counter_row);
        Ok(())
    }

    /// The driver-assigned order, once known.
    pub fn channel_order(&self) -> Option<Vec<usize>> {
        match &self.data().row_order {
            RowOrder::Driver(order) => Some(order.clone()),
            RowOrder::Map | RowOrder::Pending => None,
        }
    }

    /// Buffer column count, padding included.
    pub fn len(&self) -> usize {
        self.data().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples_ingested() == 0
    }

    pub fn samples_ingested(&self) -> usize {
        self.data().buffer.samples_ingested()
    }

    /// Builds a snapshot of the buffered data.
    ///
    /// Returns `Ok(None)` while nothing has been ingested, and
    /// [`AcquisitionError::ChannelOrderPending`] while buffered rows cannot
    /// yet be matched to channels.
    pub fn snapshot(&self, request: SnapshotRequest) -> Result<Option<Snapshot>> {
        let window = request
            .window
            .map(|w| w.to_samples(self.sample_rate))
            .transpose()?;

        let (capture, order, counter_row) = {
            let data = self.data();
            if data.buffer.samples_ingested() == 0 {
                info!("Snapshot requested before any data arrived");
                return Ok(None);
            }
            let (order, counter_row) = match (&data.row_order, data.counter_row) {
                (RowOrder::Driver(order), Some(row)) => (Some(order.clone()), row),
                (RowOrder::Map, Some(row)) => (None, row),
                _ => return Err(AcquisitionError::ChannelOrderPending),
            };
            (data.buffer.capture(window, counter_row)?, order, counter_row)
        };

        let materialized = capture.finish(window, counter_row)?;
        let annotations = if request.include_annotations {
            self.annotations.all()
        } else {
            Vec::new()
        };
        snapshot::build(
            materialized,
            &annotations,
            order.as_deref(),
            &self.channels,
            self.sample_rate,
        )
        .map(Some)
    }
}

/// Map position of the sample counter; row 0 when the map has none.
fn counter_position(channels: &ChannelMap) -> usize {
    channels
        .specs()
        .position(|spec| spec.kind == ChannelKind::SampleCounter)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eeg_types::{ids, ChannelSpec, TypedArray};
    use ndarray::array;

    fn counter_and_eeg() -> ChannelMap {
        let mut map = ChannelMap::new();
        map.insert(ids::ELECTRODE_MEASUREMENT, ChannelSpec::new("Fp1", ChannelKind::Eeg))
            .unwrap();
        map.insert(ids::SAMPLE_NUMBER, ChannelSpec::new("Sample", ChannelKind::SampleCounter))
            .unwrap();
        map
    }

    /// Driver order: counter first, then the electrode.
    fn driver_chunk(first_counter: u64, eeg: &[f64]) -> TypedChunk {
        let len = eeg.len();
        TypedChunk::new(
            vec![
                TypedArray::U64((first_counter..first_counter + len as u64).collect()),
                TypedArray::F64(eeg.to_vec()),
            ],
            len,
        )
    }

    /// Session whose driver delivers the counter in row 0.
    fn driver_session(buffer: BufferConfig) -> Session {
        let session = Session::new(counter_and_eeg(), buffer, 250.0).unwrap();
        session.await_channel_order();
        session.set_channel_order(vec![1, 0]).unwrap();
        session
    }

    #[test]
    fn nothing_ingested_means_no_snapshot() {
        let session = Session::new(counter_and_eeg(), BufferConfig::accumulate(2), 250.0).unwrap();
        assert!(session.snapshot(SnapshotRequest::all()).unwrap().is_none());
        assert!(session.is_empty());
        assert_eq!(session.len(), 2);
    }

    #[test]
    fn annotation_onset_accounts_for_padding_and_first_counter() {
        let session = driver_session(BufferConfig::accumulate(2));
        session.ingest(driver_chunk(1000, &[0.5; 300])).unwrap();
        session.annotate_at("stimulus", 1250.0).unwrap();

        let snapshot = session.snapshot(SnapshotRequest::all()).unwrap().unwrap();
        assert_eq!(snapshot.n_samples(), 302);
        assert!((snapshot.annotations[0].onset - 1.008).abs() < 1e-12);

        let windowed = session.snapshot(SnapshotRequest::last_samples(52)).unwrap().unwrap();
        assert_eq!(windowed.n_samples(), 52);
        assert!((windowed.annotations[0].onset - (1.008 - 250.0 / 250.0)).abs() < 1e-12);

        let bare = session
            .snapshot(SnapshotRequest::all().without_annotations())
            .unwrap()
            .unwrap();
        assert!(bare.annotations.is_empty());
    }

    #[test]
    fn annotate_uses_latest_counter() {
        let session = driver_session(BufferConfig::accumulate(0));
        session.annotate("before data").unwrap();
        session.ingest(driver_chunk(40, &[1.0, 2.0, 3.0])).unwrap();
        session.annotate("after").unwrap();
        let stamps: Vec<_> = session.annotations().iter().map(|a| a.timestamp).collect();
        assert_eq!(stamps, vec![0.0, 42.0]);
        assert!(matches!(session.annotate(""), Err(AcquisitionError::EmptyAnnotation)));
    }

    #[test]
    fn channel_order_reorders_rows_and_finds_counter() {
        let session = Session::new(counter_and_eeg(), BufferConfig::accumulate(0), 250.0).unwrap();
        // Map order is (Fp1, Sample); the driver delivers Sample first.
        session.set_channel_order(vec![1, 0]).unwrap();
        session.ingest(driver_chunk(7, &[9.0, 8.0])).unwrap();
        session.annotate("x").unwrap();

        let snapshot = session.snapshot(SnapshotRequest::all()).unwrap().unwrap();
        assert_eq!(snapshot.data, array![[9.0, 8.0], [7.0, 8.0]]);
        assert_eq!(session.annotations()[0].timestamp, 8.0);
    }

    #[test]
    fn invalid_channel_orders_are_rejected() {
        let session = Session::new(counter_and_eeg(), BufferConfig::accumulate(0), 250.0).unwrap();
        assert!(matches!(
            session.set_channel_order(vec![0]),
            Err(AcquisitionError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            session.set_channel_order(vec![0, 5]),
            Err(AcquisitionError::InvalidChannelOrder { index: 5, rows: 2 })
        ));
        assert_eq!(session.channel_order(), None);
    }

    #[test]
    fn malformed_chunks_leave_buffer_untouched() {
        let session = Session::new(counter_and_eeg(), BufferConfig::accumulate(0), 250.0).unwrap();
        let narrow = TypedChunk::from_f64_rows(vec![vec![1.0]]);
        assert!(matches!(
            session.ingest(narrow),
            Err(AcquisitionError::ChannelCountMismatch { expected: 2, actual: 1 })
        ));
        let ragged = TypedChunk::new(
            vec![TypedArray::U64(vec![1, 2]), TypedArray::F64(vec![1.0])],
            2,
        );
        assert!(matches!(
            session.ingest(ragged),
            Err(AcquisitionError::ChunkLengthMismatch {
                channel: 1,
                expected: 2,
                actual: 1
            })
        ));
        assert_eq!(session.samples_ingested(), 0);
    }

    #[test]
    fn rolling_session_refuses_oversized_window() {
        let session = driver_session(BufferConfig::rolling(4, 4));
        session.ingest(driver_chunk(0, &[1.0, 2.0])).unwrap();
        assert!(matches!(
            session.snapshot(SnapshotRequest::last_samples(5)),
            Err(AcquisitionError::WindowExceedsCapacity {
                requested: 5,
                capacity: 4
            })
        ));
        let snapshot = session.snapshot(SnapshotRequest::all()).unwrap().unwrap();
        assert_eq!(snapshot.data, array![[0.0, 0.0, 1.0, 2.0], [0.0, 0.0, 0.0, 1.0]]);
    }

    #[test]
    fn rows_follow_the_map_without_a_driver_order() {
        let session = Session::new(counter_and_eeg(), BufferConfig::accumulate(0), 250.0).unwrap();
        // Map order: Fp1 first, the counter second
        let chunk = TypedChunk::new(
            vec![TypedArray::F64(vec![0.5, 0.25]), TypedArray::U64(vec![100, 101])],
            2,
        );
        session.ingest(chunk).unwrap();
        session.annotate("blink").unwrap();
        assert_eq!(session.annotations()[0].timestamp, 101.0);

        let snapshot = session.snapshot(SnapshotRequest::all()).unwrap().unwrap();
        assert_eq!(snapshot.channel_names(), vec!["Fp1", "Sample"]);
        assert_eq!(snapshot.data, array![[0.5, 0.25], [100.0, 101.0]]);
        assert!((snapshot.annotations[0].onset - 1.0 / 250.0).abs() < 1e-12);
    }

    #[test]
    fn pending_driver_order_holds_back_snapshots() {
        let session = Session::new(counter_and_eeg(), BufferConfig::accumulate(0), 250.0).unwrap();
        session.await_channel_order();
        assert!(session.snapshot(SnapshotRequest::all()).unwrap().is_none());

        session.ingest(driver_chunk(100, &[0.5, 0.25])).unwrap();
        assert!(matches!(
            session.snapshot(SnapshotRequest::all()),
            Err(AcquisitionError::ChannelOrderPending)
        ));
        session.annotate("early").unwrap();
        assert_eq!(session.annotations()[0].timestamp, 0.0);

        session.set_channel_order(vec![1, 0]).unwrap();
        session.annotate("resolved").unwrap();
        assert_eq!(session.annotations()[1].timestamp, 101.0);

        let snapshot = session.snapshot(SnapshotRequest::all()).unwrap().unwrap();
        assert_eq!(snapshot.channel_names()[0], "Fp1");
        assert_eq!(snapshot.data, array![[0.5, 0.25], [100.0, 101.0]]);

        // A resolved order survives the next stream start
        session.await_channel_order();
        assert_eq!(session.channel_order(), Some(vec![1, 0]));
        assert!(session.snapshot(SnapshotRequest::all()).unwrap().is_some());
    }

    #[test]
    fn invalid_sessions_are_refused() {
        assert!(Session::new(ChannelMap::new(), BufferConfig::default(), 250.0).is_err());
        assert!(Session::new(counter_and_eeg(), BufferConfig::default(), 0.0).is_err());
    }
}
