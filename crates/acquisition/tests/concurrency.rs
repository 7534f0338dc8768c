use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use acquisition::{Session, SnapshotRequest};
use eeg_types::{ids, BufferConfig, ChannelKind, ChannelMap, ChannelSpec, TypedArray, TypedChunk};

const WRITERS: usize = 4;
const READERS: usize = 3;
const CHUNKS_PER_WRITER: usize = 200;
const CHUNK_LEN: usize = 16;

fn four_channel_map() -> ChannelMap {
    let mut map = ChannelMap::new();
    map.insert(ids::SAMPLE_NUMBER, ChannelSpec::new("Sample", ChannelKind::SampleCounter))
        .unwrap();
    for i in 0..3 {
        map.insert(
            ids::ELECTRODE_MEASUREMENT + i,
            ChannelSpec::new(format!("E{}", i), ChannelKind::Eeg),
        )
        .unwrap();
    }
    map
}

/// Every value of the chunk carries the same generation marker.
fn marker_chunk(generation: u64) -> TypedChunk {
    TypedChunk::new(
        vec![
            TypedArray::U64(vec![generation; CHUNK_LEN]),
            TypedArray::F64(vec![generation as f64; CHUNK_LEN]),
            TypedArray::F32(vec![generation as f32; CHUNK_LEN]),
            TypedArray::F64(vec![generation as f64; CHUNK_LEN]),
        ],
        CHUNK_LEN,
    )
}

/// Writers and readers hammer one session; every observed column must hold a
/// single generation across all rows.
fn stress(buffer: BufferConfig) {
    let session = Arc::new(Session::new(four_channel_map(), buffer, 250.0).unwrap());
    let generation = Arc::new(AtomicU64::new(1));
    let done = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..WRITERS)
        .map(|_| {
            let session = Arc::clone(&session);
            let generation = Arc::clone(&generation);
            thread::spawn(move || {
                for _ in 0..CHUNKS_PER_WRITER {
                    // Markers stay exact in f32
                    let g = generation.fetch_add(1, Ordering::SeqCst) % (1 << 20);
                    session.ingest(marker_chunk(g)).unwrap();
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let session = Arc::clone(&session);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut checked = 0usize;
                while !done.load(Ordering::SeqCst) || checked == 0 {
                    let Some(snapshot) = session.snapshot(SnapshotRequest::last_samples(64)).unwrap()
                    else {
                        thread::yield_now();
                        continue;
                    };
                    for column in snapshot.data.columns() {
                        let first = column[0];
                        assert!(
                            column.iter().all(|&v| v == first),
                            "torn column {:?}",
                            column
                        );
                    }
                    checked += 1;
                }
                checked
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::SeqCst);
    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
    assert_eq!(session.samples_ingested(), WRITERS * CHUNKS_PER_WRITER * CHUNK_LEN);
}

#[test]
fn accumulate_reads_never_observe_torn_columns() {
    stress(BufferConfig::accumulate(4));
}

#[test]
fn rolling_reads_never_observe_torn_columns() {
    stress(BufferConfig::rolling(128, 128));
}

#[test]
fn annotations_and_ingestion_interleave() {
    let session = Arc::new(Session::new(four_channel_map(), BufferConfig::accumulate(0), 250.0).unwrap());
    let writer = {
        let session = Arc::clone(&session);
        thread::spawn(move || {
            for g in 0..500 {
                session.ingest(marker_chunk(g)).unwrap();
            }
        })
    };
    for i in 0..500 {
        session.annotate(&format!("note {}", i)).unwrap();
    }
    writer.join().unwrap();

    let annotations = session.annotations();
    assert_eq!(annotations.len(), 500);
    assert_eq!(annotations[499].text, "note 499");
    // Stamped from the counter row, which only ever moves forward here
    assert!(annotations.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}
