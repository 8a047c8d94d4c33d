//! The history buffer is written by the tick lane while readers snapshot it
//! from other threads.

use hostwatch::{history::HistoryBuffer, test_utils::sample_reading};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_snapshots_are_consistent_under_concurrent_pushes() {
    const CAPACITY: usize = 20;
    const PUSHES: u32 = 200;
    let buffer = HistoryBuffer::new(CAPACITY);

    let writer = {
        let buffer = buffer.clone();
        tokio::spawn(async move {
            for seq in 0..PUSHES {
                buffer.push(sample_reading(seq));
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    let mut readers = Vec::new();
    for _ in 0..3 {
        let buffer = buffer.clone();
        readers.push(tokio::spawn(async move {
            let mut observed = 0usize;
            while observed < 100 {
                let snapshot = buffer.snapshot();
                assert!(snapshot.len() <= CAPACITY);

                // Readings appear contiguous and oldest first.
                for pair in snapshot.windows(2) {
                    assert_eq!(
                        pair[1].timestamp - pair[0].timestamp,
                        chrono::Duration::seconds(1)
                    );
                }
                // Each reading is whole: memory_used_mb encodes the sequence
                // number carried by the timestamp.
                for reading in &snapshot {
                    let seq = (reading.memory_used_mb - 4096.0) as i64;
                    assert_eq!(reading, &sample_reading(seq as u32));
                }

                observed += 1;
                tokio::task::yield_now().await;
            }
        }));
    }

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }

    let final_snapshot = buffer.snapshot();
    assert_eq!(final_snapshot.len(), CAPACITY);
    let expected: Vec<_> = (PUSHES - CAPACITY as u32..PUSHES)
        .map(sample_reading)
        .collect();
    assert_eq!(final_snapshot, expected);
    assert_eq!(buffer.latest(), Some(sample_reading(PUSHES - 1)));
}
