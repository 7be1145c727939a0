// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use spool_common_telemetry::logging::init_default_ut_logging;
use spool_core::{
    ContainerAccess, CycleOutcome, FlushErrorKind, FsStore, LifecycleState, MemoryStore, Record,
    Spool, SpoolConfig,
};
use tempfile::TempDir;

fn config(min_batch_count: i64) -> SpoolConfig {
    SpoolConfig {
        min_batch_count,
        poll_interval: Duration::from_millis(10),
        drain_poll_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

fn day(d: u32) -> DateTime<Utc> { Utc.with_ymd_and_hms(2025, 3, d, 9, 0, 0).unwrap() }

/// Every appended record in store order, across all partitions.
fn written_records(store: &MemoryStore) -> Vec<Bytes> {
    store
        .append_log()
        .into_iter()
        .flat_map(|(_, payload)| {
            payload
                .split(|b| *b == b'\n')
                .filter(|line| !line.is_empty())
                .map(Bytes::copy_from_slice)
                .collect::<Vec<_>>()
        })
        .collect()
}

#[tokio::test]
async fn test_small_burst_is_one_append_on_stop() {
    init_default_ut_logging();
    let store = Arc::new(MemoryStore::new());
    let spool = Spool::new(config(10), store.clone());

    for i in 0..5 {
        spool.enqueue(format!("record-{i:03}").into_bytes());
    }
    spool.start().unwrap();
    spool.stop().await;

    let appends = store.append_log();
    assert_eq!(appends.len(), 1);
    assert_eq!(appends[0].1.len(), 5 * 11);
    assert_eq!(
        appends[0].1,
        "record-000\nrecord-001\nrecord-002\nrecord-003\nrecord-004\n"
    );
    assert!(spool.is_empty());
}

#[tokio::test]
async fn test_day_crossing_splits_into_two_partitions() {
    init_default_ut_logging();
    let store = Arc::new(MemoryStore::new());
    let spool = Spool::new(config(1), store.clone());

    for payload in ["a1", "a2", "a3"] {
        spool.enqueue_record(Record::new(day(10), payload.as_bytes()));
    }
    for payload in ["b1", "b2"] {
        spool.enqueue_record(Record::new(day(11), payload.as_bytes()));
    }
    spool.start().unwrap();
    spool.stop().await;

    let appends = store.append_log();
    assert_eq!(appends.len(), 2);
    assert_eq!(appends[0].0, "2025-03-10");
    assert_eq!(appends[0].1, "a1\na2\na3\n");
    assert_eq!(appends[1].0, "2025-03-11");
    assert_eq!(appends[1].1, "b1\nb2\n");
    assert_eq!(store.keys(), vec!["2025-03-10", "2025-03-11"]);
}

#[tokio::test]
async fn test_hourly_partitioning() {
    init_default_ut_logging();
    let store = Arc::new(MemoryStore::new());
    let spool = Spool::new(
        SpoolConfig {
            use_hourly_partitioning: true,
            ..config(1)
        },
        store.clone(),
    );

    let base = day(10);
    spool.enqueue_record(Record::new(base, &b"nine"[..]));
    spool.enqueue_record(Record::new(base + TimeDelta::minutes(59), &b"still-nine"[..]));
    spool.enqueue_record(Record::new(base + TimeDelta::hours(1), &b"ten"[..]));
    spool.start().unwrap();
    spool.stop().await;

    assert_eq!(store.keys(), vec!["2025-03-10-09", "2025-03-10-10"]);
    assert_eq!(store.contents("2025-03-10-09").unwrap(), "nine\nstill-nine\n");
    assert_eq!(store.contents("2025-03-10-10").unwrap(), "ten\n");
}

#[tokio::test]
async fn test_order_preserved_across_many_appends() {
    init_default_ut_logging();
    let store = Arc::new(MemoryStore::new());
    let spool = Arc::new(Spool::new(
        SpoolConfig {
            max_batch_count: 7,
            max_block_size: 64,
            ..config(1)
        },
        store.clone(),
    ));
    spool.start().unwrap();

    let expected: Vec<Bytes> = (0..300)
        .map(|i| Bytes::from(format!("seq-{i:05}")))
        .collect();
    let producer = {
        let spool = Arc::clone(&spool);
        let records = expected.clone();
        tokio::spawn(async move {
            for (i, payload) in records.into_iter().enumerate() {
                spool.enqueue_record(Record::new(day(12), payload));
                if i % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        })
    };
    producer.await.unwrap();
    spool.stop().await;

    assert_eq!(written_records(&store), expected);
    assert!(store.append_log().iter().all(|(_, p)| p.len() <= 64));
    assert!(store.append_log().len() >= 300 / 7);
}

#[tokio::test]
async fn test_stop_drains_deferred_records() {
    init_default_ut_logging();
    let store = Arc::new(MemoryStore::new());
    let spool = Spool::new(config(1000), store.clone());
    spool.start().unwrap();

    // The first record opens the window; nothing is deferred before that.
    spool.enqueue(&b"opener"[..]);
    for _ in 0..100 {
        if spool.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(spool.is_empty());

    for i in 0..5 {
        spool.enqueue(format!("deferred-{i}").into_bytes());
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(spool.len(), 5, "below min_batch_count inside an open window");

    spool.stop().await;
    assert!(spool.is_empty());
    assert_eq!(spool.state(), LifecycleState::Stopped);
    assert_eq!(written_records(&store).len(), 6);
}

#[tokio::test]
async fn test_failed_appends_are_retried_without_duplicates() {
    init_default_ut_logging();
    let store = Arc::new(MemoryStore::new());
    store.fail_next_appends(3);
    let spool = Spool::new(config(1), store.clone());

    for payload in ["x", "y", "z"] {
        spool.enqueue_record(Record::new(day(13), payload.as_bytes()));
    }
    spool.start().unwrap();
    spool.stop().await;

    assert_eq!(store.contents("2025-03-13").unwrap(), "x\ny\nz\n");
}

#[tokio::test]
async fn test_oversized_record_does_not_block_neighbours() {
    init_default_ut_logging();
    let store = Arc::new(MemoryStore::new());
    let spool = Spool::new(
        SpoolConfig {
            max_block_size: 16,
            ..config(1)
        },
        store.clone(),
    );

    spool.enqueue_record(Record::new(day(14), &b"before"[..]));
    spool.enqueue_record(Record::new(day(14), vec![b'#'; 40]));
    spool.enqueue_record(Record::new(day(14), &b"after"[..]));
    spool.start().unwrap();
    spool.stop().await;

    assert_eq!(store.contents("2025-03-14").unwrap(), "before\nafter\n");
}

#[tokio::test]
async fn test_flush_once_drives_cycles_inline() {
    init_default_ut_logging();
    let store = Arc::new(MemoryStore::new());
    let spool = Spool::new(
        SpoolConfig {
            max_block_size: 8,
            ..config(1)
        },
        store.clone(),
    );
    assert_eq!(spool.flush_once(false).await.unwrap(), CycleOutcome::Idle);

    spool.enqueue_record(Record::new(day(15), &b"fits"[..]));
    spool.enqueue_record(Record::new(day(15), &b"much-too-long"[..]));

    match spool.flush_once(false).await.unwrap() {
        CycleOutcome::Flushed(outcome) => {
            assert_eq!(outcome.key, "2025-03-15");
            assert_eq!(outcome.records, 1);
            assert_eq!(outcome.bytes, 5);
        }
        CycleOutcome::Idle => panic!("expected a flush"),
    }

    let err = spool.flush_once(false).await.unwrap_err();
    assert_eq!(err.kind(), FlushErrorKind::SizeExceeded);
    assert!(spool.is_empty());
}

#[tokio::test]
async fn test_filesystem_backend_end_to_end() {
    init_default_ut_logging();
    let dir = TempDir::new().unwrap();
    let store = Arc::new(
        FsStore::open(dir.path(), "Audit.Events", ContainerAccess::Private)
            .await
            .unwrap(),
    );

    let spool = Spool::new(config(1), store.clone());
    spool.enqueue_record(Record::new(day(16), &b"first"[..]));
    spool.start().unwrap();
    spool.stop().await;

    // A second process appends to the same partition object.
    let spool = Spool::new(config(1), store.clone());
    spool.enqueue_record(Record::new(day(16), &b"second"[..]));
    spool.start().unwrap();
    spool.stop().await;

    let path = dir.path().join("audit-events").join("2025-03-16.log");
    assert_eq!(std::fs::read(path).unwrap(), b"first\nsecond\n");
}
