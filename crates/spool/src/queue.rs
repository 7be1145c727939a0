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

//! In-memory record queue shared by producers and the flush worker.
//!
//! The [`RecordQueue`] is the only mutable state producers and the worker
//! share. Producers push at the back, the worker only ever removes a prefix
//! from the front, so a snapshot of the front taken by the worker stays
//! valid until the worker itself removes it.
//!
//! ```text
//! producers ──push──► [ r0 r1 r2 ... rn ] ──peek/remove_prefix──► flush worker
//! ```

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::warn;

use crate::{
    controller::LifecycleState,
    metrics::{BACKLOG_WARNINGS, QUEUE_LENGTH, RECORDS_ENQUEUED},
    record::Record,
};

/// FIFO buffer of records awaiting persistence.
#[derive(Debug, Default)]
pub struct RecordQueue {
    records: Mutex<VecDeque<Record>>,
}

impl RecordQueue {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Append `record` and return the resulting queue length.
    pub fn push(&self, record: Record) -> usize {
        let mut records = self.records.lock();
        records.push_back(record);
        let len = records.len();
        drop(records);

        RECORDS_ENQUEUED.inc();
        QUEUE_LENGTH.set(gauge_value(len));
        len
    }

    #[must_use]
    pub fn len(&self) -> usize { self.records.lock().len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.records.lock().is_empty() }

    /// Snapshot of the first `n` records, oldest first.
    #[must_use]
    pub fn peek(&self, n: usize) -> Vec<Record> {
        self.records.lock().iter().take(n).cloned().collect()
    }

    /// Remove up to `n` records from the front, returning how many were
    /// removed.
    pub fn remove_prefix(&self, n: usize) -> usize {
        let mut records = self.records.lock();
        Self::drain_front(&mut records, n)
    }

    /// Like [`remove_prefix`](Self::remove_prefix) but gives up when the lock
    /// is not acquired within `timeout`, returning `None`.
    pub fn try_remove_prefix_for(&self, n: usize, timeout: Duration) -> Option<usize> {
        let mut records = self.records.try_lock_for(timeout)?;
        Some(Self::drain_front(&mut records, n))
    }

    /// Hold the queue lock, standing in for a long-running producer.
    #[cfg(test)]
    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, VecDeque<Record>> {
        self.records.lock()
    }

    fn drain_front(records: &mut VecDeque<Record>, n: usize) -> usize {
        let n = n.min(records.len());
        records.drain(..n);
        QUEUE_LENGTH.set(gauge_value(records.len()));
        n
    }
}

fn gauge_value(len: usize) -> i64 { i64::try_from(len).unwrap_or(i64::MAX) }

/// Rate-limited backlog reporting for the ingest path.
///
/// Backpressure is never applied to producers; a growing queue is only
/// surfaced through these warnings.
#[derive(Debug)]
pub struct BacklogMonitor {
    threshold:   usize,
    interval:    Duration,
    last_warned: Mutex<Option<Instant>>,
}

impl BacklogMonitor {
    #[must_use]
    pub const fn new(threshold: usize, interval: Duration) -> Self {
        Self {
            threshold,
            interval,
            last_warned: Mutex::new(None),
        }
    }

    /// Report `len` if it is above the threshold and no warning was emitted
    /// within the interval. Returns whether a warning was emitted.
    pub fn observe(&self, len: usize, state: impl FnOnce() -> LifecycleState) -> bool {
        if len <= self.threshold {
            return false;
        }

        let now = Instant::now();
        {
            let mut last_warned = self.last_warned.lock();
            if last_warned.is_some_and(|at| now.duration_since(at) < self.interval) {
                return false;
            }
            *last_warned = Some(now);
        }

        BACKLOG_WARNINGS.inc();
        warn!(
            component = "spool",
            operation = "enqueue",
            queue_len = len,
            threshold = self.threshold,
            worker_state = %state(),
            "Record backlog above warning threshold"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    fn record(payload: &'static str) -> Record { Record::now(payload.as_bytes()) }

    #[test]
    fn test_push_returns_length() {
        let queue = RecordQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.push(record("a")), 1);
        assert_eq!(queue.push(record("b")), 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_peek_and_remove_prefix_keep_fifo_order() {
        let queue = RecordQueue::new();
        for payload in ["a", "b", "c", "d"] {
            queue.push(record(payload));
        }

        let front = queue.peek(3);
        let payloads: Vec<_> = front.iter().map(|r| r.payload().clone()).collect();
        assert_eq!(payloads, vec!["a", "b", "c"]);
        assert_eq!(queue.len(), 4, "peek must not remove");

        assert_eq!(queue.remove_prefix(2), 2);
        let rest: Vec<_> = queue.peek(10).iter().map(|r| r.payload().clone()).collect();
        assert_eq!(rest, vec!["c", "d"]);
    }

    #[test]
    fn test_remove_prefix_clamps_to_length() {
        let queue = RecordQueue::new();
        queue.push(record("a"));
        assert_eq!(queue.remove_prefix(5), 1);
        assert!(queue.is_empty());
        assert_eq!(queue.remove_prefix(1), 0);
    }

    #[test]
    fn test_try_remove_prefix_times_out_while_locked() {
        let queue = Arc::new(RecordQueue::new());
        queue.push(record("a"));

        let guard = queue.lock();
        let contender = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.try_remove_prefix_for(1, Duration::from_millis(20)))
        };
        let result = contender.join().unwrap();
        drop(guard);

        assert_eq!(result, None);
        assert_eq!(queue.len(), 1);
        assert_eq!(
            queue.try_remove_prefix_for(1, Duration::from_millis(20)),
            Some(1)
        );
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = Arc::new(RecordQueue::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for _ in 0..250 {
                        queue.push(record("x"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.len(), 1000);
    }

    #[test]
    fn test_backlog_warning_is_rate_limited() {
        let monitor = BacklogMonitor::new(2, Duration::from_secs(60));
        assert!(!monitor.observe(2, || LifecycleState::Running));
        assert!(monitor.observe(3, || LifecycleState::Running));
        assert!(!monitor.observe(4, || LifecycleState::Running));
    }

    #[test]
    fn test_backlog_warning_repeats_after_interval() {
        let monitor = BacklogMonitor::new(0, Duration::from_millis(10));
        assert!(monitor.observe(1, || LifecycleState::Stopped));
        thread::sleep(Duration::from_millis(20));
        assert!(monitor.observe(1, || LifecycleState::Stopped));
    }
}
