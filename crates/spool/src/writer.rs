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

//! Serializes a planned batch into one append and dequeues it on success.
//!
//! Wire format of an append payload:
//!
//! ```text
//! [payload 0][\n][payload 1][\n] ... [payload i-1][\n]
//! ```
//!
//! `i` is the longest prefix of the planned batch whose encoded size stays
//! within `max_block_size`. Records are only removed from the queue after
//! the append covering them returned success.

use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use snafu::ResultExt;
use tracing::{debug, warn};

use crate::{
    config::SpoolConfig,
    error::{OversizedRecordSnafu, Result, StorageSnafu},
    metrics::{
        APPEND_DURATION_SECONDS, APPEND_FAILURES, BATCHES_WRITTEN, DEGRADED_REMOVALS,
        RECORDS_DROPPED_OVERSIZED, RECORDS_FLUSHED,
    },
    partition::PartitionResolver,
    planner::BatchPlan,
    queue::RecordQueue,
    record::{RECORD_SEPARATOR, Record},
};

/// Summary of one successful append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub key:     String,
    pub records: usize,
    pub bytes:   usize,
}

#[derive(Debug, Clone)]
pub struct BatchWriter {
    max_block_size:      usize,
    remove_lock_timeout: Duration,
}

impl BatchWriter {
    #[must_use]
    pub fn new(config: &SpoolConfig) -> Self {
        Self {
            max_block_size:      config.max_block_size,
            remove_lock_timeout: config.remove_lock_timeout,
        }
    }

    #[must_use]
    pub const fn max_block_size(&self) -> usize { self.max_block_size }

    /// Length of the longest prefix of `batch` that fits in one block.
    #[must_use]
    pub fn fitting_prefix(&self, batch: &[Record]) -> usize {
        let mut total = 0;
        batch
            .iter()
            .take_while(|record| {
                total += record.encoded_len();
                total <= self.max_block_size
            })
            .count()
    }

    /// Concatenate `batch` into a single payload, each record followed by
    /// the separator.
    #[must_use]
    pub fn encode(batch: &[Record]) -> Bytes {
        let size = batch.iter().map(Record::encoded_len).sum();
        let mut buf = BytesMut::with_capacity(size);
        for record in batch {
            buf.put_slice(record.payload());
            buf.put_slice(RECORD_SEPARATOR);
        }
        buf.freeze()
    }

    /// Persist the batch described by `plan` and dequeue what was written.
    ///
    /// `front` must be the snapshot `plan` was computed from. On a storage
    /// failure the target is invalidated and the queue left untouched. A
    /// leading record that cannot fit in any block is dropped on its own and
    /// reported as [`OversizedRecord`](crate::FlushError::OversizedRecord).
    pub async fn write(
        &self,
        queue: &RecordQueue,
        resolver: &mut PartitionResolver,
        plan: &BatchPlan,
        front: &[Record],
    ) -> Result<WriteOutcome> {
        let batch = &front[..plan.count.min(front.len())];
        let fit = self.fitting_prefix(batch);

        if fit == 0 {
            let Some(first) = batch.first() else {
                return Ok(WriteOutcome {
                    key:     plan.key.clone(),
                    records: 0,
                    bytes:   0,
                });
            };
            self.remove_written(queue, 1);
            RECORDS_DROPPED_OVERSIZED.inc();
            return OversizedRecordSnafu {
                size:  first.encoded_len(),
                limit: self.max_block_size,
            }
            .fail();
        }

        let payload = Self::encode(&batch[..fit]);
        let bytes = payload.len();
        let target = resolver.resolve(&plan.key).await?;

        let started = Instant::now();
        if let Err(source) = target.append(payload).await {
            resolver.invalidate();
            APPEND_FAILURES.inc();
            return Err(source).context(StorageSnafu {
                key:       plan.key.as_str(),
                operation: "append",
            });
        }
        APPEND_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());

        self.remove_written(queue, fit);
        BATCHES_WRITTEN.inc();
        RECORDS_FLUSHED.inc_by(fit as u64);
        debug!(
            component = "spool",
            operation = "append",
            key = %plan.key,
            records = fit,
            bytes,
            "Appended batch"
        );

        Ok(WriteOutcome {
            key: plan.key.clone(),
            records: fit,
            bytes,
        })
    }

    /// Dequeue `count` records, waiting at most `remove_lock_timeout` on the
    /// fast path before falling back to an unbounded wait.
    fn remove_written(&self, queue: &RecordQueue, count: usize) {
        if queue
            .try_remove_prefix_for(count, self.remove_lock_timeout)
            .is_some()
        {
            return;
        }

        DEGRADED_REMOVALS.inc();
        warn!(
            component = "spool",
            operation = "dequeue",
            records = count,
            timeout = ?self.remove_lock_timeout,
            "Queue lock contended past the bounded wait, removing written records on the slow path"
        );
        queue.remove_prefix(count);
    }
}
