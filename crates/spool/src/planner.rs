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

//! Per-cycle batch selection.
//!
//! ## Decision
//!
//! 1. **Defer** when the queue is empty, or when it holds fewer than
//!    `min_batch_count` records while the current window is still open and
//!    no shutdown is pending. Small bursts coalesce into fewer appends.
//! 2. **Walk** the queue front, up to `max_batch_count` records. The first
//!    record either stays in the current window or opens a new one (the
//!    boundary moves, the caller must drop its cached target). The walk
//!    stops at the first later record that belongs to another window.
//!
//! The planner never looks at payload sizes; the writer shrinks the batch
//! further to fit the block size limit.

use chrono::{DateTime, Utc};

use crate::{config::SpoolConfig, partition::PartitionScheme, record::Record};

/// Contiguous run at the queue front selected for one append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    /// Number of records from the front of the queue.
    pub count:          usize,
    /// Partition key shared by all of them.
    pub key:            String,
    /// The first record opened a new window; any cached target is stale.
    pub boundary_reset: bool,
}

#[derive(Debug, Clone)]
pub struct BatchPlanner {
    scheme:          PartitionScheme,
    min_batch_count: usize,
    max_batch_count: usize,
    /// Timestamp of the record that opened the current window.
    boundary:        Option<DateTime<Utc>>,
}

impl BatchPlanner {
    #[must_use]
    pub fn new(config: &SpoolConfig) -> Self {
        Self {
            scheme:          config.partition_scheme(),
            min_batch_count: config.effective_min_batch_count(),
            max_batch_count: config.effective_max_batch_count(),
            boundary:        None,
        }
    }

    #[must_use]
    pub const fn boundary(&self) -> Option<DateTime<Utc>> { self.boundary }

    #[must_use]
    pub const fn max_batch_count(&self) -> usize { self.max_batch_count }

    #[must_use]
    pub const fn scheme(&self) -> PartitionScheme { self.scheme }

    /// Whether this cycle should sleep instead of flushing.
    #[must_use]
    pub fn should_defer(&self, queue_len: usize, now: DateTime<Utc>, shutdown: bool) -> bool {
        if queue_len == 0 {
            return true;
        }
        let window_open = self
            .boundary
            .is_some_and(|boundary| now.signed_duration_since(boundary) < self.scheme.period());
        queue_len < self.min_batch_count && window_open && !shutdown
    }

    /// Select the next batch from `front`, a snapshot of the queue head.
    ///
    /// Returns `None` when nothing is eligible.
    pub fn plan(&mut self, front: &[Record]) -> Option<BatchPlan> {
        let mut count = 0;
        let mut boundary_reset = false;

        for record in front.iter().take(self.max_batch_count) {
            let ts = record.enqueued_at();
            let in_window = self
                .boundary
                .is_some_and(|boundary| self.scheme.same_window(boundary, ts));

            if !in_window {
                if count > 0 {
                    break;
                }
                self.boundary = Some(ts);
                boundary_reset = true;
            }
            count += 1;
        }

        if count == 0 {
            return None;
        }
        let boundary = self.boundary?;
        Some(BatchPlan {
            count,
            key: self.scheme.key(boundary),
            boundary_reset,
        })
    }
}
