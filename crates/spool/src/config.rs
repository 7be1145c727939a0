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

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

use crate::{partition::PartitionScheme, store::ContentMeta};

/// Batch count floor used when `min_batch_count` is unset or non-positive.
pub const DEFAULT_MIN_BATCH_COUNT: usize = 10;
/// Batch count ceiling used when `max_batch_count` is unset or non-positive.
pub const DEFAULT_MAX_BATCH_COUNT: usize = 1000;
/// Upper bound on the serialized size of a single append (4 MiB).
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Tuning knobs of the flush engine.
///
/// Every field has a default, so a partially specified configuration file
/// deserializes cleanly.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault)]
#[serde(default)]
pub struct SpoolConfig {
    /// Partition records by hour (`YYYY-MM-DD-HH`) instead of by day
    /// (`YYYY-MM-DD`). Fixed for the lifetime of a [`Spool`](crate::Spool).
    #[default = false]
    pub use_hourly_partitioning: bool,

    /// Below this many queued records the planner waits for more, as long as
    /// the current partition window is still open and no shutdown is
    /// pending. Non-positive values fall back to 10.
    #[default = 10]
    pub min_batch_count: i64,

    /// Most records a single append may carry. Non-positive values fall back
    /// to 1000.
    #[default = 1000]
    pub max_batch_count: i64,

    /// Most bytes (payloads plus separators) a single append may carry.
    #[default(DEFAULT_MAX_BLOCK_SIZE)]
    pub max_block_size: usize,

    /// Sleep between cycles that had nothing to flush, and after a failed
    /// cycle.
    #[serde(with = "humantime_serde")]
    #[default(Duration::from_millis(500))]
    pub poll_interval: Duration,

    /// How often `stop` re-checks the queue while draining.
    #[serde(with = "humantime_serde")]
    #[default(Duration::from_secs(1))]
    pub drain_poll_interval: Duration,

    /// Bounded wait for the queue lock when removing written records.
    #[serde(with = "humantime_serde")]
    #[default(Duration::from_secs(1))]
    pub remove_lock_timeout: Duration,

    /// Queue length above which backlog warnings are emitted.
    #[default = 1000]
    pub backlog_warn_threshold: usize,

    /// Minimum spacing between two backlog warnings.
    #[serde(with = "humantime_serde")]
    #[default(Duration::from_secs(60))]
    pub backlog_warn_interval: Duration,

    /// Content type recorded on newly created partition objects.
    #[default = "application/octet-stream"]
    pub content_type: String,

    /// Content encoding recorded on newly created partition objects.
    #[default = "identity"]
    pub content_encoding: String,
}

impl SpoolConfig {
    #[must_use]
    pub fn effective_min_batch_count(&self) -> usize {
        positive_or(self.min_batch_count, DEFAULT_MIN_BATCH_COUNT)
    }

    #[must_use]
    pub fn effective_max_batch_count(&self) -> usize {
        positive_or(self.max_batch_count, DEFAULT_MAX_BATCH_COUNT)
    }

    #[must_use]
    pub const fn partition_scheme(&self) -> PartitionScheme {
        PartitionScheme::from_hourly(self.use_hourly_partitioning)
    }

    #[must_use]
    pub fn content_meta(&self) -> ContentMeta {
        ContentMeta {
            content_type:     self.content_type.clone(),
            content_encoding: self.content_encoding.clone(),
        }
    }
}

fn positive_or(value: i64, fallback: usize) -> usize {
    usize::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = SpoolConfig::default();
        assert!(!config.use_hourly_partitioning);
        assert_eq!(config.effective_min_batch_count(), 10);
        assert_eq!(config.effective_max_batch_count(), 1000);
        assert_eq!(config.max_block_size, 4 * 1024 * 1024);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.drain_poll_interval, Duration::from_secs(1));
        assert_eq!(config.backlog_warn_threshold, 1000);
        assert_eq!(config.backlog_warn_interval, Duration::from_secs(60));
        assert_eq!(config.partition_scheme(), PartitionScheme::Daily);
    }

    #[test_case(0, 10 ; "zero falls back")]
    #[test_case(-3, 10 ; "negative falls back")]
    #[test_case(1, 1 ; "one is kept")]
    #[test_case(250, 250 ; "large is kept")]
    fn test_min_batch_count(configured: i64, expected: usize) {
        let config = SpoolConfig {
            min_batch_count: configured,
            ..Default::default()
        };
        assert_eq!(config.effective_min_batch_count(), expected);
    }

    #[test]
    fn test_max_batch_count_fallback() {
        let config = SpoolConfig {
            max_batch_count: 0,
            ..Default::default()
        };
        assert_eq!(config.effective_max_batch_count(), 1000);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SpoolConfig = serde_json::from_str(
            r#"{"use_hourly_partitioning": true, "poll_interval": "250ms", "min_batch_count": 0}"#,
        )
        .unwrap();
        assert_eq!(config.partition_scheme(), PartitionScheme::Hourly);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.effective_min_batch_count(), 10);
        assert_eq!(config.max_block_size, DEFAULT_MAX_BLOCK_SIZE);
    }
}
