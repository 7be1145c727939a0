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

use std::sync::LazyLock;

use prometheus::{
    Histogram, IntCounter, IntGauge, register_histogram, register_int_counter,
    register_int_gauge,
};

pub static QUEUE_LENGTH: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("spool_queue_length", "Records waiting to be flushed").unwrap()
});

pub static RECORDS_ENQUEUED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "spool_records_enqueued_total",
        "Total number of records accepted from producers"
    )
    .unwrap()
});

pub static RECORDS_FLUSHED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "spool_records_flushed_total",
        "Total number of records persisted and dequeued"
    )
    .unwrap()
});

pub static RECORDS_DROPPED_OVERSIZED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "spool_records_dropped_oversized_total",
        "Total number of records dropped for exceeding the block size limit"
    )
    .unwrap()
});

pub static BATCHES_WRITTEN: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "spool_batches_written_total",
        "Total number of successful append operations"
    )
    .unwrap()
});

pub static APPEND_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "spool_append_failures_total",
        "Total number of failed partition probe, create or append operations"
    )
    .unwrap()
});

pub static DEGRADED_REMOVALS: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "spool_degraded_removals_total",
        "Times the queue lock was not acquired within the bounded wait after a write"
    )
    .unwrap()
});

pub static BACKLOG_WARNINGS: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "spool_backlog_warnings_total",
        "Total number of backlog warnings emitted"
    )
    .unwrap()
});

pub static CYCLE_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "spool_cycle_failures_total",
        "Total number of flush cycles that ended in an error or a panic"
    )
    .unwrap()
});

pub static APPEND_DURATION_SECONDS: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "spool_append_duration_seconds",
        "Latency of append operations in seconds"
    )
    .unwrap()
});
