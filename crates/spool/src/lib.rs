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

//! Batching flush engine for time-partitioned append-only storage.
//!
//! Producers hand records to a [`Spool`], which buffers them in memory and
//! lets a single background worker persist them in batches:
//! - **Non-blocking ingest**: `enqueue` never waits on storage I/O
//! - **Time partitioning**: one append-only object per UTC day or hour
//! - **Size-bounded appends**: each append stays within `max_block_size`
//! - **At-least-once**: records leave the queue only after a successful
//!   append, failed cycles are retried
//! - **Drain on stop**: `stop` returns once every buffered record is written
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use spool_core::{MemoryStore, Spool, SpoolConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(MemoryStore::new());
//!     let spool = Spool::new(SpoolConfig::default(), store.clone());
//!     spool.start().unwrap();
//!
//!     spool.enqueue(&b"hello"[..]);
//!     spool.enqueue(&b"world"[..]);
//!
//!     // Flushes whatever is left, below min_batch_count or not.
//!     spool.stop().await;
//!     assert!(spool.is_empty());
//! }
//! ```
//!
//! # Architecture
//!
//! - [`RecordQueue`]: FIFO buffer shared by producers and the worker
//! - [`BatchPlanner`]: decides when to flush and which prefix goes next
//! - [`PartitionResolver`]: caches the [`PartitionTarget`] for the current key
//! - [`BatchWriter`]: encodes the prefix into one append and dequeues it
//! - [`Spool`]: lifecycle controller running the flush worker
//! - [`AppendStore`]: storage seam, with [`FsStore`] and [`MemoryStore`]

mod config;
mod controller;
mod error;
mod metrics;
mod partition;
mod planner;
mod queue;
mod record;
mod store;
mod writer;

pub use config::{
    DEFAULT_MAX_BATCH_COUNT, DEFAULT_MAX_BLOCK_SIZE, DEFAULT_MIN_BATCH_COUNT, SpoolConfig,
};
pub use controller::{CycleOutcome, LifecycleState, Spool};
pub use error::{FlushError, FlushErrorKind, Result};
pub use partition::{PartitionResolver, PartitionScheme, PartitionTarget};
pub use planner::{BatchPlan, BatchPlanner};
pub use queue::{BacklogMonitor, RecordQueue};
pub use record::{RECORD_SEPARATOR, Record};
pub use store::{
    AppendStore, ContainerAccess, ContentMeta, CreateOutcome, FsStore, MemoryStore, StoreError,
    StoreResult, normalize_identifier,
};
pub use writer::{BatchWriter, WriteOutcome};
