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

//! Time-window partitioning and the lazily materialized append target.

use std::{fmt, sync::Arc};

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tracing::{debug, info};

use crate::{
    error::{Result, StorageSnafu},
    metrics::APPEND_FAILURES,
    store::{AppendStore, ContentMeta, CreateOutcome, StoreResult, normalize_identifier},
};

/// Truncation policy mapping a timestamp to its partition window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum PartitionScheme {
    /// One partition per UTC day, keyed `YYYY-MM-DD`.
    Daily,
    /// One partition per UTC hour, keyed `YYYY-MM-DD-HH`.
    Hourly,
}

impl PartitionScheme {
    #[must_use]
    pub const fn from_hourly(hourly: bool) -> Self {
        if hourly { Self::Hourly } else { Self::Daily }
    }

    /// Length of one partition window.
    #[must_use]
    pub fn period(self) -> TimeDelta {
        match self {
            Self::Daily => TimeDelta::days(1),
            Self::Hourly => TimeDelta::hours(1),
        }
    }

    /// Whether `a` and `b` fall into the same partition window.
    #[must_use]
    pub fn same_window(self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        match self {
            Self::Daily => a.date_naive() == b.date_naive(),
            Self::Hourly => a.date_naive() == b.date_naive() && a.hour() == b.hour(),
        }
    }

    /// Normalized partition key for `ts`.
    #[must_use]
    pub fn key(self, ts: DateTime<Utc>) -> String {
        let raw = match self {
            Self::Daily => ts.format("%Y-%m-%d"),
            Self::Hourly => ts.format("%Y-%m-%d-%H"),
        };
        normalize_identifier(&raw.to_string())
    }
}

/// Handle to the append-only object backing one partition key.
#[derive(Clone)]
pub struct PartitionTarget {
    key:   String,
    store: Arc<dyn AppendStore>,
}

impl PartitionTarget {
    #[must_use]
    pub fn key(&self) -> &str { &self.key }

    pub async fn append(&self, payload: Bytes) -> StoreResult<()> {
        self.store.append(&self.key, payload).await
    }
}

impl fmt::Debug for PartitionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionTarget")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Caches the current [`PartitionTarget`] across flush cycles.
///
/// The target is materialized the first time its key is asked for, reused
/// while subsequent batches stay in the same key, and dropped through
/// [`invalidate`](Self::invalidate) on a partition crossing or a failed
/// write.
pub struct PartitionResolver {
    store:   Arc<dyn AppendStore>,
    meta:    ContentMeta,
    current: Option<PartitionTarget>,
}

impl PartitionResolver {
    pub fn new(store: Arc<dyn AppendStore>, meta: ContentMeta) -> Self {
        Self {
            store,
            meta,
            current: None,
        }
    }

    #[must_use]
    pub const fn current(&self) -> Option<&PartitionTarget> { self.current.as_ref() }

    pub fn invalidate(&mut self) {
        if let Some(target) = self.current.take() {
            debug!(key = %target.key, "Invalidated partition target");
        }
    }

    /// Return the target for `key`, materializing it when the cached one is
    /// missing or belongs to another key.
    pub async fn resolve(&mut self, key: &str) -> Result<PartitionTarget> {
        if let Some(target) = self.current.as_ref().filter(|t| t.key == key) {
            return Ok(target.clone());
        }

        self.current = None;
        let target = self.materialize(key).await.inspect_err(|_| {
            APPEND_FAILURES.inc();
        })?;
        self.current = Some(target.clone());
        Ok(target)
    }

    async fn materialize(&self, key: &str) -> Result<PartitionTarget> {
        let exists = self
            .store
            .exists(key)
            .await
            .context(StorageSnafu {
                key,
                operation: "probe",
            })?;

        if exists {
            info!(component = "spool", operation = "resolve", key, "Appending to existing partition");
        } else {
            let outcome = self
                .store
                .create_if_absent(key, &self.meta)
                .await
                .context(StorageSnafu {
                    key,
                    operation: "create",
                })?;
            match outcome {
                CreateOutcome::Created => {
                    info!(component = "spool", operation = "resolve", key, "Created partition");
                }
                CreateOutcome::AlreadyExists => {
                    debug!(key, "Partition appeared concurrently, reusing it");
                }
            }
        }

        Ok(PartitionTarget {
            key:   key.to_string(),
            store: Arc::clone(&self.store),
        })
    }
}
