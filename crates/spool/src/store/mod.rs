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

//! Append-only storage contract consumed by the flush engine.
//!
//! A backend exposes objects addressed by a normalized key. Objects are
//! created once, never truncated, and only grow through [`AppendStore::append`].

mod fs;
mod memory;

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
pub use fs::FsStore;
pub use memory::MemoryStore;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Result type for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures reported by an [`AppendStore`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// Network fault, throttling or any other backend-side failure.
    #[snafu(display("Storage backend unavailable: {message}"))]
    Unavailable {
        message: String,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },

    #[snafu(display("I/O failure on {}", path.display()))]
    Io {
        path:   PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// The caller passed an identifier the backend cannot name. This is a
    /// programming error, retrying will not help.
    #[snafu(display("Invalid storage identifier {key:?}"))]
    InvalidKey {
        key: String,
        #[snafu(implicit)]
        loc: snafu::Location,
    },
}

impl StoreError {
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Io { .. })
    }
}

/// Content metadata attached to newly created objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMeta {
    pub content_type:     String,
    pub content_encoding: String,
}

/// Result of [`AppendStore::create_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// Another writer (or an earlier run) created the object first. Its
    /// content is kept and new data is appended after it.
    AlreadyExists,
}

/// Access level given to containers created by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum ContainerAccess {
    #[default]
    Private,
    Public,
}

#[async_trait]
pub trait AppendStore: Send + Sync + 'static {
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    async fn create_if_absent(&self, key: &str, meta: &ContentMeta) -> StoreResult<CreateOutcome>;

    async fn append(&self, key: &str, payload: Bytes) -> StoreResult<()>;
}

/// Fold an identifier into the character set every backend accepts:
/// lowercase ASCII letters, digits and `-`. Anything else, a literal `.`
/// included, becomes `-`.
#[must_use]
pub fn normalize_identifier(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

pub(crate) fn is_normalized(key: &str) -> bool {
    !key.is_empty() && normalize_identifier(key) == key
}
