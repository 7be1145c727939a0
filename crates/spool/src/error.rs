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

use snafu::Snafu;

use crate::{controller::LifecycleState, store::StoreError};

/// Result type for flush engine operations.
pub type Result<T, E = FlushError> = std::result::Result<T, E>;

/// Coarse classification the worker branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum FlushErrorKind {
    /// Backend fault during probe, create or append. The batch stays queued
    /// and is retried on a later cycle.
    TransientStorage,
    /// A single record is larger than the block size limit and was dropped.
    SizeExceeded,
    /// Anything else: invalid identifiers, lifecycle misuse.
    Other,
}

/// Errors produced by a flush cycle or by the lifecycle controller.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FlushError {
    #[snafu(display("Failed to {operation} partition {key}"))]
    Storage {
        key:       String,
        operation: &'static str,
        source:    StoreError,
        #[snafu(implicit)]
        loc:       snafu::Location,
    },

    #[snafu(display("Dropped record of {size} bytes, block size limit is {limit} bytes"))]
    OversizedRecord {
        size:  usize,
        limit: usize,
        #[snafu(implicit)]
        loc:   snafu::Location,
    },

    #[snafu(display("Flush worker must be started from within a tokio runtime"))]
    NoRuntime {
        source: tokio::runtime::TryCurrentError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Operation not permitted while the spool is {state}"))]
    InvalidState {
        state: LifecycleState,
        #[snafu(implicit)]
        loc:   snafu::Location,
    },
}

impl FlushError {
    #[must_use]
    pub fn kind(&self) -> FlushErrorKind {
        match self {
            Self::Storage { source, .. } if source.is_transient() => {
                FlushErrorKind::TransientStorage
            }
            Self::OversizedRecord { .. } => FlushErrorKind::SizeExceeded,
            _ => FlushErrorKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use snafu::IntoError;

    use super::*;
    use crate::store::{InvalidKeySnafu, UnavailableSnafu};

    #[test]
    fn test_kind_classification() {
        let transient = StorageSnafu {
            key:       "2025-01-01",
            operation: "append",
        }
        .into_error(
            UnavailableSnafu {
                message: "throttled",
            }
            .build(),
        );
        assert_eq!(transient.kind(), FlushErrorKind::TransientStorage);

        let invalid = StorageSnafu {
            key:       "Bad.Key",
            operation: "append",
        }
        .into_error(InvalidKeySnafu { key: "Bad.Key" }.build());
        assert_eq!(invalid.kind(), FlushErrorKind::Other);

        let oversized = OversizedRecordSnafu {
            size:  10usize,
            limit: 4usize,
        }
        .build();
        assert_eq!(oversized.kind(), FlushErrorKind::SizeExceeded);
        assert!(oversized.to_string().contains("10 bytes"));
    }
}
