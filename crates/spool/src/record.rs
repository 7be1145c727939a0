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

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Delimiter written after every record in an append payload.
pub const RECORD_SEPARATOR: &[u8] = b"\n";

/// One immutable unit of producer data with its enqueue timestamp.
///
/// Payloads are reference counted, so cloning a record (the planner works on
/// snapshots of the queue front) does not copy bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    enqueued_at: DateTime<Utc>,
    payload:     Bytes,
}

impl Record {
    pub fn new(enqueued_at: DateTime<Utc>, payload: impl Into<Bytes>) -> Self {
        Self {
            enqueued_at,
            payload: payload.into(),
        }
    }

    /// Stamp `payload` with the current wall clock time.
    pub fn now(payload: impl Into<Bytes>) -> Self { Self::new(Utc::now(), payload) }

    #[must_use]
    pub const fn enqueued_at(&self) -> DateTime<Utc> { self.enqueued_at }

    #[must_use]
    pub const fn payload(&self) -> &Bytes { &self.payload }

    /// Bytes this record occupies in an append payload, separator included.
    #[must_use]
    pub const fn encoded_len(&self) -> usize { self.payload.len() + RECORD_SEPARATOR.len() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_len_counts_separator() {
        let record = Record::now(&b"0123456789"[..]);
        assert_eq!(record.encoded_len(), 10 + RECORD_SEPARATOR.len());
        assert_eq!(record.payload().as_ref(), b"0123456789");
    }
}
