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

use std::{
    collections::{BTreeMap, btree_map::Entry},
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use snafu::ensure;

use super::{
    AppendStore, ContentMeta, CreateOutcome, InvalidKeySnafu, StoreResult, UnavailableSnafu,
    is_normalized,
};

#[derive(Debug)]
struct MemoryObject {
    meta: Option<ContentMeta>,
    data: BytesMut,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, MemoryObject>,
    appends: Vec<(String, Bytes)>,
}

/// In-process [`AppendStore`].
///
/// Keeps every object in memory and records each successful append in
/// order, which makes it the backend of choice for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner:           Mutex<Inner>,
    failing_appends: AtomicUsize,
    failing_creates: AtomicUsize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Seed an object as if an earlier run had written it.
    pub fn insert(&self, key: impl Into<String>, data: impl AsRef<[u8]>) {
        self.inner.lock().objects.insert(
            key.into(),
            MemoryObject {
                meta: None,
                data: BytesMut::from(data.as_ref()),
            },
        );
    }

    /// Make the next `n` appends fail with a transient error.
    pub fn fail_next_appends(&self, n: usize) { self.failing_appends.store(n, Ordering::SeqCst); }

    /// Make the next `n` creates fail with a transient error.
    pub fn fail_next_creates(&self, n: usize) { self.failing_creates.store(n, Ordering::SeqCst); }

    #[must_use]
    pub fn contents(&self, key: &str) -> Option<Bytes> {
        self.inner
            .lock()
            .objects
            .get(key)
            .map(|object| Bytes::copy_from_slice(&object.data))
    }

    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<ContentMeta> {
        self.inner
            .lock()
            .objects
            .get(key)
            .and_then(|object| object.meta.clone())
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> { self.inner.lock().objects.keys().cloned().collect() }

    /// Every successful append so far as `(key, payload)`, oldest first.
    #[must_use]
    pub fn append_log(&self) -> Vec<(String, Bytes)> { self.inner.lock().appends.clone() }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl AppendStore for MemoryStore {
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.inner.lock().objects.contains_key(key))
    }

    async fn create_if_absent(&self, key: &str, meta: &ContentMeta) -> StoreResult<CreateOutcome> {
        ensure!(is_normalized(key), InvalidKeySnafu { key });
        ensure!(
            !Self::take_failure(&self.failing_creates),
            UnavailableSnafu {
                message: format!("injected create failure for {key}"),
            }
        );

        match self.inner.lock().objects.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(CreateOutcome::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(MemoryObject {
                    meta: Some(meta.clone()),
                    data: BytesMut::new(),
                });
                Ok(CreateOutcome::Created)
            }
        }
    }

    async fn append(&self, key: &str, payload: Bytes) -> StoreResult<()> {
        ensure!(
            !Self::take_failure(&self.failing_appends),
            UnavailableSnafu {
                message: format!("injected append failure for {key}"),
            }
        );

        let mut inner = self.inner.lock();
        let Some(object) = inner.objects.get_mut(key) else {
            return UnavailableSnafu {
                message: format!("append target {key} does not exist"),
            }
            .fail();
        };
        object.data.extend_from_slice(&payload);
        inner.appends.push((key.to_string(), payload));
        Ok(())
    }
}
