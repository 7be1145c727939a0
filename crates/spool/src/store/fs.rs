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

//! Local filesystem [`AppendStore`].
//!
//! ## Layout
//!
//! ```text
//! {root}/
//! └── {container}/
//!     ├── 2025-01-31.log          # append-only partition object
//!     ├── 2025-01-31.meta.json    # content metadata, written once
//!     └── ...
//! ```

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, info, warn};

use super::{
    AppendStore, ContainerAccess, ContentMeta, CreateOutcome, InvalidKeySnafu, IoSnafu,
    StoreResult, is_normalized, normalize_identifier,
};

const OBJECT_EXTENSION: &str = "log";
const META_SUFFIX: &str = ".meta.json";

/// Sidecar written next to each object at creation time.
#[derive(Debug, Serialize, Deserialize)]
struct StoredMeta {
    #[serde(flatten)]
    content:    ContentMeta,
    created_at: DateTime<Utc>,
}

/// Container directory holding one append-only file per partition key.
#[derive(Debug, Clone)]
pub struct FsStore {
    container: PathBuf,
}

impl FsStore {
    /// Open the container `container` below `root`, creating it with the
    /// permissions implied by `access` if it does not exist yet.
    pub async fn open(
        root: impl AsRef<Path>,
        container: &str,
        access: ContainerAccess,
    ) -> StoreResult<Self> {
        let name = normalize_identifier(container);
        ensure!(!name.is_empty(), InvalidKeySnafu { key: container });
        let path = root.as_ref().join(&name);

        match fs::metadata(&path).await {
            Ok(_) => {
                debug!(container = %path.display(), "Reusing existing container");
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(&path)
                    .await
                    .context(IoSnafu { path: path.clone() })?;
                set_access(&path, access).await?;
                info!(container = %path.display(), %access, "Created container");
            }
            Err(e) => return Err(e).context(IoSnafu { path }),
        }

        Ok(Self { container: path })
    }

    #[must_use]
    pub fn container(&self) -> &Path { &self.container }

    /// Path of the object backing `key`.
    pub fn object_path(&self, key: &str) -> StoreResult<PathBuf> {
        ensure!(is_normalized(key), InvalidKeySnafu { key });
        Ok(self.container.join(format!("{key}.{OBJECT_EXTENSION}")))
    }

    fn meta_path(&self, key: &str) -> PathBuf { self.container.join(format!("{key}{META_SUFFIX}")) }

    /// Content metadata is best effort: a sidecar left by a concurrent or
    /// earlier creator is kept, other failures are logged and ignored.
    async fn write_meta(&self, key: &str, meta: &ContentMeta) {
        let path = self.meta_path(key);
        let stored = StoredMeta {
            content:    meta.clone(),
            created_at: Utc::now(),
        };
        let body = match serde_json::to_vec_pretty(&stored) {
            Ok(body) => body,
            Err(e) => {
                warn!(key, error = %e, "Failed to encode content metadata");
                return;
            }
        };

        let result = async {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await?;
            file.write_all(&body).await?;
            file.sync_data().await?;
            Ok::<_, std::io::Error>(())
        }
        .await;

        match result {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(key, "Content metadata already present");
            }
            Err(e) => {
                warn!(key, path = %path.display(), error = %e, "Failed to set content metadata");
            }
        }
    }
}

#[cfg(unix)]
async fn set_access(path: &Path, access: ContainerAccess) -> StoreResult<()> {
    use std::{fs::Permissions, os::unix::fs::PermissionsExt};

    let mode = match access {
        ContainerAccess::Private => 0o700,
        ContainerAccess::Public => 0o755,
    };
    fs::set_permissions(path, Permissions::from_mode(mode))
        .await
        .context(IoSnafu { path })
}

#[cfg(not(unix))]
async fn set_access(_path: &Path, _access: ContainerAccess) -> StoreResult<()> { Ok(()) }

#[async_trait]
impl AppendStore for FsStore {
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let path = self.object_path(key)?;
        fs::try_exists(&path).await.context(IoSnafu { path })
    }

    async fn create_if_absent(&self, key: &str, meta: &ContentMeta) -> StoreResult<CreateOutcome> {
        let path = self.object_path(key)?;
        let created = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;

        match created {
            Ok(file) => {
                file.sync_all().await.context(IoSnafu { path: path.clone() })?;
                self.write_meta(key, meta).await;
                Ok(CreateOutcome::Created)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(e).context(IoSnafu { path }),
        }
    }

    async fn append(&self, key: &str, payload: Bytes) -> StoreResult<()> {
        let path = self.object_path(key)?;
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .context(IoSnafu { path: path.clone() })?;
        file.write_all(&payload)
            .await
            .context(IoSnafu { path: path.clone() })?;
        file.sync_data().await.context(IoSnafu { path })
    }
}
