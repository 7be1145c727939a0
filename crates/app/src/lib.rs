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

pub mod config;
pub mod source;

use std::{future::Future, sync::Arc};

pub use config::{AppConfig, SourceConfig, SourceKind, StorageConfig};
use snafu::{ResultExt, Whatever};
use spool_common_telemetry as telemetry;
use spool_core::{FsStore, Spool};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// The spool process: one ingest source feeding one [`Spool`] backed by the
/// filesystem store.
pub struct App {
    config:             AppConfig,
    cancellation_token: CancellationToken,
}

impl AppConfig {
    #[must_use]
    pub fn open(self) -> App {
        App {
            config:             self,
            cancellation_token: CancellationToken::new(),
        }
    }
}

impl App {
    #[must_use]
    pub const fn config(&self) -> &AppConfig { &self.config }

    /// Token that shuts the application down when cancelled, like a signal.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken { self.cancellation_token.clone() }

    /// Run until SIGINT/SIGTERM, cancellation, or the source running dry,
    /// then drain every buffered record.
    pub async fn run(self) -> Result<(), Whatever> {
        let signal = shutdown_signal();
        self.run_until(signal).await
    }

    /// Like [`run`](Self::run) with a caller supplied shutdown trigger.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<(), Whatever> {
        let storage = &self.config.storage;
        let store = FsStore::open(&storage.connection, &storage.container, storage.access())
            .await
            .with_whatever_context(|_| {
                format!(
                    "Failed to open container {} under {}",
                    storage.container, storage.connection
                )
            })?;

        let spool = Arc::new(Spool::new(self.config.spool.clone(), Arc::new(store)));
        spool
            .start()
            .whatever_context("Failed to start flush worker")?;
        info!(
            container = %storage.container,
            source = %self.config.source.kind,
            "Spool application started"
        );

        let mut source = tokio::spawn(source::run(
            self.config.source.clone(),
            Arc::clone(&spool),
            self.cancellation_token.clone(),
        ));

        let source_result = tokio::select! {
            () = shutdown => {
                info!("Shutdown requested");
                self.cancellation_token.cancel();
                (&mut source).await
            }
            () = self.cancellation_token.cancelled() => (&mut source).await,
            result = &mut source => {
                info!("Ingest source finished");
                result
            }
        };

        info!(pending = spool.len(), "Draining buffered records");
        spool.stop().await;
        debug!(metrics = %telemetry::gather_metrics(), "Final metrics");
        info!("Spool application stopped");

        source_result.whatever_context("Ingest source task failed")?
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C signal"); },
        () = terminate => { info!("Received terminate signal"); },
    }
}

#[cfg(test)]
mod tests {
    use std::{path::Path, time::Duration};

    use config::Map;
    use tempfile::TempDir;
    use tokio::{io::AsyncWriteExt, net::TcpStream};

    use super::*;

    fn tcp_config(root: &Path) -> AppConfig {
        let env = Map::from([
            (
                "SPOOL__STORAGE__CONNECTION".to_string(),
                root.display().to_string(),
            ),
            ("SPOOL__STORAGE__CONTAINER".to_string(), "it".to_string()),
            ("SPOOL__SOURCE__KIND".to_string(), "tcp".to_string()),
            ("SPOOL__SOURCE__LISTEN_ADDR".to_string(), "127.0.0.1:0".to_string()),
            ("SPOOL__SPOOL__POLL_INTERVAL".to_string(), "10ms".to_string()),
            ("SPOOL__SPOOL__DRAIN_POLL_INTERVAL".to_string(), "10ms".to_string()),
        ]);
        AppConfig::load_with_env(None, Some(env)).unwrap()
    }

    #[tokio::test]
    async fn test_app_stops_on_cancellation() {
        let dir = TempDir::new().unwrap();
        let app = tcp_config(dir.path()).open();
        let token = app.cancellation_token();

        let running = tokio::spawn(app.run_until(std::future::pending()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        running.await.unwrap().unwrap();
        assert!(dir.path().join("it").is_dir());
    }

    #[tokio::test]
    async fn test_app_drains_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let mut config = tcp_config(dir.path());

        // Reserve a port for the source.
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);
        config.source.listen_addr = addr.to_string();
        config.spool.min_batch_count = 1000;

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let running = tokio::spawn(config.open().run_until(async {
            let _ = rx.await;
        }));

        let mut client = None;
        for _ in 0..100 {
            if let Ok(stream) = TcpStream::connect(addr).await {
                client = Some(stream);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let mut client = client.unwrap();
        for payload in [&b"one"[..], b"two", b"three"] {
            client
                .write_all(&u32::try_from(payload.len()).unwrap().to_le_bytes())
                .await
                .unwrap();
            client.write_all(payload).await.unwrap();
        }
        client.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        tx.send(()).unwrap();
        running.await.unwrap().unwrap();

        let container = dir.path().join("it");
        let written: Vec<u8> = std::fs::read_dir(&container)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "log"))
            .flat_map(|path| std::fs::read(path).unwrap())
            .collect();
        assert_eq!(written, b"one\ntwo\nthree\n");
    }
}
