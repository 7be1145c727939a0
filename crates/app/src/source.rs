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

//! Push sources feeding records into a [`Spool`].
//!
//! TCP wire format, one record per frame:
//!
//! ```text
//! [length: u32 little endian][payload: length bytes]
//! ```

use std::{io::ErrorKind, net::SocketAddr, sync::Arc};

use futures::StreamExt;
use snafu::{ResultExt, Whatever};
use spool_core::Spool;
use tokio::{
    io::AsyncRead,
    net::{TcpListener, TcpStream},
    task::JoinSet,
};
use tokio_util::{
    codec::{FramedRead, LengthDelimitedCodec, LinesCodec, LinesCodecError},
    sync::CancellationToken,
};
use tracing::{debug, error, info, warn};

use crate::config::{SourceConfig, SourceKind};

/// Run the source selected by `config` until it is exhausted or `cancel`
/// fires.
pub async fn run(
    config: SourceConfig,
    spool: Arc<Spool>,
    cancel: CancellationToken,
) -> Result<(), Whatever> {
    info!(kind = %config.kind, "Starting ingest source");
    match config.kind {
        SourceKind::Stdin => {
            let count =
                ingest_lines(tokio::io::stdin(), &spool, &cancel, config.max_frame_length).await;
            info!(records = count, "Stdin source finished");
            Ok(())
        }
        SourceKind::Tcp => {
            let source = TcpSource::bind(&config.listen_addr, config.max_frame_length).await?;
            source.run(spool, cancel).await;
            Ok(())
        }
    }
}

/// Enqueue every line of `reader` as one record. Returns the number of
/// records enqueued.
///
/// Lines longer than `max_length` are reported and not enqueued.
pub async fn ingest_lines<R>(
    reader: R,
    spool: &Spool,
    cancel: &CancellationToken,
    max_length: usize,
) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(max_length));
    let mut count = 0;

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = lines.next() => next,
        };
        match next {
            Some(Ok(line)) => {
                spool.enqueue(line.into_bytes());
                count += 1;
            }
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                warn!(max_length, "Dropped overlong input line");
            }
            Some(Err(LinesCodecError::Io(e))) => {
                error!(error = %e, "Failed to read input");
                break;
            }
            None => break,
        }
    }
    count
}

/// Enqueue every length-delimited frame of `reader` as one record. Returns
/// the number of records enqueued, or the error that ended the stream.
pub async fn ingest_frames<R>(
    reader: R,
    spool: &Spool,
    cancel: &CancellationToken,
    max_length: usize,
) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let codec = LengthDelimitedCodec::builder()
        .length_field_length(4)
        .little_endian()
        .max_frame_length(max_length)
        .new_codec();
    let mut frames = FramedRead::new(reader, codec);
    let mut count = 0;

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = frames.next() => next,
        };
        match next {
            Some(Ok(frame)) => {
                spool.enqueue(frame.freeze());
                count += 1;
            }
            Some(Err(e)) => return Err(e),
            None => break,
        }
    }
    Ok(count)
}

/// Accepts connections and ingests their frames until cancelled.
pub struct TcpSource {
    listener:         TcpListener,
    max_frame_length: usize,
}

impl TcpSource {
    pub async fn bind(addr: &str, max_frame_length: usize) -> Result<Self, Whatever> {
        let listener = TcpListener::bind(addr)
            .await
            .with_whatever_context(|_| format!("Failed to bind TCP source on {addr}"))?;
        Ok(Self {
            listener,
            max_frame_length,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Whatever> {
        self.listener
            .local_addr()
            .whatever_context("Failed to read TCP source address")
    }

    /// Serve until `cancel` fires, then wait for open connections to wind
    /// down.
    pub async fn run(self, spool: Arc<Spool>, cancel: CancellationToken) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "TCP source listening");
        }
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "Accepted TCP connection");
                        connections.spawn(handle_connection(
                            stream,
                            peer,
                            Arc::clone(&spool),
                            cancel.child_token(),
                            self.max_frame_length,
                        ));
                    }
                    Err(e) => error!(error = %e, "Unable to accept TCP connection"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        while connections.join_next().await.is_some() {}
        info!("TCP source stopped");
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    spool: Arc<Spool>,
    cancel: CancellationToken,
    max_frame_length: usize,
) {
    match ingest_frames(stream, &spool, &cancel, max_frame_length).await {
        Ok(records) => debug!(%peer, records, "TCP connection closed"),
        Err(e) => match e.kind() {
            ErrorKind::UnexpectedEof | ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset => {
                info!(%peer, error = %e, "TCP connection dropped");
            }
            _ => error!(%peer, error = %e, "TCP connection failed"),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::{BufMut, BytesMut};
    use spool_core::{MemoryStore, SpoolConfig};
    use tokio::io::AsyncWriteExt;

    use super::*;

    fn spool() -> Arc<Spool> {
        Arc::new(Spool::new(
            SpoolConfig::default(),
            Arc::new(MemoryStore::new()),
        ))
    }

    fn frame(payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u32_le(u32::try_from(payload.len()).unwrap());
        buf.put_slice(payload);
        buf
    }

    #[tokio::test]
    async fn test_ingest_lines() {
        let spool = spool();
        let input: &[u8] = b"first\nsecond\r\n\nthird";
        let count = ingest_lines(input, &spool, &CancellationToken::new(), 1024).await;

        assert_eq!(count, 4);
        assert_eq!(spool.len(), 4);
    }

    #[tokio::test]
    async fn test_overlong_line_is_skipped() {
        let spool = spool();
        let input: &[u8] = b"ok\nok-again\nthis-line-is-too-long\n";
        let count = ingest_lines(input, &spool, &CancellationToken::new(), 8).await;
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_ingest_frames() {
        let spool = spool();
        let mut input = frame(b"alpha");
        input.extend_from_slice(&frame(b"with\nnewline"));
        let count = ingest_frames(&input[..], &spool, &CancellationToken::new(), 1024)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let spool = spool();
        let input = frame(b"alpha");
        let result = ingest_frames(&input[..6], &spool, &CancellationToken::new(), 1024).await;
        assert!(result.is_err());
        assert!(spool.is_empty());
    }

    #[tokio::test]
    async fn test_tcp_source_until_cancelled() {
        let spool = spool();
        let cancel = CancellationToken::new();
        let source = TcpSource::bind("127.0.0.1:0", 1024).await.unwrap();
        let addr = source.local_addr().unwrap();
        let server = tokio::spawn(source.run(Arc::clone(&spool), cancel.clone()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&frame(b"one")).await.unwrap();
        client.write_all(&frame(b"two")).await.unwrap();
        client.flush().await.unwrap();

        for _ in 0..100 {
            if spool.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(spool.len(), 2);

        cancel.cancel();
        server.await.unwrap();
    }
}
