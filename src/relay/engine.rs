//! Relay engine.
//!
//! # Responsibilities
//! - Open the upstream channel for a decoded handshake
//! - Write the leftover payload before anything else
//! - Run the uplink and downlink pumps until either side ends
//! - Report when both directions are done
//!
//! # Design Decisions
//! - Connect failures are terminal; the engine never retries
//! - The uplink queue is bounded; a full queue is reported, never grown
//! - Each pump half-closes only its own direction

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{TunnelError, TunnelResult};
use crate::observability::metrics;
use crate::protocol::Handshake;
use crate::relay::connector::Connector;
use crate::relay::downlink::{DownlinkMux, PumpExit};
use crate::session::activity::ActivityClock;

/// Queue and read sizes for the pumps.
#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    /// Chunks queued between the sequencer and the upstream writer.
    pub uplink_queue_chunks: usize,
    /// Upper bound on a single upstream read.
    pub downlink_read_bytes: usize,
}

/// Completion flags for the two directions.
#[derive(Debug, Default)]
pub struct RelayStatus {
    uplink_done: AtomicBool,
    downlink_done: AtomicBool,
}

impl RelayStatus {
    pub fn uplink_done(&self) -> bool {
        self.uplink_done.load(Ordering::Acquire)
    }

    pub fn downlink_done(&self) -> bool {
        self.downlink_done.load(Ordering::Acquire)
    }

    /// Both directions have ended; the session can be evicted.
    pub fn finished(&self) -> bool {
        self.uplink_done() && self.downlink_done()
    }
}

/// Opens upstream channels and drives the pumps.
#[derive(Clone)]
pub struct RelayEngine {
    connector: Arc<dyn Connector>,
    settings: RelaySettings,
}

impl RelayEngine {
    pub fn new(connector: Arc<dyn Connector>, settings: RelaySettings) -> Self {
        Self { connector, settings }
    }

    /// Connect to the handshake's destination and start relaying.
    ///
    /// The leftover payload is written upstream before this returns.
    pub async fn open(
        &self,
        handshake: &Handshake,
        downlink: DownlinkMux,
        activity: Arc<ActivityClock>,
    ) -> TunnelResult<RelayHandle> {
        let destination = &handshake.destination;
        let unreachable = |reason: String| TunnelError::UpstreamUnreachable {
            destination: destination.to_string(),
            reason,
        };

        let start = Instant::now();
        let mut stream = self
            .connector
            .connect(destination)
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        metrics::record_upstream_connect(start);

        if !handshake.leftover.is_empty() {
            stream
                .write_all(&handshake.leftover)
                .await
                .map_err(|e| unreachable(e.to_string()))?;
            metrics::record_uplink_bytes(handshake.leftover.len());
        }

        tracing::info!(destination = %destination, "Upstream connected");

        let (reader, writer) = tokio::io::split(stream);
        let (uplink_tx, uplink_rx) = mpsc::channel(self.settings.uplink_queue_chunks.max(1));
        let status = Arc::new(RelayStatus::default());

        let uplink_task = {
            let status = status.clone();
            tokio::spawn(async move {
                let written = uplink_pump(uplink_rx, writer).await;
                tracing::debug!(bytes = written, "Uplink pump finished");
                status.uplink_done.store(true, Ordering::Release);
            })
        };

        let downlink_task = {
            let status = status.clone();
            let downlink = downlink.clone();
            let read_bytes = self.settings.downlink_read_bytes;
            tokio::spawn(async move {
                let exit = downlink.pump(reader, read_bytes, activity).await;
                tracing::debug!(?exit, "Downlink pump finished");
                if exit != PumpExit::Closed {
                    status.downlink_done.store(true, Ordering::Release);
                }
            })
        };

        Ok(RelayHandle {
            uplink: uplink_tx,
            downlink,
            status,
            uplink_task,
            downlink_task,
        })
    }
}

/// Write queued chunks upstream in order, then half-close the write side.
async fn uplink_pump<W: AsyncWrite + Unpin>(mut rx: mpsc::Receiver<Bytes>, mut writer: W) -> u64 {
    let mut written = 0u64;
    while let Some(chunk) = rx.recv().await {
        if let Err(e) = writer.write_all(&chunk).await {
            tracing::debug!(error = %e, "Upstream write failed");
            break;
        }
        written += chunk.len() as u64;
        metrics::record_uplink_bytes(chunk.len());
    }
    let _ = writer.shutdown().await;
    written
}

/// A live relay owned by one session.
#[derive(Debug)]
pub struct RelayHandle {
    uplink: mpsc::Sender<Bytes>,
    downlink: DownlinkMux,
    status: Arc<RelayStatus>,
    uplink_task: JoinHandle<()>,
    downlink_task: JoinHandle<()>,
}

impl RelayHandle {
    /// Queue a chunk for the upstream writer.
    ///
    /// Once the write side has ended the chunk is discarded: the upstream
    /// no longer accepts bytes, but the downlink may still be flowing.
    pub fn send(&self, chunk: Bytes) -> TunnelResult<()> {
        match self.uplink.try_send(chunk) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(TunnelError::BufferOverflow {
                capacity: self.uplink.max_capacity(),
            }),
            Err(mpsc::error::TrySendError::Closed(chunk)) => {
                tracing::debug!(bytes = chunk.len(), "Upstream write side closed, chunk discarded");
                Ok(())
            }
        }
    }

    /// Chunks waiting for the upstream writer.
    pub fn queued(&self) -> usize {
        self.uplink.max_capacity() - self.uplink.capacity()
    }

    pub fn status(&self) -> &RelayStatus {
        &self.status
    }

    /// Stop both pumps and release the upstream channel.
    pub fn close(self) {
        self.downlink.close();
        self.uplink_task.abort();
        self.downlink_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use futures_util::future::BoxFuture;
    use tokio::io::{AsyncReadExt, DuplexStream};
    use tokio::sync::Mutex;

    use super::*;
    use crate::protocol::{Command, Destination};
    use crate::relay::connector::UpstreamStream;

    /// Hands out one pre-made duplex stream.
    struct OneShot(Mutex<Option<DuplexStream>>);

    impl Connector for OneShot {
        fn connect<'a>(&'a self, _: &'a Destination) -> BoxFuture<'a, io::Result<UpstreamStream>> {
            Box::pin(async move {
                self.0
                    .lock()
                    .await
                    .take()
                    .map(|s| Box::new(s) as UpstreamStream)
                    .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
            })
        }
    }

    fn handshake(leftover: &'static [u8]) -> Handshake {
        Handshake {
            version: 0,
            destination: Destination {
                host: "example.com".to_string(),
                port: 443,
                command: Command::Tcp,
            },
            leftover: Bytes::from_static(leftover),
        }
    }

    fn engine(stream: Option<DuplexStream>, queue: usize) -> RelayEngine {
        RelayEngine::new(
            Arc::new(OneShot(Mutex::new(stream))),
            RelaySettings {
                uplink_queue_chunks: queue,
                downlink_read_bytes: 1024,
            },
        )
    }

    #[tokio::test]
    async fn leftover_then_chunks_reach_upstream() {
        let (mut far, near) = tokio::io::duplex(1024);
        let relay = engine(Some(near), 8)
            .open(&handshake(b"hello"), DownlinkMux::new(4), Arc::new(ActivityClock::new()))
            .await
            .unwrap();

        let mut buf = [0u8; 5];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        relay.send(Bytes::from_static(b" world")).unwrap();
        let mut buf = [0u8; 6];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b" world");
    }

    #[tokio::test]
    async fn connect_failure_is_unreachable() {
        let err = engine(None, 8)
            .open(&handshake(b""), DownlinkMux::new(4), Arc::new(ActivityClock::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::UpstreamUnreachable { .. }));
        assert_eq!(err.kind(), "upstream_unreachable");
    }

    #[tokio::test]
    async fn full_queue_overflows() {
        // A one-byte duplex stalls the uplink pump after the first write.
        let (_far, near) = tokio::io::duplex(1);
        let relay = engine(Some(near), 1)
            .open(&handshake(b""), DownlinkMux::new(4), Arc::new(ActivityClock::new()))
            .await
            .unwrap();

        let mut overflowed = false;
        for _ in 0..4 {
            if let Err(err) = relay.send(Bytes::from_static(b"data")) {
                assert!(matches!(err, TunnelError::BufferOverflow { capacity: 1 }));
                overflowed = true;
                break;
            }
        }
        assert!(overflowed);
    }

    #[tokio::test]
    async fn both_directions_finish_after_upstream_closes() {
        let (far, near) = tokio::io::duplex(64);
        let mux = DownlinkMux::new(4);
        let _rx = mux.attach(None);
        let relay = engine(Some(near), 8)
            .open(&handshake(b""), mux, Arc::new(ActivityClock::new()))
            .await
            .unwrap();

        drop(far);
        relay.send(Bytes::from_static(b"x")).unwrap();
        for _ in 0..50 {
            if relay.status().finished() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(relay.status().downlink_done());
        assert!(relay.status().uplink_done());
    }
}
