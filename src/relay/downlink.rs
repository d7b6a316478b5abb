//! Downlink multiplexer.
//!
//! # Responsibilities
//! - Hold at most one live sink (the body of the current GET response)
//! - Supersede a stale sink when a new GET attaches
//! - Pump upstream bytes into whichever sink is attached, in order
//!
//! # Design Decisions
//! - The sink slot is a `watch` channel so the pump notices attach/close
//!   without taking the session lock
//! - Every sink attached after the handshake starts with the reply preamble
//! - The one chunk the pump holds when its client goes away is handed to the
//!   next sink; chunks already queued in the departed sink are lost
//! - Client disconnect never closes the upstream; only `close` does

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, watch};

use crate::observability::metrics;
use crate::session::activity::ActivityClock;

/// The receiving end handed to the HTTP response body.
pub type DownlinkReceiver = mpsc::Receiver<Bytes>;

#[derive(Debug, Clone)]
struct Sink {
    generation: u64,
    tx: mpsc::Sender<Bytes>,
}

#[derive(Debug, Clone)]
enum SinkSlot {
    Empty,
    Attached(Sink),
    /// Upstream reached end-of-data; no more bytes will arrive.
    Finished,
    /// Session torn down.
    Closed,
}

/// How the pump ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// Upstream signalled end-of-data.
    Eof,
    /// Upstream read failed.
    ReadError,
    /// The multiplexer was closed underneath the pump.
    Closed,
}

/// Binds a session's outbound byte stream to the current HTTP response.
#[derive(Debug, Clone)]
pub struct DownlinkMux {
    slot: Arc<watch::Sender<SinkSlot>>,
    generation: Arc<AtomicU64>,
    queue_chunks: usize,
}

impl DownlinkMux {
    pub fn new(queue_chunks: usize) -> Self {
        let (tx, _) = watch::channel(SinkSlot::Empty);
        Self {
            slot: Arc::new(tx),
            generation: Arc::new(AtomicU64::new(0)),
            queue_chunks: queue_chunks.max(1),
        }
    }

    /// Attach a new sink, dropping any previous one.
    ///
    /// `preamble` is queued on the new sink before it becomes visible to the
    /// pump. After the upstream finished (or the session closed) the
    /// returned receiver ends once the preamble is read.
    pub fn attach(&self, preamble: Option<Bytes>) -> DownlinkReceiver {
        let (tx, rx) = mpsc::channel(self.queue_chunks);
        if let Some(preamble) = preamble {
            // Fresh channel with capacity of at least one.
            let _ = tx.try_send(preamble);
        }
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let mut tx = Some(tx);
        self.slot.send_if_modified(|slot| match slot {
            SinkSlot::Finished | SinkSlot::Closed => false,
            _ => {
                if let Some(tx) = tx.take() {
                    *slot = SinkSlot::Attached(Sink { generation, tx });
                }
                true
            }
        });
        rx
    }

    /// Queue `preamble` on a sink that attached before the handshake.
    ///
    /// Must run before the pump starts so it precedes every upstream byte.
    pub fn preface(&self, preamble: Bytes) {
        if let SinkSlot::Attached(sink) = &*self.slot.borrow() {
            let _ = sink.tx.try_send(preamble);
        }
    }

    /// Whether a sink is attached and its client still listening.
    pub fn is_attached(&self) -> bool {
        matches!(&*self.slot.borrow(), SinkSlot::Attached(sink) if !sink.tx.is_closed())
    }

    /// Mark end-of-data; the current sink ends once drained.
    pub fn finish(&self) {
        self.slot.send_if_modified(|slot| match slot {
            SinkSlot::Closed | SinkSlot::Finished => false,
            _ => {
                *slot = SinkSlot::Finished;
                true
            }
        });
    }

    /// Tear down: release the sink and stop the pump.
    pub fn close(&self) {
        self.slot.send_replace(SinkSlot::Closed);
    }

    /// Pump bytes from `upstream` into the attached sink until the upstream
    /// ends or the multiplexer closes.
    pub async fn pump<R: AsyncRead + Unpin>(
        &self,
        mut upstream: R,
        read_bytes: usize,
        activity: Arc<ActivityClock>,
    ) -> PumpExit {
        let mut watcher = self.slot.subscribe();

        loop {
            let mut buf = BytesMut::with_capacity(read_bytes);
            let mut limited = (&mut upstream).take(read_bytes as u64);
            let read = tokio::select! {
                read = limited.read_buf(&mut buf) => read,
                _ = wait_closed(&mut watcher) => return PumpExit::Closed,
            };
            let exit = match read {
                Ok(0) => PumpExit::Eof,
                Ok(n) => {
                    if self.deliver(&mut watcher, buf.freeze()).await.is_err() {
                        return PumpExit::Closed;
                    }
                    metrics::record_downlink_bytes(n);
                    activity.touch();
                    continue;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Upstream read failed");
                    PumpExit::ReadError
                }
            };
            self.finish();
            return exit;
        }
    }

    /// Hand `chunk` to the current sink, waiting for one if needed.
    ///
    /// Errors only when the multiplexer is closed.
    async fn deliver(&self, watcher: &mut watch::Receiver<SinkSlot>, chunk: Bytes) -> Result<(), ()> {
        let mut dead_generation = None;
        loop {
            let sink = match &*watcher.borrow_and_update() {
                SinkSlot::Attached(sink) if Some(sink.generation) != dead_generation => {
                    Some(sink.clone())
                }
                SinkSlot::Closed => return Err(()),
                _ => None,
            };

            let Some(sink) = sink else {
                watcher.changed().await.map_err(|_| ())?;
                continue;
            };

            tokio::select! {
                permit = sink.tx.reserve() => match permit {
                    Ok(permit) => {
                        permit.send(chunk);
                        return Ok(());
                    }
                    Err(_) => {
                        tracing::debug!(generation = sink.generation, "Downlink sink detached");
                        dead_generation = Some(sink.generation);
                    }
                },
                changed = watcher.changed() => changed.map_err(|_| ())?,
            }
        }
    }
}

/// Resolves once the slot reports `Closed` (or the sender is gone).
async fn wait_closed(watcher: &mut watch::Receiver<SinkSlot>) {
    let _ = watcher.wait_for(|slot| matches!(slot, SinkSlot::Closed)).await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;

    use super::*;

    fn preamble() -> Option<Bytes> {
        Some(Bytes::from_static(&[0, 0]))
    }

    fn spawn_pump(mux: &DownlinkMux, upstream: tokio::io::DuplexStream) -> tokio::task::JoinHandle<PumpExit> {
        let mux = mux.clone();
        tokio::spawn(async move { mux.pump(upstream, 1024, Arc::new(ActivityClock::new())).await })
    }

    #[tokio::test]
    async fn preamble_precedes_upstream_bytes() {
        let mux = DownlinkMux::new(4);
        let (mut far, near) = tokio::io::duplex(64);
        let mut rx = mux.attach(preamble());
        let pump = spawn_pump(&mux, near);

        far.write_all(b"hello").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(&[0, 0]));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"hello"));

        drop(far);
        assert_eq!(pump.await.unwrap(), PumpExit::Eof);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn early_sink_is_prefaced_before_pump_starts() {
        let mux = DownlinkMux::new(4);
        let (mut far, near) = tokio::io::duplex(64);
        let mut rx = mux.attach(None);
        mux.preface(Bytes::from_static(&[0, 0]));
        let _pump = spawn_pump(&mux, near);

        far.write_all(b"first").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(&[0, 0]));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"first"));
    }

    #[tokio::test]
    async fn waits_for_attach_before_delivering() {
        let mux = DownlinkMux::new(4);
        let (mut far, near) = tokio::io::duplex(64);
        let _pump = spawn_pump(&mux, near);
        far.write_all(b"early").await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut rx = mux.attach(preamble());
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(&[0, 0]));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"early"));
    }

    #[tokio::test]
    async fn new_attach_supersedes_old_sink() {
        let mux = DownlinkMux::new(4);
        let (mut far, near) = tokio::io::duplex(64);
        let mut first = mux.attach(preamble());
        let _pump = spawn_pump(&mux, near);
        assert_eq!(first.recv().await.unwrap(), Bytes::from_static(&[0, 0]));

        let mut second = mux.attach(preamble());
        assert!(first.recv().await.is_none());

        far.write_all(b"next").await.unwrap();
        assert_eq!(second.recv().await.unwrap(), Bytes::from_static(&[0, 0]));
        assert_eq!(second.recv().await.unwrap(), Bytes::from_static(b"next"));
    }

    #[tokio::test]
    async fn reattach_gets_preamble_then_pending_chunk() {
        let mux = DownlinkMux::new(1);
        let (mut far, near) = tokio::io::duplex(64);
        let mut first = mux.attach(preamble());
        let pump = spawn_pump(&mux, near);
        assert_eq!(first.recv().await.unwrap(), Bytes::from_static(&[0, 0]));
        drop(first);

        far.write_all(b"kept").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pump.is_finished());
        assert!(!mux.is_attached());

        let mut second = mux.attach(preamble());
        assert_eq!(second.recv().await.unwrap(), Bytes::from_static(&[0, 0]));
        assert_eq!(second.recv().await.unwrap(), Bytes::from_static(b"kept"));
    }

    #[tokio::test]
    async fn attach_after_finish_ends_after_preamble() {
        let mux = DownlinkMux::new(4);
        let (far, near) = tokio::io::duplex(64);
        drop(far);
        assert_eq!(spawn_pump(&mux, near).await.unwrap(), PumpExit::Eof);

        let mut rx = mux.attach(preamble());
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(&[0, 0]));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_stops_pump_and_ends_sink() {
        let mux = DownlinkMux::new(4);
        let (_far, near) = tokio::io::duplex(64);
        let mut rx = mux.attach(preamble());
        let pump = spawn_pump(&mux, near);
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(&[0, 0]));

        mux.close();
        assert_eq!(pump.await.unwrap(), PumpExit::Closed);
        assert!(rx.recv().await.is_none());
        assert!(mux.attach(None).recv().await.is_none());
    }
}
