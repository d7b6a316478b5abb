//! Per-session state and the uplink sequencer.
//!
//! # Responsibilities
//! - Accept numbered uplink chunks strictly in order
//! - Decode the handshake from chunk 0 and open the relay
//! - Attach downlink sinks
//! - Close every resource exactly once
//!
//! # Design Decisions
//! - All mutable state sits behind one async mutex per session
//! - Retransmits of already-seen sequence numbers are acknowledged and ignored
//! - Any gap ends the session; there is no reordering buffer

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{TunnelError, TunnelResult};
use crate::protocol::{Destination, Handshake, Secret};
use crate::relay::{DownlinkMux, DownlinkReceiver, RelayEngine, RelayHandle};
use crate::session::activity::ActivityClock;

/// Outcome of an accepted uplink request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The chunk was new and has been queued upstream.
    Accepted,
    /// The sequence number was already seen; nothing changed.
    Duplicate,
}

/// Why a session was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ProtocolViolation,
    UpstreamFailure,
    IdleTimeout,
    BootstrapTimeout,
    RelayFinished,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ProtocolViolation => "protocol_violation",
            CloseReason::UpstreamFailure => "upstream_failure",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::BootstrapTimeout => "bootstrap_timeout",
            CloseReason::RelayFinished => "relay_finished",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// What a session needs from its store to process chunk 0.
pub struct SequencerContext<'a> {
    pub secret: &'a Secret,
    pub engine: &'a RelayEngine,
}

/// Lifetime limits checked by the eviction sweep.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub idle: Duration,
    pub bootstrap: Duration,
}

/// Server-side state for one logical tunnel.
pub struct Session {
    id: String,
    activity: Arc<ActivityClock>,
    state: Mutex<SessionState>,
}

pub(crate) struct SessionState {
    expected_next_seq: u64,
    handshake: Option<Handshake>,
    relay: Option<RelayHandle>,
    downlink: DownlinkMux,
    established: bool,
    closed: bool,
}

impl Session {
    pub fn new(id: impl Into<String>, downlink_queue_chunks: usize) -> Self {
        Self::starting_at(id, downlink_queue_chunks, Instant::now())
    }

    pub fn starting_at(id: impl Into<String>, downlink_queue_chunks: usize, now: Instant) -> Self {
        Self {
            id: id.into(),
            activity: Arc::new(ActivityClock::starting_at(now)),
            state: Mutex::new(SessionState {
                expected_next_seq: 0,
                handshake: None,
                relay: None,
                downlink: DownlinkMux::new(downlink_queue_chunks),
                established: false,
                closed: false,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn touch(&self) {
        self.activity.touch();
    }

    /// Process uplink chunk `seq`.
    ///
    /// A terminal error closes the session before the lock is released.
    pub async fn admit(
        &self,
        seq: u64,
        chunk: Bytes,
        ctx: &SequencerContext<'_>,
    ) -> TunnelResult<Admission> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(TunnelError::SessionExpired);
        }
        self.activity.touch();

        let result = self.sequence(&mut state, seq, chunk, ctx).await;
        if let Err(err) = &result {
            if err.is_terminal() {
                let reason = match err {
                    TunnelError::UpstreamUnreachable { .. } => CloseReason::UpstreamFailure,
                    _ => CloseReason::ProtocolViolation,
                };
                state.close(&self.id, reason);
            }
        }
        result
    }

    async fn sequence(
        &self,
        state: &mut SessionState,
        seq: u64,
        chunk: Bytes,
        ctx: &SequencerContext<'_>,
    ) -> TunnelResult<Admission> {
        let expected = state.expected_next_seq;
        if seq < expected {
            tracing::debug!(session_id = %self.id, seq, "Duplicate chunk ignored");
            return Ok(Admission::Duplicate);
        }
        if seq > expected {
            return Err(TunnelError::SequenceGap { expected, got: seq });
        }

        match state.relay.as_ref() {
            Some(relay) => relay.send(chunk)?,
            None => {
                let handshake = Handshake::from_chunk(&chunk, ctx.secret).await?;
                tracing::info!(
                    session_id = %self.id,
                    destination = %handshake.destination,
                    leftover = handshake.leftover.len(),
                    "Handshake accepted"
                );
                state.downlink.preface(preamble_of(&handshake));
                let relay = ctx
                    .engine
                    .open(&handshake, state.downlink.clone(), self.activity.clone())
                    .await?;
                state.relay = Some(relay);
                state.established = state.downlink.is_attached();
                state.handshake = Some(Handshake {
                    leftover: Bytes::new(),
                    ..handshake
                });
            }
        }

        state.expected_next_seq += 1;
        Ok(Admission::Accepted)
    }

    /// Attach a new downlink sink, superseding any previous one.
    pub async fn attach(&self) -> TunnelResult<DownlinkReceiver> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(TunnelError::SessionExpired);
        }
        self.activity.touch();
        let rx = state.downlink.attach(state.handshake.as_ref().map(preamble_of));
        if state.handshake.is_some() && !state.established {
            state.established = true;
            tracing::info!(session_id = %self.id, "Session established");
        }
        Ok(rx)
    }

    /// Close all resources; returns false if already closed.
    pub async fn close(&self, reason: CloseReason) -> bool {
        self.state.lock().await.close(&self.id, reason)
    }

    /// Close the session if it has outlived its limits at `now`.
    ///
    /// Sessions busy with another request are skipped for this round.
    pub fn try_evict(&self, now: Instant, timeouts: Timeouts) -> Option<CloseReason> {
        let mut state = self.state.try_lock().ok()?;
        let reason = self.expiry_reason(&state, now, timeouts)?;
        state.close(&self.id, reason).then_some(reason)
    }

    fn expiry_reason(
        &self,
        state: &MutexGuard<'_, SessionState>,
        now: Instant,
        timeouts: Timeouts,
    ) -> Option<CloseReason> {
        if state.closed {
            return None;
        }
        if state.relay.as_ref().is_some_and(|r| r.status().finished()) {
            return Some(CloseReason::RelayFinished);
        }
        let age = now.saturating_duration_since(self.activity.origin());
        if !state.established && age > timeouts.bootstrap {
            return Some(CloseReason::BootstrapTimeout);
        }
        if self.activity.idle_for(now) > timeouts.idle {
            return Some(CloseReason::IdleTimeout);
        }
        None
    }

    /// Snapshot for status reporting and tests.
    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock().await;
        SessionSnapshot {
            expected_next_seq: state.expected_next_seq,
            destination: state.handshake.as_ref().map(|h| h.destination.clone()),
            queued_chunks: state.relay.as_ref().map_or(0, |r| r.queued()),
            established: state.established,
            closed: state.closed,
        }
    }
}

fn preamble_of(handshake: &Handshake) -> Bytes {
    Bytes::copy_from_slice(&handshake.reply_preamble())
}

impl SessionState {
    fn close(&mut self, id: &str, reason: CloseReason) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        if let Some(relay) = self.relay.take() {
            relay.close();
        }
        self.downlink.close();
        tracing::info!(session_id = %id, reason = reason.as_str(), "Session closed");
        true
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub expected_next_seq: u64,
    pub destination: Option<Destination>,
    pub queued_chunks: usize,
    pub established: bool,
    pub closed: bool,
}
