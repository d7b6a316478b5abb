//! Session store.
//!
//! # Responsibilities
//! - Find or create sessions by client-supplied id
//! - Route uplink chunks and downlink attaches to the right session
//! - Remove sessions on protocol violation, expiry, or shutdown
//!
//! # Design Decisions
//! - The map is a `DashMap`; its shard locks are never held across an await
//! - Per-session locks are separate, so unrelated clients never contend
//! - Only chunk 0 may create a session; GET never does

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{TunnelError, TunnelResult};
use crate::observability::metrics;
use crate::protocol::Secret;
use crate::relay::{DownlinkReceiver, RelayEngine};
use crate::session::session::{
    Admission, CloseReason, SequencerContext, Session, SessionSnapshot, Timeouts,
};

/// Limits applied to every session in a store.
#[derive(Debug, Clone, Copy)]
pub struct StoreSettings {
    pub max_chunk_bytes: usize,
    pub downlink_queue_chunks: usize,
    pub timeouts: Timeouts,
}

/// Registry of live sessions keyed by client id.
pub struct SessionStore {
    sessions: DashMap<String, Arc<Session>>,
    secret: Secret,
    engine: RelayEngine,
    settings: StoreSettings,
}

impl SessionStore {
    pub fn new(secret: Secret, engine: RelayEngine, settings: StoreSettings) -> Self {
        Self {
            sessions: DashMap::new(),
            secret,
            engine,
            settings,
        }
    }

    /// Deliver uplink chunk `seq` for session `id`.
    pub async fn admit(&self, id: &str, seq: u64, chunk: Bytes) -> TunnelResult<Admission> {
        if chunk.len() > self.settings.max_chunk_bytes {
            return Err(TunnelError::ChunkTooLarge {
                len: chunk.len(),
                limit: self.settings.max_chunk_bytes,
            });
        }

        let session = match self.get(id) {
            Some(session) => session,
            None if seq == 0 => self.get_or_create(id),
            None => return Err(TunnelError::SessionNotFound),
        };

        let ctx = SequencerContext {
            secret: &self.secret,
            engine: &self.engine,
        };
        let result = session.admit(seq, chunk, &ctx).await;

        match &result {
            Ok(Admission::Accepted) => metrics::record_chunk("accepted"),
            Ok(Admission::Duplicate) => metrics::record_chunk("duplicate"),
            Err(err) => {
                metrics::record_chunk("rejected");
                metrics::record_error(err.kind());
                if err.is_terminal() {
                    let reason = match err {
                        TunnelError::UpstreamUnreachable { .. } => CloseReason::UpstreamFailure,
                        _ => CloseReason::ProtocolViolation,
                    };
                    self.remove(&session, reason);
                }
            }
        }
        result
    }

    /// Attach a downlink sink to an existing session.
    pub async fn attach(&self, id: &str) -> TunnelResult<DownlinkReceiver> {
        let session = self.get(id).ok_or(TunnelError::SessionNotFound)?;
        session.attach().await
    }

    /// Refresh a session's activity time.
    pub fn touch(&self, id: &str) -> bool {
        match self.get(id) {
            Some(session) => {
                session.touch();
                true
            }
            None => false,
        }
    }

    /// Evict sessions past their idle or bootstrap limits.
    pub fn evict_expired(&self) -> Vec<String> {
        self.evict_expired_at(Instant::now())
    }

    /// Evict as of `now`. Returns the ids removed.
    pub fn evict_expired_at(&self, now: Instant) -> Vec<String> {
        let mut evicted = Vec::new();
        for session in self.all() {
            if let Some(reason) = session.try_evict(now, self.settings.timeouts) {
                self.remove(&session, reason);
                evicted.push(session.id().to_string());
            }
        }
        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), "Sweep evicted sessions");
        }
        evicted
    }

    /// Close and remove every session.
    pub async fn close_all(&self) {
        for session in self.all() {
            if session.close(CloseReason::Shutdown).await {
                self.remove(&session, CloseReason::Shutdown);
            }
        }
    }

    pub async fn snapshot(&self, id: &str) -> Option<SessionSnapshot> {
        let session = self.get(id)?;
        Some(session.snapshot().await)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    fn get_or_create(&self, id: &str) -> Arc<Session> {
        match self.sessions.entry(id.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let session = Arc::new(Session::new(id, self.settings.downlink_queue_chunks));
                entry.insert(session.clone());
                metrics::record_session_created();
                tracing::debug!(session_id = %id, "Session created");
                session
            }
        }
    }

    fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Remove `session` from the map unless a newer session took its id.
    fn remove(&self, session: &Arc<Session>, reason: CloseReason) {
        let removed = self
            .sessions
            .remove_if(session.id(), |_, current| Arc::ptr_eq(current, session))
            .is_some();
        if removed {
            metrics::record_session_closed(reason.as_str());
        }
    }
}
