//! Per-connection session state (§3 "Session", §4.2, §4.3).

// Layer 1: Standard library imports
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use playhouse_proto::codec::ServerFrame;
use playhouse_proto::ids::{SessionId, StageId};

use crate::error::TransportError;

/// Which concrete listener accepted this session (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Tcp,
    Tls,
    WebSocket,
    WebSocketSecure,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::Tls => write!(f, "tls"),
            TransportKind::WebSocket => write!(f, "ws"),
            TransportKind::WebSocketSecure => write!(f, "wss"),
        }
    }
}

/// Strategy applied when a session's bounded outbound queue is full
/// (SPEC_FULL §10.8). Unlike the stage mailbox, which stays logically
/// unbounded, §4.9 mandates that session outbound overflow eventually closes
/// the session; `Block` and `Drop` are provided for callers that want to
/// trade off latency against the default `Error`-on-overflow behavior
/// (`BackpressureExceeded`, which always closes the session regardless of
/// strategy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OutboundBackpressure {
    /// Wait for space (may stall a fast producer behind a slow client).
    Block,
    /// Drop the outbound frame silently, keep the session open.
    Drop,
    /// Close the session immediately with `BackpressureExceeded` (default,
    /// matches §4.9's "overflow closes the session").
    #[default]
    Error,
}

impl OutboundBackpressure {
    /// Push a frame onto `sender` according to this strategy.
    pub async fn apply(
        &self,
        sender: &mpsc::Sender<ServerFrame>,
        frame: ServerFrame,
    ) -> Result<(), TransportError> {
        match self {
            OutboundBackpressure::Block => sender.send(frame).await.map_err(|_| TransportError::ConnectionClosed),
            OutboundBackpressure::Drop => match sender.try_send(frame) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
                Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::ConnectionClosed),
            },
            OutboundBackpressure::Error => match sender.try_send(frame) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(_)) => Err(TransportError::BackpressureExceeded),
                Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::ConnectionClosed),
            },
        }
    }
}

/// Process-wide monotonic session id generator (mirrors the `msgSeq`
/// counter pattern in SPEC_FULL §9, but never wraps: a process is expected
/// to restart long before `i64` exhausts).
static NEXT_SESSION_ID: AtomicI64 = AtomicI64::new(1);

/// Allocate the next process-unique [`SessionId`].
pub fn next_session_id() -> SessionId {
    SessionId::new(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
}

/// Mutable per-session state, guarded by a single lock since updates are
/// infrequent relative to frame throughput (auth flag, stage binding,
/// heartbeat timestamp).
#[derive(Debug)]
struct SessionState {
    stage_id: StageId,
    authenticated: bool,
    last_heartbeat: DateTime<Utc>,
}

/// A live client connection (§3 "Session").
///
/// Cheaply cloneable: the outbound sender is an `mpsc::Sender` and mutable
/// fields live behind a `parking_lot::RwLock`, the usual registry-friendly
/// "cheap handle, shared state" shape.
#[derive(Clone)]
pub struct Session {
    sid: SessionId,
    remote_addr: SocketAddr,
    transport: TransportKind,
    outbound: mpsc::Sender<ServerFrame>,
    backpressure: OutboundBackpressure,
    state: Arc<RwLock<SessionState>>,
}

impl Session {
    /// Build a new, unbound, unauthenticated session (§4.3 step 1).
    pub fn new(
        remote_addr: SocketAddr,
        transport: TransportKind,
        outbound: mpsc::Sender<ServerFrame>,
        backpressure: OutboundBackpressure,
    ) -> Self {
        Self {
            sid: next_session_id(),
            remote_addr,
            transport,
            outbound,
            backpressure,
            state: Arc::new(RwLock::new(SessionState {
                stage_id: StageId::UNBOUND,
                authenticated: false,
                last_heartbeat: Utc::now(),
            })),
        }
    }

    pub fn sid(&self) -> SessionId {
        self.sid
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn stage_id(&self) -> StageId {
        self.state.read().stage_id
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read().authenticated
    }

    pub fn is_bound(&self) -> bool {
        !self.stage_id().is_unbound()
    }

    /// Bind this session to a stage after successful `OnAuthenticate`
    /// (§4.3 step 3). Idempotent on the same stage; rebinding to a
    /// different stage is a logic error in the caller (a session binds
    /// exactly once for its lifetime).
    pub fn bind_to_stage(&self, stage_id: StageId) {
        let mut state = self.state.write();
        state.stage_id = stage_id;
        state.authenticated = true;
    }

    /// Record inbound traffic, resetting the heartbeat clock (§4.2).
    pub fn touch_heartbeat(&self) {
        self.state.write().last_heartbeat = Utc::now();
    }

    pub fn last_heartbeat(&self) -> DateTime<Utc> {
        self.state.read().last_heartbeat
    }

    /// Whether this session has been idle longer than `timeout`.
    pub fn is_heartbeat_expired(&self, timeout: chrono::Duration) -> bool {
        Utc::now().signed_duration_since(self.last_heartbeat()) > timeout
    }

    /// Enqueue a frame for delivery to the client, applying this session's
    /// backpressure strategy (§4.9 "Sessions' outbound queues are
    /// bounded; overflow closes the session").
    pub async fn send(&self, frame: ServerFrame) -> Result<(), TransportError> {
        self.backpressure.apply(&self.outbound, frame).await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("sid", &self.sid)
            .field("remote_addr", &self.remote_addr)
            .field("transport", &self.transport)
            .field("stage_id", &self.stage_id())
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

/// Process-wide registry of live sessions, keyed by `sid` (SPEC_FULL §10.1),
/// backed by the same `DashMap` routing-table shape used elsewhere in this
/// workspace.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Session) {
        debug!(sid = session.sid().as_raw(), "session registered");
        self.sessions.insert(session.sid(), session);
    }

    pub fn get(&self, sid: SessionId) -> Option<Session> {
        self.sessions.get(&sid).map(|entry| entry.value().clone())
    }

    /// Remove a session, e.g. on disconnect (§4.3 step 4).
    pub fn remove(&self, sid: SessionId) -> Option<Session> {
        let removed = self.sessions.remove(&sid).map(|(_, session)| session);
        if removed.is_some() {
            debug!(sid = sid.as_raw(), "session removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sweep sessions idle past `timeout`, removing and returning them so
    /// the caller can close their transports and fire
    /// `OnConnectionChanged(false)` (§4.2, testable property 9).
    pub fn sweep_expired_heartbeats(&self, timeout: chrono::Duration) -> Vec<Session> {
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_heartbeat_expired(timeout))
            .map(|entry| *entry.key())
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for sid in expired {
            if let Some(session) = self.remove(sid) {
                warn!(sid = sid.as_raw(), "session heartbeat timeout");
                removed.push(session);
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session() -> (Session, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(4);
        let session = Session::new(
            "127.0.0.1:9000".parse().expect("valid addr"),
            TransportKind::Tcp,
            tx,
            OutboundBackpressure::Error,
        );
        (session, rx)
    }

    #[test]
    fn new_session_is_unbound_and_unauthenticated() {
        let (session, _rx) = sample_session();
        assert!(!session.is_bound());
        assert!(!session.is_authenticated());
        assert_eq!(session.stage_id(), StageId::UNBOUND);
    }

    #[test]
    fn bind_to_stage_marks_authenticated() {
        let (session, _rx) = sample_session();
        session.bind_to_stage(StageId::new(42));
        assert!(session.is_bound());
        assert!(session.is_authenticated());
        assert_eq!(session.stage_id().as_raw(), 42);
    }

    #[test]
    fn session_ids_are_unique_and_increasing() {
        let (a, _ra) = sample_session();
        let (b, _rb) = sample_session();
        assert!(b.sid().as_raw() > a.sid().as_raw());
    }

    #[tokio::test]
    async fn touch_heartbeat_resets_idle_clock() {
        let (session, _rx) = sample_session();
        assert!(!session.is_heartbeat_expired(chrono::Duration::seconds(30)));

        session.state.write().last_heartbeat = Utc::now() - chrono::Duration::seconds(60);
        assert!(session.is_heartbeat_expired(chrono::Duration::seconds(30)));

        session.touch_heartbeat();
        assert!(!session.is_heartbeat_expired(chrono::Duration::seconds(30)));
    }

    #[test]
    fn registry_insert_get_remove_round_trip() {
        let registry = SessionRegistry::new();
        let (session, _rx) = sample_session();
        let sid = session.sid();

        registry.insert(session);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(sid).is_some());

        let removed = registry.remove(sid);
        assert!(removed.is_some());
        assert!(registry.get(sid).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn registry_sweep_removes_only_expired_sessions() {
        let registry = SessionRegistry::new();
        let (fresh, _rx1) = sample_session();
        let (stale, _rx2) = sample_session();

        stale
            .state
            .write()
            .last_heartbeat = Utc::now() - chrono::Duration::seconds(120);

        let fresh_sid = fresh.sid();
        let stale_sid = stale.sid();
        registry.insert(fresh);
        registry.insert(stale);

        let expired = registry.sweep_expired_heartbeats(chrono::Duration::seconds(30));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].sid(), stale_sid);
        assert!(registry.get(fresh_sid).is_some());
        assert!(registry.get(stale_sid).is_none());
    }

    #[tokio::test]
    async fn error_backpressure_closes_on_full_queue() {
        let (tx, _rx) = mpsc::channel(1);
        let session = Session::new(
            "127.0.0.1:9001".parse().expect("valid addr"),
            TransportKind::Tcp,
            tx,
            OutboundBackpressure::Error,
        );

        let frame = |n: u16| ServerFrame {
            service_id: playhouse_proto::ids::ServiceId::new(1),
            packet: playhouse_proto::packet::Packet::new(
                playhouse_proto::ids::MsgId::new("Push").expect("valid"),
                &b""[..],
            )
            .with_seq(playhouse_proto::ids::MsgSeq::from_raw(n)),
            original_size: 0,
        };

        session.send(frame(1)).await.expect("first frame fits");
        let err = session.send(frame(2)).await.unwrap_err();
        assert!(matches!(err, TransportError::BackpressureExceeded));
    }
}
