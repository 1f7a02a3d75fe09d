//! The Sender / Link API exposed to handlers (§4.9), bound to the route
//! header of the request currently being dispatched.
//!
//! Shaped like a per-invocation actor context (a handle bundling
//! addressing plus a broker reference), generalized from one in-process
//! broker to the three destinations a PlayHouse handler can address: the
//! client session, a stage (same or peer node), and an API node, plus
//! service-addressed resolution through the Server Info Center.

// Layer 1: Standard library imports
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use tracing::warn;

// Layer 3: Internal module imports
use playhouse_net::{MeshHub, SelectionPolicy, ServerInfoCenter, ServerInfoEntry, SessionRegistry};
use playhouse_proto::header::RouteHeader;
use playhouse_proto::ids::{AccountId, ErrorCode, MsgId, MsgSeq, NodeId, NodeType, ServiceId, SessionId, StageId};
use playhouse_proto::packet::Packet;
use playhouse_proto::{MeshFrame, ServerFrame};

use crate::compute_pool::ComputePool;
use crate::error::RuntimeError;
use crate::mailbox::{MailboxSender, StageMessage};
use crate::request_cache::RequestCache;
use crate::stage_table::StageTable;
use crate::timer::{TimerId, TimerRegistry, TimerSchedule};

/// Reserved control `MsgId` used internally to ask a peer play-node to
/// instantiate a stage (§4.9 `CreateStage`). Not part of the client-facing
/// reserved set (§4.10); applications never see it.
pub const CREATE_STAGE_MSG_ID: &str = "@CreateStage@";

/// Per-dispatch handle bundling outbound addressing, bound to the current
/// dispatch's [`RouteHeader`] (if any).
///
/// Cloning is cheap: the process-wide registries are `Arc`-shared and the
/// close-request flag is `Rc`-shared, so the stage executor hands a fresh
/// clone to every handler invocation (binding that clone's header to the
/// dispatch at hand) without the handler's stored, possibly-suspended
/// future ever borrowing from the executor's own state.
#[derive(Clone)]
pub struct Sender {
    own_node: NodeId,
    stage_id: StageId,
    mailbox: MailboxSender,
    stages: Arc<StageTable>,
    sessions: Arc<SessionRegistry>,
    mesh: Arc<MeshHub>,
    server_info: Arc<ServerInfoCenter>,
    request_cache: RequestCache,
    request_timeout: Duration,
    header: Option<RouteHeader>,
    close_requested: Rc<Cell<bool>>,
    timers: Rc<TimerRegistry>,
    compute_pool: ComputePool,
    joined_sids: Rc<RefCell<HashSet<SessionId>>>,
}

impl Sender {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        own_node: NodeId,
        stage_id: StageId,
        mailbox: MailboxSender,
        stages: Arc<StageTable>,
        sessions: Arc<SessionRegistry>,
        mesh: Arc<MeshHub>,
        server_info: Arc<ServerInfoCenter>,
        request_cache: RequestCache,
        request_timeout: Duration,
        compute_pool: ComputePool,
    ) -> Self {
        let timers = Rc::new(TimerRegistry::new(mailbox.clone()));
        Self {
            own_node,
            stage_id,
            mailbox,
            stages,
            sessions,
            mesh,
            server_info,
            request_cache,
            request_timeout,
            header: None,
            close_requested: Rc::new(Cell::new(false)),
            timers,
            compute_pool,
            joined_sids: Rc::new(RefCell::new(HashSet::new())),
        }
    }

    /// The `Rc`-shared timer bookkeeping backing this stage (§4.9
    /// "Timers"). Kept `pub(crate)` so [`crate::stage::Stage`] can reuse it
    /// for its own internal idle-reap-check timer instead of keeping a
    /// second, separate registry.
    pub(crate) fn timer_registry(&self) -> &Rc<TimerRegistry> {
        &self.timers
    }

    /// Record that `sid` just joined this stage, so [`Self::broadcast_to_stage`]
    /// can reach it. Called by [`crate::stage::Stage`] on a successful
    /// `OnJoinStage`, never by handler code directly.
    pub(crate) fn note_joined(&self, sid: SessionId) {
        self.joined_sids.borrow_mut().insert(sid);
    }

    /// The inverse of [`Self::note_joined`], called when an actor is
    /// destroyed (reaped or the stage itself tearing down).
    pub(crate) fn note_left(&self, sid: SessionId) {
        self.joined_sids.borrow_mut().remove(&sid);
    }

    /// Return a clone of this sender bound to `header`, ready to hand to
    /// a handler invocation.
    pub fn bound_to(&self, header: RouteHeader) -> Self {
        let mut clone = self.clone();
        clone.header = Some(header);
        clone
    }

    /// Bind the header of the request currently being dispatched. Called
    /// by the stage executor immediately before invoking a handler.
    pub fn bind_header(&mut self, header: RouteHeader) {
        self.header = Some(header);
    }

    /// Clear the bound header. Called by the stage executor immediately
    /// after a handler returns (or suspends between turns).
    pub fn clear_header(&mut self) {
        self.header = None;
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested.get()
    }

    /// Push a packet to the client session owning the current request's
    /// `sid` (§4.9 `SendToClient`).
    pub async fn send_to_client(&self, packet: Packet) -> Result<(), RuntimeError> {
        let header = self.header.as_ref().ok_or(RuntimeError::StageClosing)?;
        let session = self.sessions.get(header.sid).ok_or(RuntimeError::ConnectionClosed)?;
        let frame = ServerFrame {
            service_id: header.service_id,
            packet,
            original_size: 0,
        };
        session.send(frame).await.map_err(RuntimeError::Transport)
    }

    /// Push `packet` to every session currently joined to this stage
    /// (§4.9's connection-changed notification is per-session; this is
    /// its stage-wide fan-out counterpart for scenarios like "tell every
    /// player in the room"). A session that disconnected without being
    /// formally destroyed yet is silently skipped rather than failing the
    /// whole broadcast.
    pub async fn broadcast_to_stage(&self, packet: Packet) -> Result<(), RuntimeError> {
        let sids: Vec<SessionId> = self.joined_sids.borrow().iter().copied().collect();
        let header = self.header.as_ref().ok_or(RuntimeError::StageClosing)?;
        for sid in sids {
            let Some(session) = self.sessions.get(sid) else {
                continue;
            };
            let frame = ServerFrame {
                service_id: header.service_id,
                packet: packet.clone(),
                original_size: 0,
            };
            if let Err(err) = session.send(frame).await {
                warn!(sid = sid.as_raw(), error = %err, "broadcast_to_stage failed for one session");
            }
        }
        Ok(())
    }

    /// Fire-and-forget send to an API node (§4.9 `SendToApi`).
    pub async fn send_to_api(&self, node_id: &NodeId, packet: Packet) -> Result<(), RuntimeError> {
        self.send_fire_and_forget(node_id, StageId::UNBOUND, packet).await
    }

    /// Fire-and-forget send to a specific stage on a peer node (§4.9
    /// `SendToStage`).
    pub async fn send_to_stage(&self, node_id: &NodeId, stage_id: StageId, packet: Packet) -> Result<(), RuntimeError> {
        self.send_fire_and_forget(node_id, stage_id, packet).await
    }

    /// Fire-and-forget system-flagged send (§4.10: mesh system messages
    /// set `isSystem = true`).
    pub async fn send_to_system(&self, node_id: &NodeId, packet: Packet) -> Result<(), RuntimeError> {
        let mut header = self.base_header(StageId::UNBOUND);
        header.is_system = true;
        self.dispatch(node_id, header, packet).await
    }

    /// Resolve `service_id` via the Server Info Center and fire-and-forget
    /// to the chosen node (§4.9 "service-addressed variants").
    pub async fn send_to_service(
        &self,
        node_type: NodeType,
        service_id: ServiceId,
        policy: &SelectionPolicy,
        packet: Packet,
    ) -> Result<(), RuntimeError> {
        let entry = self.resolve_service(node_type, service_id, policy)?;
        self.send_to_api(&entry.node_id, packet).await
    }

    /// Promise form of `RequestToApi`/`RequestToStage`/`RequestToSystem`:
    /// suspends the caller until the reply arrives or the request times
    /// out (§4.9, §5 "Cancellation & timeouts").
    pub async fn request(&self, node_id: &NodeId, stage_id: StageId, packet: Packet) -> Result<Packet, RuntimeError> {
        let seq = self.request_cache.next_seq();
        let rx = self.request_cache.register_promise(seq, self.request_timeout)?;

        let mut header = self.base_header(stage_id);
        header.msg_seq = seq;
        self.dispatch(node_id, header, packet).await?;

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::Cancelled),
        }
    }

    /// Callback form: the reply (or timeout) is posted back into this
    /// stage's own mailbox as `StageMessage::Reply` rather than resolving
    /// a future the caller awaits directly.
    pub async fn request_callback(&self, node_id: &NodeId, stage_id: StageId, packet: Packet) -> Result<(), RuntimeError> {
        let seq = self.request_cache.next_seq();
        let mut header = self.base_header(stage_id);
        header.msg_seq = seq;
        header.reply_stage_id = Some(self.stage_id);

        self.request_cache
            .register_post_to_stage(seq, self.mailbox.clone(), header.clone(), self.request_timeout)?;
        self.dispatch(node_id, header, packet).await
    }

    /// Answer the currently-bound request (§4.9 `Reply`). A no-op if
    /// `msgSeq == 0` (fire-and-forget; no reply expected).
    pub async fn reply(&self, packet: Packet) -> Result<(), RuntimeError> {
        self.reply_inner(Ok(packet)).await
    }

    /// Answer the currently-bound request with an error code and empty
    /// payload (§6 "a nonzero code with an empty payload is a valid error
    /// reply").
    pub async fn reply_error(&self, error_code: ErrorCode) -> Result<(), RuntimeError> {
        self.reply_inner(Err(error_code)).await
    }

    async fn reply_inner(&self, outcome: Result<Packet, ErrorCode>) -> Result<(), RuntimeError> {
        let header = self.header.clone().ok_or(RuntimeError::StageClosing)?;
        if header.is_fire_and_forget() {
            return Ok(());
        }

        let (packet, error_code) = match outcome {
            Ok(packet) => (packet, ErrorCode::SUCCESS),
            Err(code) => (Packet::error_reply(header.msg_id.clone(), header.msg_seq, code), code),
        };

        // A request whose `sid` names a session live on this node arrived
        // directly from a client (§4.1/§6): answer it on that session's
        // wire connection. A request from a peer node's stage or API
        // dispatcher carries a `sid` that resolves to nothing here (the
        // session, if any, lives on the originating node), so it falls
        // through to the Request Cache / mesh path below.
        if let Some(session) = self.sessions.get(header.sid) {
            let frame = ServerFrame {
                service_id: header.service_id,
                packet: packet.with_seq(header.msg_seq).with_error_code(error_code),
                original_size: 0,
            };
            return session.send(frame).await.map_err(RuntimeError::Transport);
        }

        let to = header.from.clone();
        let reply_header = header.into_reply(error_code).rebase_from(self.own_node.clone());
        self.dispatch(&to, reply_header, packet).await
    }

    /// Schedule a timer that fires every `interval`, after an initial
    /// `initial_delay`, until cancelled or the stage closes (§4.9
    /// "Timers").
    pub fn schedule_repeat_timer(&self, initial_delay: Duration, interval: Duration) -> TimerId {
        self.timers.schedule(initial_delay, TimerSchedule::Repeat { interval })
    }

    /// Schedule a timer that fires exactly `count` times, every `interval`,
    /// after an initial `initial_delay` (§4.9 "Timers").
    pub fn schedule_count_timer(&self, initial_delay: Duration, interval: Duration, count: u32) -> TimerId {
        self.timers.schedule(initial_delay, TimerSchedule::Count { interval, count })
    }

    /// Cancel a previously scheduled timer. A no-op if it already fired
    /// out (a `Count` timer) or was already cancelled.
    pub fn cancel_timer(&self, id: TimerId) {
        self.timers.cancel(id);
    }

    /// Off-load CPU-bound work onto the shared compute pool (§4.9
    /// `AsyncBlock`): `pre` runs on the stage executor, `work` runs on a
    /// blocking-pool thread once a permit is free, and `post` runs back on
    /// the stage executor with `work`'s result — the only place genuine
    /// OS-thread parallelism enters an otherwise per-stage-serialized
    /// handler.
    pub async fn async_block<Pre, Work, Post, T, R, Fut>(&self, pre: Pre, work: Work, post: Post) -> Result<(), RuntimeError>
    where
        Pre: FnOnce() -> T,
        Work: FnOnce(T) -> R + Send + 'static,
        T: Send + 'static,
        R: Send + 'static,
        Post: FnOnce(R) -> Fut,
        Fut: Future<Output = ()>,
    {
        let result = self.compute_pool.run(pre, work).await.map_err(RuntimeError::ComputePool)?;
        post(result).await;
        Ok(())
    }

    /// Ask a peer play-node to instantiate a stage (§4.9 `CreateStage`).
    #[allow(clippy::expect_used)]
    pub async fn create_stage(
        &self,
        node_id: &NodeId,
        stage_type: &str,
        stage_id: StageId,
        init_packet: Packet,
    ) -> Result<(), RuntimeError> {
        let _ = stage_type;
        let msg_id = MsgId::new(CREATE_STAGE_MSG_ID).expect("reserved msg id is always valid");
        let packet = init_packet.with_stage_id(stage_id);
        let mut header = self.base_header(stage_id);
        header.is_system = true;
        header.msg_id = msg_id;
        self.dispatch(node_id, header, packet).await
    }

    /// Request this stage terminate once the current dispatch returns
    /// (§4.9 `CloseStage`). The executor checks
    /// [`Sender::close_requested`] after every dispatch.
    pub fn close_stage(&self) {
        self.close_requested.set(true);
    }

    fn resolve_service(
        &self,
        node_type: NodeType,
        service_id: ServiceId,
        policy: &SelectionPolicy,
    ) -> Result<ServerInfoEntry, RuntimeError> {
        self.server_info.get_by_service(node_type, service_id, policy).ok_or_else(|| {
            warn!(?service_id, "no server info entry for requested service");
            RuntimeError::NodeUnreachable(NodeId::new(format!("service:{}", service_id.as_raw())))
        })
    }

    /// Build a header recording this node as `from` (so replies route
    /// home) and, per §4.9's stage-to-stage note, this stage's own id
    /// folded into `accountId` so a reply can be steered back here even
    /// though `stageId` names the destination.
    #[allow(clippy::expect_used)]
    fn base_header(&self, stage_id: StageId) -> RouteHeader {
        let (msg_id, service_id, sid) = match &self.header {
            Some(h) => (h.msg_id.clone(), h.service_id, h.sid),
            None => (MsgId::new("Unknown").expect("valid"), ServiceId::new(0), SessionId::new(0)),
        };
        RouteHeader {
            from: self.own_node.clone(),
            msg_id,
            msg_seq: MsgSeq::FIRE_AND_FORGET,
            service_id,
            stage_id,
            account_id: AccountId::new(self.stage_id.as_raw()),
            sid,
            reply_stage_id: None,
            is_reply: false,
            is_system: false,
            error_code: ErrorCode::SUCCESS,
        }
    }

    async fn send_fire_and_forget(&self, node_id: &NodeId, stage_id: StageId, packet: Packet) -> Result<(), RuntimeError> {
        let header = self.base_header(stage_id);
        self.dispatch(node_id, header, packet).await
    }

    /// Deliver `packet`/`header` to `node_id`: locally if `node_id` is this
    /// process, over the mesh otherwise.
    ///
    /// A reply (`header.is_reply`) never reaches a stage's `on_dispatch`:
    /// it resolves whichever [`RequestCache`] entry is waiting on
    /// `header.msg_seq` directly (§4.9 "Reply routing" — "the receiving
    /// node's Request Cache matches msgSeq"). A fresh, same-node request
    /// for a stage other than this one is routed through the shared
    /// [`StageTable`] rather than this stage's own mailbox — only a
    /// request that happens to target this very stage short-circuits onto
    /// `self.mailbox` directly, saving the table lookup.
    async fn dispatch(&self, node_id: &NodeId, header: RouteHeader, packet: Packet) -> Result<(), RuntimeError> {
        if *node_id != self.own_node {
            let frame = MeshFrame { header, packet };
            return self.mesh.send(node_id, frame).await.map_err(RuntimeError::Transport);
        }

        if header.is_reply {
            self.request_cache.complete(header.msg_seq, packet);
            return Ok(());
        }

        if header.stage_id == self.stage_id {
            self.mailbox.post(StageMessage::Route(header, packet));
            return Ok(());
        }

        match self.stages.get(header.stage_id) {
            Some(mailbox) => {
                mailbox.post(StageMessage::Route(header, packet));
                Ok(())
            }
            None => Err(RuntimeError::StageNotFound(header.stage_id)),
        }
    }
}

trait RebaseFrom {
    fn rebase_from(self, from: NodeId) -> Self;
}

impl RebaseFrom for RouteHeader {
    /// After `into_reply`, `header.from` still names whoever sent the
    /// original request — exactly who the reply must be delivered to, so
    /// it is preserved as the dispatch target by the caller before this
    /// runs. This only rewrites `from` itself to this node, so a further
    /// reply-to-the-reply (if any) would route back here correctly.
    fn rebase_from(mut self, from: NodeId) -> Self {
        self.from = from;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::Mailbox;

    fn build_sender(own_node: NodeId, stage_id: StageId) -> (Sender, crate::mailbox::Mailbox) {
        let (mailbox, mailbox_tx) = Mailbox::new(stage_id);
        let stages = Arc::new(crate::stage_table::StageTable::new());
        stages.insert_if_absent(stage_id, mailbox_tx.clone());
        let sender = Sender::new(
            own_node,
            stage_id,
            mailbox_tx,
            stages,
            Arc::new(SessionRegistry::new()),
            Arc::new(MeshHub::new()),
            Arc::new(ServerInfoCenter::new()),
            RequestCache::new(),
            Duration::from_secs(5),
            ComputePool::new(2),
        );
        (sender, mailbox)
    }

    #[tokio::test]
    async fn reply_is_noop_for_fire_and_forget_header() {
        let (mut sender, _mailbox) = build_sender(NodeId::new("play-01"), StageId::new(1));
        sender.bind_header(RouteHeader::request(
            NodeId::new("client-gw"),
            MsgId::new("Echo").unwrap(),
            ServiceId::new(1),
            StageId::new(1),
            SessionId::new(1),
        ));
        assert!(sender.reply(Packet::new(MsgId::new("EchoReply").unwrap(), &b""[..])).await.is_ok());
    }

    #[tokio::test]
    async fn reply_to_a_live_session_is_pushed_on_its_outbound_queue() {
        let (mut sender, _mailbox) = build_sender(NodeId::new("play-01"), StageId::new(1));
        let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::channel(4);
        let session = playhouse_net::Session::new(
            "127.0.0.1:9000".parse().unwrap(),
            playhouse_net::TransportKind::Tcp,
            outbound_tx,
            playhouse_net::session::OutboundBackpressure::Error,
        );
        sender.sessions.insert(session.clone());

        let mut header = RouteHeader::request(
            NodeId::new("gateway"),
            MsgId::new("Echo").unwrap(),
            ServiceId::new(1),
            StageId::new(1),
            session.sid(),
        );
        header.msg_seq = MsgSeq::from_raw(5);
        sender.bind_header(header);

        sender
            .reply(Packet::new(MsgId::new("EchoReply").unwrap(), &b"ok"[..]))
            .await
            .expect("reply dispatches");

        let frame = outbound_rx.recv().await.expect("frame queued for session");
        assert_eq!(frame.packet.msg_id().as_str(), "EchoReply");
    }

    #[tokio::test]
    async fn reply_with_no_live_session_completes_the_local_request_cache() {
        let (mut sender, _mailbox) = build_sender(NodeId::new("play-01"), StageId::new(1));
        let seq = sender.request_cache.next_seq();
        let rx = sender
            .request_cache
            .register_promise(seq, Duration::from_secs(5))
            .expect("registers");

        let mut header = RouteHeader::request(
            NodeId::new("play-01"),
            MsgId::new("Echo").unwrap(),
            ServiceId::new(1),
            StageId::new(1),
            SessionId::new(1),
        );
        header.msg_seq = seq;
        sender.bind_header(header);

        sender
            .reply(Packet::new(MsgId::new("EchoReply").unwrap(), &b"ok"[..]))
            .await
            .expect("reply dispatches");

        let reply = rx.await.expect("channel not dropped").expect("reply ok");
        assert_eq!(reply.msg_id().as_str(), "EchoReply");
    }

    #[tokio::test]
    async fn send_to_service_fails_without_a_registered_entry() {
        let (sender, _mailbox) = build_sender(NodeId::new("play-01"), StageId::new(1));
        let err = sender
            .send_to_service(
                NodeType::Api,
                ServiceId::new(7),
                &SelectionPolicy::RoundRobin,
                Packet::new(MsgId::new("Echo").unwrap(), &b""[..]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::NodeUnreachable(_)));
    }

    #[test]
    fn close_stage_sets_close_requested() {
        let (sender, _mailbox) = build_sender(NodeId::new("play-01"), StageId::new(1));
        assert!(!sender.close_requested());
        sender.close_stage();
        assert!(sender.close_requested());
    }

    #[tokio::test]
    async fn async_block_runs_pre_work_post_in_order() {
        let (sender, _mailbox) = build_sender(NodeId::new("play-01"), StageId::new(1));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        sender
            .async_block(
                || 20,
                |n: i32| n + 1,
                move |result: i32| async move {
                    let _ = done_tx.send(result);
                },
            )
            .await
            .expect("async_block completes");

        assert_eq!(done_rx.await.expect("post ran"), 21);
    }

    #[tokio::test]
    async fn broadcast_to_stage_reaches_every_joined_session() {
        let (mut sender, _mailbox) = build_sender(NodeId::new("play-01"), StageId::new(1));

        let (tx_a, mut rx_a) = tokio::sync::mpsc::channel(4);
        let session_a = playhouse_net::Session::new(
            "127.0.0.1:1".parse().unwrap(),
            playhouse_net::TransportKind::Tcp,
            tx_a,
            playhouse_net::session::OutboundBackpressure::Error,
        );
        let (tx_b, mut rx_b) = tokio::sync::mpsc::channel(4);
        let session_b = playhouse_net::Session::new(
            "127.0.0.1:2".parse().unwrap(),
            playhouse_net::TransportKind::Tcp,
            tx_b,
            playhouse_net::session::OutboundBackpressure::Error,
        );
        sender.sessions.insert(session_a.clone());
        sender.sessions.insert(session_b.clone());
        sender.note_joined(session_a.sid());
        sender.note_joined(session_b.sid());

        sender.bind_header(RouteHeader::request(
            NodeId::new("play-01"),
            MsgId::new("RoomEvent").unwrap(),
            ServiceId::new(1),
            StageId::new(1),
            session_a.sid(),
        ));

        sender
            .broadcast_to_stage(Packet::new(MsgId::new("RoomEvent").unwrap(), &b"hi"[..]))
            .await
            .expect("broadcast dispatches");

        assert_eq!(rx_a.recv().await.expect("a received").packet.msg_id().as_str(), "RoomEvent");
        assert_eq!(rx_b.recv().await.expect("b received").packet.msg_id().as_str(), "RoomEvent");
    }

    #[tokio::test]
    async fn schedule_count_timer_posts_ticks_to_the_owning_mailbox() {
        let (sender, mut mailbox) = build_sender(NodeId::new("play-01"), StageId::new(1));
        let id = sender.schedule_count_timer(Duration::from_millis(1), Duration::from_millis(1), 2);

        for expected_tick in 1..=2 {
            match mailbox.recv().await {
                Some(StageMessage::TimerTick(tick_id, tick)) => {
                    assert_eq!(tick_id, id);
                    assert_eq!(tick, expected_tick);
                }
                other => panic!("expected TimerTick, got {other:?}"),
            }
        }
    }
}
