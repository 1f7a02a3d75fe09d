//! Stateless per-request handler fan-out for API nodes (§4.7): look up a
//! handler by `MsgId`, invoke it with a fresh [`Sender`] bound to that
//! request's header, and reply with a generic error if it fails and a
//! reply was expected.
//!
//! Grounded on [`crate::play_dispatcher::PlayDispatcher`]'s own
//! routing/reply shape, generalized to stateless, per-request concurrency
//! instead of the serialized stage-mailbox model: every inbound packet
//! gets its own handler invocation, with no stage, actor table, or
//! suspend/resume machinery involved. Handler invocations still need
//! [`crate::stage_worker::StageWorkerPool`]'s `!Send`-friendly spawn,
//! since `Sender` itself is `!Send` (it carries an `Rc`-shared
//! close-request flag shared with the stage runtime's copy of the type).

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use futures::future::LocalBoxFuture;
use tracing::warn;

// Layer 3: Internal module imports
use playhouse_net::{MeshHub, ServerInfoCenter, SessionRegistry};
use playhouse_proto::header::RouteHeader;
use playhouse_proto::ids::{MsgId, NodeId};
use playhouse_proto::packet::Packet;
use playhouse_proto::MeshFrame;

use crate::compute_pool::ComputePool;
use crate::error::RuntimeError;
use crate::mailbox::Mailbox;
use crate::request_cache::RequestCache;
use crate::sender::Sender;
use crate::stage_table::StageTable;
use crate::stage_worker::StageWorkerPool;

/// A stateless API handler: given a [`Sender`] bound to the inbound
/// request's header and the request's packet, do whatever it needs (any
/// number of sends/requests through `sender`) and resolve.
///
/// `Send + Sync` so the registry itself can be shared across an ordinary
/// multi-thread runtime; only the `LocalBoxFuture` it returns is `!Send`,
/// and that future only ever runs on a [`StageWorkerPool`] worker thread.
pub type ApiHandler = Arc<dyn Fn(Sender, Packet) -> LocalBoxFuture<'static, Result<(), RuntimeError>> + Send + Sync>;

/// Routes inbound packets to registered [`ApiHandler`]s (§4.7). Has no
/// notion of stages or actors — every request is answered independently.
pub struct ApiDispatcher {
    own_node: NodeId,
    handlers: DashMap<MsgId, ApiHandler>,
    stages: Arc<StageTable>,
    sessions: Arc<SessionRegistry>,
    mesh: Arc<MeshHub>,
    server_info: Arc<ServerInfoCenter>,
    request_cache: RequestCache,
    request_timeout: Duration,
    workers: StageWorkerPool,
    compute_pool: ComputePool,
}

impl ApiDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        own_node: NodeId,
        stages: Arc<StageTable>,
        sessions: Arc<SessionRegistry>,
        mesh: Arc<MeshHub>,
        server_info: Arc<ServerInfoCenter>,
        request_cache: RequestCache,
        request_timeout: Duration,
        worker_count: usize,
        compute_pool_size: usize,
    ) -> Self {
        Self {
            own_node,
            handlers: DashMap::new(),
            stages,
            sessions,
            mesh,
            server_info,
            request_cache,
            request_timeout,
            workers: StageWorkerPool::new(worker_count),
            compute_pool: ComputePool::new(compute_pool_size),
        }
    }

    /// Register the handler for `msg_id`, replacing any prior registration.
    pub fn register(&self, msg_id: MsgId, handler: ApiHandler) {
        self.handlers.insert(msg_id, handler);
    }

    /// Route one inbound packet (§4.7 steps 1-4). Entry point for both the
    /// Session Manager (client-originated) and the mesh inbound loop (see
    /// [`Self::run_mesh_inbound`]).
    pub async fn dispatch(&self, header: RouteHeader, packet: Packet) {
        let Some(handler) = self.handlers.get(packet.msg_id()).map(|entry| entry.clone()) else {
            warn!(msg_id = ?packet.msg_id(), "no API handler registered");
            self.reject_unknown_message(&header).await;
            return;
        };

        let sender = self.build_sender(header.clone());
        let expects_reply = !header.is_fire_and_forget();

        self.workers.spawn(move || async move {
            if let Err(err) = handler(sender.clone(), packet).await {
                if expects_reply {
                    let _ = sender.reply_error(err.as_error_code()).await;
                } else {
                    warn!(error = %err, "api handler failed for a fire-and-forget request");
                }
            }
        });
    }

    /// Drain mesh-inbound frames addressed to this node forever. Replies
    /// are handed straight to the Request Cache (§4.9 "Reply routing"),
    /// never to a handler.
    pub async fn run_mesh_inbound(&self, mut inbound: tokio::sync::mpsc::Receiver<MeshFrame>) {
        while let Some(frame) = inbound.recv().await {
            if frame.header.is_reply {
                self.request_cache.complete(frame.header.msg_seq, frame.packet);
                continue;
            }
            self.dispatch(frame.header, frame.packet).await;
        }
    }

    async fn reject_unknown_message(&self, header: &RouteHeader) {
        if header.is_fire_and_forget() {
            return;
        }
        let sender = self.build_sender(header.clone());
        let _ = sender
            .reply_error(RuntimeError::UnknownMessage(header.msg_id.clone()).as_error_code())
            .await;
    }

    /// A [`Sender`] bound to `header`, with no owning stage — an API node
    /// has no stage table entry for itself, only the shared one it routes
    /// `SendToStage`/`RequestToStage` calls through.
    fn build_sender(&self, header: RouteHeader) -> Sender {
        let (mailbox, mailbox_tx) = Mailbox::new(header.stage_id);
        drop(mailbox);
        Sender::new(
            self.own_node.clone(),
            header.stage_id,
            mailbox_tx,
            self.stages.clone(),
            self.sessions.clone(),
            self.mesh.clone(),
            self.server_info.clone(),
            self.request_cache.clone(),
            self.request_timeout,
            self.compute_pool.clone(),
        )
        .bound_to(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playhouse_proto::ids::{MsgSeq, ServiceId, SessionId, StageId};

    fn build_dispatcher() -> ApiDispatcher {
        ApiDispatcher::new(
            NodeId::new("api-01"),
            Arc::new(StageTable::new()),
            Arc::new(SessionRegistry::new()),
            Arc::new(MeshHub::new()),
            Arc::new(ServerInfoCenter::new()),
            RequestCache::new(),
            Duration::from_secs(5),
            2,
            2,
        )
    }

    fn request_header(msg_id: &str, sid: SessionId, fire_and_forget: bool) -> RouteHeader {
        let mut header = RouteHeader::request(
            NodeId::new("api-01"),
            MsgId::new(msg_id).expect("valid"),
            ServiceId::new(1),
            StageId::UNBOUND,
            sid,
        );
        if !fire_and_forget {
            header.msg_seq = MsgSeq::from_raw(7);
        }
        header
    }

    #[tokio::test]
    async fn dispatch_invokes_the_registered_handler() {
        let dispatcher = build_dispatcher();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let done_tx = std::sync::Arc::new(tokio::sync::Mutex::new(Some(done_tx)));

        dispatcher.register(
            MsgId::new("Ping").expect("valid"),
            Arc::new(move |_sender, packet| {
                let done_tx = done_tx.clone();
                Box::pin(async move {
                    if let Some(tx) = done_tx.lock().await.take() {
                        let _ = tx.send(packet.payload().clone());
                    }
                    Ok(())
                })
            }),
        );

        dispatcher
            .dispatch(
                request_header("Ping", SessionId::new(1), true),
                Packet::new(MsgId::new("Ping").expect("valid"), &b"hi"[..]),
            )
            .await;

        let payload = done_rx.await.expect("handler ran");
        assert_eq!(&payload[..], b"hi");
    }

    #[tokio::test]
    async fn handler_failure_replies_generic_error_when_a_reply_is_expected() {
        let dispatcher = build_dispatcher();
        let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::channel(4);
        let session = playhouse_net::Session::new(
            "127.0.0.1:1".parse().unwrap(),
            playhouse_net::TransportKind::Tcp,
            outbound_tx,
            playhouse_net::session::OutboundBackpressure::Error,
        );
        dispatcher.sessions.insert(session.clone());

        dispatcher.register(
            MsgId::new("Fail").expect("valid"),
            Arc::new(|_sender, _packet| {
                Box::pin(async { Err(RuntimeError::Handler(playhouse_proto::ids::ErrorCode::new(9999))) })
            }),
        );

        dispatcher
            .dispatch(
                request_header("Fail", session.sid(), false),
                Packet::new(MsgId::new("Fail").expect("valid"), &b""[..]),
            )
            .await;

        let frame = outbound_rx.recv().await.expect("error reply queued");
        assert_eq!(frame.packet.error_code().as_raw(), 9999);
    }

    #[tokio::test]
    async fn unknown_message_with_expected_reply_gets_a_generic_error() {
        let dispatcher = build_dispatcher();
        let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::channel(4);
        let session = playhouse_net::Session::new(
            "127.0.0.1:1".parse().unwrap(),
            playhouse_net::TransportKind::Tcp,
            outbound_tx,
            playhouse_net::session::OutboundBackpressure::Error,
        );
        dispatcher.sessions.insert(session.clone());

        dispatcher
            .dispatch(
                request_header("NoSuchHandler", session.sid(), false),
                Packet::new(MsgId::new("NoSuchHandler").expect("valid"), &b""[..]),
            )
            .await;

        let frame = outbound_rx.recv().await.expect("error reply queued");
        assert!(frame.packet.is_error());
    }
}
