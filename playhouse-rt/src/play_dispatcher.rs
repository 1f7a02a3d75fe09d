//! Routes inbound packets to stage mailboxes, creating stages on demand
//! and serializing creation per `stageId` (§4.8).
//!
//! A single router entry point, split into "look up existing" (lock-free
//! via [`StageTable`]) and "create if missing" (serialized per id via a
//! per-stage `tokio::sync::Mutex`, since `StageTable::insert_if_absent`
//! alone only prevents a *duplicate* stage — it doesn't stop two racers
//! from both running `OnCreate`) to satisfy §4.8's double-creation rule
//! without serializing routing to stages that already exist.

// Layer 1: Standard library imports
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use tracing::warn;

// Layer 3: Internal module imports
use playhouse_net::{MeshHub, ServerInfoCenter, SessionRegistry};
use playhouse_proto::header::RouteHeader;
use playhouse_proto::ids::{MsgId, NodeId, StageId};
use playhouse_proto::packet::Packet;
use playhouse_proto::MeshFrame;

use crate::compute_pool::ComputePool;
use crate::mailbox::{Mailbox, MailboxSender, StageMessage};
use crate::request_cache::RequestCache;
use crate::sender::Sender;
use crate::stage::{Stage, StageHandler};
use crate::stage_table::StageTable;
use crate::stage_worker::StageWorkerPool;
use crate::RuntimeError;

/// Builds a fresh [`StageHandler`] for a newly created stage. Invoked on
/// whichever [`StageWorkerPool`] worker thread ends up owning the stage —
/// the factory itself must be `Send + Sync` even though what it returns
/// (`Rc<dyn StageHandler>`) is not.
pub type StageFactory = Arc<dyn Fn() -> Rc<dyn StageHandler> + Send + Sync>;

/// A handler for a stage-less system message (§4.8 "`stageId == 0` and
/// `MsgId` is a registered system message").
pub type SystemMessageHandler = Arc<dyn Fn(RouteHeader, Packet) + Send + Sync>;

/// Tunables for [`PlayDispatcher`] construction, kept separate from
/// [`crate::config::StageRuntimeConfig`] since they govern routing/creation
/// rather than a single stage's own limits.
#[derive(Clone)]
pub struct PlayDispatcherConfig {
    pub default_stage_type: String,
    pub create_msg_id: MsgId,
    pub auth_msg_id: MsgId,
    pub request_timeout: Duration,
    pub idle_reap_grace: Duration,
    pub worker_count: usize,

    /// Size of the shared [`ComputePool`] backing `AsyncBlock` off-loads
    /// for every stage this dispatcher creates (§4.9).
    pub compute_pool_size: usize,
}

/// The §4.8 routing table, plus the machinery that creates stages on
/// demand.
pub struct PlayDispatcher {
    own_node: NodeId,
    config: PlayDispatcherConfig,
    stage_factory: StageFactory,
    stages: Arc<StageTable>,
    sessions: Arc<SessionRegistry>,
    mesh: Arc<MeshHub>,
    server_info: Arc<ServerInfoCenter>,
    request_cache: RequestCache,
    workers: StageWorkerPool,
    compute_pool: ComputePool,
    creation_locks: DashMap<StageId, Arc<tokio::sync::Mutex<()>>>,
    system_handlers: DashMap<MsgId, SystemMessageHandler>,
}

impl PlayDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        own_node: NodeId,
        config: PlayDispatcherConfig,
        stage_factory: StageFactory,
        stages: Arc<StageTable>,
        sessions: Arc<SessionRegistry>,
        mesh: Arc<MeshHub>,
        server_info: Arc<ServerInfoCenter>,
        request_cache: RequestCache,
    ) -> Self {
        let workers = StageWorkerPool::new(config.worker_count);
        let compute_pool = ComputePool::new(config.compute_pool_size);
        Self {
            own_node,
            config,
            stage_factory,
            stages,
            sessions,
            mesh,
            server_info,
            request_cache,
            workers,
            compute_pool,
            creation_locks: DashMap::new(),
            system_handlers: DashMap::new(),
        }
    }

    /// Register a handler for a stage-less (`stageId == 0`) system
    /// message, e.g. `@Debug@` (§4.10).
    pub fn register_system_handler(&self, msg_id: MsgId, handler: SystemMessageHandler) {
        self.system_handlers.insert(msg_id, handler);
    }

    /// Route one inbound packet per §4.8's table. Entry point for both the
    /// Session Manager (client-originated packets) and the mesh inbound
    /// loop (peer-originated, non-reply packets — see [`Self::run_mesh_inbound`]).
    pub async fn dispatch(&self, header: RouteHeader, packet: Packet) {
        if header.stage_id.is_unbound() {
            self.dispatch_system(header, packet).await;
            return;
        }

        if let Some(mailbox) = self.stages.get(header.stage_id) {
            mailbox.post(StageMessage::Route(header, packet));
            return;
        }

        if *packet.msg_id() == self.config.create_msg_id {
            self.create_and_enqueue(header, packet).await;
            return;
        }

        self.reject_stage_not_found(&header).await;
    }

    /// Drain mesh-inbound frames addressed to this node forever. Replies
    /// (`header.is_reply`) are handed straight to the Request Cache — they
    /// never reach a stage's `on_dispatch` (§4.9 "Reply routing": "the
    /// receiving node's Request Cache matches msgSeq"). Everything else
    /// goes through the ordinary [`Self::dispatch`] table.
    pub async fn run_mesh_inbound(&self, mut inbound: tokio::sync::mpsc::Receiver<MeshFrame>) {
        while let Some(frame) = inbound.recv().await {
            if frame.header.is_reply {
                self.request_cache.complete(frame.header.msg_seq, frame.packet);
                continue;
            }
            self.dispatch(frame.header, frame.packet).await;
        }
    }

    async fn dispatch_system(&self, header: RouteHeader, packet: Packet) {
        if let Some(handler) = self.system_handlers.get(packet.msg_id()) {
            handler(header, packet);
            return;
        }
        warn!(msg_id = %packet.msg_id(), "no system handler registered for stage-less message");
        self.reject_stage_not_found(&header).await;
    }

    async fn reject_stage_not_found(&self, header: &RouteHeader) {
        if header.is_fire_and_forget() {
            return;
        }
        let sender = self.reply_only_sender(header.clone());
        let _ = sender.reply_error(RuntimeError::StageNotFound(header.stage_id).as_error_code()).await;
    }

    /// Create-on-demand with per-`stageId` serialization (§4.8). A second
    /// caller racing for the same `stageId` blocks on the same lock and,
    /// once it acquires it, finds the stage already registered in
    /// [`StageTable`] and enqueues instead of creating a second one.
    async fn create_and_enqueue(&self, header: RouteHeader, packet: Packet) {
        let stage_id = header.stage_id;
        let lock = self
            .creation_locks
            .entry(stage_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(mailbox) = self.stages.get(stage_id) {
            mailbox.post(StageMessage::Route(header, packet));
            return;
        }

        let (stage, mailbox_tx) = Stage::new(
            self.own_node.clone(),
            stage_id,
            self.config.default_stage_type.clone(),
            (self.stage_factory)(),
            self.config.auth_msg_id.clone(),
            self.stages.clone(),
            self.sessions.clone(),
            self.mesh.clone(),
            self.server_info.clone(),
            self.request_cache.clone(),
            self.config.request_timeout,
            self.config.idle_reap_grace,
            self.compute_pool.clone(),
        );

        // Register before handing off to a worker thread: a concurrent
        // dispatch for this same `stageId` that arrives after we release
        // `_guard` (e.g. a second message in the same batch) must see the
        // stage already exists and simply enqueue onto it.
        if let Some(survivor) = self.stages.insert_if_absent(stage_id, mailbox_tx.clone()) {
            // Can only happen if a caller bypassed the creation lock; stay
            // defensive rather than panic; the stage we just built is
            // simply dropped (it never ran `OnCreate`, so no teardown is
            // owed to it).
            survivor.post(StageMessage::Route(header, packet));
            return;
        }

        let stages = self.stages.clone();
        self.workers.spawn(move || async move {
            let _ = stage.run(header, packet).await;
            stages.remove(stage_id);
        });
    }

    /// A [`Sender`] with no owning stage, for dispatcher-level error
    /// replies (e.g. `StageNotFound`) that never originated from inside a
    /// stage's own executor.
    fn reply_only_sender(&self, header: RouteHeader) -> Sender {
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
            self.config.request_timeout,
            self.compute_pool.clone(),
        )
        .bound_to(header)
    }
}
