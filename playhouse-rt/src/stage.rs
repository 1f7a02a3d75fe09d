//! The per-stage mailbox executor (§4.9, "the hardest part"): single-
//! threaded dispatch, actor lifecycle, and the suspend/resume machinery
//! that lets a handler `await` a cross-node reply without ever blocking
//! the stage's own mailbox drain.
//!
//! Built on the common single-task-drains-a-channel actor shape,
//! generalized with the [`crate::mailbox::ContinuationWaker`]
//! suspend/resume primitive: ordinary actors never suspend mid-handler, so
//! this had no ready-made counterpart to build from.

// Layer 1: Standard library imports
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::Context as TaskContext;
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use futures::future::LocalBoxFuture;
use tracing::{debug, info, warn};

// Layer 3: Internal module imports
use playhouse_net::{MeshHub, ServerInfoCenter, SessionRegistry};
use playhouse_proto::header::RouteHeader;
use playhouse_proto::ids::{AccountId, ErrorCode, MsgId, NodeId, SessionId, StageId};
use playhouse_proto::packet::Packet;

use crate::actor::ActorHandler;
use crate::compute_pool::ComputePool;
use crate::error::RuntimeError;
use crate::mailbox::{ContinuationId, ContinuationIdGen, ContinuationWaker, Mailbox, MailboxSender, StageMessage};
use crate::request_cache::RequestCache;
use crate::sender::Sender;
use crate::stage_table::StageTable;
use crate::system_messages;
use crate::timer::TimerId;

/// A stage's place in its own teardown state machine (§3 "Stage").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageLifecycle {
    Init,
    Live,
    Closing,
    Dead,
}

/// Stage-level lifecycle hooks (§4.9's lifecycle table, rows without the
/// `Actor` prefix). Actor-scoped hooks live on [`ActorHandler`]; a stage
/// owns one `StageHandler` instance for its whole lifetime and zero or
/// more `ActorHandler` instances, one per joined session.
///
/// Same `Rc<Self>` / `LocalBoxFuture` shape as `ActorHandler` and for the
/// same reason: the executor must be able to poll a handler invocation
/// once per mailbox turn and stash it across turns.
pub trait StageHandler: 'static {
    /// Build a fresh actor for a newly authenticating session. Called
    /// once, immediately before that actor's `OnAuthenticate`.
    fn new_actor(self: Rc<Self>) -> Rc<dyn ActorHandler>;

    /// Stage instantiation (§4.9 `OnCreate`). Failure means the stage is
    /// never considered created: the caller's creation reply carries the
    /// error and the executor shuts down without running `OnDestroy`.
    fn on_create(self: Rc<Self>, sender: Sender, init_packet: Packet) -> LocalBoxFuture<'static, Result<(), RuntimeError>>;

    /// Runs after a successful `OnCreate`. Cannot fail; failures here are
    /// a logic error in the handler, not a rejected stage.
    fn on_post_create(self: Rc<Self>, sender: Sender) -> LocalBoxFuture<'static, ()> {
        let _ = sender;
        Box::pin(async {})
    }

    /// An authenticated actor enters the stage's actor table (§4.9
    /// `OnJoinStage`). Returning `false` rejects the actor and unbinds
    /// its session.
    fn on_join_stage(self: Rc<Self>, sender: Sender, account_id: AccountId) -> LocalBoxFuture<'static, bool> {
        let _ = (sender, account_id);
        Box::pin(async { true })
    }

    /// Runs after a successful join. Cannot fail; failures here are
    /// logged, not surfaced to the client.
    fn on_post_join_stage(self: Rc<Self>, sender: Sender, account_id: AccountId) -> LocalBoxFuture<'static, ()> {
        let _ = (sender, account_id);
        Box::pin(async {})
    }

    /// Every non-lifecycle message this stage receives (§4.9
    /// `OnDispatch(actor, packet)` / `OnDispatch(packet)`), `account_id`
    /// present when the sending session has a joined actor.
    fn on_dispatch(
        self: Rc<Self>,
        sender: Sender,
        account_id: Option<AccountId>,
        packet: Packet,
    ) -> LocalBoxFuture<'static, Result<(), RuntimeError>>;

    /// Stage teardown (§4.9 `OnDestroy`). Cannot fail.
    fn on_destroy(self: Rc<Self>, sender: Sender) -> LocalBoxFuture<'static, ()> {
        let _ = sender;
        Box::pin(async {})
    }

    /// A timer scheduled via [`Sender::schedule_repeat_timer`] or
    /// [`Sender::schedule_count_timer`] fired (§4.9 "Timers"). `tick` is
    /// the 1-based sequence number of this firing within the timer's own
    /// schedule, so a `Count` timer's handler can tell its first tick from
    /// its last without keeping its own counter.
    fn on_timer(self: Rc<Self>, sender: Sender, timer_id: TimerId, tick: u32) -> LocalBoxFuture<'static, ()> {
        let _ = (sender, timer_id, tick);
        Box::pin(async {})
    }
}

struct ActorEntry {
    handler: Rc<dyn ActorHandler>,
    sid: SessionId,
}

/// A handler invocation that suspended mid-poll, stashed until its
/// [`ContinuationWaker`] re-enqueues a `Resume` for the same id (§4.9
/// "Suspension does not stall the stage").
type Suspended = LocalBoxFuture<'static, ()>;

/// One stage: a named, single-threaded execution domain (§3 "Stage"),
/// driven entirely by [`Stage::run`] until its mailbox closes or
/// `OnDestroy` completes.
pub struct Stage {
    own_node: NodeId,
    stage_id: StageId,
    stage_type: String,
    lifecycle: Cell<StageLifecycle>,
    mailbox: Mailbox,
    mailbox_tx: MailboxSender,
    sender: Sender,
    sessions: std::sync::Arc<SessionRegistry>,
    handler: Rc<dyn StageHandler>,
    actors: RefCell<HashMap<AccountId, ActorEntry>>,
    sid_to_account: RefCell<HashMap<SessionId, AccountId>>,
    auth_msg_id: MsgId,
    continuation_ids: ContinuationIdGen,
    suspended: RefCell<HashMap<ContinuationId, Suspended>>,
    idle_since: Cell<Option<Instant>>,
    idle_reap_grace: Duration,
}

impl Stage {
    /// Build a stage and immediately return its [`Mailbox`] sender handle
    /// so callers (the Play Dispatcher) can start enqueueing before the
    /// executor task is even spawned.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        own_node: NodeId,
        stage_id: StageId,
        stage_type: impl Into<String>,
        handler: Rc<dyn StageHandler>,
        auth_msg_id: MsgId,
        stages: std::sync::Arc<StageTable>,
        sessions: std::sync::Arc<SessionRegistry>,
        mesh: std::sync::Arc<MeshHub>,
        server_info: std::sync::Arc<ServerInfoCenter>,
        request_cache: RequestCache,
        request_timeout: Duration,
        idle_reap_grace: Duration,
        compute_pool: ComputePool,
    ) -> (Self, MailboxSender) {
        let (mailbox, mailbox_tx) = Mailbox::new(stage_id);
        let sender = Sender::new(
            own_node.clone(),
            stage_id,
            mailbox_tx.clone(),
            stages,
            sessions.clone(),
            mesh,
            server_info,
            request_cache,
            request_timeout,
            compute_pool,
        );

        let stage = Self {
            own_node,
            stage_id,
            stage_type: stage_type.into(),
            lifecycle: Cell::new(StageLifecycle::Init),
            mailbox,
            mailbox_tx: mailbox_tx.clone(),
            sender,
            sessions,
            handler,
            actors: RefCell::new(HashMap::new()),
            sid_to_account: RefCell::new(HashMap::new()),
            auth_msg_id,
            continuation_ids: ContinuationIdGen::new(),
            suspended: RefCell::new(HashMap::new()),
            idle_since: Cell::new(None),
            idle_reap_grace,
        };
        (stage, mailbox_tx)
    }

    pub fn stage_id(&self) -> StageId {
        self.stage_id
    }

    pub fn stage_type(&self) -> &str {
        &self.stage_type
    }

    pub fn lifecycle(&self) -> StageLifecycle {
        self.lifecycle.get()
    }

    /// Run `OnCreate`/`OnPostCreate` and, if it succeeds, the executor
    /// loop until the mailbox closes, `CloseStage` is requested, or a
    /// `Shutdown` message is drained.
    ///
    /// `header` is the route header of the message that triggered creation
    /// (the Play Dispatcher's "create-on-demand" packet, §4.8) — bound to
    /// the `OnCreate` sender so a failure's error reply reaches the actual
    /// requester instead of nowhere.
    pub async fn run(mut self, header: RouteHeader, init_packet: Packet) -> Result<(), RuntimeError> {
        let create_sender = self.sender.bound_to(header.clone());

        if let Err(err) = self.handler.clone().on_create(create_sender.clone(), init_packet).await {
            warn!(stage_id = self.stage_id.as_raw(), error = %err, "stage OnCreate failed, stage not created");
            reply_error(&create_sender, &header, err.as_error_code()).await;
            return Err(err);
        }
        self.handler.clone().on_post_create(create_sender).await;
        self.lifecycle.set(StageLifecycle::Live);
        self.touch_idle();
        self.reply_success_if_expected(&header).await;
        info!(stage_id = self.stage_id.as_raw(), stage_type = %self.stage_type, "stage created");

        // A stage holds its own mailbox sender for its whole life (timers,
        // the Sender it hands to handlers), so the mailbox itself never
        // closes on its own. Without a periodic nudge an idle stage with no
        // inbound traffic would never re-check `is_reapable` (§10.7).
        let reap_check_interval = (self.idle_reap_grace / 10).max(Duration::from_millis(100));
        self.schedule_timer(
            reap_check_interval,
            crate::timer::TimerSchedule::Repeat {
                interval: reap_check_interval,
            },
        );

        loop {
            let Some(message) = self.mailbox.recv().await else {
                break;
            };
            match message {
                StageMessage::Route(header, packet) => self.handle_route(header, packet).await,
                StageMessage::Reply(header, packet) => self.handle_reply(header, packet).await,
                StageMessage::Resume(cid) => self.handle_resume(cid).await,
                StageMessage::TimerTick(tid, tick) => self.handle_timer_tick(tid, tick).await,
                StageMessage::ConnectionChanged(sid, connected) => self.handle_connection_changed(sid, connected).await,
                StageMessage::Shutdown => break,
            }

            if self.sender.close_requested() {
                break;
            }
            if self.is_reapable() {
                info!(stage_id = self.stage_id.as_raw(), "stage idle past reap grace, closing");
                break;
            }
        }

        self.teardown().await;
        Ok(())
    }

    async fn teardown(&mut self) {
        self.lifecycle.set(StageLifecycle::Closing);
        self.sender.timer_registry().cancel_all();

        let account_ids: Vec<AccountId> = self.actors.borrow().keys().copied().collect();
        for account_id in account_ids {
            self.destroy_actor(account_id).await;
        }

        let destroy_sender = self.sender.clone();
        self.handler.clone().on_destroy(destroy_sender).await;
        self.lifecycle.set(StageLifecycle::Dead);
        info!(stage_id = self.stage_id.as_raw(), "stage destroyed");
    }

    async fn destroy_actor(&self, account_id: AccountId) {
        let Some(entry) = self.actors.borrow_mut().remove(&account_id) else {
            return;
        };
        self.sid_to_account.borrow_mut().remove(&entry.sid);
        self.sender.note_left(entry.sid);
        let sender = self.sender.bound_to(self.actor_header(entry.sid, account_id));
        entry.handler.on_destroy(sender).await;
    }

    #[allow(clippy::expect_used)]
    fn actor_header(&self, sid: SessionId, account_id: AccountId) -> RouteHeader {
        let mut header = RouteHeader::request(
            self.own_node.clone(),
            MsgId::new("@Internal@").expect("reserved msg id is always valid"),
            playhouse_proto::ids::ServiceId::new(0),
            self.stage_id,
            sid,
        );
        header.account_id = account_id;
        header
    }

    /// Whether this stage has had an empty actor table for at least
    /// `idle_reap_grace` (SPEC_FULL §10.7).
    fn is_reapable(&self) -> bool {
        if !self.actors.borrow().is_empty() {
            self.idle_since.set(None);
            return false;
        }
        match self.idle_since.get() {
            Some(since) => since.elapsed() >= self.idle_reap_grace,
            None => {
                self.idle_since.set(Some(Instant::now()));
                false
            }
        }
    }

    fn touch_idle(&self) {
        if self.actors.borrow().is_empty() {
            self.idle_since.set(Some(Instant::now()));
        } else {
            self.idle_since.set(None);
        }
    }

    async fn handle_route(&self, header: RouteHeader, packet: Packet) {
        if matches!(self.lifecycle.get(), StageLifecycle::Closing | StageLifecycle::Dead) {
            self.reply_error_if_expected(&header, RuntimeError::StageClosing.as_error_code()).await;
            return;
        }

        let msg_id = packet.msg_id().clone();

        if msg_id == self.auth_msg_id {
            self.handle_authenticate(header, packet).await;
            return;
        }

        let account_id = self.sid_to_account.borrow().get(&header.sid).copied();
        if account_id.is_none() && !system_messages::bypasses_authentication(&msg_id) {
            self.reply_error_if_expected(&header, RuntimeError::NotAuthenticated.as_error_code()).await;
            return;
        }

        let sender = self.sender.bound_to(header.clone());
        let handler = self.handler.clone();
        let on_dispatch_header = header.clone();
        let fut: LocalBoxFuture<'static, ()> = Box::pin(async move {
            let result = handler.on_dispatch(sender.clone(), account_id, packet).await;
            if let Err(err) = result {
                reply_error(&sender, &on_dispatch_header, err.as_error_code()).await;
            }
        });
        self.drive_new(fut);
    }

    async fn handle_authenticate(&self, header: RouteHeader, packet: Packet) {
        if self.sid_to_account.borrow().contains_key(&header.sid) {
            // Already authenticated on this stage; treat a repeated
            // authenticate message as an ordinary dispatch so idempotent
            // clients don't get a confusing error.
            return;
        }

        let actor = self.handler.clone().new_actor();
        let sender = self.sender.bound_to(header.clone());

        match actor.clone().on_authenticate(sender.clone(), packet).await {
            Ok(()) => {
                self.join_actor(header, actor).await;
            }
            Err(err) => {
                warn!(sid = header.sid.as_raw(), error = %err, "actor OnAuthenticate failed");
                reply_error(&sender, &header, err.as_error_code()).await;
            }
        }
    }

    async fn join_actor(&self, header: RouteHeader, actor: Rc<dyn ActorHandler>) {
        // §3 invariant: accountId is immutable after OnAuthenticate
        // succeeds, and an actor whose auth fails never enters the table.
        // The account id namespace here is the session id itself reused
        // as the account id seed — an embedding application typically
        // overwrites this via its own auth packet payload before this
        // point; PlayHouse's core only guarantees the *mechanism*, not
        // the account numbering scheme.
        let account_id = AccountId::new(header.sid.as_raw());
        let join_sender = self.sender.bound_to(header.clone());

        let accepted = self.handler.clone().on_join_stage(join_sender.clone(), account_id).await;
        if !accepted {
            warn!(sid = header.sid.as_raw(), "actor rejected by OnJoinStage");
            reply_error(&join_sender, &header, RuntimeError::JoinRejected.as_error_code()).await;
            return;
        }

        self.actors.borrow_mut().insert(
            account_id,
            ActorEntry {
                handler: actor.clone(),
                sid: header.sid,
            },
        );
        self.sid_to_account.borrow_mut().insert(header.sid, account_id);
        self.touch_idle();
        self.sender.note_joined(header.sid);

        if let Some(session) = self.sessions.get(header.sid) {
            session.bind_to_stage(self.stage_id);
        }

        self.handler.clone().on_post_join_stage(join_sender.clone(), account_id).await;
        actor.on_post_authenticate(join_sender.clone()).await;
        actor.on_connection_changed(join_sender, true).await;

        self.reply_success_if_expected(&header).await;
    }

    async fn handle_reply(&self, header: RouteHeader, packet: Packet) {
        // Replies posted back by the request cache's post-to-stage hook
        // are themselves a kind of Route for dispatch purposes: a
        // continuation waiting on `request_callback` reads this as its
        // result via whatever stage-local bookkeeping the handler set up
        // (e.g. a oneshot the handler itself registered before issuing
        // the request). PlayHouse's own Sender::request_callback doesn't
        // thread a continuation id through StageMessage::Reply, so this
        // hands the reply straight to on_dispatch the same way a fresh
        // Route would, letting application code match on `packet.msg_id()`.
        self.handle_route(header, packet).await;
    }

    async fn handle_resume(&self, cid: ContinuationId) {
        let Some(mut fut) = self.suspended.borrow_mut().remove(&cid) else {
            debug!(stage_id = self.stage_id.as_raw(), cid = cid.as_raw(), "resume for unknown continuation, ignoring");
            return;
        };
        if !self.poll_continuation(cid, &mut fut) {
            self.suspended.borrow_mut().insert(cid, fut);
        }
    }

    /// A session this stage joined went up or down (§4.9 `OnConnectionChanged`,
    /// driven by the Session Manager). Silently ignored if the session
    /// never joined an actor here (e.g. it disconnected pre-authenticate).
    async fn handle_connection_changed(&self, sid: SessionId, connected: bool) {
        let Some(account_id) = self.sid_to_account.borrow().get(&sid).copied() else {
            return;
        };
        let Some(entry) = self.actors.borrow().get(&account_id).map(|e| e.handler.clone()) else {
            return;
        };
        let sender = self.sender.bound_to(self.actor_header(sid, account_id));
        entry.on_connection_changed(sender, connected).await;
    }

    /// Dispatch a fired timer to `StageHandler::on_timer` (§4.9 "Timers").
    /// Runs through the same suspend/resume machinery as any other
    /// handler invocation, so an `on_timer` that awaits a cross-node
    /// reply never stalls the stage.
    async fn handle_timer_tick(&self, tid: TimerId, tick: u32) {
        let sender = self.sender.bound_to(self.actor_header(SessionId::new(0), AccountId::new(0)));
        let handler = self.handler.clone();
        let fut: LocalBoxFuture<'static, ()> = Box::pin(async move {
            handler.on_timer(sender, tid, tick).await;
        });
        self.drive_new(fut);
    }

    /// Schedule a new timer on this stage (§4.9 "Timers"), backed by the
    /// same `Rc`-shared registry exposed to handlers via
    /// [`Sender::schedule_repeat_timer`]/[`Sender::schedule_count_timer`].
    pub fn schedule_timer(&self, initial_delay: Duration, schedule: crate::timer::TimerSchedule) -> TimerId {
        self.sender.timer_registry().schedule(initial_delay, schedule)
    }

    pub fn cancel_timer(&self, id: TimerId) {
        self.sender.timer_registry().cancel(id);
    }

    /// Poll a freshly-created handler invocation once. If it suspends,
    /// stash it under a new [`ContinuationId`]; the executor moves on to
    /// the next mailbox message either way (§4.9 "suspension does not
    /// stall the stage").
    fn drive_new(&self, fut: LocalBoxFuture<'static, ()>) {
        let cid = self.continuation_ids.next();
        let mut fut = fut;
        if !self.poll_continuation(cid, &mut fut) {
            self.suspended.borrow_mut().insert(cid, fut);
        }
    }

    /// Poll `fut` exactly once with a waker bound to `cid`. Returns `true`
    /// if it completed; the caller drops it in that case instead of
    /// stashing it back into `suspended`.
    fn poll_continuation(&self, cid: ContinuationId, fut: &mut LocalBoxFuture<'static, ()>) -> bool {
        let waker = ContinuationWaker::new(self.mailbox_tx.clone(), cid).into_waker();
        let mut cx = TaskContext::from_waker(&waker);
        Pin::new(fut).poll(&mut cx).is_ready()
    }

    async fn reply_error_if_expected(&self, header: &RouteHeader, code: ErrorCode) {
        if header.is_fire_and_forget() {
            return;
        }
        let sender = self.sender.bound_to(header.clone());
        reply_error(&sender, header, code).await;
    }

    async fn reply_success_if_expected(&self, header: &RouteHeader) {
        if header.is_fire_and_forget() {
            return;
        }
        let sender = self.sender.bound_to(header.clone());
        let _ = sender.reply(Packet::new(header.msg_id.clone(), &b""[..])).await;
    }
}

async fn reply_error(sender: &Sender, header: &RouteHeader, code: ErrorCode) {
    if header.is_fire_and_forget() {
        return;
    }
    let _ = sender.reply_error(code).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request_cache::RequestCache;
    use playhouse_proto::ids::ServiceId;
    use std::cell::RefCell as StdRefCell;
    use std::sync::Arc;

    struct EchoStage {
        dispatched: StdRefCell<Vec<String>>,
        ticks: StdRefCell<Vec<u32>>,
    }

    struct EchoActor;

    impl ActorHandler for EchoActor {
        fn on_authenticate(
            self: Rc<Self>,
            _sender: Sender,
            _auth_packet: Packet,
        ) -> LocalBoxFuture<'static, Result<(), RuntimeError>> {
            Box::pin(async { Ok(()) })
        }
    }

    impl StageHandler for EchoStage {
        fn new_actor(self: Rc<Self>) -> Rc<dyn ActorHandler> {
            Rc::new(EchoActor)
        }

        fn on_create(self: Rc<Self>, _sender: Sender, _init_packet: Packet) -> LocalBoxFuture<'static, Result<(), RuntimeError>> {
            Box::pin(async { Ok(()) })
        }

        fn on_dispatch(
            self: Rc<Self>,
            sender: Sender,
            _account_id: Option<AccountId>,
            packet: Packet,
        ) -> LocalBoxFuture<'static, Result<(), RuntimeError>> {
            Box::pin(async move {
                self.dispatched.borrow_mut().push(packet.msg_id().as_str().to_string());
                sender.reply(Packet::new(MsgId::new("EchoReply").expect("valid"), packet.payload().clone())).await?;
                Ok(())
            })
        }

        fn on_timer(self: Rc<Self>, sender: Sender, _timer_id: TimerId, tick: u32) -> LocalBoxFuture<'static, ()> {
            Box::pin(async move {
                self.ticks.borrow_mut().push(tick);
                if self.ticks.borrow().len() == 2 {
                    sender.close_stage();
                }
            })
        }
    }

    fn build_stage(handler: Rc<EchoStage>) -> (Stage, MailboxSender) {
        Stage::new(
            NodeId::new("play-01"),
            StageId::new(1),
            "echo-stage",
            handler,
            MsgId::new("Authenticate").expect("valid"),
            Arc::new(crate::stage_table::StageTable::new()),
            Arc::new(SessionRegistry::new()),
            Arc::new(MeshHub::new()),
            Arc::new(ServerInfoCenter::new()),
            RequestCache::new(),
            Duration::from_secs(5),
            Duration::from_secs(30),
            ComputePool::new(2),
        )
    }

    #[tokio::test]
    async fn count_timer_ticks_reach_on_timer_in_sequential_order() {
        let handler = Rc::new(EchoStage {
            dispatched: StdRefCell::new(Vec::new()),
            ticks: StdRefCell::new(Vec::new()),
        });
        let (stage, mailbox_tx) = build_stage(handler.clone());
        drop(mailbox_tx);

        stage.schedule_timer(
            Duration::from_millis(1),
            crate::timer::TimerSchedule::Count {
                interval: Duration::from_millis(1),
                count: 2,
            },
        );

        stage
            .run(creation_header(), Packet::new(MsgId::new("Init").expect("valid"), &b""[..]))
            .await
            .expect("stage creates");

        assert_eq!(handler.ticks.borrow().as_slice(), [1, 2]);
    }

    #[tokio::test]
    async fn authenticate_then_dispatch_invokes_handler_in_fifo_order() {
        let handler = Rc::new(EchoStage {
            dispatched: StdRefCell::new(Vec::new()),
            ticks: StdRefCell::new(Vec::new()),
        });
        let (stage, mailbox_tx) = build_stage(handler.clone());

        let auth_header = RouteHeader::request(
            NodeId::new("gateway"),
            MsgId::new("Authenticate").expect("valid"),
            ServiceId::new(1),
            StageId::new(1),
            SessionId::new(42),
        );
        mailbox_tx.post(StageMessage::Route(
            auth_header,
            Packet::new(MsgId::new("Authenticate").expect("valid"), &b""[..]),
        ));

        let mut dispatch_header = RouteHeader::request(
            NodeId::new("gateway"),
            MsgId::new("EchoRequest").expect("valid"),
            ServiceId::new(1),
            StageId::new(1),
            SessionId::new(42),
        );
        dispatch_header.msg_seq = playhouse_proto::ids::MsgSeq::from_raw(1);
        mailbox_tx.post(StageMessage::Route(
            dispatch_header,
            Packet::new(MsgId::new("EchoRequest").expect("valid"), &b"hi"[..]),
        ));
        mailbox_tx.post(StageMessage::Shutdown);
        drop(mailbox_tx);

        stage
            .run(creation_header(), Packet::new(MsgId::new("Init").expect("valid"), &b""[..]))
            .await
            .expect("stage creates");

        assert_eq!(handler.dispatched.borrow().as_slice(), ["EchoRequest"]);
    }

    #[tokio::test]
    async fn unauthenticated_non_system_message_is_rejected() {
        let handler = Rc::new(EchoStage {
            dispatched: StdRefCell::new(Vec::new()),
            ticks: StdRefCell::new(Vec::new()),
        });
        let (stage, mailbox_tx) = build_stage(handler.clone());

        let mut header = RouteHeader::request(
            NodeId::new("gateway"),
            MsgId::new("EchoRequest").expect("valid"),
            ServiceId::new(1),
            StageId::new(1),
            SessionId::new(7),
        );
        header.msg_seq = playhouse_proto::ids::MsgSeq::from_raw(1);
        mailbox_tx.post(StageMessage::Route(
            header,
            Packet::new(MsgId::new("EchoRequest").expect("valid"), &b""[..]),
        ));
        mailbox_tx.post(StageMessage::Shutdown);
        drop(mailbox_tx);

        stage
            .run(creation_header(), Packet::new(MsgId::new("Init").expect("valid"), &b""[..]))
            .await
            .expect("stage creates");

        assert!(handler.dispatched.borrow().is_empty());
    }

    #[tokio::test]
    async fn on_create_failure_short_circuits_before_executor_loop() {
        struct FailingStage;
        impl StageHandler for FailingStage {
            fn new_actor(self: Rc<Self>) -> Rc<dyn ActorHandler> {
                Rc::new(EchoActor)
            }
            fn on_create(self: Rc<Self>, _sender: Sender, _init_packet: Packet) -> LocalBoxFuture<'static, Result<(), RuntimeError>> {
                Box::pin(async { Err(RuntimeError::StageAlreadyExists(StageId::new(1))) })
            }
            fn on_dispatch(
                self: Rc<Self>,
                _sender: Sender,
                _account_id: Option<AccountId>,
                _packet: Packet,
            ) -> LocalBoxFuture<'static, Result<(), RuntimeError>> {
                Box::pin(async { Ok(()) })
            }
        }

        let (stage, _mailbox_tx) = Stage::new(
            NodeId::new("play-01"),
            StageId::new(1),
            "failing-stage",
            Rc::new(FailingStage),
            MsgId::new("Authenticate").expect("valid"),
            Arc::new(crate::stage_table::StageTable::new()),
            Arc::new(SessionRegistry::new()),
            Arc::new(MeshHub::new()),
            Arc::new(ServerInfoCenter::new()),
            RequestCache::new(),
            Duration::from_secs(5),
            Duration::from_secs(30),
            ComputePool::new(2),
        );

        let result = stage
            .run(creation_header(), Packet::new(MsgId::new("Init").expect("valid"), &b""[..]))
            .await;
        assert!(matches!(result, Err(RuntimeError::StageAlreadyExists(_))));
    }

    #[tokio::test]
    async fn idle_stage_with_no_actors_is_reapable_after_grace_elapses() {
        let handler = Rc::new(EchoStage {
            dispatched: StdRefCell::new(Vec::new()),
            ticks: StdRefCell::new(Vec::new()),
        });
        let (stage, mailbox_tx) = Stage::new(
            NodeId::new("play-01"),
            StageId::new(1),
            "echo-stage",
            handler,
            MsgId::new("Authenticate").expect("valid"),
            Arc::new(crate::stage_table::StageTable::new()),
            Arc::new(SessionRegistry::new()),
            Arc::new(MeshHub::new()),
            Arc::new(ServerInfoCenter::new()),
            RequestCache::new(),
            Duration::from_secs(5),
            Duration::from_millis(1),
            ComputePool::new(2),
        );
        drop(mailbox_tx);

        stage
            .run(creation_header(), Packet::new(MsgId::new("Init").expect("valid"), &b""[..]))
            .await
            .expect("stage creates");
    }

    fn creation_header() -> RouteHeader {
        RouteHeader::request(
            NodeId::new("gateway"),
            MsgId::new("Init").expect("valid"),
            ServiceId::new(1),
            StageId::new(1),
            SessionId::new(0),
        )
    }
}
