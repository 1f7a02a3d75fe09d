//! The per-stage mailbox and the continuation-waker that lets a suspended
//! handler resume without ever blocking the stage's single dispatch loop.
//!
//! Shaped like a single-channel actor mailbox (one `mpsc` per actor),
//! generalized from one message type to the small closed set of events a
//! stage can react to, plus a [`std::task::Wake`] implementation this
//! crate had to build from scratch: ordinary actor mailboxes never suspend
//! mid-`handle_message`, so the suspend/resume primitive has no ready-made
//! counterpart to crib from.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Wake, Waker};

// Layer 2: Third-party crate imports
use tokio::sync::mpsc;

// Layer 3: Internal module imports
use playhouse_proto::header::RouteHeader;
use playhouse_proto::ids::{SessionId, StageId};
use playhouse_proto::packet::Packet;

/// Opaque handle identifying one suspended handler invocation within a
/// stage. Only unique within the owning stage, not process-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContinuationId(u64);

impl ContinuationId {
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

/// Hands out [`ContinuationId`]s for one stage. Owned by the stage's
/// executor loop; never shared across stages.
#[derive(Debug, Default)]
pub struct ContinuationIdGen {
    next: AtomicU64,
}

impl ContinuationIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> ContinuationId {
        ContinuationId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Everything a stage's single dispatch loop can be asked to do.
///
/// A stage never receives work any other way: the session manager,
/// request cache, and timers all communicate with a stage exclusively by
/// pushing one of these onto its mailbox, so "no two handlers run
/// concurrently in the same stage" reduces to "the mailbox has one
/// consumer".
#[derive(Debug)]
pub enum StageMessage {
    /// An inbound client or mesh packet to dispatch to `on_dispatch` (or,
    /// for `@Join@`-style envelopes, to the join/authenticate hooks).
    Route(RouteHeader, Packet),

    /// A reply packet correlated by the request cache to a pending
    /// outbound request originated from this stage.
    Reply(RouteHeader, Packet),

    /// Resume a previously-suspended handler invocation. Enqueued only by
    /// a [`ContinuationWaker`] — never constructed directly by caller
    /// code — so waking a future can never re-enter it from an arbitrary
    /// executor thread.
    Resume(ContinuationId),

    /// A repeating or counted timer firing (§4.9), carrying the 1-based
    /// tick number within this timer's own schedule.
    TimerTick(crate::timer::TimerId, u32),

    /// A joined session's transport went up or down (§4.9 `OnConnectionChanged`),
    /// posted by the Session Manager. A no-op if `sid` has no joined actor
    /// (e.g. the session disconnected before ever authenticating).
    ConnectionChanged(SessionId, bool),

    /// Tell the stage to begin closing: stop accepting new routes, let
    /// in-flight handlers finish, then transition to `Dead`.
    Shutdown,
}

/// Sending half of a stage's mailbox. Cheap to clone; every producer
/// (session manager, request cache, timer wheel, continuation waker)
/// holds one.
#[derive(Debug, Clone)]
pub struct MailboxSender {
    stage_id: StageId,
    tx: mpsc::UnboundedSender<StageMessage>,
}

impl MailboxSender {
    /// Enqueue a message, silently dropping it if the stage has already
    /// shut down and closed its receiver. A dead stage has nothing left to
    /// dispatch to, so this is not an error condition for the sender.
    pub fn post(&self, message: StageMessage) {
        let _ = self.tx.send(message);
    }

    pub fn stage_id(&self) -> StageId {
        self.stage_id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of a stage's mailbox, owned by the stage's executor
/// task.
#[derive(Debug)]
pub struct Mailbox {
    stage_id: StageId,
    rx: mpsc::UnboundedReceiver<StageMessage>,
}

impl Mailbox {
    pub fn new(stage_id: StageId) -> (Self, MailboxSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { stage_id, rx }, MailboxSender { stage_id, tx })
    }

    /// Wait for the next message. Returns `None` once every
    /// [`MailboxSender`] has been dropped and the queue has drained.
    pub async fn recv(&mut self) -> Option<StageMessage> {
        self.rx.recv().await
    }

    pub fn stage_id(&self) -> StageId {
        self.stage_id
    }
}

/// A [`Wake`] implementation that, instead of polling the future it backs,
/// posts `Resume(continuation_id)` back onto the owning stage's own
/// mailbox.
///
/// This is the mechanism that satisfies "suspension never stalls the
/// stage": the executor polls a handler's future exactly once per
/// dispatch-loop iteration with a fresh `ContinuationWaker`. If the future
/// returns `Pending`, the executor stashes it (keyed by `continuation_id`)
/// and moves straight on to the next mailbox message — it is only ever
/// re-polled when the matching `Resume` message comes back around,
/// however many stage turns later that ends up being. Because the waker's
/// `wake()` does nothing but send a message into a channel, it may safely
/// be called from any thread (a `RequestCache` timeout sweeper, a mesh
/// link's read loop, a `tokio::time::sleep` completing on a worker
/// thread) without ever touching the future itself off the stage task.
pub struct ContinuationWaker {
    sender: MailboxSender,
    continuation_id: ContinuationId,
}

impl ContinuationWaker {
    pub fn new(sender: MailboxSender, continuation_id: ContinuationId) -> Self {
        Self {
            sender,
            continuation_id,
        }
    }

    pub fn into_waker(self) -> Waker {
        Waker::from(Arc::new(self))
    }
}

impl Wake for ContinuationWaker {
    fn wake(self: Arc<Self>) {
        self.sender.post(StageMessage::Resume(self.continuation_id));
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.sender.post(StageMessage::Resume(self.continuation_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    fn sample_header() -> RouteHeader {
        RouteHeader::request(
            playhouse_proto::ids::NodeId::new("play-01"),
            playhouse_proto::ids::MsgId::new("Move").expect("valid"),
            playhouse_proto::ids::ServiceId::new(1),
            StageId::new(10),
            playhouse_proto::ids::SessionId::new(1),
        )
    }

    #[tokio::test]
    async fn mailbox_delivers_in_fifo_order() {
        let (mut mailbox, sender) = Mailbox::new(StageId::new(1));
        sender.post(StageMessage::Route(sample_header(), Packet::new(playhouse_proto::ids::MsgId::new("A").unwrap(), &b""[..])));
        sender.post(StageMessage::Shutdown);

        assert!(matches!(mailbox.recv().await, Some(StageMessage::Route(_, _))));
        assert!(matches!(mailbox.recv().await, Some(StageMessage::Shutdown)));
    }

    #[tokio::test]
    async fn dropping_all_senders_closes_the_mailbox() {
        let (mut mailbox, sender) = Mailbox::new(StageId::new(1));
        drop(sender);
        assert!(mailbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn waking_continuation_enqueues_resume_not_a_poll() {
        let (mut mailbox, sender) = Mailbox::new(StageId::new(1));
        let id_gen = ContinuationIdGen::new();
        let cid = id_gen.next();

        let waker = ContinuationWaker::new(sender, cid).into_waker();
        waker.wake_by_ref();

        match mailbox.recv().await {
            Some(StageMessage::Resume(resumed)) => assert_eq!(resumed, cid),
            other => panic!("expected Resume, got {other:?}"),
        }
    }

    /// A future that is pending exactly once, then ready. Stands in for a
    /// suspended handler awaiting a cross-node reply.
    struct PendingOnce {
        polled: bool,
    }

    impl Future for PendingOnce {
        type Output = u32;

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            if self.polled {
                Poll::Ready(42)
            } else {
                self.polled = true;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }

    #[tokio::test]
    async fn single_poll_pattern_resumes_on_next_mailbox_turn() {
        let (mut mailbox, sender) = Mailbox::new(StageId::new(1));
        let id_gen = ContinuationIdGen::new();
        let cid = id_gen.next();

        let waker = ContinuationWaker::new(sender.clone(), cid).into_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = PendingOnce { polled: false };

        assert_eq!(Pin::new(&mut fut).poll(&mut cx), Poll::Pending);

        let resumed = match mailbox.recv().await {
            Some(StageMessage::Resume(resumed)) => resumed,
            other => panic!("expected Resume, got {other:?}"),
        };
        assert_eq!(resumed, cid);

        assert_eq!(Pin::new(&mut fut).poll(&mut cx), Poll::Ready(42));
    }
}
