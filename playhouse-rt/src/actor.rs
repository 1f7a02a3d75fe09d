//! The per-session actor lifecycle hooks (§4.9 "Actor lifecycle"), run
//! within the owning stage's executor — never off it.
//!
//! Handlers return a [`LocalBoxFuture`] rather than using `#[async_trait]`:
//! a stage's executor must be able to poll a handler's future once per
//! mailbox turn and stash it between turns (§4.9's suspend/resume
//! contract), which means the future cannot borrow `&mut self` for its
//! whole lifetime — it has to own an `Rc` clone instead. Mutable actor
//! state therefore lives behind the implementor's own interior
//! mutability, the same shape `Rc<RefCell<_>>` takes in single-threaded
//! event-loop code throughout the ecosystem.

// Layer 1: Standard library imports
use std::rc::Rc;

// Layer 2: Third-party crate imports
use futures::future::LocalBoxFuture;

// Layer 3: Internal module imports
use playhouse_proto::packet::Packet;

use crate::error::RuntimeError;
use crate::sender::Sender;

/// Hooks fired for one authenticated session's actor, all invoked on the
/// owning stage's single executor (§4.9's lifecycle table).
///
/// An actor's lifetime is bounded by its owning stage: it is created on
/// `OnAuthenticate` success and removed by `OnDestroy` when the stage
/// reaps it or closes (§3 "Actor").
pub trait ActorHandler: 'static {
    /// First client message of a session. Failure discards the actor and
    /// the reply carries the error (§4.9).
    fn on_authenticate(
        self: Rc<Self>,
        sender: Sender,
        auth_packet: Packet,
    ) -> LocalBoxFuture<'static, Result<(), RuntimeError>>;

    /// Runs after a successful `on_authenticate`. Cannot fail; failures
    /// here are a logic error in the handler, not a rejected session.
    fn on_post_authenticate(self: Rc<Self>, sender: Sender) -> LocalBoxFuture<'static, ()> {
        let _ = sender;
        Box::pin(async {})
    }

    /// Session transport up/down transition. The actor persists across
    /// disconnects until the stage reaps it or closes.
    fn on_connection_changed(self: Rc<Self>, sender: Sender, connected: bool) -> LocalBoxFuture<'static, ()> {
        let _ = (sender, connected);
        Box::pin(async {})
    }

    /// Actor removal, either by reap or stage teardown. Cannot fail.
    fn on_destroy(self: Rc<Self>, sender: Sender) -> LocalBoxFuture<'static, ()> {
        let _ = sender;
        Box::pin(async {})
    }
}
