//! Process-wide request/reply correlation (§4.4), keyed by the global
//! monotonic [`MsgSeq`].
//!
//! Shaped like a `DashMap<Key, oneshot::Sender<Reply>>` pending-request
//! table, generalized from a one-shot-channel waiter to the two waiter
//! shapes §4.9's Sender API needs: a promise (`oneshot::Sender`) for
//! `RequestAsync`'s suspend form, or a callback plus a "post back to stage
//! X" hook for its callback form.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::warn;

// Layer 3: Internal module imports
use playhouse_proto::ids::MsgSeq;
use playhouse_proto::packet::Packet;

use crate::error::RuntimeError;
use crate::mailbox::{MailboxSender, StageMessage};

/// The two shapes a pending request's completion can take (§4.9 "Sender /
/// Link API ... both callback form ... and promise form").
enum Waiter {
    /// `RequestAsync`'s promise form: completion resolves a future the
    /// suspended handler is polling.
    Promise(oneshot::Sender<Result<Packet, RuntimeError>>),

    /// The callback form: completion is posted back into the originating
    /// stage's mailbox as a `Reply` message, to be matched up with the
    /// continuation that registered it.
    PostToStage {
        sender: MailboxSender,
        header: playhouse_proto::header::RouteHeader,
    },
}

struct Entry {
    waiter: Waiter,
    deadline: Instant,
}

/// Shared, process-wide table of outstanding outbound requests.
///
/// Cloning is cheap (`Arc`-backed); every stage and dispatcher holds one.
#[derive(Clone)]
pub struct RequestCache {
    inner: Arc<RequestCacheInner>,
}

struct RequestCacheInner {
    entries: DashMap<MsgSeq, Entry>,
    next_seq: AtomicU16,
}

impl Default for RequestCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RequestCacheInner {
                entries: DashMap::new(),
                next_seq: AtomicU16::new(0),
            }),
        }
    }

    /// Allocate the next process-wide `msgSeq`, skipping the
    /// fire-and-forget sentinel `0` on wraparound (§3 "Reply Object").
    pub fn next_seq(&self) -> MsgSeq {
        let mut current = self.inner.next_seq.load(Ordering::Relaxed);
        loop {
            let (seq, next_raw) = MsgSeq::next(current);
            match self.inner.next_seq.compare_exchange_weak(
                current,
                next_raw,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return seq,
                Err(observed) => current = observed,
            }
        }
    }

    /// Register a promise-form waiter. Rejects a duplicate `seq`
    /// (§4.4 "idempotent; rejects duplicate seq").
    pub fn register_promise(
        &self,
        seq: MsgSeq,
        timeout: Duration,
    ) -> Result<oneshot::Receiver<Result<Packet, RuntimeError>>, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.insert(seq, Waiter::Promise(tx), timeout)?;
        Ok(rx)
    }

    /// Register a callback-form waiter: completion (success, error, or
    /// timeout) is posted back into `sender`'s mailbox as
    /// `StageMessage::Reply`.
    pub fn register_post_to_stage(
        &self,
        seq: MsgSeq,
        sender: MailboxSender,
        header: playhouse_proto::header::RouteHeader,
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        self.insert(seq, Waiter::PostToStage { sender, header }, timeout)
    }

    fn insert(&self, seq: MsgSeq, waiter: Waiter, timeout: Duration) -> Result<(), RuntimeError> {
        let entry = Entry {
            waiter,
            deadline: Instant::now() + timeout,
        };
        match self.inner.entries.entry(seq) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(RuntimeError::DuplicateSeq(seq)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    /// Fulfill a pending request with a reply packet. A no-op if `seq` is
    /// absent — late replies (after timeout or cancellation) are dropped
    /// silently (§4.4 "no-op if absent").
    pub fn complete(&self, seq: MsgSeq, packet: Packet) {
        let Some((_, entry)) = self.inner.entries.remove(&seq) else {
            return;
        };
        self.resolve(entry.waiter, Ok(packet));
    }

    /// Fail every outstanding entry with `ConnectionClosed` (§4.4
    /// `failAll`), used when a mesh peer connection is lost.
    pub fn fail_all(&self) {
        let seqs: Vec<MsgSeq> = self.inner.entries.iter().map(|e| *e.key()).collect();
        for seq in seqs {
            if let Some((_, entry)) = self.inner.entries.remove(&seq) {
                self.resolve(entry.waiter, Err(RuntimeError::ConnectionClosed));
            }
        }
    }

    /// Cancel every outstanding entry (stage close cancels its in-flight
    /// outbound requests locally; late replies are dropped per §5).
    pub fn cancel_all(&self) {
        let seqs: Vec<MsgSeq> = self.inner.entries.iter().map(|e| *e.key()).collect();
        for seq in seqs {
            if let Some((_, entry)) = self.inner.entries.remove(&seq) {
                self.resolve(entry.waiter, Err(RuntimeError::Cancelled));
            }
        }
    }

    /// Scan for and fail entries past their deadline with
    /// `RequestTimeout`. Intended to be driven by a background sweeper
    /// task (§4.4 "Background sweeper").
    pub fn sweep_timeouts(&self) {
        let now = Instant::now();
        let expired: Vec<MsgSeq> = self
            .inner
            .entries
            .iter()
            .filter(|e| e.value().deadline <= now)
            .map(|e| *e.key())
            .collect();

        for seq in expired {
            if let Some((_, entry)) = self.inner.entries.remove(&seq) {
                self.resolve(entry.waiter, Err(RuntimeError::RequestTimeout(seq)));
            }
        }
    }

    fn resolve(&self, waiter: Waiter, result: Result<Packet, RuntimeError>) {
        match waiter {
            Waiter::Promise(tx) => {
                let _ = tx.send(result);
            }
            Waiter::PostToStage { sender, header } => match result {
                Ok(packet) => sender.post(StageMessage::Reply(header, packet)),
                Err(err) => {
                    let packet = Packet::error_reply(header.msg_id.clone(), header.msg_seq, err.as_error_code());
                    sender.post(StageMessage::Reply(header, packet));
                }
            },
        }
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }
}

/// Spawn a background task that periodically calls
/// [`RequestCache::sweep_timeouts`]. Runs until the cache and every handle
/// derived from it are dropped — the task itself holds no strong
/// reference that would keep the cache alive past that point beyond its
/// own loop body, so it simply outlives the process like any other
/// fire-and-forget tokio task tied to shutdown via `JoinHandle::abort`.
pub fn spawn_sweeper(cache: RequestCache, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            cache.sweep_timeouts();
            if cache.is_empty() {
                continue;
            }
            warn!(pending = cache.len(), "request cache sweep found pending entries");
        }
    })
}
