//! Stage timers (§4.9): repeat and count-bounded, always firing back into
//! the owning stage's own mailbox.
//!
//! Built around the common pattern of spawning a lightweight tokio task
//! per timeout, generalized here to arbitrary repeat/count schedules.

// Layer 1: Standard library imports
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

// Layer 2: Third-party crate imports
use tokio::task::JoinHandle;

// Layer 3: Internal module imports
use crate::mailbox::{MailboxSender, StageMessage};

/// Opaque handle identifying one scheduled timer within a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct TimerIdGen {
    next: AtomicU64,
}

impl TimerIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> TimerId {
        TimerId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// How a scheduled timer repeats.
#[derive(Debug, Clone, Copy)]
pub enum TimerSchedule {
    /// Fires indefinitely, every `interval`, until cancelled or the stage
    /// closes.
    Repeat { interval: Duration },

    /// Fires exactly `count` times, every `interval`.
    Count { interval: Duration, count: u32 },
}

/// A timer running on a background tokio task, posting `TimerTick` back
/// into its owning stage's mailbox on every firing. Dropping the handle
/// (or calling [`TimerHandle::cancel`]) stops future ticks; ticks already
/// posted are still delivered.
pub struct TimerHandle {
    id: TimerId,
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn id(&self) -> TimerId {
        self.id
    }

    pub fn cancel(self) {
        self.task.abort();
    }
}

/// Schedule a timer that posts [`StageMessage::TimerTick`] to `sender`
/// according to `schedule`, after an initial `initial_delay`. Each posted
/// tick carries its 1-based sequence number within this timer's own
/// schedule.
pub fn spawn_timer(
    sender: MailboxSender,
    id: TimerId,
    initial_delay: Duration,
    schedule: TimerSchedule,
) -> TimerHandle {
    let task = tokio::spawn(async move {
        tokio::time::sleep(initial_delay).await;
        if sender.is_closed() {
            return;
        }

        match schedule {
            TimerSchedule::Repeat { interval } => {
                let mut tick: u32 = 1;
                loop {
                    sender.post(StageMessage::TimerTick(id, tick));
                    if sender.is_closed() {
                        return;
                    }
                    tick = tick.wrapping_add(1);
                    tokio::time::sleep(interval).await;
                }
            }
            TimerSchedule::Count { interval, count } => {
                for tick in 1..=count {
                    sender.post(StageMessage::TimerTick(id, tick));
                    if sender.is_closed() {
                        return;
                    }
                    tokio::time::sleep(interval).await;
                }
            }
        }
    });

    TimerHandle { id, task }
}

/// Shares one stage's timer bookkeeping between its [`crate::stage::Stage`]
/// and every [`crate::sender::Sender`] clone handed to a handler
/// invocation — the same `Rc`-shared pattern `Sender` already uses for its
/// close-request flag, generalized to timer scheduling so `AsyncBlock`'s
/// sibling primitive is reachable from handler code instead of only from
/// inside the stage executor.
pub struct TimerRegistry {
    ids: TimerIdGen,
    handles: RefCell<HashMap<TimerId, TimerHandle>>,
    mailbox: MailboxSender,
}

impl TimerRegistry {
    pub fn new(mailbox: MailboxSender) -> Self {
        Self {
            ids: TimerIdGen::new(),
            handles: RefCell::new(HashMap::new()),
            mailbox,
        }
    }

    pub fn schedule(&self, initial_delay: Duration, schedule: TimerSchedule) -> TimerId {
        let id = self.ids.next();
        let handle = spawn_timer(self.mailbox.clone(), id, initial_delay, schedule);
        self.handles.borrow_mut().insert(id, handle);
        id
    }

    pub fn cancel(&self, id: TimerId) {
        if let Some(handle) = self.handles.borrow_mut().remove(&id) {
            handle.cancel();
        }
    }

    pub fn cancel_all(&self) {
        for (_, handle) in self.handles.borrow_mut().drain() {
            handle.cancel();
        }
    }
}
