//! Stage/actor runtime for PlayHouse: per-stage mailbox dispatch, actor
//! lifecycle, the request cache, and the two dispatchers (Play, API) that
//! feed it from `playhouse-net`.
//!
//! This is the crate SPEC_FULL §2 calls "the hardest part" (§4.9): a stage
//! is single-threaded from the point of view of its own handlers, but
//! handlers may suspend on a cross-node or cross-stage request without
//! blocking the stage's mailbox drain. Everything else in this crate
//! exists to make that suspend/resume contract hold — the mailbox's
//! continuation waker, the request cache's stage-affine completion hook,
//! and the dispatchers that only ever hand work to a stage through its
//! mailbox, never by calling into it directly.

pub mod actor;
pub mod api_dispatcher;
pub mod compute_pool;
pub mod config;
pub mod error;
pub mod mailbox;
pub mod play_dispatcher;
pub mod request_cache;
pub mod sender;
pub mod stage;
pub mod stage_table;
pub mod stage_worker;
pub mod system_messages;
pub mod timer;

pub use actor::ActorHandler;
pub use api_dispatcher::{ApiDispatcher, ApiHandler};
pub use compute_pool::{ComputePool, ComputePoolError};
pub use config::StageRuntimeConfig;
pub use error::RuntimeError;
pub use mailbox::{ContinuationId, Mailbox, MailboxSender, StageMessage};
pub use play_dispatcher::{PlayDispatcher, PlayDispatcherConfig, StageFactory};
pub use request_cache::RequestCache;
pub use sender::Sender;
pub use stage::{Stage, StageHandler, StageLifecycle};
pub use stage_table::StageTable;
pub use stage_worker::StageWorkerPool;
pub use timer::{TimerHandle, TimerId, TimerRegistry, TimerSchedule};
