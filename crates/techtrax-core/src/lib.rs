//! Session and live-state layer between `techtrax-api` and its consumers.
//!
//! - **[`SessionContext`]** owns everything a signed-in session needs and is
//!   passed explicitly to whatever depends on it.
//!
//! - **[`TokenLifecycleManager`]** hands out access tokens, refreshing ahead
//!   of expiry. Concurrent callers share one refresh request; a failed
//!   refresh clears the [`CredentialStore`].
//!
//! - **[`RequestGateway`]** attaches the bearer to REST calls and retries a
//!   `401` exactly once after a refresh.
//!
//! - **[`RealtimeConnection`]** keeps the Socket.IO push channel alive,
//!   reconnects with backoff, swaps credentials when the token rotates and
//!   fans events out through scoped [`Subscription`]s.
//!
//! - **[`QueueSyncEngine`]** mirrors one queue: snapshot replacement,
//!   resync on server events, optimistic reordering with rollback, and a
//!   stats poll.

pub mod config;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod model;
pub mod queue;
pub mod realtime;
pub mod session;
pub mod token;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{SessionConfig, TlsVerification};
pub use credentials::{CredentialStore, MemoryCredentialStore};
pub use error::CoreError;
pub use gateway::RequestGateway;
pub use model::{ConnectionState, Session};
pub use queue::{
    EngineTasks, EventOutcome, LogEntry, LogLevel, QueueBackend, QueueCommand, QueueSource,
    QueueSyncEngine, QueueView,
};
pub use realtime::{EndReason, EventKind, PushEvent, RealtimeConnection, Subscription};
pub use session::SessionContext;
pub use token::TokenLifecycleManager;

// Wire types consumers need alongside the engine.
pub use techtrax_api::models::{
    ItemStatus, ItemType, QueueItem, QueueKey, QueueSnapshot, QueueStats, WorkHours,
};
