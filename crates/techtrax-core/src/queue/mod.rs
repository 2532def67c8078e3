// ── Queue synchronization ──

mod backend;
mod command;
mod engine;
mod view;

pub use backend::{QueueBackend, QueueSource};
pub use command::QueueCommand;
pub use engine::{
    EVENT_NOTIFICATION, EngineTasks, EventOutcome, LogEntry, LogLevel, QueueSyncEngine,
    RESYNC_EVENTS, STATS_EVENTS,
};
pub use view::QueueView;
