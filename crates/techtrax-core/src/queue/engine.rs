// ── Queue synchronization engine ──
//
// Keeps one local queue view in step with the backend. Every server event
// triggers a full resync; reorders are applied optimistically and rolled
// back to the last confirmed snapshot on failure.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use techtrax_api::models::{ItemType, QueueKey, QueueSnapshot, QueueStats, ReorderEntry, WorkHours};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backend::{QueueBackend, QueueSource};
use super::command::QueueCommand;
use super::view::{QueueView, apply_order, reindex_waiting};
use crate::error::CoreError;
use crate::model::ConnectionState;
use crate::realtime::{EVENT_CONNECTED, PushEvent, RealtimeConnection, Subscription};

const LOG_CHANNEL_SIZE: usize = 64;

/// Events that replace local state with a fresh snapshot.
pub const RESYNC_EVENTS: &[&str] = &[
    "queue:created",
    "queue:patientAdded",
    "queue:reordered",
    "queue:manualReorder",
    "queue:patientCalled",
    "queue:patientDone",
    "queue:patientCancelled",
    "doctor:clockIn",
    "doctor:clockOut",
    "queue:autoUnlocked",
];

/// Events that refresh the stats panel.
pub const STATS_EVENTS: &[&str] = &["queue:statusUpdate", "queue:patientDone", "analytics:update"];

pub const EVENT_NOTIFICATION: &str = "notification:new";

// ── Activity log ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// What [`QueueSyncEngine::apply_server_event`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Unknown name, or the event concerns another queue or doctor.
    Ignored,
    Resynced,
    StatsRefreshed,
    /// Resync and stats refresh both ran.
    ResyncedWithStats,
    /// Notification recorded in the activity log.
    Notified,
}

#[derive(Debug, Clone)]
struct PendingEdit {
    proposed_order: Vec<String>,
    version_at_edit: u64,
}

#[derive(Default)]
struct Confirmed {
    snapshot: Option<QueueSnapshot>,
    /// Sequence number of the result that produced `snapshot`.
    applied_seq: u64,
    pending: Option<PendingEdit>,
}

// ── QueueSyncEngine ──────────────────────────────────────────────────

/// Local mirror of one queue.
///
/// Cheaply cloneable; clones share state.
pub struct QueueSyncEngine<B> {
    inner: Arc<EngineInner<B>>,
}

impl<B> Clone for QueueSyncEngine<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct EngineInner<B> {
    backend: B,
    source: Mutex<QueueSource>,
    /// Signed-in doctor, for filtering `doctorId` events.
    identity: Mutex<Option<String>>,
    confirmed: Mutex<Confirmed>,
    view: watch::Sender<Arc<QueueView>>,
    stats: watch::Sender<Option<QueueStats>>,
    log: broadcast::Sender<LogEntry>,
    /// Serializes fetches; `fetch_requested`/`fetch_covered` coalesce them.
    fetch_lock: tokio::sync::Mutex<()>,
    fetch_requested: AtomicU64,
    fetch_covered: AtomicU64,
    /// Issue order of backend calls whose result replaces the snapshot.
    seq: AtomicU64,
    version: AtomicU64,
    reorder_lock: tokio::sync::Mutex<()>,
}

impl<B: QueueBackend> QueueSyncEngine<B> {
    /// Engine following the signed-in doctor's queue.
    pub fn new(backend: B) -> Self {
        Self::with_source(backend, QueueSource::MyQueue)
    }

    pub fn with_source(backend: B, source: QueueSource) -> Self {
        let (view, _) = watch::channel(Arc::new(QueueView::default()));
        let (stats, _) = watch::channel(None);
        let (log, _) = broadcast::channel(LOG_CHANNEL_SIZE);
        Self {
            inner: Arc::new(EngineInner {
                backend,
                source: Mutex::new(source),
                identity: Mutex::new(None),
                confirmed: Mutex::new(Confirmed::default()),
                view,
                stats,
                log,
                fetch_lock: tokio::sync::Mutex::new(()),
                fetch_requested: AtomicU64::new(0),
                fetch_covered: AtomicU64::new(0),
                seq: AtomicU64::new(0),
                version: AtomicU64::new(0),
                reorder_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    // ── Observation ──────────────────────────────────────────────────

    /// The current view.
    pub fn view(&self) -> Arc<QueueView> {
        self.inner.view.borrow().clone()
    }

    pub fn view_changes(&self) -> watch::Receiver<Arc<QueueView>> {
        self.inner.view.subscribe()
    }

    /// Stream of views, starting with the current one.
    pub fn view_stream(&self) -> WatchStream<Arc<QueueView>> {
        WatchStream::new(self.inner.view.subscribe())
    }

    pub fn stats(&self) -> Option<QueueStats> {
        self.inner.stats.borrow().clone()
    }

    pub fn stats_changes(&self) -> watch::Receiver<Option<QueueStats>> {
        self.inner.stats.subscribe()
    }

    /// Subscribe to the activity log. Entries published before the call
    /// are not replayed.
    pub fn logs(&self) -> broadcast::Receiver<LogEntry> {
        self.inner.log.subscribe()
    }

    pub fn source(&self) -> QueueSource {
        lock(&self.inner.source).clone()
    }

    pub fn set_identity(&self, doctor_id: Option<String>) {
        *lock(&self.inner.identity) = doctor_id;
    }

    /// Order of the reorder awaiting confirmation, if any.
    pub fn pending_order(&self) -> Option<Vec<String>> {
        lock(&self.inner.confirmed)
            .pending
            .as_ref()
            .map(|p| p.proposed_order.clone())
    }

    // ── Snapshot loading ─────────────────────────────────────────────

    /// Fetch the bound queue and replace local state wholesale.
    ///
    /// Calls that arrive while a fetch is in flight share one follow-up
    /// fetch. A "no queue" answer clears the view; a transport failure
    /// keeps it and is returned.
    pub async fn load_snapshot(&self) -> Result<Arc<QueueView>, CoreError> {
        let inner = &self.inner;
        let ticket = inner.fetch_requested.fetch_add(1, Ordering::AcqRel) + 1;
        let _guard = inner.fetch_lock.lock().await;
        if inner.fetch_covered.load(Ordering::Acquire) >= ticket {
            return Ok(self.view());
        }

        let covers = inner.fetch_requested.load(Ordering::Acquire);
        let issued = self.next_seq();
        let source = self.source();
        let result = inner.backend.fetch(&source).await;
        // waiters only share a fetch that succeeded; after a failure they try again
        if result.is_ok() {
            inner.fetch_covered.store(covers, Ordering::Release);
        }

        match result {
            Ok(Some(snapshot)) => {
                debug!(queue = %snapshot.id, items = snapshot.items.len(), "snapshot loaded");
                self.apply_confirmed(Some(snapshot), issued);
            }
            Ok(None) => {
                if self.apply_confirmed(None, issued) {
                    self.inner.stats.send_replace(None);
                    self.note(LogLevel::Info, "No queue for today");
                }
            }
            Err(e) => {
                warn!(error = %e, "snapshot fetch failed");
                self.note(LogLevel::Error, format!("Failed to load queue: {e}"));
                return Err(e);
            }
        }
        Ok(self.view())
    }

    /// Look up a queue by key and follow it from now on.
    pub async fn load_queue(&self, key: QueueKey) -> Result<Arc<QueueView>, CoreError> {
        *lock(&self.inner.source) = QueueSource::Key(key);
        self.load_snapshot().await
    }

    pub async fn refresh_stats(&self) -> Result<Option<QueueStats>, CoreError> {
        let Some(queue_id) = self.view().queue_id().map(str::to_owned) else {
            return Ok(None);
        };
        let stats = self.inner.backend.stats(&queue_id).await?;
        self.inner.stats.send_replace(Some(stats.clone()));
        Ok(Some(stats))
    }

    // ── Server events ────────────────────────────────────────────────

    pub async fn apply_server_event(&self, event: &PushEvent) -> Result<EventOutcome, CoreError> {
        let name = event.name.as_str();
        if name == EVENT_NOTIFICATION {
            return Ok(self.record_notification(event));
        }

        let resync = RESYNC_EVENTS.contains(&name);
        let stats = STATS_EVENTS.contains(&name);
        if !(resync || stats) || !self.is_relevant(event) {
            return Ok(EventOutcome::Ignored);
        }

        if let Some(message) = describe_event(event) {
            self.note(LogLevel::Info, message);
        }
        if resync {
            self.load_snapshot().await?;
        }
        if stats {
            self.refresh_stats().await?;
        }

        Ok(match (resync, stats) {
            (true, true) => EventOutcome::ResyncedWithStats,
            (true, false) => EventOutcome::Resynced,
            _ => EventOutcome::StatsRefreshed,
        })
    }

    fn is_relevant(&self, event: &PushEvent) -> bool {
        let view = self.view();
        if let Some(queue_id) = event.str_field("queueId") {
            return view.queue_id().is_none_or(|loaded| loaded == queue_id);
        }
        if let Some(doctor_id) = event.str_field("doctorId") {
            let mine = lock(&self.inner.identity)
                .clone()
                .or_else(|| view.snapshot.as_ref().map(|s| s.doctor_id.clone()));
            return mine.is_none_or(|mine| mine == doctor_id);
        }
        true
    }

    fn record_notification(&self, event: &PushEvent) -> EventOutcome {
        let kind = event.str_field("type").unwrap_or_default();
        let message = event.str_field("message").unwrap_or_default();
        let (level, text) = match kind {
            "your_turn" => (LogLevel::Success, format!("Your turn: {message}")),
            "queue_checked_in" => (LogLevel::Info, format!("Checked in: {message}")),
            "queue_position_update" => (LogLevel::Info, format!("Position update: {message}")),
            _ => (LogLevel::Info, format!("Notification: {message}")),
        };
        self.note(level, text);
        EventOutcome::Notified
    }

    // ── Reordering ───────────────────────────────────────────────────

    /// Propose a new waiting order. Applied locally at once, then
    /// confirmed or rolled back by the server's answer.
    pub async fn propose_reorder(&self, ordered_ids: Vec<String>) -> Result<Arc<QueueView>, CoreError> {
        let _serial = self.inner.reorder_lock.lock().await;
        self.submit_reorder(ordered_ids).await
    }

    /// Drag the waiting item at `from` to index `to`.
    pub async fn move_waiting(&self, from: usize, to: usize) -> Result<Arc<QueueView>, CoreError> {
        let _serial = self.inner.reorder_lock.lock().await;
        let mut ids = self.view().waiting_ids();
        if from >= ids.len() || to >= ids.len() {
            return Err(CoreError::ValidationFailed {
                message: format!("index out of range (waiting list has {} items)", ids.len()),
            });
        }
        if from == to {
            return Ok(self.view());
        }
        let moved = ids.remove(from);
        ids.insert(to, moved);
        self.submit_reorder(ids).await
    }

    async fn submit_reorder(&self, ordered_ids: Vec<String>) -> Result<Arc<QueueView>, CoreError> {
        let (command, optimistic) = {
            let mut confirmed = lock(&self.inner.confirmed);
            let base = confirmed.snapshot.clone().ok_or(CoreError::NoQueue)?;
            let current = QueueView {
                snapshot: Some(base.clone()),
                ..QueueView::default()
            }
            .waiting_ids();
            validate_permutation(&current, &ordered_ids)?;
            if current == ordered_ids {
                return Ok(self.view());
            }

            let mut optimistic = base.clone();
            apply_order(&mut optimistic, &ordered_ids);
            let command = QueueCommand::Reorder {
                key: base.key(),
                new_order: (1u32..)
                    .zip(&ordered_ids)
                    .map(|(order, id)| ReorderEntry {
                        id: id.clone(),
                        order,
                    })
                    .collect(),
            };
            confirmed.pending = Some(PendingEdit {
                proposed_order: ordered_ids,
                version_at_edit: self.inner.view.borrow().version,
            });
            (command, optimistic)
        };
        self.publish(Some(optimistic), true);

        let issued = self.next_seq();
        match self.inner.backend.command(&command).await {
            Ok(snapshot) => {
                self.apply_confirmed(Some(snapshot), issued);
                self.note(LogLevel::Success, "Queue reordered");
                Ok(self.view())
            }
            Err(e) => {
                self.rollback();
                warn!(error = %e, "reorder failed, restored confirmed order");
                self.note(LogLevel::Error, format!("Reorder failed: {e}"));
                self.resync_quietly().await;
                Err(e)
            }
        }
    }

    fn rollback(&self) {
        let mut confirmed = lock(&self.inner.confirmed);
        if let Some(edit) = confirmed.pending.take() {
            debug!(
                version = edit.version_at_edit,
                ids = edit.proposed_order.len(),
                "discarding optimistic order"
            );
        }
        let snapshot = confirmed.snapshot.clone();
        drop(confirmed);
        self.publish(snapshot, false);
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub async fn clock_in(&self) -> Result<Arc<QueueView>, CoreError> {
        self.run_command(QueueCommand::ClockIn).await
    }

    pub async fn clock_out(&self) -> Result<Arc<QueueView>, CoreError> {
        let key = self.current_key()?;
        self.run_command(QueueCommand::ClockOut { key }).await
    }

    /// Build a queue from the day's appointments and follow it.
    pub async fn create_from_appointments(
        &self,
        key: QueueKey,
        work_hours: WorkHours,
    ) -> Result<Arc<QueueView>, CoreError> {
        *lock(&self.inner.source) = QueueSource::Key(key.clone());
        self.run_command(QueueCommand::CreateFromAppointments { key, work_hours })
            .await
    }

    pub async fn check_in(
        &self,
        patient_id: &str,
        item_type: ItemType,
    ) -> Result<Arc<QueueView>, CoreError> {
        let key = self.current_key()?;
        self.run_command(QueueCommand::CheckIn {
            key,
            patient_id: patient_id.to_owned(),
            item_type,
        })
        .await
    }

    pub async fn call(&self, item_id: &str) -> Result<Arc<QueueView>, CoreError> {
        let key = self.current_key()?;
        self.run_command(QueueCommand::Call {
            key,
            item_id: item_id.to_owned(),
        })
        .await
    }

    pub async fn serve(&self, item_id: &str) -> Result<Arc<QueueView>, CoreError> {
        let key = self.current_key()?;
        self.run_command(QueueCommand::Serve {
            key,
            item_id: item_id.to_owned(),
        })
        .await
    }

    pub async fn finish(&self, item_id: &str) -> Result<Arc<QueueView>, CoreError> {
        let key = self.current_key()?;
        self.run_command(QueueCommand::Finish {
            key,
            item_id: item_id.to_owned(),
        })
        .await
    }

    pub async fn cancel(&self, item_id: &str, reason: Option<String>) -> Result<Arc<QueueView>, CoreError> {
        let key = self.current_key()?;
        self.run_command(QueueCommand::Cancel {
            key,
            item_id: item_id.to_owned(),
            reason,
        })
        .await
    }

    async fn run_command(&self, command: QueueCommand) -> Result<Arc<QueueView>, CoreError> {
        let issued = self.next_seq();
        debug!(command = command.label(), endpoint = command.endpoint(), "queue command");
        match self.inner.backend.command(&command).await {
            Ok(snapshot) => {
                self.apply_confirmed(Some(snapshot), issued);
                self.note(LogLevel::Success, format!("{} succeeded", capitalize(command.label())));
                Ok(self.view())
            }
            Err(CoreError::Rejected { message }) => {
                self.note(LogLevel::Error, message.clone());
                self.resync_quietly().await;
                Err(CoreError::Rejected { message })
            }
            Err(e) => {
                self.note(LogLevel::Error, format!("{} failed: {e}", capitalize(command.label())));
                Err(e)
            }
        }
    }

    fn current_key(&self) -> Result<QueueKey, CoreError> {
        if let Some(snapshot) = lock(&self.inner.confirmed).snapshot.as_ref() {
            return Ok(snapshot.key());
        }
        match self.source() {
            QueueSource::Key(key) => Ok(key),
            QueueSource::MyQueue => Err(CoreError::NoQueue),
        }
    }

    // ── Background tasks ─────────────────────────────────────────────

    /// Follow `connection`: resync on every relevant event and whenever the
    /// channel (re)connects, and poll stats every `stats_interval` while a
    /// queue is loaded. Zero disables polling.
    pub fn run(&self, connection: &RealtimeConnection, stats_interval: Duration) -> EngineTasks {
        let cancel = CancellationToken::new();
        let names: HashSet<&str> = RESYNC_EVENTS
            .iter()
            .chain(STATS_EVENTS)
            .copied()
            .chain([EVENT_NOTIFICATION, EVENT_CONNECTED])
            .collect();
        let events = connection.subscribe(names);

        let mut handles = Vec::new();
        handles.push(tokio::spawn(event_pump(
            self.clone(),
            connection.clone(),
            events,
            cancel.clone(),
        )));
        if !stats_interval.is_zero() {
            handles.push(tokio::spawn(stats_poll(self.clone(), stats_interval, cancel.clone())));
        }
        EngineTasks { cancel, handles }
    }

    // ── Internals ────────────────────────────────────────────────────

    /// Replace the confirmed snapshot unless a later-issued result has
    /// already been applied. Returns whether it was applied.
    fn apply_confirmed(&self, snapshot: Option<QueueSnapshot>, issued: u64) -> bool {
        let mut confirmed = lock(&self.inner.confirmed);
        if issued < confirmed.applied_seq {
            debug!(issued, applied = confirmed.applied_seq, "discarding stale snapshot");
            return false;
        }
        let snapshot = snapshot.map(|mut s| {
            reindex_waiting(&mut s);
            s
        });
        confirmed.applied_seq = issued;
        confirmed.snapshot.clone_from(&snapshot);
        confirmed.pending = None;
        drop(confirmed);
        self.publish(snapshot, false);
        true
    }

    fn publish(&self, snapshot: Option<QueueSnapshot>, optimistic: bool) {
        let version = self.inner.version.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.view.send_replace(Arc::new(QueueView {
            snapshot,
            version,
            optimistic,
        }));
    }

    async fn resync_quietly(&self) {
        if let Err(e) = self.load_snapshot().await {
            warn!(error = %e, "resync after failure also failed");
        }
    }

    fn next_seq(&self) -> u64 {
        self.inner.seq.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn note(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry {
            time: Utc::now(),
            level,
            message: message.into(),
        };
        // no receivers is fine
        let _ = self.inner.log.send(entry);
    }
}

/// Handles for the tasks spawned by [`QueueSyncEngine::run`].
pub struct EngineTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl EngineTasks {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the tasks and wait for them.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn event_pump<B: QueueBackend>(
    engine: QueueSyncEngine<B>,
    connection: RealtimeConnection,
    mut events: Subscription,
    cancel: CancellationToken,
) {
    // the `connected` event may have gone out before we subscribed
    if connection.state() == ConnectionState::Connected {
        sync_on_connect(&engine, &connection).await;
    }

    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            debug!("event stream ended");
            break;
        };

        if event.name == EVENT_CONNECTED {
            sync_on_connect(&engine, &connection).await;
            continue;
        }

        if let Err(e) = engine.apply_server_event(&event).await {
            warn!(event = %event.name, error = %e, "event handling failed");
        }
    }
}

async fn sync_on_connect<B: QueueBackend>(engine: &QueueSyncEngine<B>, connection: &RealtimeConnection) {
    engine.set_identity(connection.session().map(|s| s.user_id));
    info!("channel connected, resyncing queue");
    if let Err(e) = engine.load_snapshot().await {
        warn!(error = %e, "resync on connect failed");
    }
}

async fn stats_poll<B: QueueBackend>(engine: QueueSyncEngine<B>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                if !engine.view().is_loaded() {
                    continue;
                }
                if let Err(e) = engine.refresh_stats().await {
                    debug!(error = %e, "stats poll failed");
                }
            }
        }
    }
}

fn validate_permutation(current: &[String], proposed: &[String]) -> Result<(), CoreError> {
    let unique: HashSet<&str> = proposed.iter().map(String::as_str).collect();
    if unique.len() != proposed.len() {
        return Err(CoreError::ValidationFailed {
            message: "duplicate ids in proposed order".into(),
        });
    }
    let expected: HashSet<&str> = current.iter().map(String::as_str).collect();
    if unique != expected {
        return Err(CoreError::ValidationFailed {
            message: "proposed order must contain exactly the waiting items".into(),
        });
    }
    Ok(())
}

fn describe_event(event: &PushEvent) -> Option<String> {
    let patient = event
        .str_field("patientName")
        .map_or_else(String::new, |name| format!(" ({name})"));
    let text = match event.name.as_str() {
        "queue:created" => "Queue created".to_owned(),
        "queue:patientAdded" => format!("Patient checked in{patient}"),
        "queue:reordered" | "queue:manualReorder" => "Queue reordered".to_owned(),
        "queue:patientCalled" => format!("Patient called{patient}"),
        "queue:patientDone" => format!("Patient done{patient}"),
        "queue:patientCancelled" => format!("Patient cancelled{patient}"),
        "doctor:clockIn" => "Doctor clocked in".to_owned(),
        "doctor:clockOut" => "Doctor clocked out".to_owned(),
        "queue:autoUnlocked" => "Queue auto-unlocked".to_owned(),
        _ => return None,
    };
    Some(text)
}

fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    chars
        .next()
        .map_or_else(String::new, |first| first.to_uppercase().chain(chars).collect())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
