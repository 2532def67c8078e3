// ── Queue view ──
//
// The single item list consumers observe, with derived projections
// computed on demand. Views are immutable; every change publishes a new
// `Arc<QueueView>`.

use std::cmp::Ordering;

use techtrax_api::models::{ItemStatus, QueueItem, QueueSnapshot};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueView {
    /// `None` when no queue is loaded.
    pub snapshot: Option<QueueSnapshot>,
    /// Bumped on every published view.
    pub version: u64,
    /// `true` while a local edit awaits server confirmation.
    pub optimistic: bool,
}

impl QueueView {
    pub fn is_loaded(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn queue_id(&self) -> Option<&str> {
        self.snapshot.as_ref().map(|s| s.id.as_str())
    }

    pub fn items(&self) -> &[QueueItem] {
        self.snapshot.as_ref().map_or(&[], |s| s.items.as_slice())
    }

    /// Waiting items by ascending position.
    pub fn waiting(&self) -> Vec<&QueueItem> {
        let mut waiting = self.with_status(ItemStatus::Waiting);
        waiting.sort_by(|a, b| by_position(a, b));
        waiting
    }

    pub fn called(&self) -> Vec<&QueueItem> {
        self.with_status(ItemStatus::Called)
    }

    pub fn serving(&self) -> Vec<&QueueItem> {
        self.with_status(ItemStatus::Serving)
    }

    pub fn done(&self) -> Vec<&QueueItem> {
        self.with_status(ItemStatus::Done)
    }

    /// Ids of the waiting items in display order.
    pub fn waiting_ids(&self) -> Vec<String> {
        self.waiting().into_iter().map(|i| i.id.clone()).collect()
    }

    pub fn item(&self, id: &str) -> Option<&QueueItem> {
        self.items().iter().find(|i| i.id == id)
    }

    fn with_status(&self, status: ItemStatus) -> Vec<&QueueItem> {
        self.items().iter().filter(|i| i.status == status).collect()
    }
}

fn by_position(a: &QueueItem, b: &QueueItem) -> Ordering {
    a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id))
}

/// Renumber the waiting subset 1..n in server order, breaking ties by id.
/// Non-waiting items keep their positions.
pub(crate) fn reindex_waiting(snapshot: &mut QueueSnapshot) {
    let mut order: Vec<usize> = snapshot
        .items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.is_waiting())
        .map(|(idx, _)| idx)
        .collect();
    order.sort_by(|&a, &b| by_position(&snapshot.items[a], &snapshot.items[b]));

    for (rank, idx) in (1u32..).zip(order) {
        if let Some(item) = snapshot.items.get_mut(idx) {
            item.position = rank;
        }
    }
}

/// Place the waiting items in `ordered_ids` order with positions 1..n and
/// mark them manually ordered.
pub(crate) fn apply_order(snapshot: &mut QueueSnapshot, ordered_ids: &[String]) {
    for (rank, id) in (1u32..).zip(ordered_ids) {
        if let Some(item) = snapshot.items.iter_mut().find(|i| &i.id == id) {
            item.position = rank;
            item.manually_ordered = true;
        }
    }
}
