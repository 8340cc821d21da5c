//! In-memory notification store.
//!
//! The store is a synchronous reducer over an ordered list, most recent
//! arrival first. Read state is two-phase: a local mark moves an entry to
//! `Pending` under an operation id, and the operation is later committed
//! (remote delivery succeeded) or reverted (it failed). An entry may be
//! covered by several operations at once; one commit is enough to settle it.
//! The unread count is always recomputed from the list.

use serde::Serialize;
use std::collections::VecDeque;

use crate::model::Notification;

/// Identifier of a local, not yet confirmed read operation.
pub type OpId = u64;

/// Read state of a single entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    Unread,
    /// Marked read locally, awaiting the outcome of operation `OpId`.
    Pending(OpId),
    Read,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreEntry {
    notification: Notification,
    confirmed: bool,
    /// Every unsettled operation covering this entry, oldest first.
    pending: Vec<OpId>,
}

impl StoreEntry {
    fn new(notification: Notification) -> Self {
        Self {
            confirmed: notification.read,
            notification,
            pending: Vec::new(),
        }
    }

    pub fn notification(&self) -> &Notification {
        &self.notification
    }

    pub fn id(&self) -> &str {
        &self.notification.id
    }

    /// Confirmed read wins over pending; a pending entry reports its latest op.
    pub fn state(&self) -> ReadState {
        if self.confirmed {
            ReadState::Read
        } else if let Some(op) = self.pending.last() {
            ReadState::Pending(*op)
        } else {
            ReadState::Unread
        }
    }

    /// Effective read flag as the user sees it: confirmed or pending.
    pub fn is_read(&self) -> bool {
        self.confirmed || !self.pending.is_empty()
    }

    pub fn is_pending(&self) -> bool {
        !self.confirmed && !self.pending.is_empty()
    }

    fn cover(&mut self, op: OpId) {
        if !self.confirmed {
            self.pending.push(op);
        }
    }
}

/// A local read operation whose remote outcome is not yet known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOp {
    MarkRead { op: OpId, notification_id: String },
    MarkAllRead { op: OpId },
}

impl PendingOp {
    pub fn id(&self) -> OpId {
        match self {
            Self::MarkRead { op, .. } | Self::MarkAllRead { op } => *op,
        }
    }
}

/// A notification paired with its effective read state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationView {
    #[serde(flatten)]
    pub notification: Notification,
    pub pending: bool,
}

/// Immutable copy of the store for rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreSnapshot {
    pub items: Vec<NotificationView>,
    pub unread: usize,
}

/// Ordered, bounded notification list.
#[derive(Debug)]
pub struct NotificationStore {
    entries: VecDeque<StoreEntry>,
    max_entries: usize,
    next_op: OpId,
}

impl NotificationStore {
    /// Create an empty store keeping at most `max_entries` records.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries: max_entries.max(1),
            next_op: 1,
        }
    }

    /// Replace the whole list with a fetched snapshot.
    ///
    /// Records are ordered newest first by creation time and truncated to the
    /// retention cap. Returns the number of records kept.
    pub fn seed(&mut self, mut records: Vec<Notification>) -> usize {
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(self.max_entries);
        self.entries = records.into_iter().map(StoreEntry::new).collect();
        self.entries.len()
    }

    /// Prepend a pushed record regardless of its timestamp. Returns how many of
    /// the oldest arrivals were pruned to stay within the retention cap.
    pub fn push(&mut self, notification: Notification) -> usize {
        self.entries.push_front(StoreEntry::new(notification));
        let mut pruned = 0;
        while self.entries.len() > self.max_entries {
            self.entries.pop_back();
            pruned += 1;
        }
        pruned
    }

    /// Locally mark every entry with `id` as read.
    ///
    /// Returns `None` (and changes nothing) unless at least one such entry is
    /// currently unread.
    pub fn mark_read(&mut self, id: &str) -> Option<PendingOp> {
        let has_unread = self
            .entries
            .iter()
            .any(|e| e.id() == id && e.state() == ReadState::Unread);
        if !has_unread {
            return None;
        }

        let op = self.allocate_op();
        for entry in self.entries.iter_mut().filter(|e| e.id() == id) {
            entry.cover(op);
        }
        Some(PendingOp::MarkRead {
            op,
            notification_id: id.to_string(),
        })
    }

    /// Locally mark every entry as read.
    ///
    /// Always yields an operation, even when nothing is unread locally, since
    /// the service may hold unread records beyond the retention cap. Entries
    /// already pending under an earlier operation are covered by both, and
    /// whichever commits first settles them.
    pub fn mark_all_read(&mut self) -> PendingOp {
        let op = self.allocate_op();
        for entry in self.entries.iter_mut() {
            entry.cover(op);
        }
        PendingOp::MarkAllRead { op }
    }

    /// Confirm an operation. Returns the number of entries it settled.
    pub fn commit(&mut self, op: OpId) -> usize {
        let mut settled = 0;
        for entry in self.entries.iter_mut() {
            if entry.pending.contains(&op) {
                entry.pending.clear();
                entry.confirmed = true;
                entry.notification.read = true;
                settled += 1;
            }
        }
        settled
    }

    /// Roll back an operation. An entry becomes unread again only when no
    /// other unsettled operation still covers it. Returns how many did.
    pub fn revert(&mut self, op: OpId) -> usize {
        let mut restored = 0;
        for entry in self.entries.iter_mut() {
            let before = entry.pending.len();
            entry.pending.retain(|pending| *pending != op);
            if entry.pending.len() < before && entry.pending.is_empty() {
                restored += 1;
            }
        }
        restored
    }

    pub fn unread_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_read()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn get(&self, index: usize) -> Option<&StoreEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StoreEntry> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let items = self
            .entries
            .iter()
            .map(|entry| {
                let mut notification = entry.notification.clone();
                notification.read = entry.is_read();
                NotificationView {
                    notification,
                    pending: entry.is_pending(),
                }
            })
            .collect();
        StoreSnapshot {
            items,
            unread: self.unread_count(),
        }
    }

    fn allocate_op(&mut self) -> OpId {
        let op = self.next_op;
        self.next_op = self.next_op.wrapping_add(1);
        op
    }
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new(crate::config::ClientConfig::default().max_entries)
    }
}
