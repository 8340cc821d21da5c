//! Read-state synchronizer.
//!
//! [`NotificationSync`] drives the session data flow: wait for the channel,
//! seed the store from one bulk fetch, subscribe to the user's topic, then
//! apply pushed notifications as they arrive. Read actions mutate the store
//! immediately and are emitted without waiting for the service; the delivery
//! outcome later commits or reverts the local change.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::api::NotificationApi;
use crate::config::ClientConfig;
use crate::connection::{ChannelSender, Connection};
use crate::error::{NotifyError, Result};
use crate::protocol::{InboundEvent, OutboundEvent};
use crate::store::{NotificationStore, OpId, PendingOp, StoreSnapshot};

const NOTICE_CAPACITY: usize = 128;

/// Transient notices for the user interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncNotice {
    Seeded { count: usize },
    /// The bulk fetch failed; the store stays empty until pushes arrive.
    SeedFailed { error: String },
    Pushed { id: String },
    /// The service received a read operation.
    ReadConfirmed { op: OpId },
    /// A mark-read could not be delivered and was rolled back.
    MarkReadFailed { op: OpId, id: String, error: String },
    MarkAllReadFailed { op: OpId, error: String },
}

/// Handles shared with spawned delivery watchers.
#[derive(Clone)]
struct Shared {
    store: Arc<Mutex<NotificationStore>>,
    notices: broadcast::Sender<SyncNotice>,
}

impl Shared {
    fn notify(&self, notice: SyncNotice) {
        // No subscribers is fine
        let _ = self.notices.send(notice);
    }
}

pub struct NotificationSync {
    shared: Shared,
    sender: ChannelSender,
    api: Arc<dyn NotificationApi>,
    user_id: Mutex<Option<String>>,
    events: Mutex<Option<mpsc::Receiver<InboundEvent>>>,
    inbound: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    ready_timeout: Duration,
}

impl NotificationSync {
    /// Borrow the connection's emit handle and take its inbound stream.
    /// The caller keeps ownership of `connection` and closes it.
    pub fn new(
        connection: &mut Connection,
        api: Arc<dyn NotificationApi>,
        config: &ClientConfig,
    ) -> Result<Self> {
        let events = connection
            .take_events()
            .ok_or_else(|| NotifyError::other("connection events are already consumed"))?;
        let mut sync = Self::from_parts(connection.sender(), events, api, config.max_entries);
        sync.ready_timeout = config
            .request_timeout()
            .saturating_mul(config.reconnect.max_reconnect_attempts.max(1));
        Ok(sync)
    }

    pub fn from_parts(
        sender: ChannelSender,
        events: mpsc::Receiver<InboundEvent>,
        api: Arc<dyn NotificationApi>,
        max_entries: usize,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            shared: Shared {
                store: Arc::new(Mutex::new(NotificationStore::new(max_entries))),
                notices,
            },
            sender,
            api,
            user_id: Mutex::new(None),
            events: Mutex::new(Some(events)),
            inbound: Mutex::new(None),
            cancel: CancellationToken::new(),
            ready_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Run the session start-up: wait for the channel, seed once, start
    /// applying pushes, and subscribe when `user_id` is given.
    ///
    /// A failed bulk fetch is not an error here: the store stays empty and a
    /// [`SyncNotice::SeedFailed`] is published.
    pub async fn start(&self, user_id: Option<&str>) -> Result<()> {
        let events = self
            .events
            .lock()
            .take()
            .ok_or_else(|| NotifyError::other("synchronizer already started"))?;

        self.sender.wait_ready(self.ready_timeout).await?;

        let fetched = tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!("Shutdown during bulk fetch, discarding response");
                return Ok(());
            }
            result = self.api.fetch_notifications() => result,
        };
        self.apply_seed(fetched);

        let handle = tokio::spawn(apply_events(
            self.shared.clone(),
            events,
            self.cancel.clone(),
        ));
        *self.inbound.lock() = Some(handle);

        if let Some(user_id) = user_id {
            self.identify(user_id).await;
        }
        Ok(())
    }

    fn apply_seed(&self, fetched: Result<Vec<crate::model::Notification>>) {
        if self.cancel.is_cancelled() {
            return;
        }
        match fetched {
            Ok(list) => {
                let count = self.shared.store.lock().seed(list);
                info!(count, "Seeded notification store");
                self.shared.notify(SyncNotice::Seeded { count });
            }
            Err(e) => {
                warn!(error = %e, "Bulk fetch failed, starting with an empty store");
                self.shared.store.lock().clear();
                self.shared.notify(SyncNotice::SeedFailed {
                    error: e.to_string(),
                });
            }
        }
    }

    /// Record the user identity and subscribe to its notification topic.
    pub async fn identify(&self, user_id: &str) {
        *self.user_id.lock() = Some(user_id.to_string());
        match self.sender.join(user_id) {
            Ok(receipt) => match receipt.wait().await {
                Ok(()) => info!(user_id, "Joined user notification topic"),
                // The connection replays the join once it reconnects.
                Err(e) => warn!(user_id, error = %e, "Join not delivered yet"),
            },
            Err(e) => warn!(user_id, error = %e, "Failed to queue join"),
        }
    }

    pub fn user_id(&self) -> Option<String> {
        self.user_id.lock().clone()
    }

    /// Mark one notification read, locally first.
    ///
    /// Returns `None` when the record is unknown or already read, in which
    /// case nothing is emitted.
    pub fn mark_read(&self, id: &str) -> Option<OpId> {
        let op = self.shared.store.lock().mark_read(id)?;
        let event = OutboundEvent::MarkRead {
            notification_id: id.to_string(),
        };
        let op_id = op.id();
        self.dispatch(op, event);
        Some(op_id)
    }

    /// Mark everything read, locally first. Requires a known user identity.
    pub fn mark_all_read(&self) -> Result<OpId> {
        let user_id = self
            .user_id()
            .ok_or_else(|| NotifyError::other("user identity is not known yet"))?;
        let op = self.shared.store.lock().mark_all_read();
        let op_id = op.id();
        self.dispatch(op, OutboundEvent::MarkAllRead { user_id });
        Ok(op_id)
    }

    fn dispatch(&self, op: PendingOp, event: OutboundEvent) {
        let shared = self.shared.clone();
        match self.sender.emit(event) {
            Ok(receipt) => {
                tokio::spawn(async move {
                    let outcome = receipt.wait().await;
                    settle(&shared, op, outcome);
                });
            }
            Err(e) => settle(&shared, op, Err(e)),
        }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.shared.store.lock().snapshot()
    }

    pub fn unread_count(&self) -> usize {
        self.shared.store.lock().unread_count()
    }

    /// Run `f` against the store while holding its lock.
    pub fn with_store<R>(&self, f: impl FnOnce(&NotificationStore) -> R) -> R {
        f(&self.shared.store.lock())
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<SyncNotice> {
        self.shared.notices.subscribe()
    }

    /// Stop applying pushes and drop all state. A bulk fetch still in flight
    /// is discarded.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.inbound.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.shared.store.lock().clear();
        debug!("Notification sync stopped");
    }
}

fn settle(shared: &Shared, op: PendingOp, outcome: Result<()>) {
    let op_id = op.id();
    match outcome {
        Ok(()) => {
            let settled = shared.store.lock().commit(op_id);
            trace!(op = op_id, settled, "Read operation confirmed");
            shared.notify(SyncNotice::ReadConfirmed { op: op_id });
        }
        Err(e) => {
            let restored = shared.store.lock().revert(op_id);
            warn!(op = op_id, restored, error = %e, "Read operation failed, rolled back");
            let error = e.to_string();
            shared.notify(match op {
                PendingOp::MarkRead {
                    notification_id, ..
                } => SyncNotice::MarkReadFailed {
                    op: op_id,
                    id: notification_id,
                    error,
                },
                PendingOp::MarkAllRead { .. } => SyncNotice::MarkAllReadFailed { op: op_id, error },
            });
        }
    }
}

async fn apply_events(
    shared: Shared,
    mut events: mpsc::Receiver<InboundEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Some(InboundEvent::UserNotification(notification)) => {
                let id = notification.id.clone();
                let pruned = shared.store.lock().push(notification);
                debug!(id = %id, pruned, "Applied pushed notification");
                shared.notify(SyncNotice::Pushed { id });
            }
            Some(InboundEvent::Other { name, .. }) => {
                trace!(event = %name, "Ignoring channel event");
            }
            None => {
                debug!("Inbound event stream ended");
                break;
            }
        }
    }
}
