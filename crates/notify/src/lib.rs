//! sprint-notify: real-time notification synchronization for the sprint board.
//!
//! The crate keeps a client-side notification list in step with the remote
//! notification service:
//!
//! - [`Connection`] - owned Socket.IO channel with heartbeat and reconnect
//! - [`HttpNotificationApi`] - one-time bulk fetch of `GET /notifications/`
//! - [`NotificationStore`] - ordered, bounded list with two-phase read state
//! - [`NotificationSync`] - seeds the store, applies pushes, and syncs reads
//!
//! ```ignore
//! use std::sync::Arc;
//! use sprint_notify::{ClientConfig, Connection, HttpNotificationApi, NotificationSync};
//!
//! let config = ClientConfig::default();
//! let mut connection = Connection::open(&config)?;
//! let api = Arc::new(HttpNotificationApi::new(&config)?);
//! let sync = NotificationSync::new(&mut connection, api, &config)?;
//! sync.start(Some("user-1")).await?;
//! sync.mark_read("notification-7");
//! ```

pub mod api;
pub mod config;
pub mod connection;
pub mod error;
pub mod model;
pub mod protocol;
pub mod store;
pub mod sync;

pub use api::{HttpNotificationApi, NotificationApi};
pub use config::{ClientConfig, Credentials, ReconnectConfig};
pub use connection::{ChannelSender, Connection, ConnectionState, DeliveryReceipt};
pub use error::{NotifyError, Result};
pub use model::{Notification, NotificationKind};
pub use store::{NotificationStore, NotificationView, OpId, PendingOp, ReadState, StoreSnapshot};
pub use sync::{NotificationSync, SyncNotice};
