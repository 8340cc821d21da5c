//! Typed notification channel events.

use serde_json::Value;

use super::packet::SocketPacket;
use crate::error::{NotifyError, Result};
use crate::model::Notification;

pub const JOIN_NOTIFICATIONS_FOR_USER: &str = "join_notifications_for_user";
pub const USER_NOTIFICATION: &str = "user_notification";
pub const MARK_READ: &str = "mark_read";
pub const MARK_ALL_READ: &str = "mark_all_read";

/// Events the client emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    /// Subscribe to the per-user push topic.
    JoinNotificationsForUser { user_id: String },
    MarkRead { notification_id: String },
    MarkAllRead { user_id: String },
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinNotificationsForUser { .. } => JOIN_NOTIFICATIONS_FOR_USER,
            Self::MarkRead { .. } => MARK_READ,
            Self::MarkAllRead { .. } => MARK_ALL_READ,
        }
    }

    fn args(&self) -> Vec<Value> {
        let arg = match self {
            Self::JoinNotificationsForUser { user_id } | Self::MarkAllRead { user_id } => user_id,
            Self::MarkRead { notification_id } => notification_id,
        };
        vec![Value::String(arg.clone())]
    }

    pub fn to_packet(&self, namespace: &str) -> SocketPacket {
        SocketPacket::event(namespace, self.name(), self.args())
    }
}

/// Events pushed by the service.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// A new notification for the joined user.
    UserNotification(Notification),
    /// Any event this client does not act on.
    Other { name: String, args: Vec<Value> },
}

impl InboundEvent {
    /// Interpret a Socket.IO packet. Returns `Ok(None)` for packets that are not
    /// events.
    pub fn from_packet(packet: &SocketPacket) -> Result<Option<Self>> {
        let Some((name, args)) = packet.event_parts() else {
            return Ok(None);
        };

        if name == USER_NOTIFICATION {
            let record = args.first().cloned().ok_or_else(|| {
                NotifyError::protocol("user_notification event without a record")
            })?;
            let notification: Notification = serde_json::from_value(record)?;
            return Ok(Some(Self::UserNotification(notification)));
        }

        Ok(Some(Self::Other {
            name: name.to_string(),
            args: args.to_vec(),
        }))
    }
}
