//! Notification records as delivered by the remote service.
//!
//! Records are owned by the service; the client only caches them and flips
//! their read flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single notification record.
///
/// Field names follow the service's JSON, with aliases for the camelCase and
/// document-store spellings some endpoints still emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Opaque unique identifier
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default, alias = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, alias = "projectId", skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, alias = "taskId", skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Kind tag, kept verbatim
    #[serde(rename = "type", alias = "kind", default)]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, alias = "is_read", alias = "isRead")]
    pub read: bool,
    #[serde(alias = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Classify the raw kind tag.
    pub fn kind(&self) -> NotificationKind {
        NotificationKind::from_tag(&self.kind)
    }
}

/// Well-known kind tags of the sprint board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    TaskAssigned,
    TaskUpdated,
    Comment,
    Mention,
    SprintStarted,
    SprintCompleted,
    ProjectInvite,
    ChatMessage,
    Other,
}

const KIND_TAGS: &[(NotificationKind, &str, &str)] = &[
    (NotificationKind::TaskAssigned, "task_assigned", "Task Assigned"),
    (NotificationKind::TaskUpdated, "task_updated", "Task Updated"),
    (NotificationKind::Comment, "comment", "Comment"),
    (NotificationKind::Mention, "mention", "Mention"),
    (NotificationKind::SprintStarted, "sprint_started", "Sprint Started"),
    (NotificationKind::SprintCompleted, "sprint_completed", "Sprint Completed"),
    (NotificationKind::ProjectInvite, "project_invite", "Project Invite"),
    (NotificationKind::ChatMessage, "chat_message", "Chat Message"),
];

impl NotificationKind {
    /// Match a tag ignoring case and `.`/`-`/`_`/space separators, so
    /// `TASK_ASSIGNED`, `task.assigned` and `TaskAssigned` all resolve.
    pub fn from_tag(tag: &str) -> Self {
        let wanted = normalize_tag(tag);
        if wanted.is_empty() {
            return Self::Other;
        }
        KIND_TAGS
            .iter()
            .find(|(_, key, _)| normalize_tag(key) == wanted)
            .map(|(kind, _, _)| *kind)
            .unwrap_or(Self::Other)
    }

    /// Human-friendly label.
    pub fn label(&self) -> &'static str {
        KIND_TAGS
            .iter()
            .find(|(kind, _, _)| kind == self)
            .map(|(_, _, label)| *label)
            .unwrap_or("Notification")
    }
}

fn normalize_tag(input: &str) -> String {
    input
        .trim()
        .chars()
        .filter(|c| !matches!(c, '_' | '.' | '-' | ' '))
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
