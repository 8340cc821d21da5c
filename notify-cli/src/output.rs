use crate::error::Result;
#[cfg(feature = "colored-output")]
use colored::*;
use sprint_notify::{Notification, NotificationView, StoreSnapshot, SyncNotice};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

pub struct OutputManager {
    colored: bool,
}

impl OutputManager {
    pub fn new(colored: bool) -> Self {
        Self { colored }
    }

    pub fn format_snapshot(&self, snapshot: &StoreSnapshot, unread_only: bool, json: bool) -> Result<String> {
        let items: Vec<&NotificationView> = snapshot
            .items
            .iter()
            .filter(|view| !unread_only || !view.notification.read)
            .collect();

        if json {
            let body = serde_json::json!({
                "unread": snapshot.unread,
                "items": items,
            });
            return Ok(serde_json::to_string_pretty(&body)?);
        }

        let mut output = String::new();
        output.push_str(&self.colorize(
            &format!("Notifications ({} unread)", snapshot.unread),
            &Color::Green,
            true,
        ));
        output.push('\n');
        if items.is_empty() {
            output.push_str("  (none)\n");
        }
        for view in items {
            output.push_str(&self.format_line(&view.notification));
            output.push('\n');
        }
        Ok(output)
    }

    /// One line per pushed notification; compact JSON in json mode.
    pub fn format_notification(&self, notification: &Notification, json: bool) -> Result<String> {
        if json {
            return Ok(serde_json::to_string(notification)?);
        }
        Ok(self.format_line(notification))
    }

    pub fn format_notice(&self, notice: &SyncNotice, json: bool) -> Result<Option<String>> {
        if json {
            return Ok(Some(serde_json::to_string(notice)?));
        }
        let line = match notice {
            SyncNotice::Seeded { count } => format!("Loaded {count} notifications"),
            SyncNotice::SeedFailed { error } => self.colorize(
                &format!("Could not load notifications: {error}"),
                &Color::Yellow,
                false,
            ),
            SyncNotice::MarkReadFailed { id, error, .. } => self.colorize(
                &format!("Failed to mark {id} as read: {error}"),
                &Color::Yellow,
                false,
            ),
            SyncNotice::MarkAllReadFailed { error, .. } => self.colorize(
                &format!("Failed to mark all as read: {error}"),
                &Color::Yellow,
                false,
            ),
            // Pushes are printed as records
            SyncNotice::Pushed { .. } | SyncNotice::ReadConfirmed { .. } => return Ok(None),
        };
        Ok(Some(line))
    }

    fn format_line(&self, notification: &Notification) -> String {
        let marker = if notification.read { " " } else { "●" };
        let mut line = format!(
            "{} {} {} {}",
            self.colorize(marker, &Color::Cyan, true),
            self.colorize(
                &notification.created_at.format(TIME_FORMAT).to_string(),
                &Color::Blue,
                false
            ),
            self.colorize(
                &format!("[{}]", notification.kind().label()),
                &Color::Yellow,
                false
            ),
            notification.title,
        );
        if !notification.message.is_empty() {
            line.push_str(" - ");
            line.push_str(&notification.message);
        }
        line.push_str(&format!(" ({})", notification.id));
        line
    }

    fn colorize(&self, text: &str, color: &Color, bold: bool) -> String {
        #[cfg(feature = "colored-output")]
        {
            if self.colored {
                let colored_text = match color {
                    Color::Green => text.green(),
                    Color::Yellow => text.yellow(),
                    Color::Blue => text.blue(),
                    Color::Cyan => text.cyan(),
                };
                if bold {
                    colored_text.bold().to_string()
                } else {
                    colored_text.to_string()
                }
            } else {
                text.to_string()
            }
        }

        #[cfg(not(feature = "colored-output"))]
        {
            let _ = (self.colored, color, bold);
            text.to_string()
        }
    }
}

enum Color {
    Green,
    Yellow,
    Blue,
    Cyan,
}
