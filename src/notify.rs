//! Turns a non-empty change set or a cancellation into one stored notification.

use crate::error::Result;
use crate::storage::Storage;
use crate::types::{Notification, NotificationKind, StoredEvent};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

/// Turns a diff result into one persisted, user-facing notification.
pub struct NotificationEmitter;

impl NotificationEmitter {
    pub fn render_message(event: &StoredEvent, changes: &[String], cancelled: bool) -> String {
        let subject = format!("{} ({})", event.title, event.start_date.format("%Y-%m-%d"));
        if cancelled {
            if changes.is_empty() {
                format!("{} has been cancelled", subject)
            } else {
                format!("{} has been cancelled; also: {}", subject, changes.join("; "))
            }
        } else {
            format!("{}: {}", subject, changes.join("; "))
        }
    }

    /// Persist a notification for `event`; does nothing when there is nothing to say.
    pub async fn emit(
        storage: &dyn Storage,
        event: &StoredEvent,
        changes: &[String],
        cancelled: bool,
    ) -> Result<Option<Notification>> {
        if changes.is_empty() && !cancelled {
            return Ok(None);
        }

        let notification = Notification {
            id: Uuid::new_v4(),
            event_id: event.id,
            kind: if cancelled {
                NotificationKind::Cancelled
            } else {
                NotificationKind::Updated
            },
            message: Self::render_message(event, changes, cancelled),
            changes: changes.to_vec(),
            created_at: Utc::now(),
        };
        storage.create_notification(&notification).await?;

        info!(event_id = %event.id, kind = ?notification.kind, "{}", notification.message);
        Ok(Some(notification))
    }
}
