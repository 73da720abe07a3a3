//! User-facing notifications
//!
//! The dispatcher reports the final outcome of each request to a
//! `NotificationSink` (a toast layer in the UI). Delivery is fire-and-forget.

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Error,
            message: message.into(),
        }
    }
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Sink that only logs. Used when no UI layer is attached.
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, notification: Notification) {
        match notification.kind {
            NotificationKind::Success => info!(message = %notification.message, "notification"),
            NotificationKind::Error => warn!(message = %notification.message, "notification"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_kind() {
        assert_eq!(Notification::success("Saved").kind, NotificationKind::Success);
        assert_eq!(Notification::error("Nope").kind, NotificationKind::Error);
        assert_eq!(Notification::error("Nope").message, "Nope");
    }

    #[test]
    fn tracing_sink_accepts_both_kinds() {
        let sink: &dyn NotificationSink = &TracingSink;
        sink.notify(Notification::success("Profile updated"));
        sink.notify(Notification::error("Network error"));
    }
}
