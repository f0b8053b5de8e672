//! Notification events emitted by the engine.
//!
//! The engine reports three lifecycle moments: the credential nearing
//! expiry, the credential having expired, and the batch finishing. Each
//! event carries a machine-readable name plus a human-readable title and
//! message. Delivery fan-out (desktop, webhook, email) belongs to the
//! consumer; the default sink just logs.

use tracing::info;

/// Machine-readable notification event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The session credential is old enough that expiry is imminent.
    AuthWarning,
    /// The remote service rejected the session credential.
    AuthExpired,
    /// The batch run finished.
    BatchComplete,
}

impl EventKind {
    /// Stable event name for machine consumers.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::AuthWarning => "auth_warning",
            Self::AuthExpired => "auth_expired",
            Self::BatchComplete => "complete",
        }
    }
}

/// One notification: event name plus human-readable title and message.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Which lifecycle moment this is.
    pub event: EventKind,
    /// Short human-readable title.
    pub title: String,
    /// Longer human-readable message.
    pub message: String,
}

impl Notification {
    /// Creates a notification for an event.
    #[must_use]
    pub fn new(event: EventKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event,
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Delivery seam for notifications.
///
/// Implementations must not block: the engine calls `send` from its
/// coordination loop. Anything slow (webhooks, SMTP) belongs on the
/// consumer's own task.
pub trait NotificationSink: Send + Sync {
    /// Delivers one notification.
    fn send(&self, notification: &Notification);
}

/// Default sink: notifications become structured log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn send(&self, notification: &Notification) {
        info!(
            event = notification.event.name(),
            title = %notification.title,
            message = %notification.message,
            "notification"
        );
    }
}
