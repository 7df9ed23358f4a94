//! Transient user-visible notices.

use std::time::Duration;

use uuid::Uuid;

pub const DEFAULT_NOTICE_DURATION: Duration = Duration::from_millis(3000);
pub const SESSION_NOTICE_DURATION: Duration = Duration::from_millis(6000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// The dispatch channel is not open.
    Connectivity,
    /// Text forwarded verbatim from the server.
    Server,
    /// The session ended and the user has to sign in again.
    Session,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: Uuid,
    pub kind: NoticeKind,
    pub severity: NoticeSeverity,
    pub message: String,
    pub duration: Duration,
}

impl Notice {
    pub fn new(kind: NoticeKind, severity: NoticeSeverity, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity,
            message: message.into(),
            duration: DEFAULT_NOTICE_DURATION,
        }
    }

    pub fn not_connected(action: &str) -> Self {
        Self::new(
            NoticeKind::Connectivity,
            NoticeSeverity::Error,
            format!("Dispatch channel not connected; {action} was not sent. Please reconnect."),
        )
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(NoticeKind::Server, NoticeSeverity::Error, message)
    }

    /// Stays up longer than the default; the user has to act on it.
    pub fn session_expired() -> Self {
        Self::new(
            NoticeKind::Session,
            NoticeSeverity::Warning,
            "Session expired; please sign in again.",
        )
        .with_duration(SESSION_NOTICE_DURATION)
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}
