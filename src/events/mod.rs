pub mod broadcaster;
pub mod push;

use serde::{Deserialize, Serialize};

use crate::{
    session::handle::SessionState,
    wa::auth::SessionIdentity,
};

pub use broadcaster::{EventBroadcaster, EventSubscription};
pub use push::{PushEvent, PushOp, PushRequest, PushResponse};

/// Bulk job kinds that report progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobKind {
    Import,
    Reset,
}

/// Lifecycle events raised for a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SessionEvent {
    /// A QR payload is waiting to be scanned.
    Qr { user_id: String, qr: String },
    /// Session moved to a new lifecycle state.
    StatusChanged {
        user_id: String,
        state: SessionState,
        identity: Option<SessionIdentity>,
    },
    /// Initialization or runtime failure.
    Error { user_id: String, message: String },
    /// Session was logged out and its credentials wiped.
    LoggedOut { user_id: String },
    /// A fixed-delay reconnect has been armed.
    ReconnectScheduled { user_id: String, delay_ms: u64 },
    /// Progress of an import or reset job.
    JobProgress {
        user_id: String,
        job: JobKind,
        percent: u8,
        processed: usize,
        total: usize,
    },
}

impl SessionEvent {
    pub fn user_id(&self) -> &str {
        match self {
            Self::Qr { user_id, .. }
            | Self::StatusChanged { user_id, .. }
            | Self::Error { user_id, .. }
            | Self::LoggedOut { user_id }
            | Self::ReconnectScheduled { user_id, .. }
            | Self::JobProgress { user_id, .. } => user_id,
        }
    }

    /// Returns a stable event-type label.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Qr { .. } => "qr",
            Self::StatusChanged { .. } => "statusChanged",
            Self::Error { .. } => "error",
            Self::LoggedOut { .. } => "loggedOut",
            Self::ReconnectScheduled { .. } => "reconnectScheduled",
            Self::JobProgress { .. } => "jobProgress",
        }
    }
}
