use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::{
    sync::{RwLock, mpsc, oneshot},
    task::AbortHandle,
};

use crate::{
    session::error::SessionError,
    wa::auth::SessionIdentity,
};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No connection and no pending attempt.
    Idle,
    /// Opening a connection or waiting out a reconnect delay.
    Initializing,
    /// A QR payload is outstanding.
    AwaitingScan,
    /// Authenticated and usable.
    Connected,
    /// Tearing down ahead of logout.
    Closing,
    /// Terminal; credentials are gone.
    LoggedOut,
}

impl SessionState {
    /// Stable string representation of a session state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Initializing => "Initializing",
            Self::AwaitingScan => "AwaitingScan",
            Self::Connected => "Connected",
            Self::Closing => "Closing",
            Self::LoggedOut => "LoggedOut",
        }
    }

    /// States in which a new connect request is a no-op.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Initializing | Self::AwaitingScan | Self::Connected)
    }
}

/// Point-in-time view of a session, safe to hand to pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub user_id: String,
    pub state: SessionState,
    /// Present only while awaiting a scan.
    pub qr: Option<String>,
    /// Present only while connected.
    pub identity: Option<SessionIdentity>,
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    /// Snapshot reported for a user with no session.
    pub fn idle(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_owned(),
            state: SessionState::Idle,
            qr: None,
            identity: None,
            last_error: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }
}

/// Commands accepted by a session runner task.
#[derive(Debug)]
pub enum SessionCommand {
    /// Starts the connection flow unless one is already active.
    Connect {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// Deauthorizes, wipes credentials and stops the runner.
    Logout {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// Sends a text message through the live connection.
    SendText {
        to: String,
        text: String,
        reply: oneshot::Sender<Result<String, SessionError>>,
    },
    /// Closes the connection, keeping credentials, and stops the runner.
    Shutdown,
}

/// Handle used by the registry to interact with a session task.
#[derive(Clone)]
pub struct SessionHandle {
    generation: u64,
    tx: mpsc::Sender<SessionCommand>,
    snapshot: Arc<RwLock<SessionSnapshot>>,
    abort: AbortHandle,
}

impl SessionHandle {
    pub(crate) fn new(
        generation: u64,
        tx: mpsc::Sender<SessionCommand>,
        snapshot: Arc<RwLock<SessionSnapshot>>,
        abort: AbortHandle,
    ) -> Self {
        Self {
            generation,
            tx,
            snapshot,
            abort,
        }
    }

    /// Registry generation this handle was created in.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns true once the runner task has stopped consuming commands.
    pub fn is_finished(&self) -> bool {
        self.tx.is_closed()
    }

    /// Returns the current snapshot.
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Asks the runner to connect and waits for the initialization result.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionCommand::Connect { reply }, rx).await
    }

    /// Asks the runner to log out and waits for it to finish.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(SessionCommand::Logout { reply }, rx).await
    }

    pub async fn send_text(&self, to: &str, text: &str) -> Result<String, SessionError> {
        let (reply, rx) = oneshot::channel();
        let command = SessionCommand::SendText {
            to: to.to_owned(),
            text: text.to_owned(),
            reply,
        };
        self.request(command, rx).await
    }

    /// Stops the runner without touching persisted credentials.
    pub async fn shutdown(&self) {
        if self.tx.send(SessionCommand::Shutdown).await.is_ok() {
            self.tx.closed().await;
        }
    }

    /// Kills the runner task outright; its connection is released on drop.
    pub fn abort(&self) {
        self.abort.abort();
    }

    async fn request<T>(
        &self,
        command: SessionCommand,
        rx: oneshot::Receiver<Result<T, SessionError>>,
    ) -> Result<T, SessionError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        rx.await.map_err(|_| SessionError::SessionClosed)?
    }
}
