use serde::{Deserialize, Serialize};

use crate::wa::auth::{Credentials, SessionIdentity};

/// Why the network closed a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Device was unlinked; credentials are no longer valid.
    LoggedOut,
    ConnectionLost,
    ConnectionClosed,
    ConnectionReplaced,
    MultideviceMismatch,
    BadSession,
    Unavailable,
    RestartRequired,
    Other(u16),
}

impl CloseReason {
    /// Maps the network's numeric disconnect codes.
    pub fn from_status_code(code: u16) -> Self {
        match code {
            401 => Self::LoggedOut,
            408 => Self::ConnectionLost,
            411 => Self::MultideviceMismatch,
            428 => Self::ConnectionClosed,
            440 => Self::ConnectionReplaced,
            500 => Self::BadSession,
            503 => Self::Unavailable,
            515 => Self::RestartRequired,
            other => Self::Other(other),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::LoggedOut => 401,
            Self::ConnectionLost => 408,
            Self::MultideviceMismatch => 411,
            Self::ConnectionClosed => 428,
            Self::ConnectionReplaced => 440,
            Self::BadSession => 500,
            Self::Unavailable => 503,
            Self::RestartRequired => 515,
            Self::Other(code) => *code,
        }
    }

    /// Only a logged-out close is terminal; everything else reconnects.
    pub fn is_logged_out(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

/// Events raised by a protocol client for one open connection, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Pairing payload to render as a QR code.
    Qr(String),
    /// Connection is authenticated and usable.
    Open(SessionIdentity),
    /// Connection was closed by the network.
    Close(CloseReason),
    /// Credentials changed and must be persisted before anything else.
    CredentialsRotated(Credentials),
}
