use thiserror::Error;

/// Errors surfaced by a protocol client or one of its handles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("logout failed: {0}")]
    Logout(String),
    #[error("connection is closed")]
    Closed,
}
