use thiserror::Error;

use crate::{
    db::credential_store::CredentialStoreError,
    wa::error::ClientError,
};

/// Errors for session registry and handle operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("user id must not be empty")]
    InvalidUserId,
    #[error("session not found")]
    NotFound,
    #[error("session is not connected")]
    NotConnected,
    #[error("session runner is no longer running")]
    SessionClosed,
    #[error("timed out waiting for the protocol client")]
    ConnectTimeout,
    #[error("credential store error: {0}")]
    Credentials(#[from] CredentialStoreError),
    #[error("protocol client error: {0}")]
    Client(#[from] ClientError),
}
