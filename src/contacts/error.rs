use thiserror::Error;

/// Failures reported by a contact store backend.
#[derive(Debug, Error)]
pub enum ContactStoreError {
    #[error("contact not found: {0}")]
    NotFound(String),
    #[error("contact store responded with status {code}: {body}")]
    Status { code: u16, body: String },
    #[error("contact store transport error: {0}")]
    Transport(String),
    #[error("failed to decode contact store response: {0}")]
    Decode(String),
    #[error("contact store task failed: {0}")]
    Join(String),
}

/// Errors surfaced by contact service operations.
#[derive(Debug, Error)]
pub enum ContactError {
    #[error("user id must not be empty")]
    InvalidUserId,
    /// Enumerating contacts for a reset failed before anything was deleted.
    #[error("failed to list contacts: {0}")]
    Listing(#[source] ContactStoreError),
    #[error(transparent)]
    Store(#[from] ContactStoreError),
}
