use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::wa::{
    auth::Credentials,
    error::ClientError,
    events::ClientEvent,
};

/// Entry point of an external chat-protocol client.
pub trait ProtocolClient: Send + Sync {
    /// Opens a connection for `user_id` using previously persisted credentials.
    ///
    /// `None` asks the client to start a fresh pairing flow.
    fn open<'a>(
        &'a self,
        user_id: &'a str,
        credentials: Option<Credentials>,
    ) -> BoxFuture<'a, Result<ClientConnection, ClientError>>;
}

/// Live connection owned by exactly one session.
///
/// Dropping a handle must release the underlying connection.
pub trait ProtocolHandle: Send {
    /// Sends a text message and returns the network message id.
    fn send_text<'a>(
        &'a mut self,
        to: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<String, ClientError>>;

    /// Deauthorizes the linked device on the network.
    fn logout(&mut self) -> BoxFuture<'_, Result<(), ClientError>>;

    /// Closes the connection without deauthorizing.
    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Result of [`ProtocolClient::open`]: the handle plus its event stream.
pub struct ClientConnection {
    pub handle: Box<dyn ProtocolHandle>,
    pub events: mpsc::Receiver<ClientEvent>,
}

impl ClientConnection {
    pub fn new(handle: Box<dyn ProtocolHandle>, events: mpsc::Receiver<ClientEvent>) -> Self {
        Self { handle, events }
    }
}
