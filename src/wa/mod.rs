pub mod auth;
pub mod client;
pub mod error;
pub mod events;
pub mod qr;
pub mod synthetic;

pub use auth::{Credentials, MeInfo, SessionIdentity};
pub use client::{ClientConnection, ProtocolClient, ProtocolHandle};
pub use error::ClientError;
pub use events::{ClientEvent, CloseReason};
pub use synthetic::SyntheticClient;
