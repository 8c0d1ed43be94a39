//! In-process protocol client used for local runs and tests.
//!
//! It never touches the network: opening a connection immediately raises
//! either a QR payload (unpaired credentials) or an `Open` event (paired
//! credentials). The same value doubles as a controller that can confirm
//! scans, close connections with a reason and rotate credentials.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::wa::{
    auth::{Credentials, MeInfo, SessionIdentity},
    client::{ClientConnection, ProtocolClient, ProtocolHandle},
    error::ClientError,
    events::{ClientEvent, CloseReason},
    qr::generate_qr_string,
};

const EVENT_CAPACITY: usize = 32;

/// Outbound message recorded by the synthetic client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub user_id: String,
    pub to: String,
    pub text: String,
    pub message_id: String,
}

#[derive(Debug, Clone)]
enum OpenBehavior {
    Fail(String),
    Silent,
}

struct Link {
    id: u64,
    tx: mpsc::Sender<ClientEvent>,
    credentials: Credentials,
}

#[derive(Default)]
struct Inner {
    links: DashMap<String, Link>,
    next_link_id: AtomicU64,
    opened: AtomicUsize,
    live: AtomicUsize,
    logouts: AtomicUsize,
    scripted: Mutex<VecDeque<OpenBehavior>>,
    sent: Mutex<Vec<SentMessage>>,
    auto_pair: Option<Duration>,
}

/// Synthetic protocol client and its controller.
#[derive(Clone, Default)]
pub struct SyntheticClient {
    inner: Arc<Inner>,
}

impl SyntheticClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a client that confirms every pending scan after `delay`.
    pub fn with_auto_pair(delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                auto_pair: Some(delay),
                ..Inner::default()
            }),
        }
    }

    /// Makes the next `open` call fail with a connect error.
    pub async fn fail_next_open(&self, message: impl Into<String>) {
        self.inner
            .scripted
            .lock()
            .await
            .push_back(OpenBehavior::Fail(message.into()));
    }

    /// Makes the next `open` call succeed without ever raising an event.
    pub async fn stall_next_open(&self) {
        self.inner.scripted.lock().await.push_back(OpenBehavior::Silent);
    }

    /// Number of successful `open` calls so far.
    pub fn opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    /// Number of handles that have not been closed or dropped.
    pub fn live_handles(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> usize {
        self.inner.logouts.load(Ordering::SeqCst)
    }

    /// Returns true while a connection for `user_id` is open.
    pub fn is_linked(&self, user_id: &str) -> bool {
        self.inner.links.contains_key(user_id)
    }

    /// Simulates the user scanning the QR code with a generated account.
    pub async fn confirm_scan(&self, user_id: &str) -> bool {
        let number = 628_000_000_000_u64 + u64::from(rand::random::<u32>() % 1_000_000_000);
        let jid = format!("{number}:1@s.whatsapp.net");
        self.confirm_scan_as(user_id, &jid, None).await
    }

    /// Simulates a scan binding the session to `jid`.
    pub async fn confirm_scan_as(&self, user_id: &str, jid: &str, push_name: Option<&str>) -> bool {
        let me = MeInfo {
            jid: jid.to_owned(),
            push_name: push_name.map(ToOwned::to_owned),
        };

        let (tx, credentials) = {
            let Some(mut link) = self.inner.links.get_mut(user_id) else {
                return false;
            };
            link.credentials.me = Some(me.clone());
            (link.tx.clone(), link.credentials.clone())
        };

        tx.send(ClientEvent::CredentialsRotated(credentials)).await.is_ok()
            && tx
                .send(ClientEvent::Open(SessionIdentity::from(&me)))
                .await
                .is_ok()
    }

    /// Simulates the network closing the connection.
    pub async fn close(&self, user_id: &str, reason: CloseReason) -> bool {
        self.emit(user_id, ClientEvent::Close(reason)).await
    }

    /// Simulates a credential rotation on an open connection.
    pub async fn rotate_credentials(&self, user_id: &str) -> bool {
        let credentials = {
            let Some(mut link) = self.inner.links.get_mut(user_id) else {
                return false;
            };
            let me = link.credentials.me.clone();
            link.credentials = Credentials {
                me,
                ..Credentials::generate()
            };
            link.credentials.clone()
        };

        self.emit(user_id, ClientEvent::CredentialsRotated(credentials))
            .await
    }

    pub async fn sent_messages(&self) -> Vec<SentMessage> {
        self.inner.sent.lock().await.clone()
    }

    async fn emit(&self, user_id: &str, event: ClientEvent) -> bool {
        let tx = self.inner.links.get(user_id).map(|link| link.tx.clone());
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    fn current_link_id(&self, user_id: &str) -> Option<u64> {
        self.inner.links.get(user_id).map(|link| link.id)
    }

    fn schedule_auto_pair(&self, user_id: &str, link_id: u64, delay: Duration) {
        let client = self.clone();
        let user_id = user_id.to_owned();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if client.current_link_id(&user_id) == Some(link_id) {
                tracing::debug!(user_id, "synthetic client auto-confirming scan");
                client.confirm_scan(&user_id).await;
            }
        });
    }
}

impl ProtocolClient for SyntheticClient {
    fn open<'a>(
        &'a self,
        user_id: &'a str,
        credentials: Option<Credentials>,
    ) -> BoxFuture<'a, Result<ClientConnection, ClientError>> {
        Box::pin(async move {
            let behavior = self.inner.scripted.lock().await.pop_front();
            if let Some(OpenBehavior::Fail(message)) = &behavior {
                return Err(ClientError::Connect(message.clone()));
            }

            self.inner.opened.fetch_add(1, Ordering::SeqCst);
            let link_id = self.inner.next_link_id.fetch_add(1, Ordering::SeqCst) + 1;
            let (tx, rx) = mpsc::channel(EVENT_CAPACITY);

            let fresh = credentials.is_none();
            let credentials = credentials.unwrap_or_else(Credentials::generate);
            self.inner.links.insert(
                user_id.to_owned(),
                Link {
                    id: link_id,
                    tx: tx.clone(),
                    credentials: credentials.clone(),
                },
            );
            self.inner.live.fetch_add(1, Ordering::SeqCst);

            let handle = SyntheticHandle {
                inner: self.inner.clone(),
                user_id: user_id.to_owned(),
                link_id,
                closed: false,
            };

            if behavior.is_none() {
                if fresh {
                    let _ = tx.try_send(ClientEvent::CredentialsRotated(credentials.clone()));
                }
                match &credentials.me {
                    Some(me) => {
                        let _ = tx.try_send(ClientEvent::Open(SessionIdentity::from(me)));
                    }
                    None => {
                        let _ = tx.try_send(ClientEvent::Qr(synthetic_qr(&credentials)));
                        if let Some(delay) = self.inner.auto_pair {
                            self.schedule_auto_pair(user_id, link_id, delay);
                        }
                    }
                }
            }

            Ok(ClientConnection::new(Box::new(handle), rx))
        })
    }
}

struct SyntheticHandle {
    inner: Arc<Inner>,
    user_id: String,
    link_id: u64,
    closed: bool,
}

impl SyntheticHandle {
    fn release(&mut self) {
        if self.closed {
            return;
        }

        self.closed = true;
        self.inner.live.fetch_sub(1, Ordering::SeqCst);
        let link_id = self.link_id;
        self.inner
            .links
            .remove_if(&self.user_id, |_, link| link.id == link_id);
    }
}

impl Drop for SyntheticHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl ProtocolHandle for SyntheticHandle {
    fn send_text<'a>(
        &'a mut self,
        to: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<String, ClientError>> {
        Box::pin(async move {
            if self.closed {
                return Err(ClientError::Closed);
            }

            let message_id = format!("3EB0{}", Uuid::new_v4().simple()).to_uppercase();
            self.inner.sent.lock().await.push(SentMessage {
                user_id: self.user_id.clone(),
                to: to.to_owned(),
                text: text.to_owned(),
                message_id: message_id.clone(),
            });
            Ok(message_id)
        })
    }

    fn logout(&mut self) -> BoxFuture<'_, Result<(), ClientError>> {
        Box::pin(async move {
            if self.closed {
                return Err(ClientError::Closed);
            }

            self.inner.logouts.fetch_add(1, Ordering::SeqCst);
            self.release();
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.release();
        })
    }
}

fn synthetic_qr(credentials: &Credentials) -> String {
    let reference = format!("2@{}", Uuid::new_v4().simple());
    generate_qr_string(
        &reference,
        &credentials.key_bytes("noiseKey").unwrap_or_default(),
        &credentials.key_bytes("identityKey").unwrap_or_default(),
        &credentials.key_bytes("advSecretKey").unwrap_or_default(),
    )
}
