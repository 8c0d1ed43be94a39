#![allow(dead_code)]

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use blastwarp_api::{
    config::{ContactJobConfig, SessionConfig},
    contacts::{
        Contact,
        ContactPage,
        ContactPatch,
        ContactQuery,
        ContactStore,
        ContactStoreError,
        InMemoryContactStore,
        NewContact,
    },
    db::credential_store::{CredentialStore, CredentialStoreError, InMemoryCredentialStore},
    events::{EventBroadcaster, EventSubscription, SessionEvent},
    session::SessionRegistry,
    wa::{Credentials, SyntheticClient},
};
use futures::future::BoxFuture;
use tokio::sync::Mutex;

pub const EVENT_WAIT: Duration = Duration::from_secs(2);

pub fn session_config() -> SessionConfig {
    SessionConfig {
        reconnect_delay: Duration::from_millis(50),
        connect_timeout: Duration::from_secs(2),
        rearm_after_logout: false,
        print_qr: false,
    }
}

/// Registry wired to a synthetic client and the given credential store.
pub struct Harness {
    pub registry: SessionRegistry,
    pub client: SyntheticClient,
    pub credentials: Arc<dyn CredentialStore>,
}

impl Harness {
    pub fn new(config: SessionConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        let client = SyntheticClient::new();
        let registry = SessionRegistry::new(
            config,
            Arc::new(client.clone()),
            credentials.clone(),
            EventBroadcaster::new(256),
        );
        Self {
            registry,
            client,
            credentials,
        }
    }

    pub fn in_memory(config: SessionConfig) -> Self {
        Self::new(config, Arc::new(InMemoryCredentialStore::new()))
    }

    pub fn subscribe(&self, user_id: &str) -> EventSubscription {
        self.registry.events().subscribe(Some(user_id))
    }
}

/// Waits for the next event matching `predicate`, skipping the rest.
pub async fn wait_for<F>(
    subscription: &mut EventSubscription,
    mut predicate: F,
) -> anyhow::Result<SessionEvent>
where
    F: FnMut(&SessionEvent) -> bool,
{
    tokio::time::timeout(EVENT_WAIT, async {
        loop {
            match subscription.recv().await {
                Some(event) if predicate(&event) => return Ok(event),
                Some(_) => continue,
                None => anyhow::bail!("event stream closed"),
            }
        }
    })
    .await?
}

/// Collects events up to and including the first one matching `until`.
pub async fn collect_until<F>(
    subscription: &mut EventSubscription,
    mut until: F,
) -> anyhow::Result<Vec<SessionEvent>>
where
    F: FnMut(&SessionEvent) -> bool,
{
    let mut seen = Vec::new();
    tokio::time::timeout(EVENT_WAIT, async {
        loop {
            let Some(event) = subscription.recv().await else {
                anyhow::bail!("event stream closed");
            };
            let done = until(&event);
            seen.push(event);
            if done {
                return Ok(());
            }
        }
    })
    .await??;
    Ok(seen)
}

pub fn is_qr(event: &SessionEvent) -> bool {
    matches!(event, SessionEvent::Qr { .. })
}

pub fn is_logged_out(event: &SessionEvent) -> bool {
    matches!(event, SessionEvent::LoggedOut { .. })
}

pub fn is_connected(event: &SessionEvent) -> bool {
    matches!(
        event,
        SessionEvent::StatusChanged {
            state: blastwarp_api::session::handle::SessionState::Connected,
            ..
        }
    )
}

pub fn job_config(batch_size: usize, delay: Duration) -> ContactJobConfig {
    ContactJobConfig {
        import_batch_size: batch_size,
        import_delay: delay,
        reset_page_size: 100,
        reset_batch_size: 5,
        reset_delay: delay,
    }
}

/// Contact store wrapper that counts calls and injects failures.
#[derive(Clone, Default)]
pub struct RecordingStore {
    pub inner: InMemoryContactStore,
    pub lists: Arc<AtomicUsize>,
    pub creates: Arc<AtomicUsize>,
    pub updates: Arc<AtomicUsize>,
    pub deletes: Arc<AtomicUsize>,
    fail_listing: Arc<Mutex<bool>>,
    fail_deletes: Arc<Mutex<HashSet<String>>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_listing(&self) {
        *self.fail_listing.lock().await = true;
    }

    pub async fn fail_delete_of(&self, id: &str) {
        self.fail_deletes.lock().await.insert(id.to_owned());
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

impl ContactStore for RecordingStore {
    fn list<'a>(&'a self, query: &'a ContactQuery) -> BoxFuture<'a, Result<ContactPage, ContactStoreError>> {
        Box::pin(async move {
            self.lists.fetch_add(1, Ordering::SeqCst);
            if *self.fail_listing.lock().await {
                return Err(ContactStoreError::Transport("listing unavailable".to_owned()));
            }
            self.inner.list(query).await
        })
    }

    fn create<'a>(&'a self, contact: NewContact) -> BoxFuture<'a, Result<Contact, ContactStoreError>> {
        Box::pin(async move {
            self.creates.fetch_add(1, Ordering::SeqCst);
            self.inner.create(contact).await
        })
    }

    fn update<'a>(
        &'a self,
        id: &'a str,
        patch: ContactPatch,
    ) -> BoxFuture<'a, Result<Contact, ContactStoreError>> {
        Box::pin(async move {
            self.updates.fetch_add(1, Ordering::SeqCst);
            self.inner.update(id, patch).await
        })
    }

    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), ContactStoreError>> {
        Box::pin(async move {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            if self.fail_deletes.lock().await.contains(id) {
                return Err(ContactStoreError::Status {
                    code: 500,
                    body: "delete rejected".to_owned(),
                });
            }
            self.inner.delete(id).await
        })
    }
}

/// Credential store whose wipes always fail with an io error.
#[derive(Clone, Default)]
pub struct UnwipeableStore {
    pub inner: InMemoryCredentialStore,
}

impl CredentialStore for UnwipeableStore {
    fn load<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Credentials>, CredentialStoreError>> {
        self.inner.load(user_id)
    }

    fn save<'a>(
        &'a self,
        user_id: &'a str,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, Result<(), CredentialStoreError>> {
        self.inner.save(user_id, credentials)
    }

    fn wipe<'a>(&'a self, _user_id: &'a str) -> BoxFuture<'a, Result<(), CredentialStoreError>> {
        Box::pin(async {
            Err(CredentialStoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only session directory",
            )))
        })
    }

    fn exists<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<bool, CredentialStoreError>> {
        self.inner.exists(user_id)
    }
}
