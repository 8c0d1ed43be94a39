pub mod error;
pub mod handle;
pub(crate) mod runner;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::{RwLock, mpsc};

use crate::{
    config::SessionConfig,
    db::credential_store::CredentialStore,
    events::{EventBroadcaster, SessionEvent},
    session::{
        error::SessionError,
        handle::{SessionHandle, SessionSnapshot, SessionState},
        runner::RunnerContext,
    },
    wa::client::ProtocolClient,
};

const COMMAND_CAPACITY: usize = 32;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Owns one session per tenant and routes requests to it.
///
/// Cheap to clone; all clones share the same map.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    sessions: Arc<DashMap<String, SessionHandle>>,
    client: Arc<dyn ProtocolClient>,
    credentials: Arc<dyn CredentialStore>,
    events: EventBroadcaster,
    config: SessionConfig,
    next_generation: AtomicU64,
}

/// A runner's claim on its registry entry.
///
/// Releasing only removes the entry if it still belongs to the same
/// generation, so a replacement session is never evicted by its predecessor.
#[derive(Clone)]
pub(crate) struct RegistrySlot {
    sessions: Arc<DashMap<String, SessionHandle>>,
    user_id: String,
    generation: u64,
}

impl RegistrySlot {
    pub(crate) fn release(&self) {
        let generation = self.generation;
        let removed = self
            .sessions
            .remove_if(&self.user_id, |_, handle| handle.generation() == generation);
        if removed.is_some() {
            tracing::debug!(user_id = %self.user_id, generation, "session left registry");
        }
    }
}

impl SessionRegistry {
    pub fn new(
        config: SessionConfig,
        client: Arc<dyn ProtocolClient>,
        credentials: Arc<dyn CredentialStore>,
        events: EventBroadcaster,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: Arc::new(DashMap::new()),
                client,
                credentials,
                events,
                config,
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.inner.events
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Ensures a session exists for `user_id` and asks it to connect.
    ///
    /// Idempotent: while a session is initializing, awaiting a scan or
    /// connected, further calls return `Ok` without opening anything.
    pub async fn request_connect(&self, user_id: &str) -> Result<(), SessionError> {
        let user_id = normalize_user_id(user_id)?;
        let handle = self.handle_for(user_id);

        match handle.connect().await {
            Err(SessionError::SessionClosed) => {
                tracing::debug!(user_id, "session stopped during connect, retrying once");
                self.handle_for(user_id).connect().await
            }
            other => other,
        }
    }

    /// Logs out `user_id`, wiping its credentials even when no session is live.
    pub async fn request_logout(&self, user_id: &str) -> Result<(), SessionError> {
        let user_id = normalize_user_id(user_id)?;
        let existing = self.get(user_id);

        let result = match existing {
            Some(handle) if !handle.is_finished() => {
                let result = handle.logout().await;
                self.remove_generation(user_id, handle.generation());
                match result {
                    Err(SessionError::SessionClosed) => {
                        if handle.snapshot().await.state == SessionState::LoggedOut {
                            Ok(())
                        } else {
                            self.forget_offline(user_id).await
                        }
                    }
                    other => other,
                }
            }
            stale => {
                if let Some(handle) = stale {
                    handle.abort();
                    self.remove_generation(user_id, handle.generation());
                }
                self.forget_offline(user_id).await
            }
        };

        if result.is_ok() && self.inner.config.rearm_after_logout {
            self.rearm(user_id);
        }
        result
    }

    /// Current snapshot, or an idle one when the user has no session.
    pub async fn status(&self, user_id: &str) -> SessionSnapshot {
        let user_id = user_id.trim();
        match self.get(user_id) {
            Some(handle) => handle.snapshot().await,
            None => SessionSnapshot::idle(user_id),
        }
    }

    /// Sends a text message through a connected session.
    pub async fn send_text(&self, user_id: &str, to: &str, text: &str) -> Result<String, SessionError> {
        let user_id = normalize_user_id(user_id)?;
        let handle = self.get(user_id).ok_or(SessionError::NotFound)?;
        handle.send_text(to, text).await
    }

    pub fn active_sessions(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.inner.sessions.contains_key(user_id.trim())
    }

    /// Generation of the entry currently registered for `user_id`.
    pub fn generation(&self, user_id: &str) -> Option<u64> {
        self.get(user_id.trim()).map(|handle| handle.generation())
    }

    /// Kills the runner task for `user_id` without any cleanup.
    ///
    /// The entry stays in the map as a stopped session and is replaced by the
    /// next connect. Returns false when there is no entry.
    #[doc(hidden)]
    pub fn kill_runner(&self, user_id: &str) -> bool {
        match self.get(user_id.trim()) {
            Some(handle) => {
                tracing::warn!(user_id, generation = handle.generation(), "killing session runner");
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Stops every runner, keeping persisted credentials for the next start.
    pub async fn shutdown(&self) {
        let handles: Vec<SessionHandle> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.inner.sessions.clear();

        tracing::info!(sessions = handles.len(), "stopping sessions");
        let stops = handles.iter().map(|handle| async move {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle.shutdown()).await.is_err() {
                tracing::warn!(generation = handle.generation(), "session did not stop in time, aborting");
                handle.abort();
            }
        });
        futures::future::join_all(stops).await;
    }

    fn get(&self, user_id: &str) -> Option<SessionHandle> {
        self.inner
            .sessions
            .get(user_id)
            .map(|entry| entry.value().clone())
    }

    /// Returns the live handle for `user_id`, replacing a finished one.
    fn handle_for(&self, user_id: &str) -> SessionHandle {
        match self.inner.sessions.entry(user_id.to_owned()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_finished() {
                    return entry.get().clone();
                }

                tracing::warn!(
                    user_id,
                    generation = entry.get().generation(),
                    "replacing stopped session"
                );
                entry.get().abort();
                let handle = self.spawn_session(user_id);
                entry.insert(handle.clone());
                handle
            }
            Entry::Vacant(entry) => {
                let handle = self.spawn_session(user_id);
                entry.insert(handle.clone());
                handle
            }
        }
    }

    fn spawn_session(&self, user_id: &str) -> SessionHandle {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let snapshot = Arc::new(RwLock::new(SessionSnapshot::idle(user_id)));

        let ctx = RunnerContext {
            user_id: user_id.to_owned(),
            snapshot: snapshot.clone(),
            client: self.inner.client.clone(),
            credentials: self.inner.credentials.clone(),
            events: self.inner.events.clone(),
            config: self.inner.config.clone(),
            slot: RegistrySlot {
                sessions: self.inner.sessions.clone(),
                user_id: user_id.to_owned(),
                generation,
            },
        };

        tracing::debug!(user_id, generation, "spawning session runner");
        let task = tokio::spawn(runner::run(ctx, rx));
        SessionHandle::new(generation, tx, snapshot, task.abort_handle())
    }

    fn remove_generation(&self, user_id: &str, generation: u64) {
        self.inner
            .sessions
            .remove_if(user_id, |_, handle| handle.generation() == generation);
    }

    async fn forget_offline(&self, user_id: &str) -> Result<(), SessionError> {
        self.inner.credentials.wipe(user_id).await?;
        tracing::info!(user_id, "credentials wiped for offline session");
        self.inner.events.emit(SessionEvent::LoggedOut {
            user_id: user_id.to_owned(),
        });
        Ok(())
    }

    fn rearm(&self, user_id: &str) {
        let registry = self.clone();
        let user_id = user_id.to_owned();
        tokio::spawn(async move {
            if let Err(error) = registry.request_connect(&user_id).await {
                tracing::warn!(user_id, error = %error, "re-arming connect after logout failed");
            }
        });
    }
}

fn normalize_user_id(user_id: &str) -> Result<&str, SessionError> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(SessionError::InvalidUserId);
    }
    Ok(user_id)
}
