use std::{
    collections::HashMap,
    fmt::Write,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::{fs, sync::RwLock};

use crate::wa::auth::Credentials;

const CREDENTIALS_FILE: &str = "creds.json";
const CREDENTIALS_TMP_FILE: &str = "creds.json.tmp";

/// Persistence contract for per-user protocol credentials.
pub trait CredentialStore: Send + Sync {
    /// Loads credentials for the target user, `None` when nothing is stored.
    fn load<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Credentials>, CredentialStoreError>>;

    /// Persists credentials for the target user, replacing previous ones.
    fn save<'a>(
        &'a self,
        user_id: &'a str,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, Result<(), CredentialStoreError>>;

    /// Forgets everything stored for the target user.
    fn wipe<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<(), CredentialStoreError>>;

    /// Returns true when credentials exist for the target user.
    fn exists<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<bool, CredentialStoreError>>;
}

/// One directory per user under an application-private root.
#[derive(Debug, Clone)]
pub struct FsCredentialStore {
    root: PathBuf,
}

impl FsCredentialStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory that holds every file for `user_id`.
    pub fn session_dir(&self, user_id: &str) -> PathBuf {
        self.root.join(encode_component(user_id))
    }
}

impl CredentialStore for FsCredentialStore {
    fn load<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Credentials>, CredentialStoreError>> {
        Box::pin(async move {
            let path = self.session_dir(user_id).join(CREDENTIALS_FILE);
            let raw = match fs::read(&path).await {
                Ok(raw) => raw,
                Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(error) => return Err(CredentialStoreError::Io(error)),
            };

            serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|source| CredentialStoreError::Corrupt {
                    user_id: user_id.to_owned(),
                    source,
                })
        })
    }

    fn save<'a>(
        &'a self,
        user_id: &'a str,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, Result<(), CredentialStoreError>> {
        Box::pin(async move {
            let dir = self.session_dir(user_id);
            fs::create_dir_all(&dir).await?;

            let serialized =
                serde_json::to_vec_pretty(credentials).map_err(CredentialStoreError::Serialization)?;
            let tmp_path = dir.join(CREDENTIALS_TMP_FILE);
            fs::write(&tmp_path, serialized).await?;
            fs::rename(&tmp_path, dir.join(CREDENTIALS_FILE)).await?;
            Ok(())
        })
    }

    fn wipe<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<(), CredentialStoreError>> {
        Box::pin(async move {
            match fs::remove_dir_all(self.session_dir(user_id)).await {
                Ok(()) => Ok(()),
                Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(error) => Err(CredentialStoreError::Io(error)),
            }
        })
    }

    fn exists<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<bool, CredentialStoreError>> {
        Box::pin(async move {
            Ok(fs::try_exists(self.session_dir(user_id).join(CREDENTIALS_FILE)).await?)
        })
    }
}

/// In-memory credential store used by tests and throwaway runs.
#[derive(Clone, Default)]
pub struct InMemoryCredentialStore {
    states: Arc<RwLock<HashMap<String, Credentials>>>,
}

impl InMemoryCredentialStore {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn load<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Credentials>, CredentialStoreError>> {
        Box::pin(async move {
            let guard = self.states.read().await;
            Ok(guard.get(user_id).cloned())
        })
    }

    fn save<'a>(
        &'a self,
        user_id: &'a str,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, Result<(), CredentialStoreError>> {
        Box::pin(async move {
            let mut guard = self.states.write().await;
            guard.insert(user_id.to_owned(), credentials.clone());
            Ok(())
        })
    }

    fn wipe<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<(), CredentialStoreError>> {
        Box::pin(async move {
            self.states.write().await.remove(user_id);
            Ok(())
        })
    }

    fn exists<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<bool, CredentialStoreError>> {
        Box::pin(async move { Ok(self.states.read().await.contains_key(user_id)) })
    }
}

/// Maps a user id onto a single path component, one-to-one.
///
/// Bytes outside `[A-Za-z0-9_-]` become `%XX`, so distinct ids never share a
/// directory and no id can name `.`, `..` or a nested path. The empty id maps
/// to a lone `%`, which no escaped id can produce.
fn encode_component(user_id: &str) -> String {
    if user_id.is_empty() {
        return "%".to_owned();
    }

    let mut encoded = String::with_capacity(user_id.len());
    for byte in user_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(char::from(byte));
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    encoded
}

/// Errors exposed by credential store operations.
#[derive(Debug, Error)]
pub enum CredentialStoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt credentials for {user_id}: {source}")]
    Corrupt {
        user_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::encode_component;

    #[test]
    fn encoding_blocks_traversal() {
        assert_eq!(encode_component("../etc"), "%2E%2E%2Fetc");
        assert_eq!(encode_component(".."), "%2E%2E");
        assert_eq!(encode_component("a/b\\c"), "a%2Fb%5Cc");
        assert_eq!(encode_component("user-42"), "user-42");
        assert_eq!(encode_component(""), "%");
    }

    #[test]
    fn distinct_ids_never_collide() {
        let ids = ["a/b", "a_b", "a b", "a:b", "a%2Fb", "a%b", "%", ""];
        let encoded: std::collections::HashSet<String> =
            ids.iter().map(|id| encode_component(id)).collect();
        assert_eq!(encoded.len(), ids.len());
    }
}
