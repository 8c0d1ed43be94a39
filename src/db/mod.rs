pub mod credential_store;

pub use credential_store::{
    CredentialStore,
    CredentialStoreError,
    FsCredentialStore,
    InMemoryCredentialStore,
};
