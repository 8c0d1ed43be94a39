pub mod appwrite;
pub mod error;
pub mod service;
pub mod store;

pub use appwrite::AppwriteContactStore;
pub use error::{ContactError, ContactStoreError};
pub use service::{ContactService, ImportRecord, ImportReport, ListOptions, ResetReport};
pub use store::{
    Contact,
    ContactField,
    ContactPage,
    ContactPatch,
    ContactQuery,
    ContactStatus,
    ContactStore,
    Filter,
    InMemoryContactStore,
    NewContact,
};
