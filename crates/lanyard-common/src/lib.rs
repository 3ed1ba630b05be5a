//! Shared plumbing for Lanyard: the HTTP client abstraction and the
//! secure key-value storage capability. Auth logic lives in `lanyard-oauth`.

pub mod http_client;
pub mod sealed;
pub mod store;

pub use http_client::HttpClient;
pub use sealed::SealedFileStore;
pub use store::{MemoryStore, SecureStore, StoreError};
