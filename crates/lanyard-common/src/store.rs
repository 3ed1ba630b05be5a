//! Secure storage capability trait and an in-memory implementation.
//!
//! Platform keystores (Keychain, EncryptedSharedPreferences, extension
//! storage) all reduce to the same three operations on opaque byte blobs;
//! the auth core only ever talks to this trait.

use async_trait::async_trait;
use miette::Diagnostic;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Errors emitted by secure stores.
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum StoreError {
    /// Filesystem or I/O error
    #[error("I/O error: {0}")]
    #[diagnostic(code(lanyard::store::io))]
    Io(#[from] std::io::Error),
    /// Serialization error (e.g., JSON)
    #[error("serialization error: {0}")]
    #[diagnostic(code(lanyard::store::serde))]
    Serde(#[from] serde_json::Error),
    /// Stored data failed authentication or decryption
    #[error("sealed record could not be opened")]
    #[diagnostic(
        code(lanyard::store::seal),
        help("the store file may be corrupt or was written with a different key")
    )]
    Seal,
    /// Any other error from a backend implementation
    #[error(transparent)]
    #[diagnostic(code(lanyard::store::other))]
    Other(#[from] Box<dyn StdError + Send + Sync>),
}

/// Pluggable encrypted-at-rest key-value storage.
///
/// Implementations must not log or otherwise expose stored values; callers
/// put private key material through this interface.
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Load the bytes stored under `key`, if present.
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    /// Persist `value` under `key`, replacing any previous value.
    async fn save(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    /// Delete the value stored under `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: SecureStore + ?Sized> SecureStore for Arc<T> {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.as_ref().load(key).await
    }
    async fn save(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.as_ref().save(key, value).await
    }
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.as_ref().delete(key).await
    }
}

/// In-memory store suitable for short-lived sessions and tests.
#[derive(Clone, Default)]
pub struct MemoryStore(Arc<RwLock<HashMap<String, Vec<u8>>>>);

#[async_trait]
impl SecureStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.0.read().await.get(key).cloned())
    }
    async fn save(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.0.write().await.insert(key.to_owned(), value.to_vec());
        Ok(())
    }
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.0.write().await.remove(key);
        Ok(())
    }
}
