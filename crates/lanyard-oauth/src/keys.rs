//! Device-bound signing key management.
//!
//! One EC P-256 key pair per install, generated lazily and persisted as
//! PKCS#8 DER through the secure store. The private key never leaves the
//! store un-encrypted and is never logged.

use lanyard_common::SecureStore;
use p256::ecdsa::SigningKey;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use tokio::sync::Mutex;

use crate::error::{AuthError, Result};

const KEY_STORAGE_KEY: &str = "dpop_private_key";

pub struct KeyManager<S> {
    store: S,
    cached: Mutex<Option<SigningKey>>,
}

impl<S: SecureStore> KeyManager<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cached: Mutex::new(None),
        }
    }

    /// Load or create the device key pair. Idempotent; the mutex serializes
    /// concurrent first-time generation so exactly one key is ever created.
    ///
    /// Stored bytes that fail to decode are treated as absent: the server
    /// cannot validate proofs against a corrupt key either way, so we
    /// regenerate and let the device re-authenticate.
    pub async fn get_or_create(&self) -> Result<SigningKey> {
        let mut cached = self.cached.lock().await;
        if let Some(key) = cached.as_ref() {
            return Ok(key.clone());
        }

        if let Some(bytes) = self.store.load(KEY_STORAGE_KEY).await? {
            match SigningKey::from_pkcs8_der(&bytes) {
                Ok(key) => {
                    *cached = Some(key.clone());
                    return Ok(key);
                }
                Err(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("stored device key is corrupt, regenerating");
                }
            }
        }

        let key = SigningKey::random(&mut rand::thread_rng());
        let der = key
            .to_pkcs8_der()
            .map_err(|e| AuthError::ProofSigning(format!("pkcs8 encoding failed: {e}")))?;
        self.store.save(KEY_STORAGE_KEY, der.as_bytes()).await?;
        *cached = Some(key.clone());
        Ok(key)
    }

    /// Delete the persisted key pair and drop the cached copy.
    pub async fn wipe(&self) -> Result<()> {
        let mut cached = self.cached.lock().await;
        self.store.delete(KEY_STORAGE_KEY).await?;
        *cached = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanyard_common::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn key_is_stable_across_calls() {
        let manager = KeyManager::new(MemoryStore::default());
        let a = manager.get_or_create().await.unwrap();
        let b = manager.get_or_create().await.unwrap();
        assert_eq!(a.verifying_key(), b.verifying_key());
    }

    #[tokio::test]
    async fn key_is_reloaded_from_store() {
        let store = MemoryStore::default();
        let first = KeyManager::new(store.clone())
            .get_or_create()
            .await
            .unwrap();
        let second = KeyManager::new(store).get_or_create().await.unwrap();
        assert_eq!(first.verifying_key(), second.verifying_key());
    }

    #[tokio::test]
    async fn corrupt_key_regenerates() {
        let store = MemoryStore::default();
        store.save("dpop_private_key", b"not pkcs8").await.unwrap();
        let manager = KeyManager::new(store.clone());
        let key = manager.get_or_create().await.unwrap();
        // the replacement key was persisted
        let reloaded = KeyManager::new(store).get_or_create().await.unwrap();
        assert_eq!(key.verifying_key(), reloaded.verifying_key());
    }

    #[tokio::test]
    async fn wipe_forces_new_key() {
        let manager = KeyManager::new(MemoryStore::default());
        let a = manager.get_or_create().await.unwrap();
        manager.wipe().await.unwrap();
        let b = manager.get_or_create().await.unwrap();
        assert_ne!(a.verifying_key(), b.verifying_key());
    }

    #[tokio::test]
    async fn concurrent_first_use_creates_one_key() {
        let manager = Arc::new(KeyManager::new(MemoryStore::default()));
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let m = manager.clone();
                tokio::spawn(async move { m.get_or_create().await.unwrap() })
            })
            .collect();
        let mut keys = Vec::new();
        for t in tasks {
            keys.push(t.await.unwrap());
        }
        for k in &keys[1..] {
            assert_eq!(k.verifying_key(), keys[0].verifying_key());
        }
    }
}
