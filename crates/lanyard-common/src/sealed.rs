//! Encrypted file-backed store.
//!
//! Values are sealed with ChaCha20-Poly1305 under a caller-supplied 32-byte
//! device key and written into a single JSON map keyed by entry name. The
//! sealing format is `nonce (12 bytes) || ciphertext+tag`, base64url-encoded
//! in the file.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::store::{SecureStore, StoreError};

/// Nonce size for ChaCha20-Poly1305 (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Key size for ChaCha20-Poly1305 (256 bits).
pub const KEY_SIZE: usize = 32;

/// Generate a random device key for a new install.
pub fn generate_device_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// File-backed store holding sealed records in a JSON map.
///
/// The key is expected to come from platform key material (keystore-wrapped
/// on mobile, OS keyring on desktop); this type only does the sealing.
#[derive(Clone)]
pub struct SealedFileStore {
    path: PathBuf,
    key: [u8; KEY_SIZE],
}

impl SealedFileStore {
    /// Create a store at `path` sealed under `key`. Creates parent
    /// directories and an empty map if the file does not exist yet.
    pub fn new(path: impl AsRef<Path>, key: [u8; KEY_SIZE]) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if !path.exists() {
            std::fs::write(&path, b"{}")?;
        }
        Ok(Self { path, key })
    }

    fn seal(&self, plaintext: &[u8]) -> Result<String, StoreError> {
        let cipher =
            ChaCha20Poly1305::new_from_slice(&self.key).map_err(|_| StoreError::Seal)?;
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| StoreError::Seal)?;
        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    fn open(&self, encoded: &str) -> Result<Vec<u8>, StoreError> {
        let bytes = URL_SAFE_NO_PAD.decode(encoded).map_err(|_| StoreError::Seal)?;
        if bytes.len() < NONCE_SIZE {
            return Err(StoreError::Seal);
        }
        let (nonce, sealed) = bytes.split_at(NONCE_SIZE);
        let cipher =
            ChaCha20Poly1305::new_from_slice(&self.key).map_err(|_| StoreError::Seal)?;
        cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| StoreError::Seal)
    }

    fn read_map(&self) -> Result<Value, StoreError> {
        let file = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&file)?)
    }

    fn write_map(&self, map: &Value) -> Result<(), StoreError> {
        std::fs::write(&self.path, serde_json::to_string_pretty(map)?)?;
        Ok(())
    }
}

#[async_trait]
impl SecureStore for SealedFileStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let map = self.read_map()?;
        let Some(entry) = map.get(key).and_then(Value::as_str) else {
            return Ok(None);
        };
        Ok(Some(self.open(entry)?))
    }

    async fn save(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut map = self.read_map()?;
        let sealed = self.seal(value)?;
        if let Some(map_obj) = map.as_object_mut() {
            map_obj.insert(key.to_owned(), Value::String(sealed));
            self.write_map(&map)
        } else {
            Err(StoreError::Other("invalid store file".into()))
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut map = self.read_map()?;
        if let Some(map_obj) = map.as_object_mut() {
            map_obj.remove(key);
            self.write_map(&map)
        } else {
            Err(StoreError::Other("invalid store file".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, SealedFileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store =
            SealedFileStore::new(dir.path().join("store.json"), generate_device_key()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn roundtrip_and_delete() {
        let (_dir, store) = temp_store();
        store.save("token", b"secret-bytes").await.unwrap();
        assert_eq!(
            store.load("token").await.unwrap().as_deref(),
            Some(&b"secret-bytes"[..])
        );
        store.delete("token").await.unwrap();
        assert!(store.load("token").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn values_are_not_plaintext_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = SealedFileStore::new(&path, generate_device_key()).unwrap();
        store.save("token", b"hunter2").await.unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("hunter2"));
    }

    #[tokio::test]
    async fn wrong_key_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = SealedFileStore::new(&path, generate_device_key()).unwrap();
        store.save("token", b"secret").await.unwrap();

        let other = SealedFileStore::new(&path, generate_device_key()).unwrap();
        assert!(matches!(other.load("token").await, Err(StoreError::Seal)));
    }
}
