//! Credential storage: access/refresh tokens and the legacy session cookie.
//!
//! The whole credential set is one sealed record, so concurrent readers
//! never observe a half-updated access/refresh pair, and `clear_all` wipes
//! everything in one step.

use lanyard_common::SecureStore;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;

const CREDENTIAL_STORAGE_KEY: &str = "credentials";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix seconds; `None` when the server did not report a lifetime.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    /// Cookie value for endpoints that still want the legacy session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_cookie: Option<String>,
}

pub struct CredentialStore<S> {
    store: S,
    current: RwLock<Option<Credential>>,
}

impl<S: SecureStore> CredentialStore<S> {
    /// Construct with whatever credential record is persisted, if any.
    /// A record that fails to decode is treated as absent.
    pub async fn load(store: S) -> Result<Self> {
        let current = match store.load(CREDENTIAL_STORAGE_KEY).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).ok(),
            Ok(None) => None,
            // Undecryptable record: same as corrupt, start logged out.
            Err(_) => None,
        };
        Ok(Self {
            store,
            current: RwLock::new(current),
        })
    }

    pub async fn get(&self) -> Option<Credential> {
        self.current.read().await.clone()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|c| c.access_token.clone())
    }

    /// Replace the credential set (login / token exchange).
    pub async fn set(&self, credential: Credential) -> Result<()> {
        let mut guard = self.current.write().await;
        self.persist(&credential).await?;
        *guard = Some(credential);
        Ok(())
    }

    /// Apply a refresh result. A rotated refresh token overwrites the old
    /// one; when the server omits it, the existing one is kept.
    pub async fn update_tokens(
        &self,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: Option<i64>,
    ) -> Result<()> {
        let mut guard = self.current.write().await;
        let mut credential = guard.clone().unwrap_or(Credential {
            access_token: String::new(),
            refresh_token: None,
            expires_at: None,
            session_cookie: None,
        });
        credential.access_token = access_token;
        if refresh_token.is_some() {
            credential.refresh_token = refresh_token;
        }
        credential.expires_at = expires_at;
        self.persist(&credential).await?;
        *guard = Some(credential);
        Ok(())
    }

    /// Store a session cookie captured from a response.
    pub async fn set_session_cookie(&self, value: String) -> Result<()> {
        let mut guard = self.current.write().await;
        if let Some(credential) = guard.as_mut() {
            credential.session_cookie = Some(value);
            let snapshot = credential.clone();
            self.persist(&snapshot).await?;
        }
        Ok(())
    }

    /// Wipe every field, memory and persisted record together.
    pub async fn clear_all(&self) -> Result<()> {
        let mut guard = self.current.write().await;
        self.store.delete(CREDENTIAL_STORAGE_KEY).await?;
        *guard = None;
        Ok(())
    }

    async fn persist(&self, credential: &Credential) -> Result<()> {
        let bytes = serde_json::to_vec(credential)?;
        self.store.save(CREDENTIAL_STORAGE_KEY, &bytes).await?;
        Ok(())
    }
}
