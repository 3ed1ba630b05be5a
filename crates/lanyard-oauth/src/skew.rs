//! Clock-skew correction for proof timestamps.
//!
//! Best-effort, not NTP: the offset only needs to keep proof `iat` inside
//! the server's acceptance window. It is updated when the auth server
//! rejects a proof timestamp and hands us its own clock in the `Date`
//! response header.

use chrono::{DateTime, Utc};
use lanyard_common::SecureStore;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::{AuthError, Result};

const OFFSET_STORAGE_KEY: &str = "clock_offset_seconds";

pub struct ClockSkew<S> {
    store: S,
    /// Server time minus local time, in seconds.
    offset: AtomicI64,
}

impl<S: SecureStore> ClockSkew<S> {
    /// Construct with the persisted offset, defaulting to zero.
    pub async fn load(store: S) -> Result<Self> {
        let offset = match store.load(OFFSET_STORAGE_KEY).await? {
            Some(bytes) => std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(0),
            None => 0,
        };
        Ok(Self {
            store,
            offset: AtomicI64::new(offset),
        })
    }

    pub fn offset_seconds(&self) -> i64 {
        self.offset.load(Ordering::Relaxed)
    }

    /// Current Unix time with the correction applied.
    pub fn now_unix(&self) -> i64 {
        Utc::now().timestamp() + self.offset_seconds()
    }

    /// Record the server's clock from an HTTP `Date` header and persist the
    /// new offset. Returns the offset that was stored.
    pub async fn record_server_date(&self, date_header: &str) -> Result<i64> {
        let server: DateTime<chrono::FixedOffset> = DateTime::parse_from_rfc2822(date_header)
            .map_err(|e| AuthError::ServerDate(smol_str::format_smolstr!("{date_header}: {e}")))?;
        let offset = server.timestamp() - Utc::now().timestamp();
        self.offset.store(offset, Ordering::Relaxed);
        self.store
            .save(OFFSET_STORAGE_KEY, offset.to_string().as_bytes())
            .await?;
        #[cfg(feature = "tracing")]
        tracing::info!(offset_seconds = offset, "clock offset corrected from server Date");
        Ok(offset)
    }

    /// Forget the stored correction.
    pub async fn reset(&self) -> Result<()> {
        self.offset.store(0, Ordering::Relaxed);
        self.store.delete(OFFSET_STORAGE_KEY).await?;
        Ok(())
    }
}
