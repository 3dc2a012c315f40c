//! Server-side session records
//!
//! The browser only ever holds an opaque session id. Everything else (the
//! encrypted token blob, the outstanding OAuth `state`, the re-auth flag) lives
//! in a `SessionStore`. Each method is a single atomic update of one record.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::utils::crypto::generate_nonce;

/// Outstanding anti-CSRF `state` issued for a session
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PendingState {
    pub value: String,
    pub issued_at: DateTime<Utc>,
}

/// One browser client's server-side session
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SessionRecord {
    pub session_id: String,
    /// Encrypted `Token`, written only through `TokenStore`
    pub token: Option<String>,
    pub pending_state: Option<PendingState>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub reauth_required: bool,
}

impl SessionRecord {
    /// Create an empty session with a fresh random id
    #[must_use]
    pub fn new(now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            session_id: generate_nonce(32),
            token: None,
            pending_state: None,
            created_at: now,
            expires_at: now + ttl,
            reauth_required: false,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Storage backend for session records
///
/// Implementations must make every method atomic with respect to the record it
/// touches. Callers never read-modify-write a whole record.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new record
    async fn create(&self, record: SessionRecord) -> Result<()>;

    /// Fetch a snapshot of a record
    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>>;

    /// Delete a record, returning whether it existed
    async fn remove(&self, session_id: &str) -> Result<bool>;

    /// Replace the pending `state`, returning false if the session is gone
    async fn set_pending_state(&self, session_id: &str, state: PendingState) -> Result<bool>;

    /// Remove and return the pending `state`
    async fn take_pending_state(&self, session_id: &str) -> Result<Option<PendingState>>;

    /// Replace the encrypted token blob, returning false if the session is gone
    async fn set_token(&self, session_id: &str, blob: String) -> Result<bool>;

    /// Set or clear the re-authentication flag
    async fn set_reauth_required(&self, session_id: &str, required: bool) -> Result<bool>;

    /// Drop every record expired at `now`, returning how many were removed
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Process-local session store
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records, expired or not
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    async fn update<F>(&self, session_id: &str, apply: F) -> bool
    where
        F: FnOnce(&mut SessionRecord) + Send,
    {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(record) => {
                apply(record);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, record: SessionRecord) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(record.session_id.clone(), record);
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn remove(&self, session_id: &str) -> Result<bool> {
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }

    async fn set_pending_state(&self, session_id: &str, state: PendingState) -> Result<bool> {
        Ok(self
            .update(session_id, |record| record.pending_state = Some(state))
            .await)
    }

    async fn take_pending_state(&self, session_id: &str) -> Result<Option<PendingState>> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions
            .get_mut(session_id)
            .and_then(|record| record.pending_state.take()))
    }

    async fn set_token(&self, session_id: &str, blob: String) -> Result<bool> {
        Ok(self
            .update(session_id, |record| record.token = Some(blob))
            .await)
    }

    async fn set_reauth_required(&self, session_id: &str, required: bool) -> Result<bool> {
        Ok(self
            .update(session_id, |record| record.reauth_required = required)
            .await)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, record| !record.is_expired(now));
        Ok(before - sessions.len())
    }
}
