//! Single-flight token refresh
//!
//! Every token write for a session happens while holding that session's async
//! lock. A caller that waited on the lock re-reads the token first and returns
//! it untouched if someone else already replaced the one it saw, so racing
//! requests produce one provider call between them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{Duration, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::AuthError;
use crate::models::Token;
use crate::provider::{call_with_retry, IdentityProvider, RetryPolicy};
use crate::session::SessionStore;
use crate::token_store::TokenStore;
use crate::utils::LoggingHelper;

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

pub struct RefreshCoordinator {
    provider: Arc<dyn IdentityProvider>,
    tokens: TokenStore,
    store: Arc<dyn SessionStore>,
    margin: Duration,
    policy: RetryPolicy,
    locks: Mutex<LockMap>,
}

/// Holds one session's lock and drops the map entry when the last holder leaves
struct SessionLockGuard<'a> {
    locks: &'a Mutex<LockMap>,
    session_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map still references the mutex: nobody holds or waits on it
        if locks
            .get(&self.session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.session_id);
        }
    }
}

impl RefreshCoordinator {
    #[must_use]
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        tokens: TokenStore,
        store: Arc<dyn SessionStore>,
        safety_margin_seconds: u64,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            tokens,
            store,
            margin: Duration::seconds(i64::try_from(safety_margin_seconds).unwrap_or(60)),
            policy,
            locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Return a token valid for longer than the safety margin, refreshing if needed
    ///
    /// # Errors
    ///
    /// - `NotAuthenticated` / `CorruptToken` when no usable token is stored
    /// - `RefreshFailed` when the provider refuses or cannot be reached; the
    ///   session is then flagged for re-authentication and keeps its old token
    pub async fn ensure_fresh(&self, session_id: &str) -> Result<Token, AuthError> {
        let observed = self.tokens.load(session_id).await?;
        if observed.is_fresh(Utc::now(), self.margin) {
            return Ok(observed);
        }
        self.refresh_after(session_id, &observed, false).await
    }

    /// Refresh even a fresh token, coalescing with concurrent refreshes
    ///
    /// # Errors
    ///
    /// Same as [`Self::ensure_fresh`]
    pub async fn force_refresh(&self, session_id: &str) -> Result<Token, AuthError> {
        let observed = self.tokens.load(session_id).await?;
        self.refresh_after(session_id, &observed, true).await
    }

    /// Store a newly exchanged token and clear any re-authentication flag
    ///
    /// # Errors
    ///
    /// Returns `SessionExpired` if the session vanished, `Storage` on store failure
    pub async fn install(&self, session_id: &str, token: &Token) -> Result<(), AuthError> {
        let _lock = self.lock_session(session_id).await;
        self.tokens.save(session_id, token).await?;
        self.store.set_reauth_required(session_id, false).await?;
        Ok(())
    }

    /// True while some caller holds the session's refresh lock
    #[must_use]
    pub fn is_refreshing(&self, session_id: &str) -> bool {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Number of sessions with a live lock entry
    #[must_use]
    pub fn active_locks(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn lock_session(&self, session_id: &str) -> SessionLockGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(session_id.to_string()).or_default())
        };

        SessionLockGuard {
            locks: &self.locks,
            session_id: session_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    async fn refresh_after(
        &self,
        session_id: &str,
        observed: &Token,
        forced: bool,
    ) -> Result<Token, AuthError> {
        let _lock = self.lock_session(session_id).await;

        let current = self.tokens.load(session_id).await?;
        if current != *observed {
            LoggingHelper::log_refresh_coalesced(session_id);
            return Ok(current);
        }

        let record = self
            .store
            .get(session_id)
            .await?
            .ok_or(AuthError::SessionExpired)?;
        if record.reauth_required {
            return Err(AuthError::RefreshFailed(
                "an earlier refresh failed, sign-in is required".to_string(),
            ));
        }
        if current.refresh_token.is_empty() {
            self.store.set_reauth_required(session_id, true).await?;
            return Err(AuthError::RefreshFailed(
                "the provider issued no refresh token".to_string(),
            ));
        }

        LoggingHelper::log_refresh_start(session_id, forced);
        let refreshed = call_with_retry("Token refresh", &self.policy, || {
            self.provider.refresh_token(&current.refresh_token)
        })
        .await;

        match refreshed {
            Ok(token) => {
                self.tokens.save(session_id, &token).await?;
                Ok(token)
            }
            Err(e) => {
                LoggingHelper::log_refresh_failed(session_id, &e);
                self.store.set_reauth_required(session_id, true).await?;
                Err(AuthError::RefreshFailed(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderError;
    use crate::session::{InMemorySessionStore, SessionRecord};
    use crate::testing::mock::MockIdentityProvider;
    use crate::utils::crypto::derive_encryption_key;

    struct Harness {
        provider: Arc<MockIdentityProvider>,
        coordinator: RefreshCoordinator,
        store: Arc<dyn SessionStore>,
        session_id: String,
    }

    /// Token handed out an hour ago that expires `expires_in_seconds` from now
    fn aged(access: &str, refresh: &str, expires_in_seconds: i64) -> Token {
        let now = Utc::now();
        Token::expiring_at(
            access,
            refresh,
            now - Duration::hours(1),
            now + Duration::seconds(expires_in_seconds),
        )
    }

    async fn harness(initial: &Token) -> Harness {
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let record = SessionRecord::new(Utc::now(), Duration::hours(1));
        let session_id = record.session_id.clone();
        store.create(record).await.unwrap();

        let provider = Arc::new(MockIdentityProvider::new());
        let tokens = TokenStore::new(store.clone(), derive_encryption_key(b"refresh-test"));
        let coordinator = RefreshCoordinator::new(
            provider.clone(),
            tokens,
            store.clone(),
            60,
            RetryPolicy {
                timeout: std::time::Duration::from_secs(1),
                backoff: std::time::Duration::from_millis(1),
                retry_on_timeout: true,
            },
        );
        coordinator.install(&session_id, initial).await.unwrap();

        Harness {
            provider,
            coordinator,
            store,
            session_id,
        }
    }

    #[tokio::test]
    async fn test_fresh_token_is_returned_without_refresh() {
        let token = Token::issued_at("tok1", "ref1", Utc::now(), 3600);
        let h = harness(&token).await;

        assert_eq!(h.coordinator.ensure_fresh(&h.session_id).await.unwrap(), token);
        assert_eq!(h.coordinator.ensure_fresh(&h.session_id).await.unwrap(), token);
        assert_eq!(h.provider.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed_once() {
        let h = harness(&aged("tok1", "ref1", 30)).await;
        h.provider
            .push_refresh(Ok(Token::issued_at("tok2", "ref2", Utc::now(), 3600)));

        let first = h.coordinator.ensure_fresh(&h.session_id).await.unwrap();
        let second = h.coordinator.ensure_fresh(&h.session_id).await.unwrap();

        assert_eq!(first.access_token, "tok2");
        assert_eq!(second, first);
        assert_eq!(h.provider.refresh_calls(), 1);
        assert_eq!(h.provider.last_refresh_token().as_deref(), Some("ref1"));
        assert_eq!(h.coordinator.active_locks(), 0);
    }

    #[tokio::test]
    async fn test_short_lived_refreshed_token_is_reused() {
        let h = harness(&aged("tok1", "ref1", 10)).await;
        h.provider
            .push_refresh(Ok(Token::issued_at("tok2", "ref2", Utc::now(), 30)));
        h.provider
            .push_refresh(Ok(Token::issued_at("tok3", "ref3", Utc::now(), 30)));

        let first = h.coordinator.ensure_fresh(&h.session_id).await.unwrap();
        let second = h.coordinator.ensure_fresh(&h.session_id).await.unwrap();

        assert_eq!(first.access_token, "tok2");
        assert_eq!(second, first);
        assert_eq!(h.provider.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_old_token_and_flags_session() {
        let old = Token::issued_at("tok1", "ref1", Utc::now(), -5);
        let h = harness(&old).await;
        h.provider.push_refresh(Err(ProviderError::Rejected {
            status: 400,
            body: "invalid_grant".to_string(),
        }));

        let result = h.coordinator.ensure_fresh(&h.session_id).await;
        assert!(matches!(result, Err(AuthError::RefreshFailed(_))));
        assert_eq!(h.coordinator.tokens().load(&h.session_id).await.unwrap(), old);
        assert!(
            h.store
                .get(&h.session_id)
                .await
                .unwrap()
                .unwrap()
                .reauth_required
        );

        // Flagged sessions do not hit the provider again
        let again = h.coordinator.ensure_fresh(&h.session_id).await;
        assert!(matches!(again, Err(AuthError::RefreshFailed(_))));
        assert_eq!(h.provider.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_install_clears_reauth_flag() {
        let h = harness(&Token::issued_at("tok1", "ref1", Utc::now(), -5)).await;
        h.store.set_reauth_required(&h.session_id, true).await.unwrap();

        let new = Token::issued_at("tok9", "ref9", Utc::now(), 3600);
        h.coordinator.install(&h.session_id, &new).await.unwrap();

        assert!(
            !h.store
                .get(&h.session_id)
                .await
                .unwrap()
                .unwrap()
                .reauth_required
        );
        assert_eq!(h.coordinator.ensure_fresh(&h.session_id).await.unwrap(), new);
    }

    #[tokio::test]
    async fn test_force_refresh_on_fresh_token() {
        let h = harness(&Token::issued_at("tok1", "ref1", Utc::now(), 3600)).await;
        h.provider
            .push_refresh(Ok(Token::issued_at("tok2", "ref2", Utc::now(), 3600)));

        let token = h.coordinator.force_refresh(&h.session_id).await.unwrap();
        assert_eq!(token.access_token, "tok2");
        assert_eq!(h.provider.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_retried_once() {
        let h = harness(&Token::issued_at("tok1", "ref1", Utc::now(), 0)).await;
        h.provider.push_refresh(Err(ProviderError::Timeout));
        h.provider
            .push_refresh(Ok(Token::issued_at("tok2", "ref2", Utc::now(), 3600)));

        let token = h.coordinator.ensure_fresh(&h.session_id).await.unwrap();
        assert_eq!(token.access_token, "tok2");
        assert_eq!(h.provider.refresh_calls(), 2);
    }

    #[tokio::test]
    async fn test_missing_refresh_token() {
        let h = harness(&Token::issued_at("tok1", "", Utc::now(), 0)).await;

        let result = h.coordinator.ensure_fresh(&h.session_id).await;
        assert!(matches!(result, Err(AuthError::RefreshFailed(_))));
        assert_eq!(h.provider.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_no_token_is_not_authenticated() {
        let h = harness(&Token::issued_at("tok1", "ref1", Utc::now(), 3600)).await;
        let result = h.coordinator.ensure_fresh("unknown-session").await;
        assert!(matches!(result, Err(AuthError::NotAuthenticated)));
    }
}
