//! Anti-CSRF `state` issuance and validation
//!
//! A state is bound to exactly one session and can be checked exactly once.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::AuthError;
use crate::session::{PendingState, SessionStore};
use crate::utils::crypto::{constant_time_eq, generate_state_token};

#[derive(Clone)]
pub struct StateValidator {
    store: Arc<dyn SessionStore>,
    ttl: Duration,
}

impl StateValidator {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, state_ttl_minutes: u64) -> Self {
        Self {
            store,
            ttl: Duration::minutes(i64::try_from(state_ttl_minutes).unwrap_or(10)),
        }
    }

    /// Issue a fresh state for a session, replacing any earlier one
    ///
    /// # Errors
    ///
    /// - `SessionExpired` if the session no longer exists
    /// - `Storage` if the store fails
    pub async fn issue_state(&self, session_id: &str) -> Result<String, AuthError> {
        let value = generate_state_token();
        let pending = PendingState {
            value: value.clone(),
            issued_at: Utc::now(),
        };

        if !self.store.set_pending_state(session_id, pending).await? {
            return Err(AuthError::SessionExpired);
        }
        Ok(value)
    }

    /// Constant-time comparison of the expected and received state
    #[must_use]
    pub fn validate_state(pending: &PendingState, received: &str) -> bool {
        constant_time_eq(&pending.value, received)
    }

    /// Consume the session's pending state and check it against `received`
    ///
    /// The pending state is cleared before comparison, so a second attempt with
    /// the same value fails even if the first one succeeded.
    ///
    /// # Errors
    ///
    /// - `InvalidState` on mismatch, on a missing pending state, or when it is older than the TTL
    /// - `Storage` if the store fails
    pub async fn consume(&self, session_id: &str, received: &str) -> Result<(), AuthError> {
        let pending = self
            .store
            .take_pending_state(session_id)
            .await?
            .ok_or_else(|| {
                log::warn!("Callback arrived with no pending state for the session");
                AuthError::InvalidState
            })?;

        if self.is_stale(&pending, Utc::now()) {
            log::warn!("Pending state expired before the callback arrived");
            return Err(AuthError::InvalidState);
        }

        if !Self::validate_state(&pending, received) {
            log::warn!("State mismatch on callback");
            return Err(AuthError::InvalidState);
        }

        Ok(())
    }

    fn is_stale(&self, pending: &PendingState, now: DateTime<Utc>) -> bool {
        now - pending.issued_at > self.ttl
    }
}
