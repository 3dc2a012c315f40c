//! Authorization-code flow
//!
//! ```text
//! Unauthenticated --begin--> AwaitingCallback --callback ok--> Authenticated
//!        ^                          |                            |    ^
//!        +------ callback fails ----+              stale token   v    | refreshed
//!        |                                                    Refreshing
//!        +------------ new sign-in ---------- ReauthRequired <---+ refresh failed
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::AuthError;
use crate::models::{Token, UserProfile};
use crate::provider::{call_with_retry, IdentityProvider, ProviderError, RetryPolicy};
use crate::refresh::RefreshCoordinator;
use crate::session::{SessionManager, SessionRecord};
use crate::settings::TokenwardSettings;
use crate::state::StateValidator;
use crate::token_store::TokenStore;
use crate::utils::LoggingHelper;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    AwaitingCallback,
    Authenticated,
    Refreshing,
    ReauthRequired,
}

impl AuthState {
    /// Derive where a session stands in the flow
    #[must_use]
    pub fn of(record: Option<&SessionRecord>, now: DateTime<Utc>, refreshing: bool) -> Self {
        let Some(record) = record else {
            return Self::Unauthenticated;
        };

        if record.is_expired(now) {
            return if record.token.is_some() {
                Self::ReauthRequired
            } else {
                Self::Unauthenticated
            };
        }
        if record.pending_state.is_some() {
            return Self::AwaitingCallback;
        }
        if record.reauth_required {
            return Self::ReauthRequired;
        }
        match (record.token.is_some(), refreshing) {
            (true, true) => Self::Refreshing,
            (true, false) => Self::Authenticated,
            (false, _) => Self::Unauthenticated,
        }
    }
}

/// The sign-in flow for one identity provider
pub struct AuthFlow {
    provider: Arc<dyn IdentityProvider>,
    sessions: SessionManager,
    states: StateValidator,
    refresh: RefreshCoordinator,
    policy: RetryPolicy,
}

impl AuthFlow {
    #[must_use]
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        sessions: SessionManager,
        settings: &TokenwardSettings,
    ) -> Self {
        let store = Arc::clone(sessions.store());
        let policy = RetryPolicy::from_settings(&settings.refresh);
        let tokens = TokenStore::new(Arc::clone(&store), *sessions.encryption_key());

        Self {
            states: StateValidator::new(Arc::clone(&store), settings.session.state_ttl_minutes),
            refresh: RefreshCoordinator::new(
                Arc::clone(&provider),
                tokens,
                store,
                settings.refresh.safety_margin_seconds,
                policy,
            ),
            provider,
            sessions,
            policy,
        }
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn refresh(&self) -> &RefreshCoordinator {
        &self.refresh
    }

    /// Current flow state of a session
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the store fails
    pub async fn state_of(&self, session_id: &str) -> Result<AuthState, AuthError> {
        let record = self.sessions.store().get(session_id).await?;
        Ok(AuthState::of(
            record.as_ref(),
            Utc::now(),
            self.refresh.is_refreshing(session_id),
        ))
    }

    /// Issue a state for the session and build the provider redirect
    ///
    /// # Errors
    ///
    /// - `Configuration` when the provider cannot build an authorization URL
    /// - `SessionExpired` / `Storage` from the state store
    pub async fn begin_authorization(&self, session_id: &str) -> Result<String, AuthError> {
        let state = self.states.issue_state(session_id).await?;
        self.provider
            .authorization_url(&state)
            .map_err(|e| AuthError::Configuration(e.to_string()))
    }

    /// Validate the callback, exchange the code and store the resulting token
    ///
    /// # Errors
    ///
    /// - `InvalidState` when the state does not match the session's pending one
    /// - `ExchangeFailed` when the provider refuses the code or cannot be reached
    pub async fn complete_authorization(
        &self,
        session_id: &str,
        code: &str,
        state: &str,
    ) -> Result<Token, AuthError> {
        self.states.consume(session_id, state).await?;

        let token = call_with_retry("Code exchange", &self.policy, || {
            self.provider.exchange_code(code, state)
        })
        .await
        .map_err(|e| {
            log::warn!("Code exchange with {} failed: {e}", self.provider.name());
            AuthError::ExchangeFailed(e.to_string())
        })?;

        self.refresh.install(session_id, &token).await?;
        LoggingHelper::log_session_authenticated(session_id, self.provider.name());
        Ok(token)
    }

    /// Fetch the profile with a fresh token, refreshing first when `reload` is set
    ///
    /// # Errors
    ///
    /// - `NotAuthenticated`, `CorruptToken` or `RefreshFailed` from the token lifecycle
    /// - `ProfileFetchFailed` when the userinfo call fails
    pub async fn profile(
        &self,
        session_id: &str,
        reload: bool,
    ) -> Result<(Token, UserProfile), AuthError> {
        let token = if reload {
            self.refresh.force_refresh(session_id).await?
        } else {
            self.refresh.ensure_fresh(session_id).await?
        };

        let profile = call_with_retry("Profile fetch", &self.policy, || {
            self.provider.fetch_user_info(&token.access_token)
        })
        .await
        .map_err(|e: ProviderError| AuthError::ProfileFetchFailed(e.to_string()))?;

        Ok((token, profile))
    }
}
