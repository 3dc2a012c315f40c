//! Test fixtures providing pre-built test objects

use std::sync::Arc;

use actix_web::cookie::Cookie;
use chrono::{Duration, Utc};

use crate::flow::AuthFlow;
use crate::models::Token;
use crate::session::{InMemorySessionStore, SessionManager, SessionRecord, SessionStore};
use crate::settings::{CookieSettings, SessionSettings, TokenwardSettings};

use super::constants::TEST_SESSION_SECRET;
use super::mock::MockIdentityProvider;

/// Central fixture provider for all test data
pub struct TestFixtures;

impl TestFixtures {
    /// Create standard test settings
    #[must_use]
    pub fn settings() -> TokenwardSettings {
        let mut settings = TokenwardSettings {
            session: SessionSettings {
                session_secret: TEST_SESSION_SECRET.to_string(),
                ..Default::default()
            },
            cookies: CookieSettings { secure: false },
            ..Default::default()
        };
        settings.provider.name = "mock".to_string();
        settings.provider.client_id = Some("test-client".to_string());
        settings.provider.client_secret = Some("test-secret".to_string());
        // Keep timeout retries quick in tests
        settings.refresh.retry_backoff_millis = 1;
        settings
    }

    /// Create a session manager backed by a fresh in-memory store
    #[must_use]
    pub fn session_manager() -> SessionManager {
        SessionManager::from_settings(Arc::new(InMemorySessionStore::new()), &Self::settings())
    }

    /// Create a flow wired to a scripted provider
    #[must_use]
    pub fn auth_flow() -> (AuthFlow, Arc<MockIdentityProvider>) {
        Self::auth_flow_with(MockIdentityProvider::new(), &Self::settings())
    }

    /// Create a flow around a preconfigured mock and settings
    #[must_use]
    pub fn auth_flow_with(
        provider: MockIdentityProvider,
        settings: &TokenwardSettings,
    ) -> (AuthFlow, Arc<MockIdentityProvider>) {
        let provider = Arc::new(provider);
        let sessions =
            SessionManager::from_settings(Arc::new(InMemorySessionStore::new()), settings);
        let flow = AuthFlow::new(provider.clone(), sessions, settings);
        (flow, provider)
    }

    /// Token obtained an hour ago that expires `seconds` from now
    #[must_use]
    pub fn token_expiring_in(seconds: i64) -> Token {
        let now = Utc::now();
        Token::expiring_at(
            "tok1",
            "ref1",
            now - Duration::hours(1),
            now + Duration::seconds(seconds),
        )
    }

    /// Persist a new session holding `token` and return its cookie
    ///
    /// # Panics
    ///
    /// Panics if the store or cookie sealing fails
    pub async fn signed_in_session(flow: &AuthFlow, token: &Token) -> (String, Cookie<'static>) {
        let record = SessionRecord::new(Utc::now(), Duration::hours(24));
        let session_id = record.session_id.clone();
        flow.sessions().store().create(record).await.unwrap();
        flow.refresh().install(&session_id, token).await.unwrap();

        let cookie = flow.sessions().session_cookie(&session_id).unwrap();
        (session_id, cookie)
    }

    /// Persist a session whose lifetime already ended
    ///
    /// # Panics
    ///
    /// Panics if the store or cookie sealing fails
    pub async fn expired_session(flow: &AuthFlow) -> (String, Cookie<'static>) {
        let record = SessionRecord::new(Utc::now() - Duration::hours(25), Duration::hours(24));
        let session_id = record.session_id.clone();
        flow.sessions().store().create(record).await.unwrap();

        let cookie = flow.sessions().session_cookie(&session_id).unwrap();
        (session_id, cookie)
    }

    /// Store shared by the flow's components
    #[must_use]
    pub fn store(flow: &AuthFlow) -> Arc<dyn SessionStore> {
        Arc::clone(flow.sessions().store())
    }
}
