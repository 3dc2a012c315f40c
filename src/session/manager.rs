//! Session Manager - binds a browser to a server-side session record
//!
//! The browser holds an encrypted cookie naming its session id. Everything the
//! flow needs lives in the `SessionStore`; this type resolves the cookie to a
//! live record and mints or clears the cookie on the way out.
//!
//! ## Organization
//!
//! 1. **Construction** - `SessionManager` creation and configuration
//! 2. **Session Resolution** - Reading the cookie and loading the record
//! 3. **Session Lifecycle** - Creating, destroying and purging sessions
//! 4. **Response Creation** - Cookies and failure responses
//! 5. **Tests** - Unit tests for functionality verification

use std::sync::Arc;

use actix_web::{cookie::Cookie, HttpRequest, HttpResponse};
use chrono::{Duration, Utc};

use crate::error::AuthError;
use crate::session::cookie::CookieFactory;
use crate::session::store::{SessionRecord, SessionStore};
use crate::settings::TokenwardSettings;
use crate::utils::crypto::derive_encryption_key;
use crate::utils::LoggingHelper;

// =============================================================================
// Session Manager Structure
// =============================================================================

#[derive(Clone)]
pub struct SessionManager {
    encryption_key: [u8; 32],
    session_duration_hours: u64,
    cookie_factory: CookieFactory,
    store: Arc<dyn SessionStore>,
}

// =============================================================================
// 1. Construction
// =============================================================================

impl SessionManager {
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        key: &[u8],
        cookie_secure: bool,
        session_duration_hours: u64,
    ) -> Self {
        let encryption_key = derive_encryption_key(key);

        Self {
            encryption_key,
            session_duration_hours,
            cookie_factory: CookieFactory::new(
                encryption_key,
                cookie_secure,
                session_duration_hours,
            ),
            store,
        }
    }

    #[must_use]
    pub fn from_settings(store: Arc<dyn SessionStore>, settings: &TokenwardSettings) -> Self {
        Self::new(
            store,
            settings.session.session_secret.as_bytes(),
            settings.cookies.secure,
            settings.session.session_duration_hours,
        )
    }

    /// Key shared with `TokenStore` for sealing token blobs
    #[must_use]
    pub fn encryption_key(&self) -> &[u8; 32] {
        &self.encryption_key
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    #[must_use]
    pub fn cookie_factory(&self) -> &CookieFactory {
        &self.cookie_factory
    }

    fn session_ttl(&self) -> Duration {
        Duration::hours(i64::try_from(self.session_duration_hours).unwrap_or(24))
    }

    // =========================================================================
    // 2. Session Resolution
    // =========================================================================

    /// Resolve the request's cookie to a live session record
    ///
    /// # Errors
    ///
    /// - `SessionExpired` when there is no cookie, no record, or the record is past its TTL
    /// - `CorruptToken` when the cookie cannot be decrypted
    /// - `Storage` when the store fails
    pub async fn resolve(&self, req: &HttpRequest) -> Result<SessionRecord, AuthError> {
        let cookie = self
            .cookie_factory
            .get_session_from_request(req)
            .map_err(|e| {
                log::warn!("Rejecting session cookie: {e}");
                AuthError::CorruptToken
            })?
            .ok_or(AuthError::SessionExpired)?;

        let record = self
            .store
            .get(&cookie.session_id)
            .await?
            .ok_or(AuthError::SessionExpired)?;

        if record.is_expired(Utc::now()) {
            log::info!("Session past its lifetime, removing it");
            self.store.remove(&record.session_id).await?;
            return Err(AuthError::SessionExpired);
        }

        Ok(record)
    }

    // =========================================================================
    // 3. Session Lifecycle
    // =========================================================================

    /// Return the caller's live session or create a fresh one
    ///
    /// The boolean is true when a new session was created, in which case the
    /// response must carry a new cookie.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the store fails
    pub async fn begin(&self, req: &HttpRequest) -> Result<(SessionRecord, bool), AuthError> {
        match self.resolve(req).await {
            Ok(record) => Ok((record, false)),
            Err(AuthError::Storage(e)) => Err(AuthError::Storage(e)),
            Err(_) => {
                let record = SessionRecord::new(Utc::now(), self.session_ttl());
                self.store.create(record.clone()).await?;
                LoggingHelper::log_session_created(&record.session_id);
                Ok((record, true))
            }
        }
    }

    /// Remove the caller's session if one resolves
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the store fails
    pub async fn destroy(&self, req: &HttpRequest) -> Result<(), AuthError> {
        match self.resolve(req).await {
            Ok(record) => {
                self.store.remove(&record.session_id).await?;
                Ok(())
            }
            Err(AuthError::Storage(e)) => Err(AuthError::Storage(e)),
            Err(_) => Ok(()),
        }
    }

    /// Drop all sessions past their TTL
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the store fails
    pub async fn purge_expired(&self) -> Result<usize, AuthError> {
        let removed = self.store.purge_expired(Utc::now()).await?;
        LoggingHelper::log_sessions_purged(removed);
        Ok(removed)
    }

    // =========================================================================
    // 4. Response Creation
    // =========================================================================

    /// Encrypted cookie naming `session_id`
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the cookie cannot be sealed
    pub fn session_cookie(&self, session_id: &str) -> Result<Cookie<'static>, AuthError> {
        self.cookie_factory
            .create_session_cookie(session_id)
            .map_err(AuthError::from)
    }

    #[must_use]
    pub fn expired_cookie(&self) -> Cookie<'static> {
        self.cookie_factory.create_expired_cookie()
    }

    /// JSON error response, expiring the cookie when the session is unusable
    #[must_use]
    pub fn failure_response(&self, err: &AuthError) -> HttpResponse {
        let builder = err.response_builder();
        if err.clears_session() {
            builder.with_cookie(self.expired_cookie()).build()
        } else {
            builder.build()
        }
    }
}

// =============================================================================
// 5. Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::cookie::COOKIE_NAME;
    use crate::testing::fixtures::TestFixtures;
    use actix_web::http::StatusCode;
    use actix_web::test::TestRequest;

    fn request_with(cookie: Cookie<'static>) -> HttpRequest {
        TestRequest::default().cookie(cookie).to_http_request()
    }

    #[actix_web::test]
    async fn test_begin_creates_then_reuses() {
        let manager = TestFixtures::session_manager();

        let (record, created) = manager
            .begin(&TestRequest::default().to_http_request())
            .await
            .unwrap();
        assert!(created);

        let req = request_with(manager.session_cookie(&record.session_id).unwrap());
        let (again, created) = manager.begin(&req).await.unwrap();
        assert!(!created);
        assert_eq!(again.session_id, record.session_id);
    }

    #[actix_web::test]
    async fn test_resolve_without_cookie() {
        let manager = TestFixtures::session_manager();
        let result = manager.resolve(&TestRequest::default().to_http_request()).await;
        assert!(matches!(result, Err(AuthError::SessionExpired)));
    }

    #[actix_web::test]
    async fn test_resolve_tampered_cookie() {
        let manager = TestFixtures::session_manager();
        let req = request_with(Cookie::new(COOKIE_NAME, "tampered-value"));
        assert!(matches!(
            manager.resolve(&req).await,
            Err(AuthError::CorruptToken)
        ));
    }

    #[actix_web::test]
    async fn test_resolve_unknown_session() {
        let manager = TestFixtures::session_manager();
        let req = request_with(manager.session_cookie("never-created").unwrap());
        assert!(matches!(
            manager.resolve(&req).await,
            Err(AuthError::SessionExpired)
        ));
    }

    #[actix_web::test]
    async fn test_resolve_expired_session_removes_it() {
        let manager = TestFixtures::session_manager();
        let record = SessionRecord::new(Utc::now() - Duration::hours(2), Duration::hours(1));
        let id = record.session_id.clone();
        manager.store().create(record).await.unwrap();

        let req = request_with(manager.session_cookie(&id).unwrap());
        assert!(matches!(
            manager.resolve(&req).await,
            Err(AuthError::SessionExpired)
        ));
        assert!(manager.store().get(&id).await.unwrap().is_none());
    }

    #[actix_web::test]
    async fn test_destroy() {
        let manager = TestFixtures::session_manager();
        let (record, _) = manager
            .begin(&TestRequest::default().to_http_request())
            .await
            .unwrap();
        let req = request_with(manager.session_cookie(&record.session_id).unwrap());

        manager.destroy(&req).await.unwrap();
        assert!(manager
            .store()
            .get(&record.session_id)
            .await
            .unwrap()
            .is_none());

        // Destroying nothing is fine
        manager
            .destroy(&TestRequest::default().to_http_request())
            .await
            .unwrap();
    }

    #[test]
    fn test_failure_response_expires_cookie() {
        let manager = TestFixtures::session_manager();

        let response = manager.failure_response(&AuthError::SessionExpired);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let cookie = response.cookies().next().unwrap();
        assert_eq!(cookie.name(), COOKIE_NAME);
        assert!(cookie.max_age().unwrap().whole_seconds() < 0);

        let response = manager.failure_response(&AuthError::InvalidState);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.cookies().count(), 0);
    }
}
