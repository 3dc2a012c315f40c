use actix_web::{
    cookie::{time::Duration as CookieDuration, Cookie, SameSite},
    HttpRequest,
};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::crypto::{decrypt_data, encrypt_data};

/// Name of the cookie carrying the encrypted session reference
pub const COOKIE_NAME: &str = "tokenward_session";

/// Payload sealed inside the session cookie
///
/// Only a reference to the server-side record travels to the browser.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SessionCookie {
    pub session_id: String,
    pub issued_at: DateTime<Utc>,
}

/// Options for cookie creation
pub struct CookieOptions {
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    pub path: String,
    pub max_age: CookieDuration,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            http_only: true,
            secure: true,
            // Lax so the cookie survives the top-level redirect back from the provider
            same_site: SameSite::Lax,
            path: "/".to_string(),
            max_age: CookieDuration::hours(24),
        }
    }
}

/// Cookie factory for creating encrypted cookies with proper configuration
#[derive(Clone)]
pub struct CookieFactory {
    encryption_key: [u8; 32],
    cookie_secure: bool,
    session_duration_hours: u64,
}

impl CookieFactory {
    #[must_use]
    pub fn new(encryption_key: [u8; 32], cookie_secure: bool, session_duration_hours: u64) -> Self {
        Self {
            encryption_key,
            cookie_secure,
            session_duration_hours,
        }
    }

    /// Generic method to create a cookie with encrypted data
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails
    pub fn create_cookie<T: Serialize>(
        &self,
        name: &str,
        data: &T,
        options: CookieOptions,
    ) -> Result<Cookie<'static>> {
        let value = encrypt_data(data, &self.encryption_key)?;

        Ok(Cookie::build(name.to_owned(), value)
            .http_only(options.http_only)
            .secure(self.cookie_secure && options.secure)
            .same_site(options.same_site)
            .path(options.path)
            .max_age(options.max_age)
            .finish())
    }

    /// Create the encrypted session cookie for a session id
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails
    pub fn create_session_cookie(&self, session_id: &str) -> Result<Cookie<'static>> {
        let payload = SessionCookie {
            session_id: session_id.to_string(),
            issued_at: Utc::now(),
        };

        self.create_cookie(
            COOKIE_NAME,
            &payload,
            CookieOptions {
                max_age: CookieDuration::hours(
                    i64::try_from(self.session_duration_hours).unwrap_or(24),
                ),
                ..Default::default()
            },
        )
    }

    /// Create an expired cookie to clear the session
    #[must_use]
    pub fn create_expired_cookie(&self) -> Cookie<'static> {
        create_expired_cookie(COOKIE_NAME, self.cookie_secure)
    }

    /// Read the session cookie from a request
    ///
    /// Returns `Ok(None)` when the cookie is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the cookie is present but cannot be decrypted
    pub fn get_session_from_request(&self, req: &HttpRequest) -> Result<Option<SessionCookie>> {
        match req.cookie(COOKIE_NAME) {
            None => Ok(None),
            Some(cookie) if cookie.value().is_empty() => Ok(None),
            Some(cookie) => decrypt_data::<SessionCookie>(cookie.value(), &self.encryption_key)
                .map(Some)
                .map_err(|e| anyhow!("Failed to decrypt session cookie: {e}")),
        }
    }
}

/// Create an expired cookie to clear a specific cookie
#[must_use]
pub fn create_expired_cookie(name: &str, secure: bool) -> Cookie<'static> {
    Cookie::build(name.to_owned(), "")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(CookieDuration::seconds(-1))
        .finish()
}
