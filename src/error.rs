//! Error taxonomy for the sign-in flow
//!
//! Every variant reaches the browser as a JSON `{error, message}` body. Nothing
//! here is swallowed: handlers either return the error or hand it to
//! `SessionManager::failure_response` which also clears a dead session cookie.

use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::utils::responses::{ErrorResponseBuilder, ResponseBuilder};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("The sign-in request could not be verified, please start again")]
    InvalidState,

    #[error("Authorization code exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("Stored session data is unreadable")]
    CorruptToken,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Could not fetch the user profile: {0}")]
    ProfileFetchFailed(String),

    #[error("Session expired, please sign in again")]
    SessionExpired,

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Session storage failure: {0}")]
    Storage(String),

    #[error("Sign-in is not available: {0}")]
    Configuration(String),
}

impl AuthError {
    /// Machine readable code placed in the `error` field
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingParameter(_) => "missing_parameter",
            Self::InvalidState => "invalid_state",
            Self::ExchangeFailed(_) => "exchange_failed",
            Self::CorruptToken => "corrupt_token",
            Self::RefreshFailed(_) => "refresh_failed",
            Self::ProfileFetchFailed(_) => "profile_fetch_failed",
            Self::SessionExpired => "session_expired",
            Self::NotAuthenticated => "not_authenticated",
            Self::Storage(_) => "storage_error",
            Self::Configuration(_) => "sign_in_unavailable",
        }
    }

    /// Whether the session cookie should be expired alongside this error
    #[must_use]
    pub fn clears_session(&self) -> bool {
        matches!(self, Self::SessionExpired | Self::CorruptToken)
    }

    /// Response builder carrying status, code and message, open for extra cookies
    #[must_use]
    pub fn response_builder(&self) -> ErrorResponseBuilder {
        let builder = match self {
            Self::MissingParameter(_) | Self::InvalidState => ResponseBuilder::bad_request(),
            Self::ExchangeFailed(_) | Self::ProfileFetchFailed(_) => ResponseBuilder::bad_gateway(),
            Self::Storage(_) => ResponseBuilder::internal_server_error(),
            Self::Configuration(_) => ResponseBuilder::service_unavailable(),
            Self::CorruptToken
            | Self::RefreshFailed(_)
            | Self::SessionExpired
            | Self::NotAuthenticated => ResponseBuilder::unauthorized(),
        };

        let message = match self {
            Self::RefreshFailed(_) | Self::NotAuthenticated | Self::CorruptToken => {
                format!("{self}. Sign in again at /oauth/login")
            }
            // Backend details stay in the log
            Self::Storage(_) => "Session storage is unavailable".to_string(),
            Self::Configuration(_) => "Sign-in is not available right now".to_string(),
            _ => self.to_string(),
        };

        builder
            .with_error_code(self.error_code())
            .with_message(&message)
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        log::error!("Session store error: {err:#}");
        Self::Storage(err.to_string())
    }
}

impl ResponseError for AuthError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            Self::MissingParameter(_) | Self::InvalidState => StatusCode::BAD_REQUEST,
            Self::ExchangeFailed(_) | Self::ProfileFetchFailed(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::CorruptToken
            | Self::RefreshFailed(_)
            | Self::SessionExpired
            | Self::NotAuthenticated => StatusCode::UNAUTHORIZED,
        }
    }

    fn error_response(&self) -> HttpResponse {
        self.response_builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::MessageBody;
    use actix_web::http::StatusCode;

    fn body(err: &AuthError) -> serde_json::Value {
        let bytes = err.error_response().into_body().try_into_bytes().unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (AuthError::MissingParameter("code"), StatusCode::BAD_REQUEST),
            (AuthError::InvalidState, StatusCode::BAD_REQUEST),
            (AuthError::ExchangeFailed("x".into()), StatusCode::BAD_GATEWAY),
            (AuthError::CorruptToken, StatusCode::UNAUTHORIZED),
            (AuthError::RefreshFailed("x".into()), StatusCode::UNAUTHORIZED),
            (AuthError::ProfileFetchFailed("x".into()), StatusCode::BAD_GATEWAY),
            (AuthError::SessionExpired, StatusCode::UNAUTHORIZED),
            (AuthError::NotAuthenticated, StatusCode::UNAUTHORIZED),
            (AuthError::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (AuthError::Configuration("x".into()), StatusCode::SERVICE_UNAVAILABLE),
        ];

        for (err, status) in cases {
            assert_eq!(err.status_code(), status, "{err:?}");
            assert_eq!(err.error_response().status(), status, "{err:?}");
        }
    }

    #[test]
    fn test_error_body_is_human_readable() {
        let json = body(&AuthError::MissingParameter("code"));
        assert_eq!(json["error"], "missing_parameter");
        assert_eq!(json["message"], "Missing required parameter: code");

        let json = body(&AuthError::RefreshFailed("invalid_grant".into()));
        assert_eq!(json["error"], "refresh_failed");
        assert!(json["message"].as_str().unwrap().contains("/oauth/login"));
    }

    #[test]
    fn test_storage_details_not_exposed() {
        let json = body(&AuthError::Storage("lock poisoned at 0xdeadbeef".into()));
        assert_eq!(json["error"], "storage_error");
        assert!(!json["message"].as_str().unwrap().contains("0xdeadbeef"));
    }

    #[test]
    fn test_clears_session() {
        assert!(AuthError::SessionExpired.clears_session());
        assert!(AuthError::CorruptToken.clears_session());
        assert!(!AuthError::InvalidState.clears_session());
        assert!(!AuthError::RefreshFailed("x".into()).clears_session());
    }
}
