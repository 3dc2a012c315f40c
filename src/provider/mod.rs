//! Identity provider client
//!
//! The flow only talks to the provider through `IdentityProvider`. The
//! production implementation is `RestIdentityProvider`; tests inject a mock.

pub mod rest;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Token, UserProfile};
use crate::settings::RefreshSettings;
use crate::utils::LoggingHelper;

pub use rest::RestIdentityProvider;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("request to the identity provider timed out")]
    Timeout,

    #[error("could not reach the identity provider: {0}")]
    Transport(String),

    #[error("identity provider rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("unexpected identity provider response: {0}")]
    InvalidResponse(String),

    #[error("identity provider is not configured: {0}")]
    Configuration(String),
}

impl ProviderError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Operations the sign-in flow needs from an OAuth2 identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Provider name used in logs
    fn name(&self) -> &str;

    /// URL the browser is sent to in order to authorize, carrying `state`
    ///
    /// # Errors
    ///
    /// Returns `Configuration` when endpoints or the client id are missing
    fn authorization_url(&self, state: &str) -> Result<String, ProviderError>;

    /// Exchange an authorization code for a token
    async fn exchange_code(&self, code: &str, state: &str) -> Result<Token, ProviderError>;

    /// Obtain a new token using a refresh token
    async fn refresh_token(&self, refresh_token: &str) -> Result<Token, ProviderError>;

    /// Fetch the profile of the user owning `access_token`
    async fn fetch_user_info(&self, access_token: &str) -> Result<UserProfile, ProviderError>;
}

/// Timeout and retry behaviour for provider calls
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub backoff: Duration,
    pub retry_on_timeout: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RefreshSettings::default())
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_settings(settings: &RefreshSettings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.request_timeout_seconds),
            backoff: Duration::from_millis(settings.retry_backoff_millis),
            retry_on_timeout: settings.retry_on_timeout,
        }
    }
}

/// Run a provider call under the policy's timeout, retrying once if it timed out
///
/// Only `ProviderError::Timeout` is retried. A rejection from the provider is
/// returned as is.
///
/// # Errors
///
/// Returns the error of the last attempt
pub async fn call_with_retry<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    mut call: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    match with_timeout(policy.timeout, call()).await {
        Err(ProviderError::Timeout) if policy.retry_on_timeout => {
            LoggingHelper::log_retry_after_timeout(
                operation,
                u64::try_from(policy.backoff.as_millis()).unwrap_or(u64::MAX),
            );
            tokio::time::sleep(policy.backoff).await;
            with_timeout(policy.timeout, call()).await
        }
        other => other,
    }
}

async fn with_timeout<T, Fut>(limit: Duration, call: Fut) -> Result<T, ProviderError>
where
    Fut: Future<Output = Result<T, ProviderError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(ProviderError::Timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(50),
            backoff: Duration::from_millis(1),
            retry_on_timeout: true,
        }
    }

    #[tokio::test]
    async fn test_success_is_not_retried() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result = call_with_retry("test", &policy(), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ProviderError>(7)
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_retried_once() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<(), _> = call_with_retry("test", &policy(), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Timeout)
        })
        .await;

        assert_eq!(result, Err(ProviderError::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_slow_call_times_out_then_recovers() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result = call_with_retry("test", &policy(), || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok::<_, ProviderError>(attempt)
            }
        })
        .await;

        assert_eq!(result, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejection_not_retried() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<(), _> = call_with_retry("test", &policy(), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Rejected {
                status: 400,
                body: "invalid_grant".to_string(),
            })
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Rejected { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_disabled() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let no_retry = RetryPolicy {
            retry_on_timeout: false,
            ..policy()
        };
        let result: Result<(), _> = call_with_retry("test", &no_retry, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Timeout)
        })
        .await;

        assert!(result.unwrap_err().is_timeout());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
