//! Scripted identity provider for tests
//!
//! Each operation pops its next result from a queue and falls back to a
//! successful default when the queue is empty. Calls are counted so tests can
//! assert how often the provider was actually reached.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::models::{Token, UserProfile};
use crate::provider::{IdentityProvider, ProviderError};

use super::constants::{TEST_NICKNAME, TEST_USERNAME};

type Script<T> = Mutex<VecDeque<Result<T, ProviderError>>>;

#[derive(Default)]
pub struct MockIdentityProvider {
    exchange_results: Script<Token>,
    refresh_results: Script<Token>,
    user_info_results: Script<UserProfile>,
    exchange_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    user_info_calls: AtomicUsize,
    last_code: Mutex<Option<String>>,
    last_refresh_token: Mutex<Option<String>>,
    last_access_token: Mutex<Option<String>>,
    refresh_delay: Option<Duration>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockIdentityProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every refresh call sleep first, so concurrent callers pile up
    #[must_use]
    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = Some(delay);
        self
    }

    pub fn push_exchange(&self, result: Result<Token, ProviderError>) {
        lock(&self.exchange_results).push_back(result);
    }

    pub fn push_refresh(&self, result: Result<Token, ProviderError>) {
        lock(&self.refresh_results).push_back(result);
    }

    pub fn push_user_info(&self, result: Result<UserProfile, ProviderError>) {
        lock(&self.user_info_results).push_back(result);
    }

    #[must_use]
    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn user_info_calls(&self) -> usize {
        self.user_info_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn last_code(&self) -> Option<String> {
        lock(&self.last_code).clone()
    }

    #[must_use]
    pub fn last_refresh_token(&self) -> Option<String> {
        lock(&self.last_refresh_token).clone()
    }

    /// Access token presented on the most recent userinfo call
    #[must_use]
    pub fn last_access_token(&self) -> Option<String> {
        lock(&self.last_access_token).clone()
    }

    /// Token returned by exchanges when nothing is scripted
    #[must_use]
    pub fn default_token() -> Token {
        Token::issued_at("tok1", "ref1", Utc::now(), 3600)
    }

    /// Profile returned by userinfo when nothing is scripted
    #[must_use]
    pub fn default_profile() -> UserProfile {
        UserProfile {
            nickname: TEST_NICKNAME.to_string(),
            username: TEST_USERNAME.to_string(),
        }
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn authorization_url(&self, state: &str) -> Result<String, ProviderError> {
        Ok(format!(
            "https://provider.test/authorize?client_id=test-client&response_type=code&state={state}"
        ))
    }

    async fn exchange_code(&self, code: &str, _state: &str) -> Result<Token, ProviderError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_code) = Some(code.to_string());

        let scripted = lock(&self.exchange_results).pop_front();
        scripted.unwrap_or_else(|| Ok(Self::default_token()))
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<Token, ProviderError> {
        let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        *lock(&self.last_refresh_token) = Some(refresh_token.to_string());

        if let Some(delay) = self.refresh_delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = lock(&self.refresh_results).pop_front();
        scripted.unwrap_or_else(|| {
            Ok(Token::issued_at(
                format!("refreshed-{call}"),
                format!("ref-{call}"),
                Utc::now(),
                3600,
            ))
        })
    }

    async fn fetch_user_info(&self, access_token: &str) -> Result<UserProfile, ProviderError> {
        self.user_info_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_access_token) = Some(access_token.to_string());

        let scripted = lock(&self.user_info_results).pop_front();
        scripted.unwrap_or_else(|| Ok(Self::default_profile()))
    }
}
