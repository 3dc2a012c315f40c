//! OAuth2 provider reached over plain HTTP endpoints

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::{IdentityProvider, ProviderError};
use crate::models::{Token, UserProfile};
use crate::settings::{ProviderSettings, TokenwardSettings};
use crate::utils::LoggingHelper;

/// Fallback lifetime when the token response carries no `expires_in`
const DEFAULT_EXPIRES_IN_SECONDS: i64 = 3600;

/// Longest token lifetime accepted from a provider
const MAX_TOKEN_LIFETIME_SECONDS: i64 = 366 * 24 * 60 * 60;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

pub struct RestIdentityProvider {
    http_client: reqwest::Client,
    settings: ProviderSettings,
    redirect_uri: String,
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl RestIdentityProvider {
    /// Build the provider client from settings
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the HTTP client cannot be constructed
    pub fn new(settings: &TokenwardSettings) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.refresh.request_timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Configuration(format!("HTTP client: {e}")))?;

        let provider = Self {
            http_client,
            settings: settings.provider.clone(),
            redirect_uri: settings.callback_url(),
            client_id: settings.provider.get_client_id(),
            client_secret: settings.provider.get_client_secret(),
        };
        LoggingHelper::log_provider_init(&provider.settings.name, provider.is_configured());
        Ok(provider)
    }

    /// True when credentials and every endpoint are present
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.client_id.is_some()
            && self.client_secret.is_some()
            && !self.settings.authorization_endpoint.is_empty()
            && !self.settings.token_endpoint.is_empty()
            && !self.settings.userinfo_endpoint.is_empty()
    }

    fn credentials(&self) -> Result<(&str, &str), ProviderError> {
        let client_id = self.client_id.as_deref().ok_or_else(|| {
            ProviderError::Configuration(format!("client id missing for {}", self.settings.name))
        })?;
        let client_secret = self.client_secret.as_deref().ok_or_else(|| {
            ProviderError::Configuration(format!(
                "client secret missing for {}",
                self.settings.name
            ))
        })?;
        Ok((client_id, client_secret))
    }

    async fn post_token_request(
        &self,
        grant: &str,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse, ProviderError> {
        let response = self
            .http_client
            .post(&self.settings.token_endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(params)
            .send()
            .await?;

        let status = response.status();
        LoggingHelper::log_token_response_status(&self.settings.name, status.as_u16());
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ProviderError::InvalidResponse(format!("{grant} response: {e}")))
    }

    /// Turn a token endpoint response into a stored token
    ///
    /// `expires_in` is read as relative seconds. Values too large for a
    /// lifetime are taken as an absolute Unix expiry, which some providers send.
    fn into_token(
        response: TokenResponse,
        previous_refresh_token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Token, ProviderError> {
        let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECONDS);
        let expires_at = Self::expiry_from(expires_in, now).ok_or_else(|| {
            ProviderError::InvalidResponse(format!("expires_in out of range: {expires_in}"))
        })?;

        let refresh_token = response
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous_refresh_token.map(ToString::to_string))
            .unwrap_or_default();

        Ok(Token::expiring_at(
            response.access_token,
            refresh_token,
            now,
            expires_at,
        ))
    }

    fn expiry_from(expires_in: i64, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let expires_at = if expires_in <= MAX_TOKEN_LIFETIME_SECONDS {
            now.checked_add_signed(TimeDelta::try_seconds(expires_in)?)?
        } else {
            DateTime::<Utc>::from_timestamp(expires_in, 0)?
        };

        let lifetime = expires_at.signed_duration_since(now);
        (lifetime >= TimeDelta::zero()
            && lifetime <= TimeDelta::try_seconds(MAX_TOKEN_LIFETIME_SECONDS)?)
        .then_some(expires_at)
    }
}

/// Pull the display fields out of a userinfo document
///
/// Accepts the nested `user_data` layout as well as flat `nickname`/`username`.
pub(crate) fn parse_user_profile(body: &Value) -> Result<UserProfile, ProviderError> {
    let field = |nested: &str, flat: &str| {
        body.pointer(nested)
            .or_else(|| body.get(flat))
            .and_then(Value::as_str)
            .map(ToString::to_string)
    };

    let nickname = field("/user_data/user/nickname", "nickname");
    let username = field("/user_data/name/username", "username");

    if nickname.is_none() && username.is_none() {
        return Err(ProviderError::InvalidResponse(
            "userinfo carries neither nickname nor username".to_string(),
        ));
    }

    Ok(UserProfile {
        nickname: nickname.unwrap_or_default(),
        username: username.unwrap_or_default(),
    })
}

#[async_trait]
impl IdentityProvider for RestIdentityProvider {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn authorization_url(&self, state: &str) -> Result<String, ProviderError> {
        let (client_id, _) = self.credentials()?;
        let scopes = self.settings.scopes.join(" ");

        let mut url = url::Url::parse(&self.settings.authorization_endpoint)
            .map_err(|e| ProviderError::Configuration(format!("authorization endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &scopes)
            .append_pair("state", state);

        for (key, value) in &self.settings.extra_auth_params {
            url.query_pairs_mut().append_pair(key, value);
        }

        LoggingHelper::log_oauth_url_built(
            &self.settings.name,
            &scopes,
            &self.settings.extra_auth_params,
        );
        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str, _state: &str) -> Result<Token, ProviderError> {
        let (client_id, client_secret) = self.credentials()?;
        LoggingHelper::log_token_exchange_start(&self.settings.name);

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];
        let response = self
            .post_token_request("authorization_code", &params)
            .await?;

        let token = Self::into_token(response, None, Utc::now())?;
        LoggingHelper::log_token_summary(&self.settings.name, "Code exchange", &token);
        Ok(token)
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<Token, ProviderError> {
        let (client_id, client_secret) = self.credentials()?;

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];
        let response = self.post_token_request("refresh_token", &params).await?;

        let token = Self::into_token(response, Some(refresh_token), Utc::now())?;
        LoggingHelper::log_token_summary(&self.settings.name, "Token refresh", &token);
        Ok(token)
    }

    async fn fetch_user_info(&self, access_token: &str) -> Result<UserProfile, ProviderError> {
        let response = self
            .http_client
            .get(&self.settings.userinfo_endpoint)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("userinfo: {e}")))?;
        parse_user_profile(&body)
    }
}
