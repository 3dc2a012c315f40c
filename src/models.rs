use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

/// Credentials issued by the identity provider for one session
///
/// A token is never edited in place. A refresh produces a new `Token` that
/// replaces the stored one as a whole.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    /// When the provider handed the token out
    pub obtained_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// Build a token that expires `expires_in_seconds` after `now`
    ///
    /// Lifetimes beyond chrono's range saturate at the earliest or latest
    /// representable instant.
    #[must_use]
    pub fn issued_at(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        now: DateTime<Utc>,
        expires_in_seconds: i64,
    ) -> Self {
        let expires_at = TimeDelta::try_seconds(expires_in_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or(if expires_in_seconds < 0 {
                DateTime::<Utc>::MIN_UTC
            } else {
                DateTime::<Utc>::MAX_UTC
            });
        Self::expiring_at(access_token, refresh_token, now, expires_at)
    }

    #[must_use]
    pub fn expiring_at(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        obtained_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            obtained_at,
            expires_at,
        }
    }

    /// Full validity window as issued by the provider
    #[must_use]
    pub fn lifetime(&self) -> TimeDelta {
        self.expires_at.signed_duration_since(self.obtained_at)
    }

    /// True while the token stays valid for more than the refresh margin past `now`
    ///
    /// The margin never exceeds half the token's lifetime, so a token issued
    /// with a lifetime shorter than `margin` is still served for a while
    /// instead of being refreshed on every use.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: TimeDelta) -> bool {
        let effective = margin.min(self.lifetime() / 2).max(TimeDelta::zero());
        now.checked_add_signed(effective)
            .is_some_and(|threshold| self.expires_at > threshold)
    }
}

/// Profile data shown on the info page. Fetched per request, never stored.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub nickname: String,
    pub username: String,
}

/// Body returned by `GET /info`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct InfoResponse {
    pub token: String,
    pub expires: DateTime<Utc>,
    pub nickname: String,
    pub username: String,
}

impl InfoResponse {
    #[must_use]
    pub fn new(token: &Token, profile: UserProfile) -> Self {
        Self {
            token: token.access_token.clone(),
            expires: token.expires_at,
            nickname: profile.nickname,
            username: profile.username,
        }
    }
}
