//! Encrypted token persistence inside the session record
//!
//! No network I/O happens here. Callers that need to mutate a token go through
//! `RefreshCoordinator`, which serializes writes per session.

use std::sync::Arc;

use thiserror::Error;

use crate::error::AuthError;
use crate::models::Token;
use crate::session::SessionStore;
use crate::utils::crypto::{decrypt_data, encrypt_data};

#[derive(Debug, Error)]
pub enum TokenLoadError {
    #[error("no token stored for session")]
    NotFound,

    #[error("stored token is corrupt: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<TokenLoadError> for AuthError {
    fn from(err: TokenLoadError) -> Self {
        match err {
            TokenLoadError::NotFound => Self::NotAuthenticated,
            TokenLoadError::Corrupt(reason) => {
                log::warn!("Discarding unreadable token: {reason}");
                Self::CorruptToken
            }
            TokenLoadError::Storage(e) => Self::from(e),
        }
    }
}

#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn SessionStore>,
    encryption_key: [u8; 32],
}

impl TokenStore {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, encryption_key: [u8; 32]) -> Self {
        Self {
            store,
            encryption_key,
        }
    }

    /// Seal and write a token into the session
    ///
    /// # Errors
    ///
    /// - `SessionExpired` if the session is gone
    /// - `Storage` if encryption or the store fails
    pub async fn save(&self, session_id: &str, token: &Token) -> Result<(), AuthError> {
        let blob = encrypt_data(token, &self.encryption_key)?;
        if self.store.set_token(session_id, blob).await? {
            Ok(())
        } else {
            Err(AuthError::SessionExpired)
        }
    }

    /// Read the session's token back
    ///
    /// # Errors
    ///
    /// - `NotFound` when the session has no token (or no longer exists)
    /// - `Corrupt` when the blob fails to decode, decrypt or deserialize
    pub async fn load(&self, session_id: &str) -> Result<Token, TokenLoadError> {
        let blob = self
            .store
            .get(session_id)
            .await?
            .and_then(|record| record.token)
            .ok_or(TokenLoadError::NotFound)?;

        decrypt_data::<Token>(&blob, &self.encryption_key)
            .map_err(|e| TokenLoadError::Corrupt(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{InMemorySessionStore, SessionRecord};
    use crate::utils::crypto::derive_encryption_key;
    use chrono::{Duration, Utc};

    async fn setup() -> (TokenStore, Arc<dyn SessionStore>, String) {
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let record = SessionRecord::new(Utc::now(), Duration::hours(1));
        let id = record.session_id.clone();
        store.create(record).await.unwrap();
        (
            TokenStore::new(store.clone(), derive_encryption_key(b"token-store-test")),
            store,
            id,
        )
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let (tokens, store, id) = setup().await;
        let token = Token::issued_at("tok1", "ref1", Utc::now(), 3600);

        tokens.save(&id, &token).await.unwrap();
        assert_eq!(tokens.load(&id).await.unwrap(), token);

        // The record holds ciphertext, not the access token
        let blob = store.get(&id).await.unwrap().unwrap().token.unwrap();
        assert!(!blob.contains("tok1"));
    }

    #[tokio::test]
    async fn test_load_without_token() {
        let (tokens, _, id) = setup().await;
        assert!(matches!(
            tokens.load(&id).await,
            Err(TokenLoadError::NotFound)
        ));
        assert!(matches!(
            tokens.load("missing").await,
            Err(TokenLoadError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_load_corrupt_blob() {
        let (tokens, store, id) = setup().await;
        store.set_token(&id, "not-a-token".into()).await.unwrap();

        let err = tokens.load(&id).await.unwrap_err();
        assert!(matches!(err, TokenLoadError::Corrupt(_)));
        assert!(matches!(AuthError::from(err), AuthError::CorruptToken));
    }

    #[tokio::test]
    async fn test_blob_from_other_key_is_corrupt() {
        let (tokens, store, id) = setup().await;
        let other = TokenStore::new(store.clone(), derive_encryption_key(b"other"));
        other
            .save(&id, &Token::issued_at("a", "b", Utc::now(), 60))
            .await
            .unwrap();

        assert!(matches!(
            tokens.load(&id).await,
            Err(TokenLoadError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_save_to_missing_session() {
        let (tokens, _, _) = setup().await;
        let result = tokens
            .save("missing", &Token::issued_at("a", "b", Utc::now(), 60))
            .await;
        assert!(matches!(result, Err(AuthError::SessionExpired)));
    }

    #[test]
    fn test_not_found_maps_to_not_authenticated() {
        assert!(matches!(
            AuthError::from(TokenLoadError::NotFound),
            AuthError::NotAuthenticated
        ));
    }
}
