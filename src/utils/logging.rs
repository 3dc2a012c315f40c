// Centralized logging for the sign-in flow. Token values never reach the log,
// only whether they are present.
use log::{debug, info, warn};

use crate::models::Token;

pub struct LoggingHelper;

impl LoggingHelper {
    /// Log provider initialization status
    pub fn log_provider_init(provider_name: &str, configured: bool) {
        if configured {
            info!("✅ {provider_name} OAuth2 configured");
        } else {
            warn!("❌ {provider_name} OAuth2 not configured - missing client credentials or endpoints");
        }
    }

    /// Log OAuth URL building
    pub fn log_oauth_url_built(
        provider: &str,
        scopes: &str,
        extra_params: &std::collections::HashMap<String, String>,
    ) {
        info!("🔍 Built {provider} OAuth URL with scopes: {scopes} and extra params: {extra_params:?}");
    }

    /// Log token exchange start
    pub fn log_token_exchange_start(provider: &str) {
        info!("🔄 Exchanging authorization code for tokens with {provider}");
    }

    /// Log the outcome of a token endpoint call without the token material
    pub fn log_token_summary(provider: &str, grant: &str, token: &Token) {
        info!(
            "🔍 {grant} succeeded for {provider}: access_token={} chars, refresh_token={}, expires_at={}",
            token.access_token.len(),
            if token.refresh_token.is_empty() {
                "missing"
            } else {
                "present"
            },
            token.expires_at.to_rfc3339()
        );
    }

    /// Log raw token endpoint status for debugging
    pub fn log_token_response_status(provider: &str, status: u16) {
        debug!("{provider} token endpoint answered with status {status}");
    }

    /// Log a provider timeout that is about to be retried
    pub fn log_retry_after_timeout(operation: &str, backoff_millis: u64) {
        warn!("⏱️  {operation} timed out, retrying once after {backoff_millis}ms");
    }

    /// Log the start of a refresh for one session
    pub fn log_refresh_start(session_id: &str, forced: bool) {
        info!(
            "🔄 Refreshing token for session {} (forced: {forced})",
            Self::short_id(session_id)
        );
    }

    /// Log a refresh that was satisfied by another caller
    pub fn log_refresh_coalesced(session_id: &str) {
        debug!(
            "Token for session {} was already refreshed by a concurrent request",
            Self::short_id(session_id)
        );
    }

    /// Log a refresh failure that forces the user to sign in again
    pub fn log_refresh_failed(session_id: &str, error: &dyn std::fmt::Display) {
        warn!(
            "Refresh failed for session {}, re-authentication required: {error}",
            Self::short_id(session_id)
        );
    }

    /// Log session creation success
    pub fn log_session_created(session_id: &str) {
        info!("Created session {}", Self::short_id(session_id));
    }

    /// Log a successful sign-in
    pub fn log_session_authenticated(session_id: &str, provider: &str) {
        info!(
            "Session {} authenticated (provider: {provider})",
            Self::short_id(session_id)
        );
    }

    /// Log OAuth callback details in development mode
    pub fn log_callback_debug(
        req: &actix_web::HttpRequest,
        code_present: bool,
        state_present: bool,
    ) {
        debug!(
            "OAuth callback received via {}: code={code_present}, state={state_present}",
            req.method()
        );
        debug!("Callback request connection info: {:?}", req.connection_info());
    }

    /// Log the periodic session purge
    pub fn log_sessions_purged(count: usize) {
        if count > 0 {
            info!("🧹 Purged {count} expired sessions");
        } else {
            debug!("Session purge found nothing to remove");
        }
    }

    /// Session ids are bearer secrets too; only a prefix goes to the log.
    fn short_id(session_id: &str) -> &str {
        session_id.get(..8).unwrap_or(session_id)
    }
}
