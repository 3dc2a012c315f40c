// OAuth handlers: login, callback, and logout
use actix_web::{web, HttpRequest, HttpResponse, Result};
use serde::Deserialize;
use serde_json::json;

use crate::error::AuthError;
use crate::flow::AuthFlow;
use crate::utils::{LoggingHelper, ResponseBuilder};

/// Where the browser lands after a successful sign-in
pub const POST_LOGIN_REDIRECT: &str = "/info";

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

/// Start the authorization-code flow
///
/// Reuses the caller's session when it has one, otherwise creates a session
/// and sets its cookie on the redirect.
///
/// # Errors
///
/// Never returns `Err`; failures are rendered as JSON error responses
pub async fn oauth_login(req: HttpRequest, flow: web::Data<AuthFlow>) -> Result<HttpResponse> {
    let (record, created) = match flow.sessions().begin(&req).await {
        Ok(found) => found,
        Err(e) => return Ok(flow.sessions().failure_response(&e)),
    };

    let auth_url = match flow.begin_authorization(&record.session_id).await {
        Ok(url) => url,
        Err(e) => return Ok(flow.sessions().failure_response(&e)),
    };

    let mut redirect = ResponseBuilder::redirect(&auth_url);
    if created {
        match flow.sessions().session_cookie(&record.session_id) {
            Ok(cookie) => redirect = redirect.with_cookie(cookie),
            Err(e) => return Ok(flow.sessions().failure_response(&e)),
        }
    }

    log::info!("Redirecting to {} for sign-in", provider_host(&auth_url));
    Ok(redirect.build())
}

/// Handle the provider's redirect back with `code` and `state`
///
/// # Errors
///
/// Never returns `Err`; failures are rendered as JSON error responses
pub async fn oauth_callback(
    req: HttpRequest,
    query: web::Query<CallbackQuery>,
    flow: web::Data<AuthFlow>,
) -> Result<HttpResponse> {
    LoggingHelper::log_callback_debug(&req, query.code.is_some(), query.state.is_some());

    // Parameters are checked before the session is touched
    let (code, state) = match (query.code.as_deref(), query.state.as_deref()) {
        (Some(code), Some(state)) if !code.is_empty() && !state.is_empty() => (code, state),
        (None | Some(""), _) => {
            return Ok(flow
                .sessions()
                .failure_response(&AuthError::MissingParameter("code")))
        }
        _ => {
            return Ok(flow
                .sessions()
                .failure_response(&AuthError::MissingParameter("state")))
        }
    };

    let result = async {
        let record = flow.sessions().resolve(&req).await?;
        flow.complete_authorization(&record.session_id, code, state)
            .await
    }
    .await;

    match result {
        Ok(_) => Ok(ResponseBuilder::redirect(POST_LOGIN_REDIRECT).build()),
        Err(e) => {
            log::warn!("OAuth callback failed: {e}");
            Ok(flow.sessions().failure_response(&e))
        }
    }
}

/// Destroy the session and expire its cookie
///
/// # Errors
///
/// Never returns `Err`; failures are rendered as JSON error responses
pub async fn oauth_logout(req: HttpRequest, flow: web::Data<AuthFlow>) -> Result<HttpResponse> {
    if let Err(e) = flow.sessions().destroy(&req).await {
        return Ok(flow.sessions().failure_response(&e));
    }

    Ok(ResponseBuilder::ok()
        .with_cookie(flow.sessions().expired_cookie())
        .json(&json!({ "message": "Signed out" })))
}

fn provider_host(auth_url: &str) -> String {
    url::Url::parse(auth_url)
        .ok()
        .and_then(|url| url.host_str().map(ToString::to_string))
        .unwrap_or_else(|| "identity provider".to_string())
}
