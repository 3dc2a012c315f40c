use actix_web::{web, HttpRequest, HttpResponse, Result};
use serde::Deserialize;

use crate::flow::AuthFlow;
use crate::models::InfoResponse;

#[derive(Debug, Deserialize)]
pub struct InfoQuery {
    pub reload: Option<String>,
}

impl InfoQuery {
    /// `reload=1` forces a refresh before the profile is fetched
    #[must_use]
    pub fn force_refresh(&self) -> bool {
        self.reload.as_deref() == Some("1")
    }
}

/// Show the current token and the user's profile
///
/// # Errors
///
/// Never returns `Err`; failures are rendered as JSON error responses
pub async fn info(
    req: HttpRequest,
    query: web::Query<InfoQuery>,
    flow: web::Data<AuthFlow>,
) -> Result<HttpResponse> {
    let result = async {
        let record = flow.sessions().resolve(&req).await?;
        flow.profile(&record.session_id, query.force_refresh()).await
    }
    .await;

    match result {
        Ok((token, profile)) => Ok(HttpResponse::Ok().json(InfoResponse::new(&token, profile))),
        Err(e) => {
            log::info!("Info request failed: {e}");
            Ok(flow.sessions().failure_response(&e))
        }
    }
}
