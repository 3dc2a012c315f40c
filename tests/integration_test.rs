// End-to-end tests driving the full actix app against a scripted provider
use actix_web::cookie::Cookie;
use actix_web::dev::ServiceResponse;
use actix_web::http::{header, StatusCode};
use actix_web::{test, web, App};
use chrono::Utc;
use serde_json::Value;

use tokenward::configure_services;
use tokenward::flow::{AuthFlow, AuthState};
use tokenward::models::Token;
use tokenward::provider::ProviderError;
use tokenward::session::{SessionStore, COOKIE_NAME};
use tokenward::testing::constants::{TEST_NICKNAME, TEST_USERNAME};
use tokenward::testing::{RequestBuilder, TestFixtures};

macro_rules! app {
    ($flow:expr) => {
        test::init_service(
            App::new()
                .app_data($flow.clone())
                .configure(configure_services),
        )
        .await
    };
}

fn session_cookie(resp: &ServiceResponse) -> Option<Cookie<'static>> {
    resp.response()
        .cookies()
        .find(|c| c.name() == COOKIE_NAME)
        .map(Cookie::into_owned)
}

fn location(resp: &ServiceResponse) -> String {
    resp.headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn state_from(location: &str) -> String {
    url::Url::parse(location)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

#[actix_web::test]
async fn test_full_sign_in_flow() {
    let (flow, provider) = TestFixtures::auth_flow();
    let issued = Token::issued_at("tok1", "ref1", Utc::now(), 3600);
    provider.push_exchange(Ok(issued.clone()));
    let flow = web::Data::new(flow);
    let app = app!(flow);

    // Login creates the session and redirects to the provider
    let resp = test::call_service(&app, RequestBuilder::login(None).to_request()).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    let cookie = session_cookie(&resp).expect("login sets the session cookie");
    let state = state_from(&location(&resp));
    assert_eq!(state.len(), 32);

    // Provider redirects back
    let req = RequestBuilder::callback(Some("abc123"), Some(&state), Some(cookie.clone()));
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(location(&resp), "/info");
    assert_eq!(provider.exchange_calls(), 1);
    assert_eq!(provider.last_code().as_deref(), Some("abc123"));

    // The stored token is exactly what the provider issued
    let lookup = test::TestRequest::default()
        .cookie(cookie.clone())
        .to_http_request();
    let session_id = flow.sessions().resolve(&lookup).await.unwrap().session_id;
    assert_eq!(flow.refresh().tokens().load(&session_id).await.unwrap(), issued);
    assert_eq!(
        flow.state_of(&session_id).await.unwrap(),
        AuthState::Authenticated
    );

    // Profile view
    let resp = test::call_service(&app, RequestBuilder::info(false, Some(cookie)).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["token"], "tok1");
    assert_eq!(body["nickname"], TEST_NICKNAME);
    assert_eq!(body["username"], TEST_USERNAME);
    assert!(body["expires"].is_string());

    assert_eq!(provider.refresh_calls(), 0);
    assert_eq!(provider.user_info_calls(), 1);
    assert_eq!(provider.last_access_token().as_deref(), Some("tok1"));
}

#[actix_web::test]
async fn test_callback_missing_code_changes_nothing() {
    let (flow, provider) = TestFixtures::auth_flow();
    let flow = web::Data::new(flow);
    let app = app!(flow);

    let resp = test::call_service(&app, RequestBuilder::login(None).to_request()).await;
    let cookie = session_cookie(&resp).unwrap();
    let state = state_from(&location(&resp));

    let req = RequestBuilder::callback(None, Some(&state), Some(cookie.clone()));
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "missing_parameter");
    assert_eq!(provider.exchange_calls(), 0);

    // The pending state survived, so the real callback still works
    let req = RequestBuilder::callback(Some("abc123"), Some(&state), Some(cookie));
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(provider.exchange_calls(), 1);
}

#[actix_web::test]
async fn test_mismatched_state_is_rejected() {
    let (flow, provider) = TestFixtures::auth_flow();
    let flow = web::Data::new(flow);
    let app = app!(flow);

    let resp = test::call_service(&app, RequestBuilder::login(None).to_request()).await;
    let cookie = session_cookie(&resp).unwrap();

    let req = RequestBuilder::callback(Some("abc123"), Some("xyz"), Some(cookie.clone()));
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "invalid_state");
    assert_eq!(provider.exchange_calls(), 0);

    // Nothing was stored
    let resp = test::call_service(&app, RequestBuilder::info(false, Some(cookie)).to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "not_authenticated");
}

#[actix_web::test]
async fn test_callback_replay_is_rejected() {
    let (flow, provider) = TestFixtures::auth_flow();
    let flow = web::Data::new(flow);
    let app = app!(flow);

    let resp = test::call_service(&app, RequestBuilder::login(None).to_request()).await;
    let cookie = session_cookie(&resp).unwrap();
    let state = state_from(&location(&resp));

    let req = RequestBuilder::callback(Some("abc123"), Some(&state), Some(cookie.clone()));
    assert_eq!(
        test::call_service(&app, req.to_request()).await.status(),
        StatusCode::FOUND
    );

    let req = RequestBuilder::callback(Some("abc123"), Some(&state), Some(cookie));
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(provider.exchange_calls(), 1);
}

#[actix_web::test]
async fn test_exchange_failure_is_reported() {
    let (flow, provider) = TestFixtures::auth_flow();
    provider.push_exchange(Err(ProviderError::Rejected {
        status: 400,
        body: "invalid_grant".to_string(),
    }));
    let flow = web::Data::new(flow);
    let app = app!(flow);

    let resp = test::call_service(&app, RequestBuilder::login(None).to_request()).await;
    let cookie = session_cookie(&resp).unwrap();
    let state = state_from(&location(&resp));

    let req = RequestBuilder::callback(Some("abc123"), Some(&state), Some(cookie));
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "exchange_failed");
    // Not retried
    assert_eq!(provider.exchange_calls(), 1);
}

#[actix_web::test]
async fn test_reload_with_expired_token_refreshes_once() {
    let (flow, provider) = TestFixtures::auth_flow();
    let (_, cookie) =
        TestFixtures::signed_in_session(&flow, &TestFixtures::token_expiring_in(-30)).await;
    let flow = web::Data::new(flow);
    let app = app!(flow);

    let resp = test::call_service(&app, RequestBuilder::info(true, Some(cookie)).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;

    assert_eq!(provider.refresh_calls(), 1);
    assert_eq!(provider.last_refresh_token().as_deref(), Some("ref1"));
    assert_eq!(provider.user_info_calls(), 1);
    assert_eq!(provider.last_access_token().as_deref(), Some("refreshed-1"));
    assert_eq!(body["token"], "refreshed-1");
}

#[actix_web::test]
async fn test_info_refreshes_stale_token_transparently() {
    let (flow, provider) = TestFixtures::auth_flow();
    let (_, cookie) =
        TestFixtures::signed_in_session(&flow, &TestFixtures::token_expiring_in(45)).await;
    let flow = web::Data::new(flow);
    let app = app!(flow);

    for _ in 0..3 {
        let resp = test::call_service(
            &app,
            RequestBuilder::info(false, Some(cookie.clone())).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    // Inside the safety margin once, fresh afterwards
    assert_eq!(provider.refresh_calls(), 1);
    assert_eq!(provider.user_info_calls(), 3);
}

#[actix_web::test]
async fn test_refresh_failure_requires_sign_in() {
    let (flow, provider) = TestFixtures::auth_flow();
    provider.push_refresh(Err(ProviderError::Rejected {
        status: 400,
        body: "invalid_grant".to_string(),
    }));
    let old = TestFixtures::token_expiring_in(-30);
    let (session_id, cookie) = TestFixtures::signed_in_session(&flow, &old).await;
    let flow = web::Data::new(flow);
    let app = app!(flow);

    let resp = test::call_service(
        &app,
        RequestBuilder::info(false, Some(cookie.clone())).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "refresh_failed");

    assert_eq!(flow.refresh().tokens().load(&session_id).await.unwrap(), old);
    assert_eq!(
        flow.state_of(&session_id).await.unwrap(),
        AuthState::ReauthRequired
    );

    // No second attempt until the user signs in again
    let resp = test::call_service(&app, RequestBuilder::info(false, Some(cookie)).to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(provider.refresh_calls(), 1);
    assert_eq!(provider.user_info_calls(), 0);
}

#[actix_web::test]
async fn test_tampered_cookie_is_corrupt() {
    let (flow, provider) = TestFixtures::auth_flow();
    let flow = web::Data::new(flow);
    let app = app!(flow);

    let forged = Cookie::new(COOKIE_NAME, "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA");
    let resp = test::call_service(&app, RequestBuilder::info(false, Some(forged)).to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let cleared = session_cookie(&resp).expect("cookie is cleared");
    assert!(cleared.max_age().unwrap().whole_seconds() < 0);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "corrupt_token");
    assert_eq!(provider.user_info_calls(), 0);
}

#[actix_web::test]
async fn test_expired_session_is_rejected() {
    let (flow, _) = TestFixtures::auth_flow();
    let (session_id, cookie) = TestFixtures::expired_session(&flow).await;
    let flow = web::Data::new(flow);
    let app = app!(flow);

    let resp = test::call_service(&app, RequestBuilder::info(false, Some(cookie)).to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "session_expired");

    assert!(flow
        .sessions()
        .store()
        .get(&session_id)
        .await
        .unwrap()
        .is_none());
}

#[actix_web::test]
async fn test_logout_destroys_session() {
    let (flow, _) = TestFixtures::auth_flow();
    let (session_id, cookie) =
        TestFixtures::signed_in_session(&flow, &TestFixtures::token_expiring_in(3600)).await;
    let flow = web::Data::<AuthFlow>::new(flow);
    let app = app!(flow);

    let resp = test::call_service(&app, RequestBuilder::logout(Some(cookie.clone())).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(flow
        .sessions()
        .store()
        .get(&session_id)
        .await
        .unwrap()
        .is_none());

    let resp = test::call_service(&app, RequestBuilder::info(false, Some(cookie)).to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_purge_removes_only_expired_sessions() {
    let (flow, _) = TestFixtures::auth_flow();
    let (live_id, _) =
        TestFixtures::signed_in_session(&flow, &TestFixtures::token_expiring_in(3600)).await;
    let (dead_id, _) = TestFixtures::expired_session(&flow).await;

    assert_eq!(flow.sessions().purge_expired().await.unwrap(), 1);
    let store = TestFixtures::store(&flow);
    assert!(store.get(&live_id).await.unwrap().is_some());
    assert!(store.get(&dead_id).await.unwrap().is_none());
}
