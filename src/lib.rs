#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use actix_web::web;

pub mod error;
pub mod flow;
pub mod handlers;
pub mod models;
pub mod provider;
pub mod refresh;
pub mod session;
pub mod settings;
pub mod state;
pub mod token_store;
pub mod utils;

// Testing utilities - available for unit tests and integration tests with testing feature
#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Register every route on an actix app or test service
pub fn configure_services(cfg: &mut web::ServiceConfig) {
    cfg
        // OAuth2 endpoints
        .route("/oauth/login", web::get().to(handlers::oauth_login))
        .route("/oauth/callback", web::get().to(handlers::oauth_callback))
        .route("/oauth/logout", web::get().to(handlers::oauth_logout))
        .route("/oauth/logout", web::post().to(handlers::oauth_logout))
        // Profile view
        .route("/info", web::get().to(handlers::info))
        // Health endpoint
        .route("/ping", web::get().to(handlers::health));
}
