#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use tokenward::{
    configure_services,
    flow::AuthFlow,
    provider::{IdentityProvider, RestIdentityProvider},
    session::{InMemorySessionStore, SessionManager, SessionStore},
    settings::TokenwardSettings,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load configuration from Settings.toml and environment variables
    // This also loads .env file and initializes the logger
    let settings = TokenwardSettings::load()
        .map_err(|e| std::io::Error::other(format!("Failed to load settings: {e}")))?;

    let provider: Arc<dyn IdentityProvider> = Arc::new(
        RestIdentityProvider::new(&settings).map_err(|e| {
            std::io::Error::other(format!("Failed to initialize identity provider: {e}"))
        })?,
    );
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let sessions = SessionManager::from_settings(store, &settings);
    let flow = web::Data::new(AuthFlow::new(provider, sessions, &settings));

    spawn_session_purge(flow.clone(), settings.session.purge_interval_seconds);
    start_server(flow, settings).await
}

/// Periodically drop sessions that outlived their TTL
fn spawn_session_purge(flow: web::Data<AuthFlow>, interval_seconds: u64) {
    if interval_seconds == 0 {
        log::info!("Expired-session sweep disabled");
        return;
    }

    actix_web::rt::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds));
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = flow.sessions().purge_expired().await {
                log::error!("Session purge failed: {e}");
            }
        }
    });
}

/// Start the HTTP server
///
/// # Errors
///
/// Returns an error if:
/// - Server binding fails
/// - Server fails to start
async fn start_server(flow: web::Data<AuthFlow>, settings: TokenwardSettings) -> std::io::Result<()> {
    let bind_address = settings.get_bind_address();
    print_startup_info(&bind_address, &settings);

    // Configure CORS for SPAs
    let cors_origins = settings.get_cors_origins();

    HttpServer::new(move || {
        let cors_origins = cors_origins.clone();
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _| {
                cors_origins
                    .iter()
                    .any(|allowed| allowed == origin.to_str().unwrap_or(""))
            })
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec!["Authorization", "Content-Type", "Accept"])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .app_data(flow.clone())
            .wrap(cors)
            .wrap(Logger::default())
            .configure(configure_services)
    })
    .bind(&bind_address)?
    .run()
    .await
}

fn print_startup_info(bind_address: &str, settings: &TokenwardSettings) {
    println!("Starting Tokenward on http://{bind_address}");
    println!("Identity provider: {}", settings.provider.name);
    println!();
    println!("OAuth2 endpoints:");
    println!("  GET  /oauth/login     - Start sign-in");
    println!("  GET  /oauth/callback  - OAuth callback");
    println!("  GET|POST /oauth/logout - Clear session");
    println!();
    println!("OAuth callback URL for the identity provider:");
    println!("  {}", settings.callback_url());
    println!();
    println!("Application endpoints:");
    println!("  GET  /info[?reload=1] - Current token and user profile");
    println!("  GET  /ping            - Health check");
}
