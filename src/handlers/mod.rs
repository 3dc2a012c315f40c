// HTTP request handlers for the sign-in flow
pub mod health;
pub mod info;
pub mod oauth;


// Re-export the main handler functions
pub use health::health;
pub use info::info;
pub use oauth::{oauth_callback, oauth_login, oauth_logout};
