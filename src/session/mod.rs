//! Session binding: encrypted cookie in the browser, record on the server

pub mod cookie;
pub mod manager;
pub mod store;

pub use cookie::{CookieFactory, SessionCookie, COOKIE_NAME};
pub use manager::SessionManager;
pub use store::{InMemorySessionStore, PendingState, SessionRecord, SessionStore};
