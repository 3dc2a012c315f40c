//! Testing utilities shared by unit and integration tests
//!
//! - [`fixtures`] - Pre-built settings, flows and signed-in sessions
//! - [`mock`] - Scripted identity provider that counts its calls
//! - [`requests`] - HTTP request builders for the sign-in endpoints
//!
//! ## Usage
//!
//! ```ignore
//! use tokenward::testing::{TestFixtures, RequestBuilder};
//!
//! let (flow, provider) = TestFixtures::auth_flow();
//! let request = RequestBuilder::info(true, None);
//! # let _ = (flow, provider, request);
//! ```

pub mod fixtures;
pub mod mock;
pub mod requests;

pub use fixtures::TestFixtures;
pub use mock::MockIdentityProvider;
pub use requests::RequestBuilder;

/// Common test constants
pub mod constants {
    /// Session secret used by every fixture
    pub const TEST_SESSION_SECRET: &str = "test-session-secret-0123456789abcdef";

    /// Nickname returned by the mock provider's userinfo
    pub const TEST_NICKNAME: &str = "Test Nick";

    /// Username returned by the mock provider's userinfo
    pub const TEST_USERNAME: &str = "testuser";

    /// Default test user agent string
    pub const TEST_USER_AGENT: &str =
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";
}
