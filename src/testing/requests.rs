//! HTTP request builders for testing handlers

use actix_web::cookie::Cookie;
use actix_web::http::Method;
use actix_web::test;

use super::constants::TEST_USER_AGENT;

/// Builder for creating HTTP requests for testing
pub struct RequestBuilder {
    method: Method,
    uri: String,
    headers: Vec<(String, String)>,
    cookies: Vec<Cookie<'static>>,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            method: Method::GET,
            uri: "/".to_string(),
            headers: Vec::new(),
            cookies: Vec::new(),
        }
    }

    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn uri(mut self, uri: &str) -> Self {
        self.uri = uri.to_string();
        self
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Set common browser headers
    #[must_use]
    pub fn browser_headers(self) -> Self {
        self.header("User-Agent", TEST_USER_AGENT).header(
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        )
    }

    #[must_use]
    pub fn with_cookie(mut self, cookie: Cookie<'static>) -> Self {
        self.cookies.push(cookie);
        self
    }

    /// Add the cookie when present, for tests that sometimes have a session
    #[must_use]
    pub fn with_optional_cookie(self, cookie: Option<Cookie<'static>>) -> Self {
        match cookie {
            Some(cookie) => self.with_cookie(cookie),
            None => self,
        }
    }

    /// Build a `TestRequest` ready for `test::call_service`
    #[must_use]
    pub fn to_test_request(self) -> test::TestRequest {
        let mut req = test::TestRequest::default()
            .method(self.method)
            .uri(&self.uri);

        for (name, value) in self.headers {
            req = req.insert_header((name, value));
        }
        for cookie in self.cookies {
            req = req.cookie(cookie);
        }
        req
    }
}

/// Request shorthands for the sign-in endpoints
impl RequestBuilder {
    /// `GET /oauth/login`
    #[must_use]
    pub fn login(cookie: Option<Cookie<'static>>) -> test::TestRequest {
        Self::new()
            .uri("/oauth/login")
            .browser_headers()
            .with_optional_cookie(cookie)
            .to_test_request()
    }

    /// `GET /oauth/callback` with whichever parameters are given
    #[must_use]
    pub fn callback(
        code: Option<&str>,
        state: Option<&str>,
        cookie: Option<Cookie<'static>>,
    ) -> test::TestRequest {
        let mut params = url::form_urlencoded::Serializer::new(String::new());
        if let Some(code) = code {
            params.append_pair("code", code);
        }
        if let Some(state) = state {
            params.append_pair("state", state);
        }
        let uri = format!("/oauth/callback?{}", params.finish());

        Self::new()
            .uri(&uri)
            .browser_headers()
            .with_optional_cookie(cookie)
            .to_test_request()
    }

    /// `GET /info`, optionally with `reload=1`
    #[must_use]
    pub fn info(reload: bool, cookie: Option<Cookie<'static>>) -> test::TestRequest {
        let uri = if reload { "/info?reload=1" } else { "/info" };
        Self::new()
            .uri(uri)
            .browser_headers()
            .with_optional_cookie(cookie)
            .to_test_request()
    }

    /// `GET /oauth/logout`
    #[must_use]
    pub fn logout(cookie: Option<Cookie<'static>>) -> test::TestRequest {
        Self::new()
            .uri("/oauth/logout")
            .browser_headers()
            .with_optional_cookie(cookie)
            .to_test_request()
    }
}
