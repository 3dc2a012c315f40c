//! HTTP response handling
//!
//! A single builder for the error, redirect and JSON responses the handlers emit,
//! so every failure reaches the browser with the same `{error, message}` shape.

use actix_web::{cookie::Cookie, http::header, HttpResponse};
use serde_json::{json, Value};

/// Pre-serialized bodies for the uncustomized error responses
static CACHED_RESPONSES: std::sync::LazyLock<CachedResponses> =
    std::sync::LazyLock::new(CachedResponses::new);

struct CachedResponses {
    invalid_request: String,
    unauthorized: String,
    server_error: String,
    bad_gateway: String,
}

impl CachedResponses {
    fn new() -> Self {
        Self {
            invalid_request: Self::create_json(
                "invalid_request",
                ErrorType::BadRequest.default_message(),
            ),
            unauthorized: Self::create_json(
                "unauthorized",
                ErrorType::Unauthorized.default_message(),
            ),
            server_error: Self::create_json(
                "server_error",
                ErrorType::InternalServerError.default_message(),
            ),
            bad_gateway: Self::create_json("bad_gateway", ErrorType::BadGateway.default_message()),
        }
    }

    fn create_json(error: &str, message: &str) -> String {
        json!({
            "error": error,
            "message": message
        })
        .to_string()
    }

    fn get(&self, error_type: &ErrorType) -> Option<&str> {
        match error_type {
            ErrorType::BadRequest => Some(&self.invalid_request),
            ErrorType::Unauthorized => Some(&self.unauthorized),
            ErrorType::InternalServerError => Some(&self.server_error),
            ErrorType::BadGateway => Some(&self.bad_gateway),
            ErrorType::ServiceUnavailable => None,
        }
    }
}

/// Unified response builder that handles all types of HTTP responses
pub struct ResponseBuilder;

impl ResponseBuilder {
    /// Create a `BadRequest` (400) error response with optional customization
    #[must_use]
    pub fn bad_request() -> ErrorResponseBuilder {
        ErrorResponseBuilder::new(ErrorType::BadRequest)
    }

    /// Create an `Unauthorized` (401) error response with optional customization
    #[must_use]
    pub fn unauthorized() -> ErrorResponseBuilder {
        ErrorResponseBuilder::new(ErrorType::Unauthorized)
    }

    /// Create an `InternalServerError` (500) error response with optional customization
    #[must_use]
    pub fn internal_server_error() -> ErrorResponseBuilder {
        ErrorResponseBuilder::new(ErrorType::InternalServerError)
    }

    /// Create a `BadGateway` (502) error response with optional customization
    #[must_use]
    pub fn bad_gateway() -> ErrorResponseBuilder {
        ErrorResponseBuilder::new(ErrorType::BadGateway)
    }

    /// Create a `ServiceUnavailable` (503) error response with optional customization
    #[must_use]
    pub fn service_unavailable() -> ErrorResponseBuilder {
        ErrorResponseBuilder::new(ErrorType::ServiceUnavailable)
    }

    /// Create a redirect response (302 Found) with optional cookies
    #[must_use]
    pub fn redirect(location: &str) -> RedirectBuilder {
        RedirectBuilder::new(location)
    }

    /// Create an OK response (200) with JSON content
    #[must_use]
    pub fn ok() -> JsonResponseBuilder {
        JsonResponseBuilder::new()
    }
}

/// Builder for error responses with fluent interface
pub struct ErrorResponseBuilder {
    error_type: ErrorType,
    error_code: Option<String>,
    message: Option<String>,
    cookies: Vec<Cookie<'static>>,
}

/// Builder for redirect responses
pub struct RedirectBuilder {
    location: String,
    cookies: Vec<Cookie<'static>>,
}

/// Builder for JSON responses
pub struct JsonResponseBuilder {
    cookies: Vec<Cookie<'static>>,
}

/// Supported HTTP error response types
#[derive(Clone, Copy)]
enum ErrorType {
    BadRequest,
    Unauthorized,
    InternalServerError,
    BadGateway,
    ServiceUnavailable,
}

impl ErrorType {
    fn default_error_code(self) -> &'static str {
        match self {
            Self::BadRequest => "invalid_request",
            Self::Unauthorized => "unauthorized",
            Self::InternalServerError => "server_error",
            Self::BadGateway => "bad_gateway",
            Self::ServiceUnavailable => "service_unavailable",
        }
    }

    fn default_message(self) -> &'static str {
        match self {
            Self::BadRequest => "The request is malformed or invalid",
            Self::Unauthorized => "Authentication is required to access this resource",
            Self::InternalServerError => "An internal server error occurred",
            Self::BadGateway => "The identity provider could not be reached",
            Self::ServiceUnavailable => "The service is temporarily unavailable",
        }
    }

    fn status_builder(self) -> actix_web::HttpResponseBuilder {
        match self {
            Self::BadRequest => HttpResponse::BadRequest(),
            Self::Unauthorized => HttpResponse::Unauthorized(),
            Self::InternalServerError => HttpResponse::InternalServerError(),
            Self::BadGateway => HttpResponse::BadGateway(),
            Self::ServiceUnavailable => HttpResponse::ServiceUnavailable(),
        }
    }
}

impl ErrorResponseBuilder {
    fn new(error_type: ErrorType) -> Self {
        Self {
            error_type,
            error_code: None,
            message: None,
            cookies: Vec::new(),
        }
    }

    /// Set a custom error code (e.g., "`invalid_state`", "`refresh_failed`")
    #[must_use]
    pub fn with_error_code(mut self, code: &str) -> Self {
        self.error_code = Some(code.to_string());
        self
    }

    /// Set a custom error message
    #[must_use]
    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    /// Attach a cookie, typically an expired one that clears a dead session
    #[must_use]
    pub fn with_cookie(mut self, cookie: Cookie<'static>) -> Self {
        self.cookies.push(cookie);
        self
    }

    /// Build the final `HttpResponse`
    #[must_use]
    pub fn build(self) -> HttpResponse {
        let mut response = self.error_type.status_builder();
        response.insert_header((header::CONTENT_TYPE, "application/json"));
        for cookie in self.cookies {
            response.cookie(cookie);
        }

        if self.error_code.is_none() && self.message.is_none() {
            if let Some(body) = CACHED_RESPONSES.get(&self.error_type) {
                return response.body(body.to_owned());
            }
        }

        let error_code = self
            .error_code
            .unwrap_or_else(|| self.error_type.default_error_code().to_string());
        let message = self
            .message
            .unwrap_or_else(|| self.error_type.default_message().to_string());

        response.json(json!({
            "error": error_code,
            "message": message,
        }))
    }
}

impl RedirectBuilder {
    fn new(location: &str) -> Self {
        Self {
            location: location.to_string(),
            cookies: Vec::new(),
        }
    }

    /// Add a cookie to the redirect response
    #[must_use]
    pub fn with_cookie(mut self, cookie: Cookie<'static>) -> Self {
        self.cookies.push(cookie);
        self
    }

    /// Build the final redirect response
    #[must_use]
    pub fn build(self) -> HttpResponse {
        let mut builder = HttpResponse::Found();
        for cookie in self.cookies {
            builder.cookie(cookie);
        }
        builder
            .insert_header((header::LOCATION, self.location))
            .finish()
    }
}

impl JsonResponseBuilder {
    fn new() -> Self {
        Self {
            cookies: Vec::new(),
        }
    }

    /// Add a cookie to the response
    #[must_use]
    pub fn with_cookie(mut self, cookie: Cookie<'static>) -> Self {
        self.cookies.push(cookie);
        self
    }

    /// Build the response with JSON content
    #[must_use]
    pub fn json(self, data: &Value) -> HttpResponse {
        let mut builder = HttpResponse::Ok();
        for cookie in self.cookies {
            builder.cookie(cookie);
        }
        builder.json(data)
    }
}
