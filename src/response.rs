use std::fmt;

use http::StatusCode;
use url::Url;

use crate::constants::{header, DEFAULT_VERSION};
use crate::error::Result;
use crate::headers::Headers;

/// HTTP response representation
///
/// Filled in incrementally while bytes arrive and handed to the caller once
/// the Transaction completes; it is read-only from then on.
#[derive(Clone)]
pub struct Response {
    version: String,
    status: StatusCode,
    reason: String,
    headers: Headers,
    body: Vec<u8>,
    url: Url,
    redirects: u32,
}

impl Response {
    /// Create an empty `200 OK` response for `url`
    pub(crate) fn empty(url: Url) -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            status: StatusCode::OK,
            reason: String::new(),
            headers: Headers::new(),
            body: Vec::new(),
            url,
            redirects: 0,
        }
    }

    /// Get the HTTP status code
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Reason phrase from the status line
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Protocol version from the status line, e.g. `"1.1"`
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get the response headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Get a specific header value
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Get the content type
    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE)
    }

    /// Get the declared content length
    pub fn content_length(&self) -> Option<u64> {
        self.header(header::CONTENT_LENGTH)
            .and_then(|v| v.trim().parse().ok())
    }

    /// Location header, if any
    pub fn location(&self) -> Option<&str> {
        self.header(header::LOCATION)
    }

    /// URL of the request that produced this response (after redirects)
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Number of redirects followed to reach this response
    pub fn redirect_count(&self) -> u32 {
        self.redirects
    }

    /// Get the body bytes
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Take the body bytes
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Get the response body as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Get the response body as JSON
    pub fn json<T>(&self) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Check if the response is successful (2xx status code)
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Check if the response is a client error (4xx status code)
    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }

    /// Check if the response is a server error (5xx status code)
    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }

    /// Check if the response indicates a redirect
    pub fn is_redirect(&self) -> bool {
        self.status.is_redirection()
    }

    /// Check if the response indicates an informational status
    pub fn is_informational(&self) -> bool {
        self.status.is_informational()
    }

    /// Raise an error for 4xx and 5xx status codes
    pub fn error_for_status(self) -> std::result::Result<Self, StatusError> {
        if self.status.is_client_error() {
            return Err(StatusError::Client {
                status: self.status,
                response: Box::new(self),
            });
        }
        if self.status.is_server_error() {
            return Err(StatusError::Server {
                status: self.status,
                response: Box::new(self),
            });
        }
        Ok(self)
    }

    pub(crate) fn set_status_line(&mut self, version: String, status: StatusCode, reason: String) {
        self.version = version;
        self.status = status;
        self.reason = reason;
    }

    pub(crate) fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.append(name, value);
    }

    pub(crate) fn clear_head(&mut self) {
        self.headers.clear();
        self.reason.clear();
    }

    pub(crate) fn append_body(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    pub(crate) fn set_redirect_count(&mut self, redirects: u32) {
        self.redirects = redirects;
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body", &format_args!("{} bytes", self.body.len()))
            .field("redirects", &self.redirects)
            .finish()
    }
}

/// HTTP status code error
#[derive(thiserror::Error, Debug)]
pub enum StatusError {
    /// Client error (4xx status codes)
    #[error("Client error: {status}")]
    Client {
        status: StatusCode,
        response: Box<Response>,
    },

    /// Server error (5xx status codes)
    #[error("Server error: {status}")]
    Server {
        status: StatusCode,
        response: Box<Response>,
    },
}

impl StatusError {
    /// Get the status code
    pub fn status(&self) -> StatusCode {
        match self {
            StatusError::Client { status, .. } => *status,
            StatusError::Server { status, .. } => *status,
        }
    }

    /// Get the response that carried the status
    pub fn response(&self) -> &Response {
        match self {
            StatusError::Client { response, .. } => response,
            StatusError::Server { response, .. } => response,
        }
    }
}

/// Response builder for canned responses
pub struct ResponseBuilder {
    response: Response,
}

impl ResponseBuilder {
    /// Create a new response builder
    pub fn new(status: StatusCode, url: Url) -> Self {
        let mut response = Response::empty(url);
        response.status = status;
        response.reason = status.canonical_reason().unwrap_or_default().to_string();
        Self { response }
    }

    /// Set the reason phrase
    pub fn reason(mut self, reason: &str) -> Self {
        self.response.reason = reason.to_string();
        self
    }

    /// Set the protocol version
    pub fn version(mut self, version: &str) -> Self {
        self.response.version = version.to_string();
        self
    }

    /// Append a header
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.response.headers.append(name, value);
        self
    }

    /// Set the body
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.response.body = body.into();
        self
    }

    /// Build the response
    pub fn build(self) -> Response {
        self.response
    }
}

/// Convenience methods for common response operations
impl Response {
    /// Create a response builder
    pub fn builder(status: StatusCode, url: Url) -> ResponseBuilder {
        ResponseBuilder::new(status, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("http://example.test/").unwrap()
    }

    #[test]
    fn test_response_creation() {
        let response = Response::builder(StatusCode::OK, url())
            .header("Content-Type", "application/json")
            .header("content-length", "28")
            .body(r#"{"message": "Hello, World!"}"#)
            .build();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.reason(), "OK");
        assert_eq!(response.content_type(), Some("application/json"));
        assert_eq!(response.content_length(), Some(28));

        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["message"], "Hello, World!");
    }

    #[test]
    fn test_invalid_json_body() {
        let response = Response::builder(StatusCode::OK, url())
            .body("{not json")
            .build();
        let err = response.json::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, crate::error::Error::Json(_)));
        assert!(!err.is_malformed());
    }

    #[test]
    fn test_response_status_checks() {
        let response = Response::builder(StatusCode::OK, url()).build();
        assert!(response.is_success());
        assert!(!response.is_client_error());
        assert!(!response.is_server_error());
        assert!(!response.is_redirect());

        let response = Response::builder(StatusCode::NOT_FOUND, url()).build();
        assert!(!response.is_success());
        assert!(response.is_client_error());

        let response = Response::builder(StatusCode::MOVED_PERMANENTLY, url()).build();
        assert!(response.is_redirect());
    }

    #[test]
    fn test_error_for_status() {
        let response = Response::builder(StatusCode::BAD_GATEWAY, url())
            .body("upstream down")
            .build();
        let err = response.error_for_status().unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.response().text(), "upstream down");

        let response = Response::builder(StatusCode::NO_CONTENT, url()).build();
        assert!(response.error_for_status().is_ok());
    }

    #[test]
    fn test_text_is_lossy() {
        let response = Response::builder(StatusCode::OK, url())
            .body(vec![b'h', b'i', 0xff])
            .build();
        assert_eq!(response.text(), "hi\u{fffd}");
    }
}
