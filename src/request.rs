use std::fmt;
use std::sync::Arc;

use url::{Host, Url};

use crate::body::{ByteSource, BytesSource};
use crate::constants::{header, DEFAULT_VERSION, HTTP, HTTPS};
use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::method::Method;

/// HTTP request representation
///
/// Built once by the caller and never mutated by the engine. Construction
/// validates the URL and appends a `Host` header derived from it. Following a
/// redirect produces a new `Request` that shares the same body source.
#[derive(Clone)]
pub struct Request {
    method: Method,
    url: Url,
    path: String,
    version: String,
    headers: Headers,
    body: Option<Arc<dyn ByteSource>>,
}

impl Request {
    /// Create a new request
    ///
    /// Fails with [`Error::InvalidUrl`] unless the scheme is `http` or `https`
    /// and the URL names a host.
    pub fn new(method: Method, url: Url) -> Result<Self> {
        validate(&url)?;
        let mut headers = Headers::new();
        headers.append(header::HOST, host_header(&url));

        Ok(Self {
            method,
            path: derive_path(&url),
            url,
            version: DEFAULT_VERSION.to_string(),
            headers,
            body: None,
        })
    }

    /// Parse `url` and create a new request
    pub fn parse(method: Method, url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        Self::new(method, url)
    }

    /// Create a GET request
    pub fn get(url: &str) -> Result<Self> {
        Self::parse(Method::Get, url)
    }

    /// Create a POST request
    pub fn post(url: &str) -> Result<Self> {
        Self::parse(Method::Post, url)
    }

    /// Get the HTTP method
    pub fn method(&self) -> Method {
        self.method
    }

    /// Get the URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Path, query and fragment of the URL
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path and query as sent on the wire (the fragment never leaves the client)
    pub fn request_target(&self) -> &str {
        match self.path.find('#') {
            Some(index) => &self.path[..index],
            None => &self.path,
        }
    }

    /// Protocol version, e.g. `"1.1"`
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get the headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// First value of a header, looked up case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Get the body source
    pub fn body(&self) -> Option<&Arc<dyn ByteSource>> {
        self.body.as_ref()
    }

    /// Check whether the request goes over TLS
    pub fn is_https(&self) -> bool {
        self.url.scheme() == HTTPS
    }

    /// Host to resolve, without IPv6 brackets
    pub fn host(&self) -> String {
        match self.url.host() {
            Some(Host::Ipv6(addr)) => addr.to_string(),
            Some(host) => host.to_string(),
            None => String::new(),
        }
    }

    /// Port to connect to, falling back to the scheme default
    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(80)
    }

    /// Set the HTTP method
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set the protocol version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Append a header
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Append a header in place; existing values are kept
    pub fn append_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.append(name, value);
        self
    }

    /// Replace all values of a header in place
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.set(name, value);
        self
    }

    /// Remove every header matching `name`, case-insensitively
    pub fn remove_header(&mut self, name: &str) -> &mut Self {
        self.headers.remove(name);
        self
    }

    /// Remove all headers, including `Host`
    pub fn clear_headers(&mut self) -> &mut Self {
        self.headers.clear();
        self
    }

    /// Set the content type
    pub fn content_type(self, content_type: &str) -> Self {
        self.with_header(header::CONTENT_TYPE, content_type)
    }

    /// Set the accept header
    pub fn accept(self, accept: &str) -> Self {
        self.with_header(header::ACCEPT, accept)
    }

    /// Set the body source
    pub fn with_body<B>(mut self, body: B) -> Self
    where
        B: ByteSource + 'static,
    {
        self.body = Some(Arc::new(body));
        self
    }

    /// Set an already shared body source
    pub fn with_shared_body(mut self, body: Arc<dyn ByteSource>) -> Self {
        self.body = Some(body);
        self
    }

    /// Set text body
    pub fn text(self, body: &str) -> Self {
        self.with_body(BytesSource::from(body))
            .content_type("text/plain")
    }

    /// Set bytes body
    pub fn bytes(self, body: Vec<u8>) -> Self {
        self.with_body(BytesSource::from(body))
    }

    /// Set JSON body
    pub fn json<T>(self, body: &T) -> Result<Self>
    where
        T: serde::Serialize,
    {
        let encoded = serde_json::to_vec(body)?;
        Ok(self
            .with_body(BytesSource::from(encoded))
            .content_type("application/json"))
    }

    /// Derive the request for a redirect hop
    ///
    /// Method and headers carry over except that `Host` is recomputed; the
    /// body source is shared, not copied.
    pub(crate) fn redirected(&self, url: Url) -> Result<Self> {
        validate(&url)?;
        let mut headers = self.headers.clone();
        headers.set(header::HOST, host_header(&url));

        Ok(Self {
            method: self.method,
            path: derive_path(&url),
            url,
            version: self.version.clone(),
            headers,
            body: self.body.clone(),
        })
    }

    pub(crate) fn without_body(mut self) -> Self {
        self.body = None;
        self.headers.remove(header::CONTENT_LENGTH);
        self.headers.remove(header::CONTENT_TYPE);
        self.headers.remove(header::TRANSFER_ENCODING);
        self
    }

    pub(crate) fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }
}

impl TryFrom<&str> for Request {
    type Error = Error;

    fn try_from(url: &str) -> Result<Self> {
        Self::get(url)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("body", &self.body.as_ref().map(|b| b.size_hint()))
            .finish()
    }
}

fn validate(url: &Url) -> Result<()> {
    if url.scheme() != HTTP && url.scheme() != HTTPS {
        return Err(Error::invalid_url(format!(
            "unsupported scheme '{}' in {}",
            url.scheme(),
            url
        )));
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(Error::invalid_url(format!("missing host in {}", url))),
    }
}

fn derive_path(url: &Url) -> String {
    let mut path = url.path().to_string();
    if path.is_empty() {
        path.push('/');
    }
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    if let Some(fragment) = url.fragment() {
        path.push('#');
        path.push_str(fragment);
    }
    path
}

/// `host[:port]`, with the port only when it differs from the scheme default
pub(crate) fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_creation() {
        let request = Request::get("http://example.test/a?b=1#frag").unwrap();
        assert_eq!(request.method(), Method::Get);
        assert_eq!(request.path(), "/a?b=1#frag");
        assert_eq!(request.request_target(), "/a?b=1");
        assert_eq!(request.version(), "1.1");
        assert!(!request.is_https());
    }

    #[test]
    fn test_host_header_omits_default_port() {
        let request = Request::get("http://example.test:80/").unwrap();
        assert_eq!(request.header("host"), Some("example.test"));

        let request = Request::get("https://example.test/").unwrap();
        assert_eq!(request.header("Host"), Some("example.test"));
        assert_eq!(request.port(), 443);
    }

    #[test]
    fn test_host_header_keeps_non_default_port() {
        let request = Request::get("http://example.test:8080/x").unwrap();
        assert_eq!(request.header("Host"), Some("example.test:8080"));
        assert_eq!(request.port(), 8080);

        let request = Request::get("https://example.test:80/x").unwrap();
        assert_eq!(request.header("Host"), Some("example.test:80"));
    }

    #[test]
    fn test_ipv6_host() {
        let request = Request::get("http://[::1]:9000/").unwrap();
        assert_eq!(request.header("Host"), Some("[::1]:9000"));
        assert_eq!(request.host(), "::1");
    }

    #[test]
    fn test_rejects_other_schemes() {
        for url in ["ftp://example.test/", "file:///etc/hosts", "ws://example.test/"] {
            let err = Request::get(url).unwrap_err();
            assert!(matches!(err, Error::InvalidUrl(_)), "{url}");
        }
        assert!(matches!(Request::get("garbage").unwrap_err(), Error::InvalidUrl(_)));
    }

    #[test]
    fn test_header_manipulation() {
        let mut request = Request::post("http://example.test/")
            .unwrap()
            .with_header("Content-Type", "x");
        assert_eq!(request.header("content-type"), Some("x"));

        request.append_header("X-Tag", "1").append_header("x-tag", "2");
        assert_eq!(request.headers().get_all("X-TAG").count(), 2);

        request.remove_header("X-TAG");
        assert!(request.header("x-tag").is_none());
    }

    #[test]
    fn test_redirected_recomputes_host_and_shares_body() {
        let request = Request::post("http://example.test/a")
            .unwrap()
            .with_header("X-Keep", "yes")
            .text("payload");
        let next = request
            .redirected(Url::parse("http://other.test:8080/b").unwrap())
            .unwrap();

        assert_eq!(next.header("Host"), Some("other.test:8080"));
        assert_eq!(next.headers().get_all("host").count(), 1);
        assert_eq!(next.header("X-Keep"), Some("yes"));
        assert_eq!(next.path(), "/b");
        assert!(Arc::ptr_eq(request.body().unwrap(), next.body().unwrap()));
        assert_eq!(request.header("Host"), Some("example.test"));
    }

    #[test]
    fn test_json_body() {
        let request = Request::post("http://example.test/")
            .unwrap()
            .json(&serde_json::json!({"a": 1}))
            .unwrap();
        assert_eq!(request.header("Content-Type"), Some("application/json"));
        assert_eq!(request.body().unwrap().size_hint(), Some(7));
    }
}
