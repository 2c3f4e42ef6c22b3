use std::collections::HashMap;

use base64::Engine;
use url::{Host, Url};

use crate::codec::{encode_head, ResponseParser};
use crate::connection::Connection;
use crate::constants::{header, CHUNK_SIZE, DEFAULT_VERSION, HTTP, HTTPS};
use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::method::Method;
use crate::timeout::{Deadlines, TimeoutKind};

/// Proxy configuration for HTTP requests
///
/// Plain `http` requests are sent to the proxy in absolute form; `https`
/// requests open a `CONNECT` tunnel and run TLS through it.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// HTTP proxy URL
    pub http_proxy: Option<Url>,
    /// HTTPS proxy URL
    pub https_proxy: Option<Url>,
    /// Proxy authentication
    pub auth: Option<ProxyAuth>,
    /// Proxy bypass patterns
    pub bypass: Vec<String>,
    /// Custom proxy for specific hosts
    pub custom_proxies: HashMap<String, Url>,
}

/// Proxy authentication
#[derive(Debug, Clone)]
pub struct ProxyAuth {
    /// Username
    pub username: String,
    /// Password
    pub password: String,
}

impl ProxyAuth {
    /// Create a new proxy authentication
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    /// Get the username
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Get the password
    pub fn password(&self) -> &str {
        &self.password
    }

    /// `Proxy-Authorization` value using the Basic scheme
    pub fn basic(&self) -> String {
        let credentials = format!("{}:{}", self.username, self.password);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(credentials)
        )
    }
}

/// Where one request hop is sent when it goes through a proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    /// Proxy host to resolve, without IPv6 brackets
    pub host: String,
    pub port: u16,
    /// `Proxy-Authorization` value, if credentials are configured
    pub authorization: Option<String>,
    /// Tunnel with `CONNECT` instead of sending absolute-form requests
    pub tunnel: bool,
}

impl ProxyConfig {
    /// Create a new proxy configuration
    pub fn new() -> Self {
        Self {
            http_proxy: None,
            https_proxy: None,
            auth: None,
            bypass: Vec::new(),
            custom_proxies: HashMap::new(),
        }
    }

    /// Set HTTP proxy
    pub fn http_proxy(mut self, url: Url) -> Self {
        self.http_proxy = Some(url);
        self
    }

    /// Set HTTPS proxy
    pub fn https_proxy(mut self, url: Url) -> Self {
        self.https_proxy = Some(url);
        self
    }

    /// Set both HTTP and HTTPS proxies to the same URL
    pub fn proxy(mut self, url: Url) -> Self {
        self.http_proxy = Some(url.clone());
        self.https_proxy = Some(url);
        self
    }

    /// Set proxy authentication
    pub fn auth(mut self, auth: ProxyAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Set proxy authentication with username and password
    pub fn auth_credentials(mut self, username: &str, password: &str) -> Self {
        self.auth = Some(ProxyAuth::new(username, password));
        self
    }

    /// Add a bypass pattern
    pub fn bypass(mut self, pattern: &str) -> Self {
        self.bypass.push(pattern.to_string());
        self
    }

    /// Add multiple bypass patterns
    pub fn bypass_patterns(mut self, patterns: Vec<String>) -> Self {
        self.bypass.extend(patterns);
        self
    }

    /// Add a custom proxy for a specific host
    pub fn custom_proxy(mut self, host: &str, url: Url) -> Self {
        self.custom_proxies.insert(host.to_ascii_lowercase(), url);
        self
    }

    /// Check if any proxy is configured
    pub fn has_proxy(&self) -> bool {
        self.http_proxy.is_some() || self.https_proxy.is_some() || !self.custom_proxies.is_empty()
    }

    /// Check if a URL should bypass the proxy
    ///
    /// Patterns follow `NO_PROXY` conventions: `*` matches every host, and a
    /// domain matches itself and its subdomains (a leading dot is optional).
    pub fn should_bypass(&self, url: &Url) -> bool {
        let host = match url.host_str() {
            Some(host) => host.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase(),
            None => return false,
        };
        let host_port = url
            .port_or_known_default()
            .map(|port| format!("{}:{}", host, port));

        self.bypass.iter().any(|pattern| {
            let pattern = pattern.trim().to_ascii_lowercase();
            if pattern == "*" {
                return true;
            }
            if host_port.as_deref() == Some(pattern.as_str()) {
                return true;
            }
            let domain = pattern.trim_start_matches('.');
            !domain.is_empty()
                && (host == domain
                    || host
                        .strip_suffix(domain)
                        .map_or(false, |prefix| prefix.ends_with('.')))
        })
    }

    /// Get the appropriate proxy for a URL
    pub fn get_proxy_for_url(&self, url: &Url) -> Option<&Url> {
        if self.should_bypass(url) {
            return None;
        }

        if let Some(host) = url.host_str() {
            if let Some(proxy) = self.custom_proxies.get(&host.to_ascii_lowercase()) {
                return Some(proxy);
            }
        }

        match url.scheme() {
            HTTP => self.http_proxy.as_ref(),
            HTTPS => self.https_proxy.as_ref(),
            _ => None,
        }
    }

    /// Route for a request to `url`, or `None` to connect directly
    pub fn route(&self, url: &Url) -> Result<Option<ProxyRoute>> {
        let proxy = match self.get_proxy_for_url(url) {
            Some(proxy) => proxy,
            None => return Ok(None),
        };
        if proxy.scheme() != HTTP {
            return Err(Error::proxy(format!(
                "unsupported proxy scheme '{}'",
                proxy.scheme()
            )));
        }

        let host = match proxy.host() {
            Some(Host::Ipv6(addr)) => addr.to_string(),
            Some(host) => host.to_string(),
            None => return Err(Error::proxy(format!("proxy URL has no host: {}", proxy))),
        };
        let port = proxy.port_or_known_default().unwrap_or(80);

        let authorization = match &self.auth {
            Some(auth) => Some(auth.basic()),
            None if !proxy.username().is_empty() => Some(
                ProxyAuth::new(proxy.username(), proxy.password().unwrap_or_default()).basic(),
            ),
            None => None,
        };

        Ok(Some(ProxyRoute {
            host,
            port,
            authorization,
            tunnel: url.scheme() == HTTPS,
        }))
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Proxy builder for creating proxy configurations
pub struct ProxyBuilder {
    config: ProxyConfig,
}

impl ProxyBuilder {
    /// Create a new proxy builder
    pub fn new() -> Self {
        Self {
            config: ProxyConfig::new(),
        }
    }

    /// Set HTTP proxy
    pub fn http(mut self, url: &str) -> Result<Self> {
        let url = url
            .parse::<Url>()
            .map_err(|e| Error::proxy(format!("Invalid HTTP proxy URL: {}", e)))?;
        self.config = self.config.http_proxy(url);
        Ok(self)
    }

    /// Set HTTPS proxy
    pub fn https(mut self, url: &str) -> Result<Self> {
        let url = url
            .parse::<Url>()
            .map_err(|e| Error::proxy(format!("Invalid HTTPS proxy URL: {}", e)))?;
        self.config = self.config.https_proxy(url);
        Ok(self)
    }

    /// Set both HTTP and HTTPS proxies
    pub fn all(mut self, url: &str) -> Result<Self> {
        let url = url
            .parse::<Url>()
            .map_err(|e| Error::proxy(format!("Invalid proxy URL: {}", e)))?;
        self.config = self.config.proxy(url);
        Ok(self)
    }

    /// Set proxy credentials
    pub fn credentials(mut self, username: &str, password: &str) -> Self {
        self.config = self.config.auth_credentials(username, password);
        self
    }

    /// Add bypass pattern
    pub fn bypass(mut self, pattern: &str) -> Self {
        self.config = self.config.bypass(pattern);
        self
    }

    /// Add custom proxy for specific host
    pub fn custom(mut self, host: &str, url: &str) -> Result<Self> {
        let url = url
            .parse::<Url>()
            .map_err(|e| Error::proxy(format!("Invalid custom proxy URL: {}", e)))?;
        self.config = self.config.custom_proxy(host, url);
        Ok(self)
    }

    /// Build the proxy configuration
    pub fn build(self) -> ProxyConfig {
        self.config
    }
}

impl Default for ProxyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience methods for proxy operations
impl ProxyConfig {
    /// Create a proxy builder
    pub fn builder() -> ProxyBuilder {
        ProxyBuilder::new()
    }

    /// Create a proxy configuration from environment variables
    ///
    /// Reads `HTTP_PROXY`, `HTTPS_PROXY` and `NO_PROXY`, falling back to
    /// their lower-case spellings.
    pub fn from_env() -> Self {
        let mut config = Self::new();

        if let Some(url) = env_var(&["HTTP_PROXY", "http_proxy"]).and_then(|v| v.parse().ok()) {
            config = config.http_proxy(url);
        }

        if let Some(url) = env_var(&["HTTPS_PROXY", "https_proxy"]).and_then(|v| v.parse().ok()) {
            config = config.https_proxy(url);
        }

        if let Some(no_proxy) = env_var(&["NO_PROXY", "no_proxy"]) {
            let bypass_patterns: Vec<String> = no_proxy
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            config = config.bypass_patterns(bypass_patterns);
        }

        config
    }

    /// Create a proxy configuration for a specific host and port
    pub fn host_port(host: &str, port: u16) -> Result<Self> {
        let url = format!("http://{}:{}", host, port)
            .parse::<Url>()
            .map_err(|e| Error::proxy(format!("Invalid host:port URL: {}", e)))?;
        Ok(Self::new().proxy(url))
    }
}

fn env_var(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}

/// Head of the `CONNECT` request opening a tunnel to `host:port`
pub fn connect_head(host: &str, port: u16, authorization: Option<&str>) -> Vec<u8> {
    let authority = if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    };
    let mut headers = Headers::new();
    headers.append(header::HOST, authority.clone());
    if let Some(authorization) = authorization {
        headers.append(header::PROXY_AUTHORIZATION, authorization);
    }
    encode_head(Method::Connect, &authority, DEFAULT_VERSION, &headers)
}

/// Ask the proxy on `connection` to open a tunnel to `host:port`
///
/// Reads are bounded by the Transaction's read timer. Any status other than
/// 2xx fails with [`Error::Proxy`].
pub async fn establish_tunnel(
    connection: &mut Connection,
    host: &str,
    port: u16,
    authorization: Option<&str>,
    deadlines: &Deadlines,
) -> Result<()> {
    let head = connect_head(host, port, authorization);
    deadlines
        .run(TimeoutKind::Total, connection.write(&head))
        .await?;

    let url = Url::parse(&format!("{}://{}:{}/", HTTPS, host, port))
        .or_else(|_| Url::parse(&format!("{}://[{}]:{}/", HTTPS, host, port)))?;
    let mut parser = ResponseParser::new(url, Method::Connect);
    let mut buf = vec![0u8; CHUNK_SIZE];
    while !parser.head_complete() {
        let n = deadlines
            .run(TimeoutKind::Read, connection.read(&mut buf))
            .await?;
        if n == 0 {
            parser.finish()?;
            break;
        }
        parser.feed(&buf[..n])?;
    }

    let status = parser.response().status();
    if !status.is_success() {
        return Err(Error::proxy(format!(
            "proxy refused tunnel to {}:{}: {}",
            host, port, status
        )));
    }
    tracing::debug!(host, port, "proxy tunnel established");
    Ok(())
}
