use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tracing::Instrument;

use crate::error::{Error, Result};
use crate::method::Method;
use crate::options::{ClientOptions, RedirectLimitPolicy, RequestOptions};
use crate::proxy::ProxyConfig;
use crate::request::Request;
use crate::resolver::{ResolutionCache, Resolve, Resolver, SystemResolver};
use crate::response::Response;
use crate::tls::TlsConfig;
use crate::transaction::Transaction;
use crate::transport::{TcpTransport, Transport};

/// Main HTTP client for fetchx
///
/// A Client owns the options, the resolver (and its cache) and the transport.
/// Cloning is cheap; clones share all of them. Every call to
/// [`execute`](Client::execute) runs as an independent Transaction on the
/// tokio runtime.
///
/// # Examples
///
/// ```no_run
/// use fetchx::{Client, ClientOptions, Request, RequestOptions};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = Client::with_options(ClientOptions::new().with_follow_redirects(true));
///     let response = client
///         .get(Request::get("http://example.com/")?, RequestOptions::default())
///         .await?;
///     println!("Status: {}", response.status());
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    pub(crate) options: ClientOptions,
    pub(crate) resolver: Resolver,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) proxy: ProxyConfig,
    tls_config: TlsConfig,
    tls: OnceLock<std::result::Result<TlsConnector, String>>,
}

impl ClientInner {
    /// Connector for https hops, built on first use
    pub(crate) fn tls_connector(&self) -> Result<TlsConnector> {
        let built = self.tls.get_or_init(|| {
            self.tls_config.connector().map_err(|e| match e {
                Error::Tls(message) => message,
                other => other.to_string(),
            })
        });
        match built {
            Ok(connector) => Ok(connector.clone()),
            Err(message) => Err(Error::tls(message.clone())),
        }
    }
}

impl Client {
    /// Create a new client with default settings
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a new client with the given options
    pub fn with_options(options: ClientOptions) -> Self {
        Self::builder().options(options).build()
    }

    /// Create a new client builder
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Options this client was built with
    pub fn config(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Proxy configuration consulted when `use_proxy` is set
    pub fn proxy(&self) -> &ProxyConfig {
        &self.inner.proxy
    }

    /// Resolution cache shared by this client's Transactions, when enabled
    pub fn resolution_cache(&self) -> Option<&ResolutionCache> {
        self.inner.resolver.cache().map(|cache| cache.as_ref())
    }

    /// Start a Transaction for `request`
    ///
    /// The Transaction runs on its own task; the returned future resolves
    /// exactly once. Dropping it cancels the Transaction and closes any open
    /// Connection.
    pub fn execute(&self, request: Request, options: RequestOptions) -> ResponseFuture {
        let span = tracing::debug_span!(
            "transaction",
            method = %request.method(),
            url = %request.url(),
        );
        let transaction = Transaction::new(self.inner.clone(), options);
        let handle = tokio::spawn(transaction.run(request).instrument(span));
        ResponseFuture { handle }
    }

    /// Execute `request` as a GET
    pub fn get(&self, request: Request, options: RequestOptions) -> ResponseFuture {
        self.execute(request.with_method(Method::Get), options)
    }

    /// Execute `request` as a POST
    pub fn post(&self, request: Request, options: RequestOptions) -> ResponseFuture {
        self.execute(request.with_method(Method::Post), options)
    }

    /// Execute `request` as a PUT
    pub fn put(&self, request: Request, options: RequestOptions) -> ResponseFuture {
        self.execute(request.with_method(Method::Put), options)
    }

    /// Execute `request` as a DELETE
    pub fn delete(&self, request: Request, options: RequestOptions) -> ResponseFuture {
        self.execute(request.with_method(Method::Delete), options)
    }

    /// Execute `request` as a HEAD
    pub fn head(&self, request: Request, options: RequestOptions) -> ResponseFuture {
        self.execute(request.with_method(Method::Head), options)
    }

    /// Execute `request` as an OPTIONS
    pub fn options(&self, request: Request, options: RequestOptions) -> ResponseFuture {
        self.execute(request.with_method(Method::Options), options)
    }

    /// Execute `request` as a PATCH
    pub fn patch(&self, request: Request, options: RequestOptions) -> ResponseFuture {
        self.execute(request.with_method(Method::Patch), options)
    }

    pub(crate) fn inner(&self) -> Arc<ClientInner> {
        self.inner.clone()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("options", &self.inner.options)
            .field("resolver", &self.inner.resolver)
            .field("transport", &self.inner.transport.name())
            .finish()
    }
}

/// Pending result of one Transaction
///
/// Resolves to the final [`Response`] or the error that ended the
/// Transaction. Dropping the future (or calling [`cancel`](Self::cancel))
/// aborts the Transaction; no result is produced afterwards.
#[must_use = "dropping a ResponseFuture cancels the request"]
pub struct ResponseFuture {
    handle: JoinHandle<Result<Response>>,
}

impl ResponseFuture {
    /// Abort the Transaction
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Check whether the Transaction has reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Future for ResponseFuture {
    type Output = Result<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) if e.is_cancelled() => Poll::Ready(Err(Error::Cancelled)),
            Poll::Ready(Err(e)) => Poll::Ready(Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                e.to_string(),
            )))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ResponseFuture {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

/// Builder for creating HTTP clients
pub struct ClientBuilder {
    options: ClientOptions,
    resolver: Option<Arc<dyn Resolve>>,
    transport: Option<Arc<dyn Transport>>,
    proxy: Option<ProxyConfig>,
    tls: Option<TlsConfig>,
}

impl ClientBuilder {
    /// Create a new client builder
    pub fn new() -> Self {
        Self {
            options: ClientOptions::default(),
            resolver: None,
            transport: None,
            proxy: None,
            tls: None,
        }
    }

    /// Replace all options at once
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Follow 3xx responses
    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.options.follow_redirects = follow;
        self
    }

    /// Cache resolved endpoints per `host:port`
    pub fn cache_resolved(mut self, cache: bool) -> Self {
        self.options.cache_resolved = cache;
        self
    }

    /// Set the connect timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = timeout;
        self
    }

    /// Set the user agent
    pub fn user_agent(mut self, user_agent: &str) -> Self {
        self.options.user_agent = user_agent.to_string();
        self
    }

    /// Verify TLS peers even without configured trust anchors
    pub fn always_verify_peer(mut self, verify: bool) -> Self {
        self.options.always_verify_peer = verify;
        self
    }

    /// Add a trust-anchor file
    pub fn certificate_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options = self.options.with_certificate_path(path);
        self
    }

    /// Add a directory of trust anchors
    pub fn verify_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options = self.options.with_verify_path(path);
        self
    }

    /// What to yield when the redirect budget runs out
    pub fn redirect_limit_policy(mut self, policy: RedirectLimitPolicy) -> Self {
        self.options.redirect_limit_policy = policy;
        self
    }

    /// Route requests through `config`
    pub fn proxy_config(mut self, config: ProxyConfig) -> Self {
        self.options.use_proxy = true;
        self.proxy = Some(config);
        self
    }

    /// Route requests through the proxy named by the environment
    pub fn use_proxy(mut self, use_proxy: bool) -> Self {
        self.options.use_proxy = use_proxy;
        self
    }

    /// Override the TLS configuration derived from the options
    pub fn tls_config(mut self, config: TlsConfig) -> Self {
        self.tls = Some(config);
        self
    }

    /// Use a custom name resolver
    pub fn resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Use a custom transport
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the client
    pub fn build(self) -> Client {
        let backend = self
            .resolver
            .unwrap_or_else(|| Arc::new(SystemResolver));
        let resolver = Resolver::new(backend, self.options.cache_resolved);
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(TcpTransport::default()));
        let proxy = match self.proxy {
            Some(proxy) => proxy,
            None if self.options.use_proxy => ProxyConfig::from_env(),
            None => ProxyConfig::new(),
        };
        let tls_config = self
            .tls
            .unwrap_or_else(|| TlsConfig::from_options(&self.options));

        Client {
            inner: Arc::new(ClientInner {
                options: self.options,
                resolver,
                transport,
                proxy,
                tls_config,
                tls: OnceLock::new(),
            }),
        }
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience methods for JSON endpoints
impl Client {
    /// GET `url` and decode the body as JSON
    pub async fn get_json<T>(&self, url: &str, options: RequestOptions) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let request = Request::get(url)?.accept("application/json");
        self.execute(request, options).await?.json()
    }

    /// POST `body` as JSON to `url` and decode the JSON reply
    pub async fn post_json<T, U>(&self, url: &str, body: &T, options: RequestOptions) -> Result<U>
    where
        T: serde::Serialize,
        U: serde::de::DeserializeOwned,
    {
        let request = Request::post(url)?
            .accept("application/json")
            .json(body)?;
        self.execute(request, options).await?.json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_creation() {
        let client = Client::new();
        assert!(!client.config().follow_redirects);
        assert!(client.resolution_cache().is_none());
        assert!(!client.proxy().has_proxy());
    }

    #[tokio::test]
    async fn test_client_builder() {
        let client = Client::builder()
            .follow_redirects(true)
            .cache_resolved(true)
            .timeout(Duration::from_secs(5))
            .user_agent("test-agent")
            .redirect_limit_policy(RedirectLimitPolicy::Error)
            .build();

        assert!(client.config().follow_redirects);
        assert_eq!(client.config().timeout, Duration::from_secs(5));
        assert_eq!(client.config().user_agent, "test-agent");
        assert!(client.resolution_cache().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_proxy_config_enables_proxying() {
        let client = Client::builder()
            .proxy_config(ProxyConfig::new().proxy("http://proxy.test:3128".parse().unwrap()))
            .build();
        assert!(client.config().use_proxy);
        assert!(client.proxy().has_proxy());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let client = Client::builder().cache_resolved(true).build();
        let clone = client.clone();
        client
            .resolution_cache()
            .unwrap()
            .insert("example.test", 80, vec!["10.0.0.1:80".parse().unwrap()]);
        assert_eq!(clone.resolution_cache().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tls_failure_is_cached_as_tls_error() {
        let missing = std::env::temp_dir().join("fetchx-no-such-anchor.pem");
        let client = Client::builder().certificate_path(missing).build();
        let first = client.inner.tls_connector().err().unwrap();
        let second = client.inner.tls_connector().err().unwrap();
        assert!(matches!(first, Error::Tls(_)));
        assert_eq!(first.to_string(), second.to_string());
    }
}
