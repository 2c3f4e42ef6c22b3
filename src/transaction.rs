//! The per-`execute` state machine.
//!
//! A Transaction walks `Idle → Resolving → Connecting → Writing → Reading`,
//! loops through `Redirecting` for each followed hop and ends in `Completed`
//! or `Failed`. Every hop opens its own Connection and closes it before the
//! next hop starts; nothing is pooled.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::time::timeout_at;
use tokio_rustls::TlsConnector;
use url::Url;

use crate::body::ByteSource;
use crate::client::ClientInner;
use crate::codec::{encode_chunk, encode_head, ResponseParser, LAST_CHUNK};
use crate::connection::Connection;
use crate::constants::{
    header, CHUNKED, CHUNK_SIZE, CLOSE, DEFAULT_ACCEPT, DEFAULT_ACCEPT_ENCODING,
};
use crate::error::{ConnectFailure, Error, Result};
use crate::headers::Headers;
use crate::method::Method;
use crate::options::{RedirectLimitPolicy, RequestOptions};
use crate::proxy::{establish_tunnel, ProxyRoute};
use crate::redirect;
use crate::request::Request;
use crate::response::Response;
use crate::timeout::{Bounded, Deadlines, TimeoutKind};

/// Where a Transaction is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Idle,
    Resolving,
    Connecting,
    Writing,
    Reading,
    Redirecting,
    Completed,
    Failed,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Completed | State::Failed)
    }
}

pub(crate) struct Transaction {
    client: Arc<ClientInner>,
    options: RequestOptions,
    state: State,
    redirects: u32,
}

impl Transaction {
    pub(crate) fn new(client: Arc<ClientInner>, options: RequestOptions) -> Self {
        Self {
            client,
            options,
            state: State::Idle,
            redirects: 0,
        }
    }

    /// Drive `request` to its single result
    pub(crate) async fn run(mut self, request: Request) -> Result<Response> {
        let deadlines = Deadlines::start(&self.options);
        let result = match timeout_at(deadlines.total_deadline(), self.drive(request, &deadlines)).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(
                TimeoutKind::Total,
                deadlines.budget(TimeoutKind::Total),
            )),
        };

        match &result {
            Ok(response) => {
                self.transition(State::Completed);
                tracing::debug!(
                    status = response.status().as_u16(),
                    redirects = self.redirects,
                    elapsed_ms = deadlines.elapsed().as_millis() as u64,
                    "transaction completed"
                );
            }
            Err(e) => {
                let from = self.state;
                self.transition(State::Failed);
                tracing::warn!(error = %e, during = ?from, "transaction failed");
            }
        }
        result
    }

    fn transition(&mut self, next: State) {
        debug_assert!(!self.state.is_terminal(), "transition out of a terminal state");
        tracing::trace!(from = ?self.state, to = ?next, "state transition");
        self.state = next;
    }

    fn follows_redirects(&self) -> bool {
        self.client.options.follow_redirects && self.options.max_redirects > 0
    }

    async fn drive(&mut self, mut request: Request, deadlines: &Deadlines) -> Result<Response> {
        if let Some(body) = request.body() {
            prepare_body(body.as_ref()).await?;
        }
        loop {
            let mut response = self.exchange(&request, deadlines).await?;
            response.set_redirect_count(self.redirects);

            if !self.follows_redirects() || !redirect::is_followable(&response) {
                return Ok(response);
            }

            if self.redirects >= self.options.max_redirects {
                tracing::debug!(max = self.options.max_redirects, "redirect budget exhausted");
                return match self.client.options.redirect_limit_policy {
                    RedirectLimitPolicy::ReturnLast => Ok(response),
                    RedirectLimitPolicy::Error => Err(Error::RedirectLimitExceeded {
                        redirects: self.redirects,
                        response: Box::new(response),
                    }),
                };
            }

            self.transition(State::Redirecting);
            match redirect::next_request(&request, &response).await {
                Some(next) => {
                    self.redirects += 1;
                    tracing::debug!(
                        status = response.status().as_u16(),
                        to = %next.url(),
                        method = %next.method(),
                        hop = self.redirects,
                        "following redirect"
                    );
                    request = next;
                }
                None => return Ok(response),
            }
        }
    }

    /// One hop: resolve, connect, write, read
    async fn exchange(&mut self, request: &Request, deadlines: &Deadlines) -> Result<Response> {
        let route = if self.client.options.use_proxy {
            self.client.proxy.route(request.url())?
        } else {
            None
        };
        let (host, port) = match &route {
            Some(route) => (route.host.clone(), route.port),
            None => (request.host(), request.port()),
        };

        self.transition(State::Resolving);
        let endpoints = deadlines
            .run(TimeoutKind::Resolve, self.client.resolver.resolve(&host, port))
            .await?;

        self.transition(State::Connecting);
        let tls = if request.is_https() {
            Some(self.client.tls_connector()?)
        } else {
            None
        };
        let mut connection = match (&route, &tls) {
            (Some(route), Some(connector)) if route.tunnel => {
                let mut connection = self.connect(&endpoints, None, deadlines).await?;
                establish_tunnel(
                    &mut connection,
                    &request.host(),
                    request.port(),
                    route.authorization.as_deref(),
                    deadlines,
                )
                .await?;
                self.upgrade(&mut connection, connector, &request.host(), deadlines)
                    .await?;
                connection
            }
            (Some(_), _) => self.connect(&endpoints, None, deadlines).await?,
            (None, Some(connector)) => {
                let sni = request.host();
                self.connect(&endpoints, Some((connector, sni.as_str())), deadlines)
                    .await?
            }
            (None, None) => self.connect(&endpoints, None, deadlines).await?,
        };

        let outcome = self
            .transfer(&mut connection, request, route.as_ref(), deadlines)
            .await;
        connection.close().await;
        outcome
    }

    /// Try each endpoint in order until one accepts
    async fn connect(
        &self,
        endpoints: &[SocketAddr],
        tls: Option<(&TlsConnector, &str)>,
        deadlines: &Deadlines,
    ) -> Result<Connection> {
        let timeout = self.client.options.timeout;
        let mut last = None;

        for &endpoint in endpoints {
            tracing::debug!(%endpoint, tls = tls.is_some(), "connecting");
            let attempt = Connection::open(self.client.transport.as_ref(), endpoint, tls);
            match deadlines.bounded(timeout, attempt).await? {
                Bounded::Done(Ok(connection)) => {
                    tracing::debug!(%endpoint, "connected");
                    return Ok(connection.with_progress(self.options.progress.clone()));
                }
                Bounded::Done(Err(cause @ ConnectFailure::CertificateInvalid(_))) => {
                    return Err(Error::connection(endpoint, cause));
                }
                Bounded::Done(Err(cause)) => {
                    tracing::debug!(%endpoint, error = %cause, "connect attempt failed");
                    last = Some(Error::connection(endpoint, cause));
                }
                Bounded::PhaseElapsed => {
                    tracing::debug!(%endpoint, "connect attempt timed out");
                    last = Some(Error::connection(endpoint, ConnectFailure::TimedOut(timeout)));
                }
            }
        }

        Err(last.unwrap_or_else(|| {
            Error::connection("<none>", ConnectFailure::Io(std::io::ErrorKind::NotFound.into()))
        }))
    }

    async fn upgrade(
        &self,
        connection: &mut Connection,
        connector: &TlsConnector,
        host: &str,
        deadlines: &Deadlines,
    ) -> Result<()> {
        let endpoint = connection.endpoint();
        let timeout = self.client.options.timeout;
        match deadlines.bounded(timeout, connection.upgrade(connector, host)).await? {
            Bounded::Done(result) => result,
            Bounded::PhaseElapsed => Err(Error::connection(endpoint, ConnectFailure::TimedOut(timeout))),
        }
    }

    async fn transfer(
        &mut self,
        connection: &mut Connection,
        request: &Request,
        route: Option<&ProxyRoute>,
        deadlines: &Deadlines,
    ) -> Result<Response> {
        self.transition(State::Writing);
        let headers = self.hop_headers(request, route);
        let target = match route {
            Some(route) if !route.tunnel => absolute_target(request.url()),
            _ => request.request_target().to_string(),
        };
        let head = encode_head(request.method(), &target, request.version(), &headers);
        deadlines
            .run(TimeoutKind::Total, connection.write(&head))
            .await?;

        if let Some(body) = request.body() {
            let chunked = is_chunked(&headers);
            write_body(connection, body.as_ref(), chunked, deadlines).await?;
        }

        self.transition(State::Reading);
        let mut parser = ResponseParser::new(request.url().clone(), request.method());
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = deadlines
                .run(TimeoutKind::Read, connection.read(&mut buf))
                .await?;
            if n == 0 {
                parser.finish()?;
                break;
            }
            if parser.feed(&buf[..n])? {
                break;
            }
        }
        Ok(parser.into_response())
    }

    /// Headers sent on this hop: the caller's headers plus the defaults they lack
    fn hop_headers(&self, request: &Request, route: Option<&ProxyRoute>) -> Headers {
        let mut headers = request.headers().clone();
        headers.append_if_absent(
            header::USER_AGENT,
            self.client.options.user_agent.as_str(),
        );
        headers.append_if_absent(header::ACCEPT, DEFAULT_ACCEPT);
        headers.append_if_absent(header::ACCEPT_ENCODING, DEFAULT_ACCEPT_ENCODING);
        headers.append_if_absent(header::CONNECTION, CLOSE);

        let framed = headers.contains(header::CONTENT_LENGTH)
            || headers.contains(header::TRANSFER_ENCODING);
        match request.body() {
            Some(body) if !framed => match body.size_hint() {
                Some(length) => headers.append(header::CONTENT_LENGTH, length.to_string()),
                None => headers.append(header::TRANSFER_ENCODING, CHUNKED),
            },
            None if !framed && matches!(request.method(), Method::Post | Method::Put | Method::Patch) => {
                headers.append(header::CONTENT_LENGTH, "0");
            }
            _ => {}
        }

        if let Some(authorization) = route
            .filter(|route| !route.tunnel)
            .and_then(|route| route.authorization.as_deref())
        {
            headers.append_if_absent(header::PROXY_AUTHORIZATION, authorization);
        }

        headers
    }
}

/// Start the body from its first byte; a source that was read before and cannot rewind is an error
async fn prepare_body(body: &dyn ByteSource) -> Result<()> {
    if !body.rewind().await && body.is_consumed() {
        return Err(Error::body(
            "request body was already consumed and cannot be replayed",
        ));
    }
    Ok(())
}

async fn write_body(
    connection: &mut Connection,
    body: &dyn ByteSource,
    chunked: bool,
    deadlines: &Deadlines,
) -> Result<()> {
    loop {
        let chunk = deadlines
            .run(TimeoutKind::Total, async {
                body.read(CHUNK_SIZE)
                    .await
                    .map_err(|e| Error::body(e.to_string()))
            })
            .await?;
        if chunk.is_empty() {
            break;
        }
        let framed = if chunked { encode_chunk(&chunk) } else { chunk };
        deadlines
            .run(TimeoutKind::Total, connection.write(&framed))
            .await?;
    }
    if chunked {
        deadlines
            .run(TimeoutKind::Total, connection.write(LAST_CHUNK))
            .await?;
    }
    Ok(())
}

fn is_chunked(headers: &Headers) -> bool {
    headers
        .get_all(header::TRANSFER_ENCODING)
        .flat_map(|v| v.split(','))
        .last()
        .map_or(false, |coding| coding.trim().eq_ignore_ascii_case(CHUNKED))
}

/// Absolute-form request target for a forward proxy, without the fragment
fn absolute_target(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::ReaderSource;
    use crate::client::Client;
    use crate::options::ClientOptions;

    fn transaction(options: ClientOptions) -> Transaction {
        let client = Client::with_options(options);
        Transaction::new(client.inner(), RequestOptions::default())
    }

    #[test]
    fn test_default_headers_fill_gaps_only() {
        let transaction = transaction(ClientOptions::default().with_user_agent("agent/1"));
        let request = Request::get("http://example.test/a")
            .unwrap()
            .with_header("Accept", "text/html");

        let headers = transaction.hop_headers(&request, None);
        assert_eq!(headers.get("host"), Some("example.test"));
        assert_eq!(headers.get("user-agent"), Some("agent/1"));
        assert_eq!(headers.get_all("accept").collect::<Vec<_>>(), vec!["text/html"]);
        assert_eq!(headers.get("accept-encoding"), Some("identity;q=1.0, *;q=0"));
        assert_eq!(headers.get("connection"), Some("close"));
        assert!(headers.get("content-length").is_none());
        assert!(request.header("user-agent").is_none());
    }

    #[test]
    fn test_body_framing_headers() {
        let transaction = transaction(ClientOptions::default());

        let known = Request::post("http://example.test/").unwrap().text("hello");
        assert_eq!(transaction.hop_headers(&known, None).get("content-length"), Some("5"));

        let streamed = Request::post("http://example.test/")
            .unwrap()
            .with_body(ReaderSource::new(std::io::Cursor::new(b"abc".to_vec())));
        let headers = transaction.hop_headers(&streamed, None);
        assert!(is_chunked(&headers));
        assert!(headers.get("content-length").is_none());

        let empty = Request::post("http://example.test/").unwrap();
        assert_eq!(transaction.hop_headers(&empty, None).get("content-length"), Some("0"));
    }

    #[test]
    fn test_proxy_authorization_only_for_forwarded_requests() {
        let transaction = transaction(ClientOptions::default());
        let request = Request::get("http://example.test/").unwrap();
        let mut route = ProxyRoute {
            host: "proxy.test".into(),
            port: 3128,
            authorization: Some("Basic abc".into()),
            tunnel: false,
        };
        assert_eq!(
            transaction.hop_headers(&request, Some(&route)).get("proxy-authorization"),
            Some("Basic abc")
        );
        route.tunnel = true;
        assert!(transaction
            .hop_headers(&request, Some(&route))
            .get("proxy-authorization")
            .is_none());
    }

    #[tokio::test]
    async fn test_prepare_body_rewinds_or_refuses() {
        let bytes = crate::body::BytesSource::from("hello");
        bytes.read(5).await.unwrap();
        prepare_body(&bytes).await.unwrap();
        assert_eq!(bytes.read(5).await.unwrap(), b"hello");

        let fresh = ReaderSource::new(std::io::Cursor::new(b"abc".to_vec()));
        prepare_body(&fresh).await.unwrap();

        fresh.read(3).await.unwrap();
        let err = prepare_body(&fresh).await.unwrap_err();
        assert!(matches!(err, Error::Body(_)));
    }

    #[test]
    fn test_absolute_target_drops_fragment() {
        let url = Url::parse("http://example.test:8080/a?b=1#c").unwrap();
        assert_eq!(absolute_target(&url), "http://example.test:8080/a?b=1");
    }

    #[test]
    fn test_terminal_states() {
        assert!(State::Completed.is_terminal());
        assert!(State::Failed.is_terminal());
        assert!(!State::Redirecting.is_terminal());
    }
}
