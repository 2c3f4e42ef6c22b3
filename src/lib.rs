//! fetchx - an asynchronous HTTP/1.1 client engine
//!
//! fetchx turns a [`Request`] into exactly one [`Response`] or [`Error`]. Each
//! call to [`Client::execute`] runs as an independent Transaction that
//! resolves the host, connects (with TLS for `https`), writes the request,
//! reads the response and optionally follows redirects.
//!
//! ## Features
//!
//! - **Layered timeouts**: independent resolve, read and total budgets per call
//! - **Resolution cache** shared by every Transaction of a client
//! - **Redirect following** with a bounded budget and RFC method conversion
//! - **SSL/TLS** via rustls, with peer verification driven by client options
//! - **Streaming request bodies** from buffers, readers or streams
//! - **Progress callbacks** for bytes written and read
//! - **Proxy support** (absolute-form and `CONNECT` tunnels)
//! - **Cancellation** by dropping the returned future
//!
//! ## Quick Start
//!
//! ```no_run
//! use fetchx::{Client, ClientOptions, Request, RequestOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::with_options(ClientOptions {
//!         follow_redirects: true,
//!         cache_resolved: true,
//!         ..ClientOptions::default()
//!     });
//!
//!     let request = Request::get("http://example.com/")?;
//!     let response = client.execute(request, RequestOptions::quick()).await?;
//!
//!     println!("Status: {}", response.status());
//!     println!("Body: {}", response.text());
//!     Ok(())
//! }
//! ```

pub mod body;
pub mod client;
pub mod codec;
pub mod connection;
pub mod constants;
pub mod error;
pub mod headers;
pub mod method;
pub mod options;
pub mod proxy;
pub mod redirect;
pub mod request;
pub mod resolver;
pub mod response;
pub mod timeout;
pub mod tls;
pub mod transaction;
pub mod transport;

// Re-export main types for convenience
pub use body::{ByteSource, BytesSource, ReaderSource, StreamSource};
pub use client::{Client, ClientBuilder, ResponseFuture};
pub use error::{ConnectFailure, Error, Result};
pub use headers::Headers;
pub use method::Method;
pub use options::{
    ClientOptions, ProgressCallback, RedirectLimitPolicy, RequestOptions, TransferDirection,
};
pub use proxy::{ProxyAuth, ProxyBuilder, ProxyConfig};
pub use request::Request;
pub use resolver::{ResolutionCache, Resolve, SystemResolver};
pub use response::{Response, StatusError};
pub use timeout::TimeoutKind;
pub use tls::{TlsConfig, TlsVersion};
pub use transaction::State as TransactionState;
pub use transport::{AsyncIo, BoxedIo, TcpTransport, Transport};

// Re-export common HTTP types
pub use http::StatusCode;

// Re-export URL types
pub use url::Url;

// Re-export common traits
pub use async_trait::async_trait;
