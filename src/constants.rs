//! Readonly protocol constants shared across the engine.

pub const CRLF: &str = "\r\n";
pub const HTTP_SLASH: &str = "HTTP/";
pub const DEFAULT_VERSION: &str = "1.1";

pub const HTTP: &str = "http";
pub const HTTPS: &str = "https";

pub const DEFAULT_USER_AGENT: &str = concat!("fetchx/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_ACCEPT: &str = "*/*";
pub const DEFAULT_ACCEPT_ENCODING: &str = "identity;q=1.0, *;q=0";
pub const CLOSE: &str = "close";
pub const CHUNKED: &str = "chunked";

/// Upper bound on a response head (status line plus headers).
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Size of each read from the transport and each pull from a body source.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Default timeout budget, in milliseconds, used by every option struct.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

pub const DEFAULT_MAX_REDIRECTS: u32 = 10;

/// Header names as written on the wire. Lookups ignore case; these set the
/// spelling of headers the engine adds.
pub mod header {
    pub const ACCEPT: &str = "Accept";
    pub const ACCEPT_ENCODING: &str = "Accept-Encoding";
    pub const CONNECTION: &str = "Connection";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const HOST: &str = "Host";
    pub const LOCATION: &str = "Location";
    pub const PROXY_AUTHORIZATION: &str = "Proxy-Authorization";
    pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
    pub const USER_AGENT: &str = "User-Agent";
}
