use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MAX_REDIRECTS, DEFAULT_TIMEOUT_MS, DEFAULT_USER_AGENT};
use crate::error::Result;

/// Which way bytes moved when the progress callback fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferDirection {
    BytesWritten,
    BytesRead,
}

/// Called with the direction and the running byte total of the current connection
pub type ProgressCallback = Arc<dyn Fn(TransferDirection, u64) + Send + Sync>;

/// What `execute` yields when a redirect arrives with the budget spent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectLimitPolicy {
    /// Hand back the redirect response as-is
    #[default]
    ReturnLast,
    /// Fail with [`Error::RedirectLimitExceeded`](crate::Error::RedirectLimitExceeded)
    Error,
}

/// Client-scoped defaults
///
/// Owned by the [`Client`](crate::Client) and shared read-only by every
/// Transaction it runs. Build one with a struct literal over
/// `ClientOptions::default()` or with the `with_*` methods.
///
/// # Examples
///
/// ```rust
/// use fetchx::ClientOptions;
/// use std::time::Duration;
///
/// let options = ClientOptions {
///     follow_redirects: true,
///     cache_resolved: true,
///     ..ClientOptions::default()
/// }
/// .with_timeout(Duration::from_secs(5));
/// assert!(options.follow_redirects);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Follow 3xx responses that carry a `Location`
    pub follow_redirects: bool,
    /// Remember resolved endpoints per `host:port`
    pub cache_resolved: bool,
    /// Route requests through the configured (or environment) proxy
    pub use_proxy: bool,
    /// Verify TLS peers even without configured trust anchors
    pub always_verify_peer: bool,
    /// Sent as `User-Agent` unless the request carries its own
    pub user_agent: String,
    /// Budget for each connect plus TLS handshake attempt
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    /// PEM files with trust anchors; any entry turns peer verification on
    pub certificate_paths: Vec<PathBuf>,
    /// Directories of PEM files added to the trust store
    pub verify_paths: Vec<PathBuf>,
    pub redirect_limit_policy: RedirectLimitPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            follow_redirects: false,
            cache_resolved: false,
            use_proxy: false,
            always_verify_peer: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            certificate_paths: Vec::new(),
            verify_paths: Vec::new(),
            redirect_limit_policy: RedirectLimitPolicy::default(),
        }
    }
}

impl ClientOptions {
    /// Create options with every default
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from JSON; absent fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    pub fn with_cache_resolved(mut self, cache: bool) -> Self {
        self.cache_resolved = cache;
        self
    }

    pub fn with_use_proxy(mut self, use_proxy: bool) -> Self {
        self.use_proxy = use_proxy;
        self
    }

    pub fn with_always_verify_peer(mut self, verify: bool) -> Self {
        self.always_verify_peer = verify;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a trust-anchor file; duplicates are ignored
    pub fn with_certificate_path(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if !self.certificate_paths.contains(&path) {
            self.certificate_paths.push(path);
        }
        self
    }

    /// Add a directory of trust anchors; duplicates are ignored
    pub fn with_verify_path(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if !self.verify_paths.contains(&path) {
            self.verify_paths.push(path);
        }
        self
    }

    pub fn with_redirect_limit_policy(mut self, policy: RedirectLimitPolicy) -> Self {
        self.redirect_limit_policy = policy;
        self
    }
}

/// Per-call budgets and hooks
///
/// The three timeouts are independent: the resolve timer covers name
/// resolution, the read timer restarts on every read, and the total timer runs
/// from `execute` until the result is delivered.
#[derive(Clone)]
pub struct RequestOptions {
    pub resolve_timeout: Duration,
    pub read_timeout: Duration,
    pub total_timeout: Duration,
    pub max_redirects: u32,
    pub progress: Option<ProgressCallback>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            resolve_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            read_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            total_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            progress: None,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = timeout;
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: u32) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Install a progress callback
    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(TransferDirection, u64) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Budgets suited to short interactive calls
    pub fn quick() -> Self {
        Self {
            resolve_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(3),
            total_timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }

    /// Budgets suited to large transfers
    pub fn long() -> Self {
        Self {
            resolve_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(270),
            total_timeout: Duration::from_secs(300),
            ..Self::default()
        }
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("resolve_timeout", &self.resolve_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("total_timeout", &self.total_timeout)
            .field("max_redirects", &self.max_redirects)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
