//! Name resolution and the client-wide resolution cache.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Turns a host and port into candidate endpoints
///
/// Implementations must be shareable across Transactions; the engine calls
/// `resolve` at most once per hop and never when the cache already holds the
/// `host:port` key.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;

    /// Get the resolver name
    fn name(&self) -> &str {
        "custom"
    }
}

/// Resolver backed by the operating system (`getaddrinfo` via tokio)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolve for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        Ok(tokio::net::lookup_host((host, port)).await?.collect())
    }

    fn name(&self) -> &str {
        "system"
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    endpoints: Vec<SocketAddr>,
    inserted_at: Instant,
}

/// `host:port` to endpoint-list map shared by every Transaction of a Client
///
/// Entries never expire while the Client lives; concurrent inserts for the
/// same key keep whichever write lands last.
#[derive(Debug, Default)]
pub struct ResolutionCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache key for a host and port
    pub fn key(host: &str, port: u16) -> String {
        format!("{}:{}", host.to_ascii_lowercase(), port)
    }

    /// Cached endpoints for `host:port`
    pub fn get(&self, host: &str, port: u16) -> Option<Vec<SocketAddr>> {
        let entries = self.entries.read().ok()?;
        entries
            .get(&Self::key(host, port))
            .map(|entry| entry.endpoints.clone())
    }

    /// Store endpoints for `host:port`, replacing any earlier entry
    pub fn insert(&self, host: &str, port: u16, endpoints: Vec<SocketAddr>) {
        if endpoints.is_empty() {
            return;
        }
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                Self::key(host, port),
                CacheEntry {
                    endpoints,
                    inserted_at: Instant::now(),
                },
            );
        }
    }

    /// Age of the entry for `host:port`
    pub fn age(&self, host: &str, port: u16) -> Option<std::time::Duration> {
        let entries = self.entries.read().ok()?;
        entries
            .get(&Self::key(host, port))
            .map(|entry| entry.inserted_at.elapsed())
    }

    /// Drop the entry for `host:port`; `true` if one existed
    pub fn remove(&self, host: &str, port: u16) -> bool {
        self.entries
            .write()
            .map(|mut entries| entries.remove(&Self::key(host, port)).is_some())
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolver front used by Transactions: consults the cache, then the backend
#[derive(Clone)]
pub struct Resolver {
    backend: Arc<dyn Resolve>,
    cache: Option<Arc<ResolutionCache>>,
}

impl Resolver {
    /// Create a new resolver; `cache` enables the resolution cache
    pub fn new(backend: Arc<dyn Resolve>, cache: bool) -> Self {
        Self {
            backend,
            cache: cache.then(|| Arc::new(ResolutionCache::new())),
        }
    }

    pub fn cache(&self) -> Option<&Arc<ResolutionCache>> {
        self.cache.as_ref()
    }

    /// Resolve `host:port` into a non-empty endpoint list
    pub async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        if let Some(endpoints) = self.cache.as_ref().and_then(|c| c.get(host, port)) {
            tracing::debug!(host, port, count = endpoints.len(), "resolution cache hit");
            return Ok(endpoints);
        }

        tracing::debug!(host, port, resolver = self.backend.name(), "resolving");
        let endpoints = self
            .backend
            .resolve(host, port)
            .await
            .map_err(|e| Error::resolution(host, e))?;

        if endpoints.is_empty() {
            return Err(Error::resolution(
                host,
                io::Error::new(io::ErrorKind::NotFound, "no endpoints"),
            ));
        }

        if let Some(cache) = &self.cache {
            cache.insert(host, port, endpoints.clone());
        }
        Ok(endpoints)
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(Arc::new(SystemResolver), false)
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("backend", &self.backend.name())
            .field("cached", &self.cache.as_ref().map(|c| c.len()))
            .finish()
    }
}
