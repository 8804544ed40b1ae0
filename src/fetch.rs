//! Proxy fetch coordination: cache-first remote fetching with
//! single-flight de-duplication
//!
//! On a cache miss, the first request for an artifact becomes the owner
//! of an in-flight entry and goes upstream; every concurrent request for
//! the same (repository, path) key joins as a waiter and receives the
//! broadcast outcome. This collapses request storms into one remote call
//! per artifact per repository.
//!
//! The owning fetch runs on its own task: a waiter that disconnects does
//! not cancel work other waiters depend on, and the cache is populated
//! regardless.

use crate::error::{RelayError, Result};
use crate::metrics::RelayMetrics;
use crate::models::{ArtifactPath, ProxyConfig, Repository, RepositoryRef, Storage};
use crate::pool::ConnectionPoolManager;
use crate::streamer::ArtifactSource;
use bytes::Bytes;
use http::header::HeaderName;
use http::HeaderMap;
use reqwest::Client;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Headers never forwarded to the upstream
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Key of an in-flight fetch: one live entry per artifact per repository
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FetchKey {
    repository: RepositoryRef,
    path: ArtifactPath,
}

/// Outcome broadcast to every waiter of an in-flight fetch
type FetchOutcome = Result<Bytes>;

type InFlightTable = Mutex<HashMap<FetchKey, broadcast::Sender<FetchOutcome>>>;

/// Fetches artifacts for proxy repositories, de-duplicating concurrent
/// upstream requests and persisting fetched bytes locally
pub struct ProxyFetchCoordinator {
    client: Client,
    pools: Arc<ConnectionPoolManager>,
    metrics: Arc<RelayMetrics>,
    in_flight: Arc<InFlightTable>,
}

impl ProxyFetchCoordinator {
    /// Create a coordinator with its own HTTP client
    ///
    /// `request_timeout` bounds each upstream request end to end.
    pub fn new(
        pools: Arc<ConnectionPoolManager>,
        metrics: Arc<RelayMetrics>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| {
                RelayError::ConfigError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(ProxyFetchCoordinator {
            client,
            pools,
            metrics,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Fetch an artifact for a proxy repository
    ///
    /// Serves a fresh local copy without touching the network; otherwise
    /// joins or starts the single in-flight fetch for this key. All
    /// waiters of one in-flight entry observe the same outcome.
    pub async fn fetch(
        &self,
        storage: &Storage,
        repository: &Repository,
        proxy: &ProxyConfig,
        path: &ArtifactPath,
        request_headers: &HeaderMap,
    ) -> Result<ArtifactSource> {
        let cache_path = path.fs_path(&storage.repository_dir(&repository.id));

        if let Some(source) = cached_source(&cache_path, proxy.check_interval_secs).await {
            debug!(path = %path, "Proxy cache hit");
            self.metrics.record_proxy_cache(true);
            return Ok(source);
        }
        self.metrics.record_proxy_cache(false);

        let key = FetchKey {
            repository: RepositoryRef::new(&storage.id, &repository.id),
            path: path.clone(),
        };
        let mut receiver = self.join_or_start(key, proxy, path, &cache_path, request_headers);

        let outcome = match receiver.recv().await {
            Ok(outcome) => outcome,
            // The owning task never drops the sender before broadcasting,
            // so this only fires if it panicked.
            Err(_) => Err(RelayError::upstream_failed(
                proxy.artifact_url(path),
                "in-flight fetch abandoned",
            )),
        };

        match outcome {
            Ok(bytes) => Ok(ArtifactSource::Memory(bytes)),
            Err(err) if proxy.serve_stale_on_error && !err.is_miss() => {
                // Stale-serve policy: fall back to whatever copy we have,
                // even past its check interval.
                match cached_source(&cache_path, 0).await {
                    Some(source) => {
                        warn!(path = %path, "Upstream fetch failed, serving stale copy: {}", err);
                        self.metrics.record_stale_served();
                        Ok(source)
                    }
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Join an existing in-flight entry or become the owner of a new one
    ///
    /// The returned receiver is subscribed before the owning task can
    /// complete, so no outcome can be missed.
    fn join_or_start(
        &self,
        key: FetchKey,
        proxy: &ProxyConfig,
        path: &ArtifactPath,
        cache_path: &Path,
        request_headers: &HeaderMap,
    ) -> broadcast::Receiver<FetchOutcome> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(sender) = in_flight.get(&key) {
            debug!(path = %path, "Joining in-flight fetch");
            self.metrics.record_coalesced_waiter();
            return sender.subscribe();
        }

        let (sender, receiver) = broadcast::channel(1);
        in_flight.insert(key.clone(), sender.clone());
        drop(in_flight);

        let task = FetchTask {
            client: self.client.clone(),
            pools: self.pools.clone(),
            metrics: self.metrics.clone(),
            in_flight: self.in_flight.clone(),
            key,
            proxy: proxy.clone(),
            url: proxy.artifact_url(path),
            cache_path: cache_path.to_path_buf(),
            headers: forwardable_headers(request_headers),
        };
        tokio::spawn(task.run(sender));

        receiver
    }
}

/// One owning upstream fetch, detached from its originating request
struct FetchTask {
    client: Client,
    pools: Arc<ConnectionPoolManager>,
    metrics: Arc<RelayMetrics>,
    in_flight: Arc<InFlightTable>,
    key: FetchKey,
    proxy: ProxyConfig,
    url: String,
    cache_path: PathBuf,
    headers: HeaderMap,
}

impl FetchTask {
    async fn run(self, sender: broadcast::Sender<FetchOutcome>) {
        let outcome = self.fetch_and_persist().await;
        self.metrics.record_upstream_fetch(outcome.is_ok());

        // Remove the entry first: a request arriving from here on starts
        // a fresh attempt (or hits the now-populated cache). The entry is
        // removed exactly once, before its waiters are released.
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        in_flight.remove(&self.key);
        drop(in_flight);

        // No receivers means every waiter disconnected; the cache is
        // populated either way.
        let _ = sender.send(outcome);
    }

    async fn fetch_and_persist(&self) -> FetchOutcome {
        // Another owner may have finished between our cache check and
        // entry creation; serve its result instead of refetching.
        if let Some(source) = cached_source(&self.cache_path, self.proxy.check_interval_secs).await
        {
            return source.read_all().await;
        }

        let endpoint = self.proxy.endpoint_key()?;
        let pool = self.pools.pool_for(&endpoint, self.proxy.max_connections);
        let connection = pool
            .acquire(Duration::from_secs(self.proxy.pool_acquire_timeout_secs))
            .await?;

        debug!(url = %self.url, "Fetching from upstream");
        let mut request = self.client.get(&self.url).headers(self.headers.clone());
        if let Some(username) = &self.proxy.username {
            request = request.basic_auth(username, self.proxy.password.as_deref());
        }

        let response = request.send().await.map_err(|e| {
            warn!(url = %self.url, "Upstream request failed: {}", e);
            RelayError::upstream_failed(&self.url, e.to_string())
        })?;

        let status = response.status();
        if status.as_u16() == 404 {
            debug!(url = %self.url, "Upstream reports artifact missing");
            return Err(RelayError::NotFound(self.key.path.to_string()));
        }
        if !status.is_success() {
            warn!(url = %self.url, status = status.as_u16(), "Upstream returned error status");
            return Err(RelayError::upstream_failed(
                &self.url,
                format!("upstream status {}", status),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RelayError::upstream_failed(&self.url, e.to_string()))?;

        // Persist before releasing the connection and resolving waiters.
        // A persistence failure must not fail the download itself.
        if let Err(e) = persist(&self.cache_path, &bytes).await {
            warn!(path = %self.cache_path.display(), "Failed to persist fetched artifact: {}", e);
        } else {
            info!(
                url = %self.url,
                bytes = bytes.len(),
                "Fetched and persisted artifact"
            );
        }

        drop(connection);
        Ok(bytes)
    }
}

/// A locally persisted copy, if present and fresh
///
/// `check_interval_secs` of 0 means a cached copy never expires.
async fn cached_source(cache_path: &Path, check_interval_secs: u64) -> Option<ArtifactSource> {
    let meta = tokio::fs::metadata(cache_path).await.ok()?;
    if !meta.is_file() {
        return None;
    }
    if check_interval_secs > 0 {
        let age = meta
            .modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())?;
        if age > Duration::from_secs(check_interval_secs) {
            return None;
        }
    }
    Some(ArtifactSource::File {
        path: cache_path.to_path_buf(),
        len: meta.len(),
    })
}

/// Write fetched bytes via a temp file and rename, so readers never see
/// a partial artifact
async fn persist(cache_path: &Path, bytes: &Bytes) -> Result<()> {
    if let Some(parent) = cache_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    // Append rather than replace the extension: sibling artifacts that
    // differ only by extension must not share a temp name.
    let mut tmp_name = cache_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".part");
    let tmp_path = cache_path.with_file_name(tmp_name);
    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, cache_path).await?;
    Ok(())
}

/// End-client headers forwarded to the upstream, hop-by-hop headers
/// stripped
fn forwardable_headers(request_headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::new();
    for (name, value) in request_headers {
        if !is_hop_by_hop(name) {
            forwarded.append(name.clone(), value.clone());
        }
    }
    forwarded
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{HeaderValue, CONNECTION, HOST, IF_NONE_MATCH, USER_AGENT};

    #[test]
    fn test_forwardable_headers_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("client/1.0"));
        headers.insert(IF_NONE_MATCH, HeaderValue::from_static("\"etag\""));
        headers.insert(HOST, HeaderValue::from_static("relay.local"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        let forwarded = forwardable_headers(&headers);
        assert!(forwarded.contains_key(USER_AGENT));
        assert!(forwarded.contains_key(IF_NONE_MATCH));
        assert!(!forwarded.contains_key(HOST));
        assert!(!forwarded.contains_key(CONNECTION));
    }

    #[tokio::test]
    async fn test_cached_source_missing_file() {
        assert!(cached_source(Path::new("/nonexistent/artifact.jar"), 0)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_cached_source_freshness() {
        let dir = std::env::temp_dir().join("artifact-relay-test-freshness");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("lib.jar");
        std::fs::write(&file, b"bytes").unwrap();

        // Never expires
        assert!(cached_source(&file, 0).await.is_some());
        // Generous interval: fresh
        assert!(cached_source(&file, 3600).await.is_some());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_persist_is_readable_afterwards() {
        let dir = std::env::temp_dir().join("artifact-relay-test-persist");
        let _ = std::fs::remove_dir_all(&dir);
        let target = dir.join("org/example/lib.jar");

        persist(&target, &Bytes::from_static(b"payload"))
            .await
            .unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"payload");
        assert!(!dir.join("org/example/lib.jar.part").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
