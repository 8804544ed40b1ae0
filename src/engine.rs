//! Resolution engine: per-type dispatch over hosted, proxy and group
//! repositories
//!
//! The engine wires the registry, path resolver, connection pools, fetch
//! coordinator and streamer together behind one resolution surface. Each
//! request resolves against a single registry snapshot, so recursive
//! group dispatch observes a consistent configuration view.

use crate::error::{RelayError, Result};
use crate::fetch::ProxyFetchCoordinator;
use crate::group;
use crate::layout::LayoutRegistry;
use crate::metrics::{MetricsSnapshot, RelayMetrics};
use crate::models::{ArtifactPath, ProxyConfig, Repository, RepositoryRef, RepositoryType, Storage};
use crate::path_resolver::PathResolver;
use crate::pool::{ConnectionPoolManager, PoolStats};
use crate::registry::{RegistrySnapshot, RepositoryRegistry};
use crate::streamer::{ArtifactSource, DownloadStreamer, StreamAck};
use http::HeaderMap;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tracing::debug;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A fully resolved artifact, ready for streaming
#[derive(Debug, Clone)]
pub struct ResolvedArtifact {
    /// Repository the artifact was ultimately served from (a group
    /// resolution reports the winning member)
    pub storage_id: String,
    pub repository_id: String,
    pub path: ArtifactPath,
    pub source: ArtifactSource,
    pub content_type: &'static str,
}

impl ResolvedArtifact {
    pub fn content_length(&self) -> u64 {
        self.source.len()
    }
}

/// The artifact resolution engine
pub struct ResolutionEngine {
    registry: Arc<RepositoryRegistry>,
    resolver: PathResolver,
    pools: Arc<ConnectionPoolManager>,
    coordinator: ProxyFetchCoordinator,
    streamer: DownloadStreamer,
    metrics: Arc<RelayMetrics>,
}

impl ResolutionEngine {
    /// Create an engine over a registry, with the built-in layouts and
    /// default upstream timeout
    pub fn new(registry: Arc<RepositoryRegistry>) -> Result<Self> {
        Self::with_options(
            registry,
            Arc::new(LayoutRegistry::new()),
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    /// Create an engine with custom layout providers and upstream
    /// request timeout
    pub fn with_options(
        registry: Arc<RepositoryRegistry>,
        layouts: Arc<LayoutRegistry>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let pools = Arc::new(ConnectionPoolManager::new());
        let metrics = Arc::new(RelayMetrics::new());
        let coordinator =
            ProxyFetchCoordinator::new(pools.clone(), metrics.clone(), request_timeout)?;

        Ok(ResolutionEngine {
            registry,
            resolver: PathResolver::new(layouts),
            pools,
            coordinator,
            streamer: DownloadStreamer::new(),
            metrics,
        })
    }

    pub fn registry(&self) -> &Arc<RepositoryRegistry> {
        &self.registry
    }

    /// Connection-pool statistics per remote endpoint
    pub fn pool_stats(&self) -> Vec<PoolStats> {
        self.pools.stats()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Resolve an artifact to a byte source
    ///
    /// `headers` carries the incoming request's headers; they are
    /// forwarded toward the origin on proxy fetches but not otherwise
    /// interpreted.
    pub async fn resolve(
        &self,
        storage_id: &str,
        repository_id: &str,
        raw_path: &str,
        headers: &HeaderMap,
    ) -> Result<ResolvedArtifact> {
        self.metrics.record_request();
        let snapshot = self.registry.snapshot();
        let mut visited = HashSet::new();
        self.resolve_recursive(
            &snapshot,
            storage_id,
            repository_id,
            raw_path,
            headers,
            &mut visited,
        )
        .await
    }

    /// Resolve and stream an artifact into a response sink
    ///
    /// Convenience for the download endpoint; errors before the first
    /// byte still map to a status via [`RelayError::to_http_status`].
    pub async fn download<W>(
        &self,
        storage_id: &str,
        repository_id: &str,
        raw_path: &str,
        headers: &HeaderMap,
        sink: &mut W,
    ) -> Result<StreamAck>
    where
        W: AsyncWrite + Unpin,
    {
        let artifact = self
            .resolve(storage_id, repository_id, raw_path, headers)
            .await?;
        let ack = self.streamer.stream(&artifact.source, sink).await?;
        self.metrics.record_bytes_served(ack.bytes_written);
        Ok(ack)
    }

    /// Recursive dispatch: path resolution, then one strategy per
    /// repository kind
    ///
    /// `visited` carries the groups on the current recursion stack. The
    /// registration-time acyclic invariant should make it redundant;
    /// it exists so a violated invariant fails fast instead of recursing
    /// without bound.
    pub(crate) fn resolve_recursive<'a>(
        &'a self,
        snapshot: &'a RegistrySnapshot,
        storage_id: &'a str,
        repository_id: &'a str,
        raw_path: &'a str,
        headers: &'a HeaderMap,
        visited: &'a mut HashSet<RepositoryRef>,
    ) -> Pin<Box<dyn Future<Output = Result<ResolvedArtifact>> + Send + 'a>> {
        Box::pin(async move {
            let resolved = self
                .resolver
                .resolve(snapshot, storage_id, repository_id, raw_path)?;
            let storage = resolved.storage;
            let repository = resolved.repository;
            let path = resolved.artifact_path;

            match &repository.repo_type {
                RepositoryType::Hosted => self.resolve_hosted(storage, repository, path).await,
                RepositoryType::Proxy { proxy } => {
                    self.resolve_proxy(storage, repository, proxy, path, headers)
                        .await
                }
                RepositoryType::Group { .. } => {
                    let key = RepositoryRef::new(storage_id, repository_id);
                    if !visited.insert(key.clone()) {
                        return Err(RelayError::CyclicGroupReference(key.to_string()));
                    }
                    let outcome = group::resolve_members(
                        self, snapshot, storage, repository, &path, headers, visited,
                    )
                    .await;
                    visited.remove(&key);
                    outcome
                }
            }
        })
    }

    /// Hosted resolution: a direct local-filesystem lookup; a miss is
    /// terminal, no fallback
    async fn resolve_hosted(
        &self,
        storage: &Storage,
        repository: &Repository,
        path: ArtifactPath,
    ) -> Result<ResolvedArtifact> {
        let fs_path = path.fs_path(&storage.repository_dir(&repository.id));
        match tokio::fs::metadata(&fs_path).await {
            Ok(meta) if meta.is_file() => {
                debug!(path = %path, "Hosted artifact found");
                self.metrics.record_hosted(true);
                Ok(ResolvedArtifact {
                    storage_id: storage.id.clone(),
                    repository_id: repository.id.clone(),
                    content_type: path.content_type(),
                    source: ArtifactSource::File {
                        path: fs_path,
                        len: meta.len(),
                    },
                    path,
                })
            }
            _ => {
                self.metrics.record_hosted(false);
                Err(RelayError::NotFound(path.to_string()))
            }
        }
    }

    async fn resolve_proxy(
        &self,
        storage: &Storage,
        repository: &Repository,
        proxy: &ProxyConfig,
        path: ArtifactPath,
        headers: &HeaderMap,
    ) -> Result<ResolvedArtifact> {
        let source = self
            .coordinator
            .fetch(storage, repository, proxy, &path, headers)
            .await?;
        Ok(ResolvedArtifact {
            storage_id: storage.id.clone(),
            repository_id: repository.id.clone(),
            content_type: path.content_type(),
            source,
            path,
        })
    }
}
