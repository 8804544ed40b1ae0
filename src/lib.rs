//! Artifact Relay
//!
//! An artifact-repository resolution engine: given a logical address
//! (storage identifier, repository identifier, artifact path), it
//! locates and streams the corresponding artifact, transparently
//! handling three repository kinds:
//!
//! - **Hosted**: artifacts stored directly on the local filesystem
//! - **Proxy**: artifacts cached from one remote endpoint, fetched on
//!   cache miss with single-flight de-duplication and a bounded
//!   connection pool per remote
//! - **Group**: ordered first-match aggregation over other repositories,
//!   recursively
//!
//! The surrounding application (HTTP server, authentication,
//! administrative API) is an external collaborator; this crate owns the
//! routing/aggregation algorithm, the remote-fetch concurrency control
//! and the resource-pooling policy toward upstream servers.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use artifact_relay::{RelayConfig, ResolutionEngine};
//! use http::HeaderMap;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> artifact_relay::Result<()> {
//! let config = RelayConfig::from_file("artifact_relay.yaml")?;
//! let registry = Arc::new(config.build_registry()?);
//! let engine = ResolutionEngine::new(registry)?;
//!
//! let mut body = Vec::new();
//! engine
//!     .download("storage0", "public", "org/example/lib-1.0.jar", &HeaderMap::new(), &mut body)
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`RepositoryRegistry`]: storage/repository lookups over an
//!   atomically swapped configuration snapshot
//! - [`PathResolver`]: identity/status validation plus layout
//!   translation into an [`ArtifactPath`]
//! - [`ConnectionPoolManager`]: one bounded pool per remote endpoint
//! - [`ProxyFetchCoordinator`]: cache-first upstream fetching with
//!   single-flight de-duplication and local persistence
//! - [`ResolutionEngine`]: dispatch by repository kind, including
//!   recursive group aggregation with cycle protection
//! - [`DownloadStreamer`]: streams a resolved artifact into a response
//!   sink; failures after the first byte are terminal
//!
//! # Error mapping
//!
//! Every failure carries a stable message and maps to one
//! externally-observable status via [`RelayError::to_http_status`]:
//! unknown storage or repository is 500, an out-of-service repository is
//! 503, an artifact miss is 404.

pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod group;
pub mod layout;
pub mod metrics;
pub mod models;
pub mod path_resolver;
pub mod pool;
pub mod registry;
pub mod streamer;

// Re-export commonly used types
pub use config::{RelayConfig, StorageConfig};
pub use engine::{ResolutionEngine, ResolvedArtifact};
pub use error::{RelayError, Result};
pub use fetch::ProxyFetchCoordinator;
pub use layout::{LayoutProvider, LayoutRegistry, RawLayoutProvider};
pub use metrics::{MetricsSnapshot, RelayMetrics};
pub use models::{
    ArtifactPath, ProxyConfig, Repository, RepositoryPolicy, RepositoryRef, RepositoryStatus,
    RepositoryType, Storage,
};
pub use path_resolver::{PathResolver, ResolvedPath};
pub use pool::{ConnectionPool, ConnectionPoolManager, PoolStats};
pub use registry::{RegistrySnapshot, RepositoryRegistry, SUCCESSFUL_REMOVAL};
pub use streamer::{ArtifactSource, DownloadStreamer, StreamAck};
