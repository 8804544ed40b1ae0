//! Core data model: storages, repositories and artifact paths

use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Service status of a repository
///
/// Only repositories that are in service participate in resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepositoryStatus {
    InService,
    OutOfService,
}

impl Default for RepositoryStatus {
    fn default() -> Self {
        RepositoryStatus::InService
    }
}

/// Versioning policy of a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepositoryPolicy {
    Release,
    Snapshot,
    Mixed,
}

impl Default for RepositoryPolicy {
    fn default() -> Self {
        RepositoryPolicy::Mixed
    }
}

/// Reference to a repository within a storage, written as
/// `storageId:repositoryId`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepositoryRef {
    pub storage_id: String,
    pub repository_id: String,
}

impl RepositoryRef {
    pub fn new(storage_id: impl Into<String>, repository_id: impl Into<String>) -> Self {
        RepositoryRef {
            storage_id: storage_id.into(),
            repository_id: repository_id.into(),
        }
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.storage_id, self.repository_id)
    }
}

impl FromStr for RepositoryRef {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((storage, repo)) if !storage.is_empty() && !repo.is_empty() => {
                Ok(RepositoryRef::new(storage, repo))
            }
            _ => Err(RelayError::ConfigError(format!(
                "Invalid repository reference '{}', expected 'storageId:repositoryId'",
                s
            ))),
        }
    }
}

impl TryFrom<String> for RepositoryRef {
    type Error = RelayError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<RepositoryRef> for String {
    fn from(r: RepositoryRef) -> String {
        r.to_string()
    }
}

/// Configuration of a proxy repository's single remote endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Base URL of the remote endpoint, e.g. `https://repo.example.org/releases`
    pub remote_url: String,

    /// Optional basic-auth credentials for the remote
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,

    /// Maximum concurrent connections toward the remote (pool size)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// How long to wait for a pooled connection before failing with
    /// PoolExhausted, in seconds
    #[serde(default = "default_pool_acquire_timeout")]
    pub pool_acquire_timeout_secs: u64,

    /// How long a cached copy is considered fresh without revalidation,
    /// in seconds. 0 means a cached copy never expires.
    #[serde(default)]
    pub check_interval_secs: u64,

    /// Serve a stale cached copy when the upstream refetch fails,
    /// instead of propagating the failure
    #[serde(default)]
    pub serve_stale_on_error: bool,
}

fn default_max_connections() -> usize {
    8
}

fn default_pool_acquire_timeout() -> u64 {
    10
}

impl ProxyConfig {
    /// Pool key for this remote: `host:port` of the remote URL
    pub fn endpoint_key(&self) -> Result<String> {
        let url = reqwest::Url::parse(&self.remote_url).map_err(|e| {
            RelayError::ConfigError(format!("Invalid remote URL '{}': {}", self.remote_url, e))
        })?;
        let host = url
            .host_str()
            .ok_or_else(|| {
                RelayError::ConfigError(format!("Remote URL '{}' has no host", self.remote_url))
            })?
            .to_string();
        match url.port_or_known_default() {
            Some(port) => Ok(format!("{}:{}", host, port)),
            None => Ok(host),
        }
    }

    /// Full upstream URL for an artifact path
    pub fn artifact_url(&self, path: &ArtifactPath) -> String {
        format!("{}/{}", self.remote_url.trim_end_matches('/'), path.as_str())
    }
}

/// The closed set of repository kinds, fixed at configuration time
///
/// Resolution strategy is selected once per request from this tag; there
/// are no runtime subtype checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RepositoryType {
    /// Stores artifacts directly on the local filesystem; no upstream.
    Hosted,
    /// Caches artifacts fetched from one remote endpoint.
    Proxy { proxy: ProxyConfig },
    /// Aggregates other repositories by ordered first-match resolution.
    Group { members: Vec<RepositoryRef> },
}

/// A named artifact container within a storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,

    /// Layout tag selecting the layout provider for path translation
    #[serde(default = "default_layout")]
    pub layout: String,

    #[serde(flatten)]
    pub repo_type: RepositoryType,

    #[serde(default)]
    pub policy: RepositoryPolicy,

    #[serde(default)]
    pub status: RepositoryStatus,
}

fn default_layout() -> String {
    "raw".to_string()
}

impl Repository {
    pub fn is_in_service(&self) -> bool {
        self.status == RepositoryStatus::InService
    }

    /// Proxy configuration, if this is a proxy repository
    pub fn proxy_config(&self) -> Option<&ProxyConfig> {
        match &self.repo_type {
            RepositoryType::Proxy { proxy } => Some(proxy),
            _ => None,
        }
    }

    /// Ordered member references, if this is a group repository
    pub fn group_members(&self) -> Option<&[RepositoryRef]> {
        match &self.repo_type {
            RepositoryType::Group { members } => Some(members.as_slice()),
            _ => None,
        }
    }
}

/// Top-level namespace owning a set of repositories and a base directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Storage {
    pub id: String,

    /// On-disk root; each repository lives in a sub-directory named
    /// after its identifier
    pub base_dir: PathBuf,

    /// Repositories keyed by identifier (unique within the storage)
    #[serde(default)]
    pub repositories: BTreeMap<String, Repository>,
}

impl Storage {
    pub fn new(id: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        Storage {
            id: id.into(),
            base_dir: base_dir.into(),
            repositories: BTreeMap::new(),
        }
    }

    pub fn repository(&self, repository_id: &str) -> Option<&Repository> {
        self.repositories.get(repository_id)
    }

    /// On-disk directory of a repository within this storage
    pub fn repository_dir(&self, repository_id: &str) -> PathBuf {
        self.base_dir.join(repository_id)
    }
}

/// Canonical, layout-normalized path of an artifact within a repository
///
/// Immutable once resolved. Always relative, `/`-separated, and free of
/// traversal components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactPath(String);

impl ArtifactPath {
    /// Validate and normalize a raw path into an artifact path
    ///
    /// Rejects empty, absolute and traversal paths; collapses repeated
    /// separators and `.` segments.
    pub fn new(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(RelayError::InvalidPath("empty path".to_string()));
        }
        if raw.starts_with('/') || raw.starts_with('\\') || raw.contains(':') {
            return Err(RelayError::InvalidPath(format!(
                "path must be relative: {}",
                raw
            )));
        }

        let mut segments = Vec::new();
        for segment in raw.split(['/', '\\']) {
            match segment {
                "" | "." => continue,
                ".." => {
                    return Err(RelayError::InvalidPath(format!(
                        "path traversal not allowed: {}",
                        raw
                    )))
                }
                s => segments.push(s),
            }
        }

        if segments.is_empty() {
            return Err(RelayError::InvalidPath(format!(
                "path has no usable segments: {}",
                raw
            )));
        }

        Ok(ArtifactPath(segments.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem location of this artifact under a repository directory
    pub fn fs_path(&self, repository_dir: &Path) -> PathBuf {
        let mut path = repository_dir.to_path_buf();
        for segment in self.0.split('/') {
            path.push(segment);
        }
        path
    }

    /// Best-effort content type from the file extension
    pub fn content_type(&self) -> &'static str {
        match self.0.rsplit('.').next() {
            Some("jar" | "war" | "ear" | "zip") => "application/zip",
            Some("xml" | "pom") => "application/xml",
            Some("json") => "application/json",
            Some("txt" | "md5" | "sha1" | "asc") => "text/plain",
            Some("gz" | "tgz") => "application/gzip",
            _ => "application/octet-stream",
        }
    }
}

impl fmt::Display for ArtifactPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
