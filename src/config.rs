//! Configuration loading for the resolution engine
//!
//! Configuration is loaded from a YAML file describing storages and
//! their repositories, validated, and turned into a registry snapshot.

use crate::error::{RelayError, Result};
use crate::models::{Repository, Storage};
use crate::registry::{RegistrySnapshot, RepositoryRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// End-to-end timeout for one upstream request, in seconds
    /// (default: 30)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Storages and their repositories
    #[serde(default)]
    pub storages: Vec<StorageConfig>,
}

/// One storage and its repositories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub id: String,

    /// On-disk root for this storage
    pub base_dir: PathBuf,

    #[serde(default)]
    pub repositories: Vec<Repository>,
}

fn default_request_timeout() -> u64 {
    30
}

impl RelayConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            RelayError::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: RelayConfig = serde_yaml::from_str(content)
            .map_err(|e| RelayError::ConfigError(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// Checks identifier uniqueness, proxy remote URLs, timeout bounds
    /// and group acyclicity. Dangling group member references only get a
    /// warning; they fail at resolution time with `RepositoryNotFound`.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            return Err(RelayError::ConfigError(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        for storage in &self.storages {
            if storage.id.is_empty() {
                return Err(RelayError::ConfigError(
                    "storage id must not be empty".to_string(),
                ));
            }
            for repository in &storage.repositories {
                if repository.id.is_empty() {
                    return Err(RelayError::ConfigError(format!(
                        "repository id must not be empty in storage {}",
                        storage.id
                    )));
                }
                if let Some(proxy) = repository.proxy_config() {
                    // Rejects URLs without a scheme or host.
                    proxy.endpoint_key()?;
                    if proxy.max_connections == 0 {
                        return Err(RelayError::ConfigError(format!(
                            "max_connections must be greater than 0 for {}:{}",
                            storage.id, repository.id
                        )));
                    }
                }
                if let Some(members) = repository.group_members() {
                    for member in members {
                        let known = self.storages.iter().any(|s| {
                            s.id == member.storage_id
                                && s.repositories.iter().any(|r| r.id == member.repository_id)
                        });
                        if !known {
                            warn!(
                                group = %format_args!("{}:{}", storage.id, repository.id),
                                member = %member,
                                "Group member does not exist (yet)"
                            );
                        }
                    }
                }
            }
        }

        // Uniqueness plus cycle detection come from snapshot assembly.
        self.build_snapshot().map(|_| ())
    }

    /// Assemble a registry snapshot from this configuration
    ///
    /// Fails with `Conflict` on duplicate identifiers and
    /// `CyclicGroupReference` on cyclic group membership.
    pub fn build_snapshot(&self) -> Result<RegistrySnapshot> {
        let mut snapshot = RegistrySnapshot::new();
        for storage_config in &self.storages {
            let mut repositories = BTreeMap::new();
            for repository in &storage_config.repositories {
                if repositories
                    .insert(repository.id.clone(), repository.clone())
                    .is_some()
                {
                    return Err(RelayError::Conflict(format!(
                        "Repository {} already exists in storage {}",
                        repository.id, storage_config.id
                    )));
                }
            }
            snapshot.insert_storage(Storage {
                id: storage_config.id.clone(),
                base_dir: storage_config.base_dir.clone(),
                repositories,
            })?;
        }
        snapshot.validate_acyclic()?;
        Ok(snapshot)
    }

    /// Build a registry and create the on-disk directory layout
    pub fn build_registry(&self) -> Result<RepositoryRegistry> {
        let snapshot = self.build_snapshot()?;
        for storage in snapshot.storages() {
            fs::create_dir_all(&storage.base_dir)?;
            for repository_id in storage.repositories.keys() {
                fs::create_dir_all(storage.repository_dir(repository_id))?;
            }
        }
        RepositoryRegistry::from_snapshot(snapshot)
    }
}
