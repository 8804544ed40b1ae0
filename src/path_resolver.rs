//! Path resolver: identity and status validation plus layout translation

use crate::error::{RelayError, Result};
use crate::layout::LayoutRegistry;
use crate::models::{ArtifactPath, Repository, Storage};
use crate::registry::RegistrySnapshot;
use std::sync::Arc;
use tracing::{debug, error};

/// Outcome of path resolution: the owning storage and repository plus
/// the canonical artifact path
///
/// Borrows from the registry snapshot the resolution ran against, so a
/// whole request (including recursive group dispatch) observes one
/// consistent configuration view.
#[derive(Debug)]
pub struct ResolvedPath<'a> {
    pub storage: &'a Storage,
    pub repository: &'a Repository,
    pub artifact_path: ArtifactPath,
}

/// Validates (storage, repository, path) triples and produces canonical
/// artifact paths
///
/// The resolver is type-agnostic: hosted/proxy/group fetch semantics are
/// the caller's dispatch concern.
pub struct PathResolver {
    layouts: Arc<LayoutRegistry>,
}

impl PathResolver {
    pub fn new(layouts: Arc<LayoutRegistry>) -> Self {
        PathResolver { layouts }
    }

    /// Resolve a raw path within a repository
    ///
    /// Checks run in a fixed order: storage lookup, repository lookup,
    /// service status, then layout translation. The status check happens
    /// strictly before any path translation or I/O and mutates nothing.
    pub fn resolve<'a>(
        &self,
        snapshot: &'a RegistrySnapshot,
        storage_id: &str,
        repository_id: &str,
        raw_path: &str,
    ) -> Result<ResolvedPath<'a>> {
        debug!(storage_id, repository_id, raw_path, "Resolving artifact path");

        let storage = snapshot.storage(storage_id).ok_or_else(|| {
            error!(storage_id, "Unable to find storage");
            RelayError::StorageNotFound(storage_id.to_string())
        })?;

        let repository = storage.repository(repository_id).ok_or_else(|| {
            error!(storage_id, repository_id, "Unable to find repository");
            RelayError::RepositoryNotFound {
                storage_id: storage_id.to_string(),
                repository_id: repository_id.to_string(),
            }
        })?;

        if !repository.is_in_service() {
            error!(storage_id, repository_id, "Repository is not in service");
            return Err(RelayError::RepositoryUnavailable {
                storage_id: storage_id.to_string(),
                repository_id: repository_id.to_string(),
            });
        }

        let provider = self.layouts.get(&repository.layout)?;
        let artifact_path = provider.resolve(raw_path)?;

        Ok(ResolvedPath {
            storage,
            repository,
            artifact_path,
        })
    }
}
