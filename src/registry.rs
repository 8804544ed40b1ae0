//! Repository registry: storage/repository lookups and administrative
//! mutations
//!
//! The registry keeps the whole configuration in an immutable snapshot
//! behind an `Arc`. Readers clone the `Arc` and resolve against a
//! consistent view; administrative writes clone the snapshot, mutate the
//! clone, validate it, and swap the reference. In-flight resolutions
//! never observe a half-updated registry.

use crate::error::{RelayError, Result};
use crate::models::{Repository, RepositoryRef, Storage};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Fixed marker returned by successful removal operations, for the
/// administrative surface
pub const SUCCESSFUL_REMOVAL: &str = "successful removal";

/// Immutable view of all storages and their repositories
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    storages: BTreeMap<String, Storage>,
}

impl RegistrySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn storage(&self, storage_id: &str) -> Option<&Storage> {
        self.storages.get(storage_id)
    }

    pub fn repository(&self, storage_id: &str, repository_id: &str) -> Option<&Repository> {
        self.storages
            .get(storage_id)?
            .repository(repository_id)
    }

    pub fn storages(&self) -> impl Iterator<Item = &Storage> {
        self.storages.values()
    }

    /// Insert a storage without filesystem side effects. Used when
    /// assembling a snapshot before it is published.
    pub fn insert_storage(&mut self, storage: Storage) -> Result<()> {
        if self.storages.contains_key(&storage.id) {
            return Err(RelayError::Conflict(format!(
                "Storage {} already exists",
                storage.id
            )));
        }
        self.storages.insert(storage.id.clone(), storage);
        Ok(())
    }

    /// Check that no group repository transitively references itself
    ///
    /// The static invariant says the reference graph is acyclic; this is
    /// the write-time enforcement. Dangling member references are not an
    /// error here (the member may be registered later) and surface as
    /// `RepositoryNotFound` at resolution time instead.
    pub fn validate_acyclic(&self) -> Result<()> {
        for storage in self.storages.values() {
            for repository in storage.repositories.values() {
                if repository.group_members().is_some() {
                    let start = RepositoryRef::new(&storage.id, &repository.id);
                    let mut on_stack = HashSet::new();
                    self.walk_group(&start, &mut on_stack)?;
                }
            }
        }
        Ok(())
    }

    fn walk_group(
        &self,
        reference: &RepositoryRef,
        on_stack: &mut HashSet<RepositoryRef>,
    ) -> Result<()> {
        if !on_stack.insert(reference.clone()) {
            return Err(RelayError::CyclicGroupReference(reference.to_string()));
        }
        if let Some(repository) = self.repository(&reference.storage_id, &reference.repository_id)
        {
            if let Some(members) = repository.group_members() {
                for member in members {
                    self.walk_group(member, on_stack)?;
                }
            }
        }
        on_stack.remove(reference);
        Ok(())
    }
}

/// Process-wide registry of storages, swapped atomically on reload
pub struct RepositoryRegistry {
    inner: RwLock<Arc<RegistrySnapshot>>,
}

impl RepositoryRegistry {
    pub fn new() -> Self {
        RepositoryRegistry {
            inner: RwLock::new(Arc::new(RegistrySnapshot::new())),
        }
    }

    /// Build a registry from a pre-assembled snapshot, rejecting cyclic
    /// group configurations
    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Result<Self> {
        snapshot.validate_acyclic()?;
        Ok(RepositoryRegistry {
            inner: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Current snapshot; the returned view stays consistent for as long
    /// as the caller holds it
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn get_storage(&self, storage_id: &str) -> Result<Storage> {
        self.snapshot()
            .storage(storage_id)
            .cloned()
            .ok_or_else(|| RelayError::StorageNotFound(storage_id.to_string()))
    }

    pub fn get_repository(&self, storage_id: &str, repository_id: &str) -> Result<Repository> {
        let snapshot = self.snapshot();
        let storage = snapshot
            .storage(storage_id)
            .ok_or_else(|| RelayError::StorageNotFound(storage_id.to_string()))?;
        storage
            .repository(repository_id)
            .cloned()
            .ok_or_else(|| RelayError::RepositoryNotFound {
                storage_id: storage_id.to_string(),
                repository_id: repository_id.to_string(),
            })
    }

    /// Replace the whole registry with a new snapshot, atomically
    ///
    /// In-flight resolutions keep the view they started with.
    pub fn reload(&self, snapshot: RegistrySnapshot) -> Result<()> {
        snapshot.validate_acyclic()?;
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(snapshot);
        info!("Registry snapshot reloaded");
        Ok(())
    }

    /// Register a new storage and create its base directory
    ///
    /// Fails with `Conflict` if the identifier is already taken; the
    /// registry is left unchanged on any failure.
    pub fn put_storage(&self, storage: Storage) -> Result<()> {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = (**guard).clone();

        if next.storages.contains_key(&storage.id) {
            return Err(RelayError::Conflict(format!(
                "Storage {} already exists",
                storage.id
            )));
        }

        debug!(storage_id = %storage.id, base_dir = %storage.base_dir.display(), "Storage registered");
        next.storages.insert(storage.id.clone(), storage.clone());
        next.validate_acyclic()?;

        fs::create_dir_all(&storage.base_dir)?;
        for repository_id in storage.repositories.keys() {
            fs::create_dir_all(storage.repository_dir(repository_id))?;
        }

        *guard = Arc::new(next);
        Ok(())
    }

    /// Remove a storage, cascading to all of its repositories and their
    /// on-disk directories
    ///
    /// Removing a storage whose directories still contain files requires
    /// `force`.
    pub fn remove_storage(&self, storage_id: &str, force: bool) -> Result<&'static str> {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = (**guard).clone();

        let storage = next
            .storages
            .remove(storage_id)
            .ok_or_else(|| RelayError::StorageNotFound(storage_id.to_string()))?;

        if storage.base_dir.exists() {
            if !force && dir_contains_files(&storage.base_dir)? {
                return Err(RelayError::DirectoryNotEmpty(
                    storage.base_dir.display().to_string(),
                ));
            }
            fs::remove_dir_all(&storage.base_dir)?;
        }

        info!(storage_id, "Storage removed");
        *guard = Arc::new(next);
        Ok(SUCCESSFUL_REMOVAL)
    }

    /// Register a new repository within an existing storage and create
    /// its directory
    ///
    /// Group repositories are checked for transitive self-reference; a
    /// cyclic configuration is rejected and the registry left unchanged.
    pub fn put_repository(&self, storage_id: &str, repository: Repository) -> Result<()> {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = (**guard).clone();

        let storage = next
            .storages
            .get_mut(storage_id)
            .ok_or_else(|| RelayError::StorageNotFound(storage_id.to_string()))?;

        if storage.repositories.contains_key(&repository.id) {
            return Err(RelayError::Conflict(format!(
                "Repository {} already exists in storage {}",
                repository.id, storage_id
            )));
        }

        let repository_dir = storage.repository_dir(&repository.id);
        let repository_id = repository.id.clone();
        storage
            .repositories
            .insert(repository.id.clone(), repository);

        next.validate_acyclic()?;
        fs::create_dir_all(&repository_dir)?;

        debug!(storage_id, repository_id = %repository_id, "Repository registered");
        *guard = Arc::new(next);
        Ok(())
    }

    /// Remove a repository and its on-disk directory
    pub fn remove_repository(
        &self,
        storage_id: &str,
        repository_id: &str,
        force: bool,
    ) -> Result<&'static str> {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = (**guard).clone();

        let storage = next
            .storages
            .get_mut(storage_id)
            .ok_or_else(|| RelayError::StorageNotFound(storage_id.to_string()))?;

        if storage.repositories.remove(repository_id).is_none() {
            return Err(RelayError::RepositoryNotFound {
                storage_id: storage_id.to_string(),
                repository_id: repository_id.to_string(),
            });
        }

        let repository_dir = storage.repository_dir(repository_id);
        if repository_dir.exists() {
            if !force && dir_contains_files(&repository_dir)? {
                return Err(RelayError::DirectoryNotEmpty(
                    repository_dir.display().to_string(),
                ));
            }
            fs::remove_dir_all(&repository_dir)?;
        }

        info!(storage_id, repository_id, "Repository removed");
        *guard = Arc::new(next);
        Ok(SUCCESSFUL_REMOVAL)
    }
}

impl Default for RepositoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a directory tree contains any regular file
///
/// Empty sub-directories (as created at registration time) do not count
/// as content.
fn dir_contains_files(dir: &Path) -> Result<bool> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if dir_contains_files(&entry.path())? {
                return Ok(true);
            }
        } else {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RepositoryPolicy, RepositoryStatus, RepositoryType};

    fn hosted(id: &str) -> Repository {
        Repository {
            id: id.to_string(),
            layout: "raw".to_string(),
            repo_type: RepositoryType::Hosted,
            policy: RepositoryPolicy::Release,
            status: RepositoryStatus::InService,
        }
    }

    fn group(id: &str, members: &[&str]) -> Repository {
        Repository {
            id: id.to_string(),
            layout: "raw".to_string(),
            repo_type: RepositoryType::Group {
                members: members.iter().map(|m| m.parse().unwrap()).collect(),
            },
            policy: RepositoryPolicy::Mixed,
            status: RepositoryStatus::InService,
        }
    }

    #[test]
    fn test_snapshot_lookup() {
        let mut snapshot = RegistrySnapshot::new();
        let mut storage = Storage::new("s0", "/tmp/unused");
        storage.repositories.insert("r0".into(), hosted("r0"));
        snapshot.insert_storage(storage).unwrap();

        assert!(snapshot.storage("s0").is_some());
        assert!(snapshot.repository("s0", "r0").is_some());
        assert!(snapshot.repository("s0", "missing").is_none());
        assert!(snapshot.repository("missing", "r0").is_none());
    }

    #[test]
    fn test_validate_acyclic_detects_self_reference() {
        let mut snapshot = RegistrySnapshot::new();
        let mut storage = Storage::new("s0", "/tmp/unused");
        storage
            .repositories
            .insert("g0".into(), group("g0", &["s0:g0"]));
        snapshot.insert_storage(storage).unwrap();

        assert!(matches!(
            snapshot.validate_acyclic(),
            Err(RelayError::CyclicGroupReference(_))
        ));
    }

    #[test]
    fn test_validate_acyclic_detects_indirect_cycle() {
        let mut snapshot = RegistrySnapshot::new();
        let mut storage = Storage::new("s0", "/tmp/unused");
        storage
            .repositories
            .insert("g0".into(), group("g0", &["s0:g1"]));
        storage
            .repositories
            .insert("g1".into(), group("g1", &["s0:g0"]));
        snapshot.insert_storage(storage).unwrap();

        assert!(matches!(
            snapshot.validate_acyclic(),
            Err(RelayError::CyclicGroupReference(_))
        ));
    }

    #[test]
    fn test_validate_acyclic_allows_diamond() {
        // g0 -> [g1, g2], g1 -> r0, g2 -> r0: shared member, no cycle
        let mut snapshot = RegistrySnapshot::new();
        let mut storage = Storage::new("s0", "/tmp/unused");
        storage.repositories.insert("r0".into(), hosted("r0"));
        storage
            .repositories
            .insert("g1".into(), group("g1", &["s0:r0"]));
        storage
            .repositories
            .insert("g2".into(), group("g2", &["s0:r0"]));
        storage
            .repositories
            .insert("g0".into(), group("g0", &["s0:g1", "s0:g2"]));
        snapshot.insert_storage(storage).unwrap();

        assert!(snapshot.validate_acyclic().is_ok());
    }

    #[test]
    fn test_snapshot_isolated_from_later_writes() {
        let registry = RepositoryRegistry::new();
        let dir = std::env::temp_dir().join("artifact-relay-test-snapshot-isolation");
        let _ = fs::remove_dir_all(&dir);

        registry
            .put_storage(Storage::new("s0", dir.join("s0")))
            .unwrap();
        let before = registry.snapshot();

        registry
            .put_storage(Storage::new("s1", dir.join("s1")))
            .unwrap();

        assert!(before.storage("s1").is_none());
        assert!(registry.snapshot().storage("s1").is_some());

        let _ = fs::remove_dir_all(&dir);
    }
}
