//! Integration tests for registry administration: storage/repository
//! lifecycle, directory cascades and write-time validation

use artifact_relay::{
    RelayError, Repository, RepositoryPolicy, RepositoryRef, RepositoryRegistry, RepositoryStatus,
    RepositoryType, Storage, SUCCESSFUL_REMOVAL,
};
use tempfile::TempDir;

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
fn test_storage_round_trip() {
    let root = TempDir::new().unwrap();
    let registry = RepositoryRegistry::new();
    let base_dir = root.path().join("storage0");

    registry
        .put_storage(Storage::new("storage0", &base_dir))
        .unwrap();

    let fetched = registry.get_storage("storage0").unwrap();
    assert_eq!(fetched.id, "storage0");
    assert_eq!(fetched.base_dir, base_dir);
    assert!(base_dir.is_dir());
}

#[test]
fn test_duplicate_storage_conflicts() {
    let root = TempDir::new().unwrap();
    let registry = RepositoryRegistry::new();

    registry
        .put_storage(Storage::new("storage0", root.path().join("a")))
        .unwrap();
    let err = registry
        .put_storage(Storage::new("storage0", root.path().join("b")))
        .unwrap_err();

    assert!(matches!(err, RelayError::Conflict(_)));
    // The original mapping is untouched.
    assert_eq!(
        registry.get_storage("storage0").unwrap().base_dir,
        root.path().join("a")
    );
}

#[test]
fn test_duplicate_repository_conflicts() {
    let root = TempDir::new().unwrap();
    let registry = RepositoryRegistry::new();
    registry
        .put_storage(Storage::new("s0", root.path().join("s0")))
        .unwrap();

    registry.put_repository("s0", hosted("releases")).unwrap();
    let err = registry
        .put_repository("s0", hosted("releases"))
        .unwrap_err();
    assert!(matches!(err, RelayError::Conflict(_)));
}

#[test]
fn test_repository_removal_deletes_directory() {
    let root = TempDir::new().unwrap();
    let registry = RepositoryRegistry::new();
    registry
        .put_storage(Storage::new("s0", root.path().join("s0")))
        .unwrap();
    registry.put_repository("s0", hosted("releases")).unwrap();

    let repo_dir = root.path().join("s0/releases");
    assert!(repo_dir.is_dir());

    let marker = registry.remove_repository("s0", "releases", false).unwrap();
    assert_eq!(marker, SUCCESSFUL_REMOVAL);
    assert!(!repo_dir.exists());
    assert!(matches!(
        registry.get_repository("s0", "releases"),
        Err(RelayError::RepositoryNotFound { .. })
    ));
}

#[test]
fn test_non_empty_removal_requires_force() {
    let root = TempDir::new().unwrap();
    let registry = RepositoryRegistry::new();
    registry
        .put_storage(Storage::new("s0", root.path().join("s0")))
        .unwrap();
    registry.put_repository("s0", hosted("releases")).unwrap();

    let artifact = root.path().join("s0/releases/org/example/lib.jar");
    std::fs::create_dir_all(artifact.parent().unwrap()).unwrap();
    std::fs::write(&artifact, b"bytes").unwrap();

    let err = registry
        .remove_repository("s0", "releases", false)
        .unwrap_err();
    assert!(matches!(err, RelayError::DirectoryNotEmpty(_)));
    // Still registered and still on disk.
    assert!(registry.get_repository("s0", "releases").is_ok());
    assert!(artifact.exists());

    registry.remove_repository("s0", "releases", true).unwrap();
    assert!(!artifact.exists());
}

#[test]
fn test_storage_removal_cascades_to_repositories() {
    let root = TempDir::new().unwrap();
    let registry = RepositoryRegistry::new();
    let base_dir = root.path().join("s0");
    registry.put_storage(Storage::new("s0", &base_dir)).unwrap();
    registry.put_repository("s0", hosted("releases")).unwrap();
    registry.put_repository("s0", hosted("snapshots")).unwrap();

    let artifact = base_dir.join("snapshots/a.jar");
    std::fs::write(&artifact, b"bytes").unwrap();

    // Non-empty storage needs force.
    assert!(matches!(
        registry.remove_storage("s0", false),
        Err(RelayError::DirectoryNotEmpty(_))
    ));

    let marker = registry.remove_storage("s0", true).unwrap();
    assert_eq!(marker, SUCCESSFUL_REMOVAL);
    assert!(!base_dir.exists());
    assert!(matches!(
        registry.get_storage("s0"),
        Err(RelayError::StorageNotFound(_))
    ));
}

#[test]
fn test_cyclic_group_rejected_and_registry_unchanged() {
    let root = TempDir::new().unwrap();
    let registry = RepositoryRegistry::new();
    registry
        .put_storage(Storage::new("s0", root.path().join("s0")))
        .unwrap();
    registry
        .put_repository("s0", group("g0", &["s0:g1"]))
        .unwrap();

    // Completing the cycle g0 -> g1 -> g0 must be rejected.
    let err = registry
        .put_repository("s0", group("g1", &["s0:g0"]))
        .unwrap_err();
    assert!(matches!(err, RelayError::CyclicGroupReference(_)));

    // The rejected repository is absent from the registry.
    assert!(matches!(
        registry.get_repository("s0", "g1"),
        Err(RelayError::RepositoryNotFound { .. })
    ));
    // And its directory was never created.
    assert!(!root.path().join("s0/g1").exists());
}

#[test]
fn test_self_referencing_group_rejected() {
    let root = TempDir::new().unwrap();
    let registry = RepositoryRegistry::new();
    registry
        .put_storage(Storage::new("s0", root.path().join("s0")))
        .unwrap();

    let err = registry
        .put_repository("s0", group("all", &["s0:all"]))
        .unwrap_err();
    assert!(matches!(err, RelayError::CyclicGroupReference(_)));
}

#[test]
fn test_group_members_preserve_declared_order() {
    let root = TempDir::new().unwrap();
    let registry = RepositoryRegistry::new();
    registry
        .put_storage(Storage::new("s0", root.path().join("s0")))
        .unwrap();
    registry.put_repository("s0", hosted("a")).unwrap();
    registry.put_repository("s0", hosted("b")).unwrap();
    registry
        .put_repository("s0", group("public", &["s0:b", "s0:a"]))
        .unwrap();

    let repo = registry.get_repository("s0", "public").unwrap();
    let members: Vec<RepositoryRef> = repo.group_members().unwrap().to_vec();
    assert_eq!(members[0], RepositoryRef::new("s0", "b"));
    assert_eq!(members[1], RepositoryRef::new("s0", "a"));
}
