//! End-to-end resolution tests for hosted repositories and the status
//! contract of the download pipeline

use artifact_relay::{
    RelayError, Repository, RepositoryPolicy, RepositoryRegistry, RepositoryStatus, RepositoryType,
    ResolutionEngine, Storage,
};
use http::HeaderMap;
use std::sync::Arc;
use tempfile::TempDir;

fn hosted(id: &str, status: RepositoryStatus) -> Repository {
    Repository {
        id: id.to_string(),
        layout: "raw".to_string(),
        repo_type: RepositoryType::Hosted,
        policy: RepositoryPolicy::Release,
        status,
    }
}

fn engine_with_hosted(root: &TempDir, status: RepositoryStatus) -> ResolutionEngine {
    let registry = RepositoryRegistry::new();
    registry
        .put_storage(Storage::new("s0", root.path().join("s0")))
        .unwrap();
    registry
        .put_repository("s0", hosted("releases", status))
        .unwrap();
    ResolutionEngine::new(Arc::new(registry)).unwrap()
}

fn write_artifact(root: &TempDir, rel: &str, content: &[u8]) {
    let path = root.path().join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

#[tokio::test]
async fn test_hosted_download() {
    let root = TempDir::new().unwrap();
    let engine = engine_with_hosted(&root, RepositoryStatus::InService);
    write_artifact(&root, "s0/releases/org/example/lib-1.0.jar", b"jar bytes");

    let mut body = Vec::new();
    let ack = engine
        .download(
            "s0",
            "releases",
            "org/example/lib-1.0.jar",
            &HeaderMap::new(),
            &mut body,
        )
        .await
        .unwrap();

    assert_eq!(ack.bytes_written, 9);
    assert_eq!(body, b"jar bytes");

    let metrics = engine.metrics();
    assert_eq!(metrics.total_requests, 1);
    assert_eq!(metrics.hosted_hits, 1);
    assert_eq!(metrics.bytes_served, 9);
}

#[tokio::test]
async fn test_hosted_miss_is_terminal_404() {
    let root = TempDir::new().unwrap();
    let engine = engine_with_hosted(&root, RepositoryStatus::InService);

    let err = engine
        .resolve("s0", "releases", "missing.jar", &HeaderMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::NotFound(_)));
    assert_eq!(err.to_http_status(), 404);
}

#[tokio::test]
async fn test_unknown_storage_is_500() {
    let root = TempDir::new().unwrap();
    let engine = engine_with_hosted(&root, RepositoryStatus::InService);

    let err = engine
        .resolve("nope", "releases", "a.jar", &HeaderMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::StorageNotFound(_)));
    assert_eq!(err.to_http_status(), 500);
    assert_eq!(err.to_string(), "Unable to find storage by ID nope");
}

#[tokio::test]
async fn test_unknown_repository_is_500() {
    let root = TempDir::new().unwrap();
    let engine = engine_with_hosted(&root, RepositoryStatus::InService);

    let err = engine
        .resolve("s0", "nope", "a.jar", &HeaderMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::RepositoryNotFound { .. }));
    assert_eq!(err.to_http_status(), 500);
}

#[tokio::test]
async fn test_out_of_service_is_503() {
    let root = TempDir::new().unwrap();
    let engine = engine_with_hosted(&root, RepositoryStatus::OutOfService);
    write_artifact(&root, "s0/releases/present.jar", b"bytes");

    // Present on disk, but the status check short-circuits first.
    let err = engine
        .resolve("s0", "releases", "present.jar", &HeaderMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::RepositoryUnavailable { .. }));
    assert_eq!(err.to_http_status(), 503);
}

#[tokio::test]
async fn test_traversal_rejected() {
    let root = TempDir::new().unwrap();
    let engine = engine_with_hosted(&root, RepositoryStatus::InService);
    // A secret outside the repository root must be unreachable.
    write_artifact(&root, "s0/secret.txt", b"secret");

    let err = engine
        .resolve("s0", "releases", "../secret.txt", &HeaderMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::InvalidPath(_)));
}

#[tokio::test]
async fn test_reload_swaps_snapshot_for_new_requests() {
    let root = TempDir::new().unwrap();
    let engine = engine_with_hosted(&root, RepositoryStatus::InService);
    write_artifact(&root, "s0/releases/a.jar", b"bytes");

    // Take the repository out of service through a full reload.
    let mut snapshot_config = artifact_relay::RegistrySnapshot::new();
    let mut storage = Storage::new("s0", root.path().join("s0"));
    storage.repositories.insert(
        "releases".into(),
        hosted("releases", RepositoryStatus::OutOfService),
    );
    snapshot_config.insert_storage(storage).unwrap();
    engine.registry().reload(snapshot_config).unwrap();

    let err = engine
        .resolve("s0", "releases", "a.jar", &HeaderMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::RepositoryUnavailable { .. }));
}
