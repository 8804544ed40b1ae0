//! Group aggregation: ordered first-match resolution over member
//! repositories

use crate::engine::{ResolutionEngine, ResolvedArtifact};
use crate::error::{RelayError, Result};
use crate::models::{ArtifactPath, Repository, RepositoryRef, Storage};
use crate::registry::RegistrySnapshot;
use http::HeaderMap;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Resolve an artifact through a group's members, in declared order
///
/// The first member that resolves wins and iteration stops; order is a
/// first-match policy, not a merge. Member failures are collected for
/// diagnostics only. A `CyclicGroupReference` from a nested group is a
/// configuration defect and propagates immediately.
pub(crate) async fn resolve_members(
    engine: &ResolutionEngine,
    snapshot: &RegistrySnapshot,
    storage: &Storage,
    repository: &Repository,
    path: &ArtifactPath,
    headers: &HeaderMap,
    visited: &mut HashSet<RepositoryRef>,
) -> Result<ResolvedArtifact> {
    let members = repository.group_members().unwrap_or(&[]);
    let mut attempts = Vec::with_capacity(members.len());

    for member in members {
        debug!(
            group = %format_args!("{}:{}", storage.id, repository.id),
            member = %member,
            "Trying group member"
        );
        let outcome = engine
            .resolve_recursive(
                snapshot,
                &member.storage_id,
                &member.repository_id,
                path.as_str(),
                headers,
                visited,
            )
            .await;

        match outcome {
            Ok(artifact) => return Ok(artifact),
            Err(err @ RelayError::CyclicGroupReference(_)) => return Err(err),
            Err(err) => {
                if !err.is_miss() {
                    warn!(member = %member, "Group member failed: {}", err);
                }
                attempts.push(format!("{}: {}", member, err));
            }
        }
    }

    Err(RelayError::NotFoundInGroup {
        storage_id: storage.id.clone(),
        repository_id: repository.id.clone(),
        path: path.to_string(),
        attempts,
    })
}
