//! Revision tracking for the scale sets owned by one logical service.

use scaleswap_core::{ScaleSetRevision, Scope};
use scaleswap_gateway::ComputeGateway;

use crate::error::{DeployError, Result};

/// All scale sets tagged with `owner_id`, newest first.
pub async fn list_owned(
    compute: &dyn ComputeGateway,
    scope: &Scope,
    owner_id: &str,
) -> Result<Vec<ScaleSetRevision>> {
    let mut owned: Vec<ScaleSetRevision> = compute
        .list_by_resource_group(scope)
        .await?
        .into_iter()
        .filter(|ss| ss.is_owned_by(owner_id))
        .collect();
    sort_newest_first(&mut owned);
    Ok(owned)
}

/// Sort by the `created-at` tag, descending. Unparseable timestamps sort
/// last; equal timestamps fall back to the revision number.
pub fn sort_newest_first(revisions: &mut [ScaleSetRevision]) {
    // Option orders None below Some, so reversing puts untagged entries last.
    revisions.sort_by(|a, b| {
        b.created_at()
            .cmp(&a.created_at())
            .then_with(|| b.revision().cmp(&a.revision()))
    });
}

/// The newest revision with capacity, else the newest overall.
///
/// Expects `revisions` in [`list_owned`] order.
pub fn most_recent_active(revisions: &[ScaleSetRevision]) -> Option<&ScaleSetRevision> {
    revisions
        .iter()
        .find(|ss| ss.capacity > 0)
        .or_else(|| revisions.first())
}

/// One past the highest revision tag, or 1 when nothing is owned yet.
///
/// Fails if the highest tag leaves no room for a larger revision.
pub fn next_revision(revisions: &[ScaleSetRevision]) -> Result<u32> {
    match revisions.iter().filter_map(ScaleSetRevision::revision).max() {
        None => Ok(1),
        Some(max) => max.checked_add(1).ok_or_else(|| {
            DeployError::Validation(format!("revision tag {max} has no successor"))
        }),
    }
}

/// Deterministic name of a revision.
pub fn revision_name(name_prefix: &str, revision: u32) -> String {
    format!("{name_prefix}__{revision}")
}
