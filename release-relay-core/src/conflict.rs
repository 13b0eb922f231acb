//! Name-collision handling inside a bucket.

use tracing::{error, info};

use crate::contract::{ArtifactRepository, Bucket};
use crate::error::RelayError;

/// Remove the asset named exactly `name` from `bucket` so it can be republished.
///
/// Called after an upload answered with [`RelayError::NameConflict`]. If no
/// asset of that name is listed any more, the conflict counts as resolved.
/// Listing or deletion failures become [`RelayError::ConflictUnresolved`]; the
/// removal itself is not retried here.
pub async fn resolve_conflict<R>(repository: &R, bucket: &Bucket, name: &str) -> Result<(), RelayError>
where
    R: ArtifactRepository + ?Sized,
{
    let assets = repository.list_assets(bucket).await.map_err(|e| {
        error!(tag = %bucket.tag, name, error = %e, "Listing assets for conflict resolution failed");
        RelayError::ConflictUnresolved(format!("listing assets of {} failed: {e}", bucket.tag))
    })?;

    let Some(stale) = assets.into_iter().find(|asset| asset.name == name) else {
        info!(tag = %bucket.tag, name, "Conflicting asset already gone");
        return Ok(());
    };

    repository
        .delete_asset(bucket, stale.id)
        .await
        .map_err(|e| {
            error!(tag = %bucket.tag, name, asset_id = stale.id, error = %e, "Deleting stale asset failed");
            RelayError::ConflictUnresolved(format!(
                "deleting {name} (asset {}) failed: {e}",
                stale.id
            ))
        })?;

    info!(tag = %bucket.tag, name, asset_id = stale.id, size = stale.size_bytes, "Removed stale asset");
    Ok(())
}
