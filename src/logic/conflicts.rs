use std::collections::HashMap;

use crate::error::ProtocolError;
use crate::model::{
    ChangeItemStatus, ComponentType, ConflictCheckResult, ConflictDetail, DeploymentBucket, Id,
};
use crate::store::traits::Store;

/// Staleness check of a bucket against the current production deployment.
///
/// A bucket is stale as soon as production has advanced past its recorded
/// base; any deployment increments the id, so a differing id always implies
/// at least one intervening deployment record. The check never mutates the
/// bucket, and the only sanctioned resolution is discard-and-recreate.
pub struct ConflictChecker;

impl ConflictChecker {
    pub async fn check<S: Store>(
        store: &S,
        project_id: &Id,
        bucket_id: &Id,
    ) -> Result<ConflictCheckResult, ProtocolError> {
        let bucket = store
            .get_bucket(project_id, bucket_id)
            .await?
            .ok_or_else(|| ProtocolError::not_found(format!("bucket '{}'", bucket_id)))?;
        Self::check_bucket(store, &bucket).await
    }

    pub async fn check_bucket<S: Store>(
        store: &S,
        bucket: &DeploymentBucket,
    ) -> Result<ConflictCheckResult, ProtocolError> {
        let (current_id, touched) = Self::touched_since_base(store, bucket).await?;

        if current_id == bucket.base_deployment_id {
            return Ok(ConflictCheckResult::clean(current_id));
        }

        let conflicts = bucket
            .items
            .iter()
            .filter_map(|item| {
                let key = (
                    item.component.component_type,
                    item.component.component_id.clone(),
                );
                touched.get(&key).map(|deployment_id| ConflictDetail {
                    component_name: item.component.component_name.clone(),
                    message: format!(
                        "{} '{}' was modified by deployment {} after this bucket was created",
                        item.component.component_type,
                        item.component.component_name,
                        deployment_id
                    ),
                })
            })
            .collect();

        Ok(ConflictCheckResult {
            has_conflicts: true,
            current_deployment_id: current_id,
            bucket_base_deployment_id: bucket.base_deployment_id,
            conflicts,
        })
    }

    /// Refresh the derived conflict view on a bucket about to be returned to
    /// a caller: `has_conflicts` plus per-item statuses. Storage is untouched.
    pub async fn annotate<S: Store>(
        store: &S,
        bucket: &mut DeploymentBucket,
    ) -> Result<(), ProtocolError> {
        let (current_id, touched) = Self::touched_since_base(store, bucket).await?;
        bucket.has_conflicts = current_id != bucket.base_deployment_id;
        for item in &mut bucket.items {
            let key = (
                item.component.component_type,
                item.component.component_id.clone(),
            );
            item.status = if bucket.has_conflicts && touched.contains_key(&key) {
                ChangeItemStatus::Conflict
            } else {
                ChangeItemStatus::Pending
            };
        }
        Ok(())
    }

    /// Components touched by any deployment strictly after the bucket's base
    /// up to and including the current production deployment, mapped to the
    /// first deployment id that touched them.
    async fn touched_since_base<S: Store>(
        store: &S,
        bucket: &DeploymentBucket,
    ) -> Result<(i64, HashMap<(ComponentType, Id), i64>), ProtocolError> {
        let current_id = store.current_deployment_id(&bucket.project_id).await?;
        let mut touched = HashMap::new();
        if current_id == bucket.base_deployment_id {
            return Ok((current_id, touched));
        }

        let intervening = store
            .list_deployments_between(&bucket.project_id, bucket.base_deployment_id, current_id)
            .await?;
        for deployment in &intervening {
            let components = deployment
                .deployed_datablocks
                .iter()
                .map(|id| (ComponentType::Datablock, id.clone()))
                .chain(
                    deployment
                        .deployed_pipelines
                        .iter()
                        .map(|id| (ComponentType::Pipeline, id.clone())),
                )
                .chain(
                    deployment
                        .deployed_features
                        .iter()
                        .map(|id| (ComponentType::Feature, id.clone())),
                );
            for key in components {
                touched.entry(key).or_insert(deployment.deployment_id);
            }
        }
        Ok((current_id, touched))
    }
}
