use crate::error::ProtocolError;
use crate::logic::validate::PayloadValidator;
use crate::model::{BucketStatus, ChangeItem, DeploymentBucket, Id, NewChangeItem};
use crate::store::traits::Store;

/// Bucket lifecycle operations: staging edits, removing them, and discarding
/// the bucket. Deployment lives in the executor.
pub struct BucketOperations;

impl BucketOperations {
    /// Stage a change into the project's active bucket, creating the bucket
    /// first when none exists. The new bucket's `base_deployment_id` is the
    /// production deployment id at creation time and never changes afterwards.
    pub async fn stage_change<S: Store>(
        store: &S,
        project_id: &Id,
        request: NewChangeItem,
    ) -> Result<DeploymentBucket, ProtocolError> {
        if store.get_project(project_id).await?.is_none() {
            return Err(ProtocolError::not_found(format!("project '{}'", project_id)));
        }
        PayloadValidator::validate(&request)?;

        let bucket = match store.get_active_bucket(project_id).await? {
            Some(bucket) => bucket,
            None => {
                let base = store.current_deployment_id(project_id).await?;
                let bucket = DeploymentBucket::new(project_id.clone(), base);
                match store.insert_bucket(bucket.clone()).await {
                    Ok(()) => {
                        log::info!(
                            "created bucket {} for project {} at base deployment {}",
                            bucket.id,
                            project_id,
                            base
                        );
                        bucket
                    }
                    // Lost the creation race against a concurrent stage call;
                    // attach to the bucket that won.
                    Err(insert_err) => store.get_active_bucket(project_id).await?.ok_or(
                        ProtocolError::Store(insert_err),
                    )?,
                }
            }
        };

        let item = ChangeItem::new(
            request.change_type,
            request.component,
            request.payload,
            request.change_summary,
        );
        // Atomic append: a deploy or discard that resolved the bucket in the
        // meantime rejects this write instead of being overwritten
        store
            .append_item(project_id, &bucket.id, item)
            .await?
            .ok_or_else(|| ProtocolError::invalid_state("bucket is no longer active"))
    }

    /// Remove a staged item from an active bucket. Removing the last item
    /// leaves an empty but still active bucket.
    pub async fn remove_item<S: Store>(
        store: &S,
        project_id: &Id,
        bucket_id: &Id,
        item_id: &Id,
    ) -> Result<DeploymentBucket, ProtocolError> {
        let bucket = store
            .get_bucket(project_id, bucket_id)
            .await?
            .ok_or_else(|| ProtocolError::not_found(format!("bucket '{}'", bucket_id)))?;
        if !bucket.is_active() {
            return Err(ProtocolError::invalid_state(format!(
                "cannot remove items from a {} bucket",
                bucket.status.as_str()
            )));
        }
        if !bucket.items.iter().any(|item| &item.id == item_id) {
            return Err(ProtocolError::not_found(format!(
                "change item '{}'",
                item_id
            )));
        }
        store
            .remove_item(project_id, bucket_id, item_id)
            .await?
            .ok_or_else(|| ProtocolError::invalid_state("bucket is no longer active"))
    }

    /// Discard an active bucket, dropping its staged items. History is left
    /// untouched and the bucket is never reused.
    pub async fn discard<S: Store>(
        store: &S,
        project_id: &Id,
        bucket_id: &Id,
    ) -> Result<(), ProtocolError> {
        let bucket = store
            .get_bucket(project_id, bucket_id)
            .await?
            .ok_or_else(|| ProtocolError::not_found(format!("bucket '{}'", bucket_id)))?;
        if !bucket.is_active() {
            return Err(ProtocolError::invalid_state(format!(
                "only an active bucket can be discarded, this one is {}",
                bucket.status.as_str()
            )));
        }
        let transitioned = store
            .transition_bucket(
                project_id,
                bucket_id,
                BucketStatus::Active,
                BucketStatus::Discarded,
            )
            .await?;
        if !transitioned {
            // The bucket left `active` between the read and the swap
            return Err(ProtocolError::invalid_state(
                "bucket is no longer active".to_string(),
            ));
        }
        log::info!("discarded bucket {} for project {}", bucket_id, project_id);
        Ok(())
    }
}
